//! Integration tests: serve the relay on a free port with LINE and Discord mocked by wiremock,
//! then POST LINE webhook bodies and check what reaches Discord.

use lib::channels::discord::DiscordWebhook;
use lib::channels::line::LineChannel;
use lib::channels::ChannelRegistry;
use lib::config::Config;
use lib::relay::Relay;
use lib::server::{self, RelayState};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::oneshot;
use wiremock::matchers::{body_json, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn free_port() -> u16 {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").expect("bind free port");
    listener.local_addr().expect("local_addr").port()
}

struct Running {
    base_url: String,
    _shutdown: oneshot::Sender<()>,
}

async fn start_relay(line: &MockServer, discord: &MockServer) -> Running {
    let relay = Arc::new(Relay::new(
        Arc::new(LineChannel::new("line-token".into(), line.uri())),
        Arc::new(DiscordWebhook::new(format!("{}/api/webhooks/1/tok", discord.uri()))),
        "C1".to_string(),
    ));
    let state = RelayState {
        relay,
        channel_registry: Arc::new(ChannelRegistry::new()),
        discord_gateway: None,
    };
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("bind listener");
    let addr = listener.local_addr().expect("local_addr");
    let (tx, rx) = oneshot::channel::<()>();
    tokio::spawn(async move {
        let _ = server::serve(listener, state, async {
            let _ = rx.await;
        })
        .await;
    });
    Running {
        base_url: format!("http://{}", addr),
        _shutdown: tx,
    }
}

async fn post_webhook(base_url: &str, body: &str) -> (u16, String) {
    let res = reqwest::Client::new()
        .post(format!("{}/line", base_url))
        .header("content-type", "application/json")
        .body(body.to_string())
        .send()
        .await
        .expect("POST /line");
    let status = res.status().as_u16();
    (status, res.text().await.expect("response body"))
}

async fn mock_profile(line: &MockServer, user_id: &str, status: u16, body: serde_json::Value) {
    Mock::given(method("GET"))
        .and(path(format!("/v2/bot/profile/{}", user_id)))
        .respond_with(ResponseTemplate::new(status).set_body_json(body))
        .mount(line)
        .await;
}

const ALICE_HI: &str =
    r#"{"events":[{"type":"message","source":{"userId":"U1"},"message":{"text":"hi"}}]}"#;

#[tokio::test]
async fn line_message_reaches_discord_with_display_name() {
    let line = MockServer::start().await;
    let discord = MockServer::start().await;
    mock_profile(&line, "U1", 200, serde_json::json!({ "displayName": "Alice" })).await;
    Mock::given(method("POST"))
        .and(path("/api/webhooks/1/tok"))
        .and(body_json(serde_json::json!({ "content": "[Line] Alice: hi" })))
        .respond_with(ResponseTemplate::new(204))
        .expect(1)
        .mount(&discord)
        .await;

    let running = start_relay(&line, &discord).await;
    let (status, body) = post_webhook(&running.base_url, ALICE_HI).await;
    assert_eq!(status, 200);
    assert_eq!(body, "OK");
}

#[tokio::test]
async fn unknown_profile_falls_back_to_user_id() {
    let line = MockServer::start().await;
    let discord = MockServer::start().await;
    mock_profile(&line, "U1", 404, serde_json::json!({ "message": "Not found" })).await;
    Mock::given(method("POST"))
        .and(body_json(serde_json::json!({ "content": "[Line] U1: hi" })))
        .respond_with(ResponseTemplate::new(204))
        .expect(1)
        .mount(&discord)
        .await;

    let running = start_relay(&line, &discord).await;
    let (status, body) = post_webhook(&running.base_url, ALICE_HI).await;
    assert_eq!((status, body.as_str()), (200, "OK"));
}

#[tokio::test]
async fn message_events_are_forwarded_in_payload_order() {
    let line = MockServer::start().await;
    let discord = MockServer::start().await;
    mock_profile(&line, "U1", 200, serde_json::json!({ "displayName": "Alice" })).await;
    mock_profile(&line, "U2", 200, serde_json::json!({ "displayName": "Carol" })).await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(204))
        .expect(3)
        .mount(&discord)
        .await;

    let running = start_relay(&line, &discord).await;
    let body = r#"{"events":[
        {"type":"message","source":{"userId":"U1"},"message":{"type":"text","text":"one"}},
        {"type":"follow","source":{"userId":"U2"}},
        {"type":"message","source":{"userId":"U2"},"message":{"type":"text","text":"two"}},
        {"type":"message","source":{"userId":"U2"},"message":{"type":"sticker"}},
        {"type":"message","source":{"userId":"U1"},"message":{"type":"text","text":"three"}}
    ]}"#;
    let (status, _) = post_webhook(&running.base_url, body).await;
    assert_eq!(status, 200);

    let contents: Vec<String> = discord
        .received_requests()
        .await
        .expect("request recording enabled")
        .iter()
        .map(|r| {
            let v: serde_json::Value = r.body_json().expect("json body");
            v["content"].as_str().unwrap_or_default().to_string()
        })
        .collect();
    assert_eq!(
        contents,
        vec!["[Line] Alice: one", "[Line] Carol: two", "[Line] Alice: three"]
    );
}

#[tokio::test]
async fn body_without_events_is_acknowledged_and_ignored() {
    let line = MockServer::start().await;
    let discord = MockServer::start().await;
    let running = start_relay(&line, &discord).await;

    for body in [r#"{"destination":"Uxxx"}"#, "not json", r#"{"events":"nope"}"#] {
        let (status, text) = post_webhook(&running.base_url, body).await;
        assert_eq!((status, text.as_str()), (200, "OK"), "body: {}", body);
    }
    assert!(line.received_requests().await.unwrap().is_empty());
    assert!(discord.received_requests().await.unwrap().is_empty());
}

#[tokio::test]
async fn discord_failure_still_acknowledges_line() {
    let line = MockServer::start().await;
    let discord = MockServer::start().await;
    mock_profile(&line, "U1", 200, serde_json::json!({ "displayName": "Alice" })).await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(500).set_body_string("boom"))
        .expect(1)
        .mount(&discord)
        .await;

    let running = start_relay(&line, &discord).await;
    let (status, body) = post_webhook(&running.base_url, ALICE_HI).await;
    assert_eq!((status, body.as_str()), (200, "OK"));
}

/// Full startup path: credentials from config, Discord gateway unreachable. The webhook side
/// must keep working while the gateway retries. The server task is left running when the test ends.
#[tokio::test]
async fn run_relay_serves_webhook_while_gateway_is_down() {
    let line = MockServer::start().await;
    let discord = MockServer::start().await;
    mock_profile(&line, "U1", 200, serde_json::json!({ "displayName": "Alice" })).await;
    Mock::given(method("POST"))
        .and(path("/api/webhooks/1/tok"))
        .and(body_json(serde_json::json!({ "content": "[Line] Alice: hi" })))
        .respond_with(ResponseTemplate::new(204))
        .expect(1)
        .mount(&discord)
        .await;

    let port = free_port();
    let mut config = Config::default();
    config.gateway.bind = "127.0.0.1".to_string();
    config.gateway.port = port;
    config.discord.bot_token = Some("bot-token".into());
    config.discord.webhook_url = Some(format!("{}/api/webhooks/1/tok", discord.uri()));
    config.discord.gateway_url = Some("ws://127.0.0.1:1".into());
    config.line.access_token = Some("line-token".into());
    config.line.group_id = Some("C1".into());
    config.line.api_base = Some(line.uri());

    let relay_handle = tokio::spawn(async move {
        let _ = lib::server::run_relay(config).await;
    });

    let base_url = format!("http://127.0.0.1:{}", port);
    let client = reqwest::Client::new();
    let mut health = None;
    for _ in 0..100 {
        if let Ok(resp) = client.get(format!("{}/", base_url)).send().await {
            if resp.status().is_success() {
                health = Some(resp.json::<serde_json::Value>().await.expect("parse JSON"));
                break;
            }
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    let Some(health) = health else {
        relay_handle.abort();
        panic!("GET {}/ did not return 200 within 5s", base_url);
    };
    assert_eq!(health["runtime"], "running");
    assert_ne!(health["discord"], "connected");
    let channels: Vec<&str> = health["channels"]
        .as_array()
        .expect("channels array")
        .iter()
        .filter_map(|v| v.as_str())
        .collect();
    assert_eq!(channels, vec!["discord-gateway", "discord-webhook", "line"]);

    let (status, body) = post_webhook(&base_url, ALICE_HI).await;
    assert_eq!((status, body.as_str()), (200, "OK"));
}

#[tokio::test]
async fn run_relay_refuses_to_start_without_credentials() {
    let mut config = Config::default();
    config.gateway.bind = "127.0.0.1".to_string();
    config.gateway.port = free_port();
    let err = lib::server::run_relay(config).await.unwrap_err().to_string();
    assert!(err.contains("DISCORD_TOKEN"), "{}", err);
}
