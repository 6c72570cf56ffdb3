//! Discord gateway connection: identify, heartbeat, resume, reconnect.
//!
//! Runs as one background task and forwards READY and MESSAGE_CREATE events to a
//! `DiscordSession`. Transient failures reconnect with backoff; authentication and
//! intent errors end the task, which closes the session.

use crate::channels::discord::protocol::{self, Action, GatewayError, GatewayPayload, SessionState};
use crate::channels::discord::session::{DiscordSession, GatewayEvent};
use crate::channels::discord::DEFAULT_INTENTS;
use crate::channels::registry::ChannelHandle;
use futures_util::{SinkExt, Stream, StreamExt};
use serde::Serialize;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, Notify, RwLock};
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::{self, Message};

const INITIAL_BACKOFF: Duration = Duration::from_secs(1);
const MAX_BACKOFF: Duration = Duration::from_secs(60);
/// Events waiting for the ingress. The connection loop never blocks on this buffer; when it is
/// full (LINE pushes lagging far behind), new events are dropped so heartbeats keep flowing.
const EVENT_BUFFER: usize = 256;

/// Connection lifecycle as seen from outside the task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    Reconnecting,
    /// Terminal: the gateway rejected the token or intents.
    Failed,
}

enum ConnectionEnd {
    Stopped,
    Reconnect,
    /// The session (receiver) was dropped; nobody is listening any more.
    SessionClosed,
}

/// Discord gateway client for one bot token.
pub struct DiscordGateway {
    id: String,
    token: String,
    url: String,
    intents: u64,
    running: AtomicBool,
    shutdown: Notify,
    state: RwLock<ConnectionState>,
}

impl DiscordGateway {
    pub fn new(token: String, url: String) -> Self {
        Self {
            id: "discord-gateway".to_string(),
            token,
            url,
            intents: DEFAULT_INTENTS,
            running: AtomicBool::new(false),
            shutdown: Notify::new(),
            state: RwLock::new(ConnectionState::Disconnected),
        }
    }

    fn running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    pub async fn state(&self) -> ConnectionState {
        *self.state.read().await
    }

    async fn set_state(&self, next: ConnectionState) {
        let mut g = self.state.write().await;
        if *g != next {
            log::debug!("discord gateway: {:?} -> {:?}", *g, next);
            *g = next;
        }
    }

    /// Start the connection loop. Returns the session that yields messages and the task handle.
    pub fn start(self: Arc<Self>) -> (DiscordSession, JoinHandle<()>) {
        self.running.store(true, Ordering::SeqCst);
        let (tx, rx) = mpsc::channel(EVENT_BUFFER);
        log::info!("discord gateway: starting connection loop");
        let handle = tokio::spawn(async move {
            run_gateway_loop(self, tx).await;
        });
        (DiscordSession::new(rx), handle)
    }

    /// Sleep for `d`; returns false if stopped meanwhile.
    async fn sleep_unless_stopped(&self, d: Duration) -> bool {
        tokio::select! {
            _ = tokio::time::sleep(d) => self.running(),
            _ = self.shutdown.notified() => false,
        }
    }

    async fn run_connection(
        &self,
        url: &str,
        session: &mut SessionState,
        tx: &mpsc::Sender<GatewayEvent>,
    ) -> Result<ConnectionEnd, GatewayError> {
        log::debug!("discord gateway: connecting to {}", url);
        let (ws, _) = tokio::select! {
            res = tokio_tungstenite::connect_async(url) => res?,
            _ = self.shutdown.notified() => return Ok(ConnectionEnd::Stopped),
        };
        let (mut sink, mut stream) = ws.split();

        let hello = tokio::select! {
            res = next_payload(&mut stream) => res?,
            _ = self.shutdown.notified() => return Ok(ConnectionEnd::Stopped),
        };
        let interval = Duration::from_millis(protocol::hello_interval(&hello)?);

        let opening = if session.can_resume() {
            log::debug!("discord gateway: resuming session");
            protocol::resume(&self.token, session)
        } else {
            protocol::identify(&self.token, self.intents)
        };
        tokio::select! {
            res = sink.send(Message::Text(opening.to_string())) => res?,
            _ = self.shutdown.notified() => return Ok(ConnectionEnd::Stopped),
        }

        // First beat lands at a random point within the interval, as the gateway asks.
        let first = tokio::time::Instant::now() + interval.mul_f64(jitter());
        let mut heartbeat = tokio::time::interval_at(first, interval);
        heartbeat.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        let mut awaiting_ack = false;

        loop {
            tokio::select! {
                _ = self.shutdown.notified() => {
                    let _ = sink.send(Message::Close(None)).await;
                    return Ok(ConnectionEnd::Stopped);
                }
                _ = heartbeat.tick() => {
                    if awaiting_ack {
                        return Err(GatewayError::ZombieConnection);
                    }
                    sink.send(Message::Text(protocol::heartbeat(session.seq).to_string())).await?;
                    awaiting_ack = true;
                }
                msg = stream.next() => {
                    let Some(msg) = msg else {
                        return Err(closed_error(None));
                    };
                    let Some(payload) = decode_frame(msg?)? else {
                        continue;
                    };
                    match protocol::interpret(payload, session)? {
                        Action::None => {}
                        Action::HeartbeatNow => {
                            sink.send(Message::Text(protocol::heartbeat(session.seq).to_string())).await?;
                        }
                        Action::HeartbeatAck => awaiting_ack = false,
                        Action::Connected => {
                            log::info!("discord gateway: session resumed");
                            self.set_state(ConnectionState::Connected).await;
                        }
                        Action::Emit(event) => {
                            if matches!(event, GatewayEvent::Ready { .. }) {
                                self.set_state(ConnectionState::Connected).await;
                            }
                            if !deliver(tx, event) {
                                log::debug!("discord gateway: session dropped, stopping loop");
                                let _ = sink.send(Message::Close(None)).await;
                                return Ok(ConnectionEnd::SessionClosed);
                            }
                        }
                        Action::Reconnect => {
                            log::debug!("discord gateway: server requested reconnect");
                            let _ = sink.send(resumable_close()).await;
                            return Ok(ConnectionEnd::Reconnect);
                        }
                        Action::InvalidSession { resumable } => {
                            log::debug!("discord gateway: invalid session (resumable: {})", resumable);
                            if !resumable {
                                session.reset();
                            }
                            let _ = sink.send(resumable_close()).await;
                            let wait = Duration::from_millis(1000 + (4000.0 * jitter()) as u64);
                            if !self.sleep_unless_stopped(wait).await {
                                return Ok(ConnectionEnd::Stopped);
                            }
                            return Ok(ConnectionEnd::Reconnect);
                        }
                    }
                }
            }
        }
    }
}

async fn run_gateway_loop(gateway: Arc<DiscordGateway>, tx: mpsc::Sender<GatewayEvent>) {
    let mut session = SessionState::default();
    let mut backoff = INITIAL_BACKOFF;
    while gateway.running() {
        let next = if session.can_resume() {
            ConnectionState::Reconnecting
        } else {
            ConnectionState::Connecting
        };
        gateway.set_state(next).await;
        let url = session.connect_url(&gateway.url);
        let result = gateway.run_connection(&url, &mut session, &tx).await;
        let was_connected = gateway.state().await == ConnectionState::Connected;
        match result {
            Ok(ConnectionEnd::Stopped) | Ok(ConnectionEnd::SessionClosed) => break,
            Ok(ConnectionEnd::Reconnect) => backoff = INITIAL_BACKOFF,
            Err(e) if e.is_terminal() => {
                log::warn!("discord gateway: giving up: {}", e);
                gateway.set_state(ConnectionState::Failed).await;
                return;
            }
            Err(e) => {
                if e.invalidates_session() {
                    session.reset();
                }
                if was_connected {
                    backoff = INITIAL_BACKOFF;
                    log::debug!("discord gateway: connection lost: {}", e);
                } else {
                    log::warn!("discord gateway: connection failed: {}", e);
                }
                gateway.set_state(ConnectionState::Reconnecting).await;
                if !gateway.sleep_unless_stopped(backoff).await {
                    break;
                }
                backoff = (backoff * 2).min(MAX_BACKOFF);
            }
        }
    }
    gateway.set_state(ConnectionState::Disconnected).await;
    log::info!("discord gateway: connection loop stopped");
}

/// Next gateway payload, skipping non-text frames.
async fn next_payload<S>(stream: &mut S) -> Result<GatewayPayload, GatewayError>
where
    S: Stream<Item = Result<Message, tungstenite::Error>> + Unpin,
{
    loop {
        let Some(msg) = stream.next().await else {
            return Err(closed_error(None));
        };
        if let Some(payload) = decode_frame(msg?)? {
            return Ok(payload);
        }
    }
}

/// Hand an event to the session without waiting. Returns false once the session is gone.
fn deliver(tx: &mpsc::Sender<GatewayEvent>, event: GatewayEvent) -> bool {
    match tx.try_send(event) {
        Ok(()) => true,
        Err(TrySendError::Full(_)) => {
            log::warn!("discord gateway: event buffer full, dropping event");
            true
        }
        Err(TrySendError::Closed(_)) => false,
    }
}

fn decode_frame(msg: Message) -> Result<Option<GatewayPayload>, GatewayError> {
    match msg {
        Message::Text(text) => Ok(Some(serde_json::from_str(&text)?)),
        Message::Close(frame) => Err(closed_error(frame)),
        _ => Ok(None),
    }
}

fn closed_error(frame: Option<CloseFrame<'_>>) -> GatewayError {
    match frame {
        Some(f) => GatewayError::Closed {
            code: Some(u16::from(f.code)),
            reason: f.reason.to_string(),
        },
        None => GatewayError::Closed {
            code: None,
            reason: "connection ended".to_string(),
        },
    }
}

/// Closing with 1000/1001 invalidates the session; any other code keeps it resumable.
fn resumable_close() -> Message {
    Message::Close(Some(CloseFrame {
        code: CloseCode::from(4000),
        reason: "reconnecting".into(),
    }))
}

/// Uniform value in [0, 1]. Falls back to 1.0 if the OS RNG is unavailable.
fn jitter() -> f64 {
    let mut buf = [0u8; 4];
    if getrandom::getrandom(&mut buf).is_err() {
        return 1.0;
    }
    f64::from(u32::from_le_bytes(buf)) / f64::from(u32::MAX)
}

impl ChannelHandle for DiscordGateway {
    fn id(&self) -> &str {
        &self.id
    }

    fn stop(&self) {
        self.running.store(false, Ordering::SeqCst);
        self.shutdown.notify_one();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channels::ChatSession;
    use serde_json::{json, Value};
    use tokio::net::TcpListener;
    use tokio_tungstenite::WebSocketStream;

    async fn fake_gateway() -> (TcpListener, String) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let url = format!("ws://{}", listener.local_addr().unwrap());
        (listener, url)
    }

    async fn accept(listener: &TcpListener) -> WebSocketStream<tokio::net::TcpStream> {
        let (stream, _) = listener.accept().await.unwrap();
        tokio_tungstenite::accept_async(stream).await.unwrap()
    }

    async fn send_json(ws: &mut WebSocketStream<tokio::net::TcpStream>, v: Value) {
        ws.send(Message::Text(v.to_string())).await.unwrap();
    }

    async fn recv_json(ws: &mut WebSocketStream<tokio::net::TcpStream>) -> Value {
        loop {
            match ws.next().await.unwrap().unwrap() {
                Message::Text(text) => return serde_json::from_str(&text).unwrap(),
                _ => continue,
            }
        }
    }

    fn chat(content: &str) -> GatewayEvent {
        GatewayEvent::Message(crate::channels::ChatMessage {
            author_id: "42".into(),
            content: content.into(),
            ..Default::default()
        })
    }

    #[tokio::test]
    async fn full_buffer_drops_instead_of_waiting() {
        let (tx, mut rx) = mpsc::channel(1);
        assert!(deliver(&tx, chat("first")));
        assert!(deliver(&tx, chat("second")));
        match rx.recv().await {
            Some(GatewayEvent::Message(m)) => assert_eq!(m.content, "first"),
            other => panic!("unexpected {:?}", other),
        }
        assert!(rx.try_recv().is_err());

        drop(rx);
        assert!(!deliver(&tx, chat("third")));
    }

    #[tokio::test]
    async fn stop_while_waiting_for_hello() {
        let (listener, url) = fake_gateway().await;
        let server = tokio::spawn(async move {
            let mut ws = accept(&listener).await;
            // Never send Hello; wait for the client to go away.
            while let Some(Ok(_)) = ws.next().await {}
        });

        let gateway = Arc::new(DiscordGateway::new("bot-token".into(), url));
        let (_session, handle) = gateway.clone().start();
        tokio::time::sleep(Duration::from_millis(200)).await;
        gateway.stop();
        tokio::time::timeout(Duration::from_secs(5), handle)
            .await
            .expect("gateway task stops without Hello")
            .unwrap();
        assert_eq!(gateway.state().await, ConnectionState::Disconnected);
        server.abort();
    }

    #[test]
    fn jitter_in_range() {
        for _ in 0..100 {
            let j = jitter();
            assert!((0.0..=1.0).contains(&j));
        }
    }

    #[tokio::test]
    async fn identifies_and_delivers_messages() {
        let (listener, url) = fake_gateway().await;
        let server = tokio::spawn(async move {
            let mut ws = accept(&listener).await;
            send_json(&mut ws, json!({ "op": 10, "d": { "heartbeat_interval": 45000 } })).await;
            let identify = recv_json(&mut ws).await;
            assert_eq!(identify["op"], 2);
            assert_eq!(identify["d"]["token"], "bot-token");
            send_json(&mut ws, json!({
                "op": 0, "s": 1, "t": "READY",
                "d": { "user": { "id": "900", "username": "relay" }, "session_id": "s1" }
            }))
            .await;
            send_json(&mut ws, json!({
                "op": 0, "s": 2, "t": "MESSAGE_CREATE",
                "d": {
                    "channel_id": "10",
                    "content": "yo",
                    "author": { "id": "42", "username": "bob" },
                    "member": { "nick": "Bob" }
                }
            }))
            .await;
            // Hold the connection open until the client closes it.
            while let Some(Ok(msg)) = ws.next().await {
                if let Message::Close(_) = msg {
                    break;
                }
            }
        });

        let gateway = Arc::new(DiscordGateway::new("bot-token".into(), url));
        let (mut session, handle) = gateway.clone().start();
        let msg = session.next_message().await.unwrap();
        assert_eq!(msg.display_name(), "Bob");
        assert_eq!(msg.content, "yo");
        assert_eq!(session.self_id(), Some("900"));
        assert_eq!(gateway.state().await, ConnectionState::Connected);

        gateway.stop();
        handle.await.unwrap();
        assert_eq!(gateway.state().await, ConnectionState::Disconnected);
        server.await.unwrap();
    }

    #[tokio::test]
    async fn authentication_failure_is_terminal() {
        let (listener, url) = fake_gateway().await;
        let server = tokio::spawn(async move {
            let mut ws = accept(&listener).await;
            send_json(&mut ws, json!({ "op": 10, "d": { "heartbeat_interval": 45000 } })).await;
            let _identify = recv_json(&mut ws).await;
            ws.send(Message::Close(Some(CloseFrame {
                code: CloseCode::from(4004),
                reason: "Authentication failed.".into(),
            })))
            .await
            .unwrap();
        });

        let gateway = Arc::new(DiscordGateway::new("bad-token".into(), url));
        let (mut session, handle) = gateway.clone().start();
        assert!(session.next_message().await.is_none());
        handle.await.unwrap();
        assert_eq!(gateway.state().await, ConnectionState::Failed);
        server.await.unwrap();
    }

    #[tokio::test]
    async fn reconnect_request_resumes_session() {
        let (listener, url) = fake_gateway().await;
        let server = tokio::spawn(async move {
            let mut ws = accept(&listener).await;
            send_json(&mut ws, json!({ "op": 10, "d": { "heartbeat_interval": 45000 } })).await;
            let _identify = recv_json(&mut ws).await;
            send_json(&mut ws, json!({
                "op": 0, "s": 1, "t": "READY",
                "d": { "user": { "id": "900", "username": "relay" }, "session_id": "s1" }
            }))
            .await;
            send_json(&mut ws, json!({ "op": 7, "d": null })).await;
            drop(ws);

            let mut ws = accept(&listener).await;
            send_json(&mut ws, json!({ "op": 10, "d": { "heartbeat_interval": 45000 } })).await;
            let resume = recv_json(&mut ws).await;
            assert_eq!(resume["op"], 6);
            assert_eq!(resume["d"]["session_id"], "s1");
            assert_eq!(resume["d"]["seq"], 1);
            send_json(&mut ws, json!({ "op": 0, "s": 2, "t": "RESUMED", "d": null })).await;
            send_json(&mut ws, json!({
                "op": 0, "s": 3, "t": "MESSAGE_CREATE",
                "d": { "channel_id": "10", "content": "after", "author": { "id": "42", "username": "bob" } }
            }))
            .await;
            while let Some(Ok(msg)) = ws.next().await {
                if let Message::Close(_) = msg {
                    break;
                }
            }
        });

        let gateway = Arc::new(DiscordGateway::new("bot-token".into(), url));
        let (mut session, handle) = gateway.clone().start();
        let msg = session.next_message().await.unwrap();
        assert_eq!(msg.content, "after");
        assert_eq!(msg.display_name(), "bob");

        gateway.stop();
        handle.await.unwrap();
        server.await.unwrap();
    }
}
