//! HTTP routes: LINE webhook and health.

use crate::channels::discord::DiscordGateway;
use crate::channels::line::parse_webhook_events;
use crate::channels::ChannelRegistry;
use crate::relay::Relay;
use axum::{
    body::Bytes,
    extract::State,
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use serde_json::json;
use std::sync::Arc;

/// Shared state for the handlers.
#[derive(Clone)]
pub struct RelayState {
    pub relay: Arc<Relay>,
    pub channel_registry: Arc<ChannelRegistry>,
    /// Present when the Discord gateway is running; reported by the health probe.
    pub discord_gateway: Option<Arc<DiscordGateway>>,
}

pub fn router(state: RelayState) -> Router {
    Router::new()
        .route("/", get(health_http))
        .route("/line", post(line_webhook))
        .with_state(state)
}

/// POST /line: receives LINE webhook events and relays each text message to Discord, in order.
///
/// Always answers 200 "OK": LINE redelivers unacknowledged events, which would duplicate
/// messages. The `X-Line-Signature` header is not verified.
async fn line_webhook(State(state): State<RelayState>, body: Bytes) -> (StatusCode, &'static str) {
    let events = match parse_webhook_events(&body) {
        Ok(events) => events,
        Err(e) => {
            log::debug!("line webhook: ignoring body: {}", e);
            return (StatusCode::OK, "OK");
        }
    };
    log::debug!("line webhook: {} message event(s)", events.len());
    for event in events {
        state.relay.dispatch(event).await;
    }
    (StatusCode::OK, "OK")
}

/// GET / returns a simple health JSON (for probes).
async fn health_http(State(state): State<RelayState>) -> Json<serde_json::Value> {
    let discord = match state.discord_gateway {
        Some(ref gateway) => json!(gateway.state().await),
        None => serde_json::Value::Null,
    };
    Json(json!({
        "runtime": "running",
        "discord": discord,
        "channels": state.channel_registry.ids().await,
    }))
}
