//! LINE channel: profile lookup and push messages via the Messaging API, plus webhook payload parsing.

use crate::channels::inbound::InboundEvent;
use crate::channels::registry::ChannelHandle;
use crate::channels::ChannelError;
use reqwest::Url;
use serde::Deserialize;

/// Sender id used when a webhook event has no `source.userId` (e.g. users who have not consented).
pub const UNKNOWN_SENDER: &str = "Unbekannt";

/// Profile returned by `GET /v2/bot/profile/{userId}`.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LineProfile {
    #[serde(default)]
    pub display_name: Option<String>,
}

/// Webhook POST body. Events are kept raw so one malformed entry cannot reject the batch.
#[derive(Debug, Deserialize)]
struct WebhookBody {
    events: Vec<serde_json::Value>,
}

#[derive(Debug, Deserialize)]
struct WebhookEvent {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    source: Option<EventSource>,
    #[serde(default)]
    message: Option<EventMessage>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct EventSource {
    #[serde(default)]
    user_id: Option<String>,
}

#[derive(Debug, Deserialize)]
struct EventMessage {
    #[serde(default)]
    text: Option<String>,
}

/// Extract text message events from a webhook body, in payload order.
///
/// Errors only when the body as a whole is unusable (not JSON, no `events` array).
/// Individual entries that are not text messages or do not decode are skipped.
pub fn parse_webhook_events(body: &[u8]) -> Result<Vec<InboundEvent>, ChannelError> {
    let body: WebhookBody =
        serde_json::from_slice(body).map_err(|e| ChannelError::Malformed(e.to_string()))?;
    let mut out = Vec::new();
    for (index, raw) in body.events.into_iter().enumerate() {
        let event: WebhookEvent = match serde_json::from_value(raw) {
            Ok(e) => e,
            Err(e) => {
                log::debug!("line webhook: skipping malformed event #{}: {}", index, e);
                continue;
            }
        };
        if event.kind != "message" {
            log::debug!("line webhook: skipping {} event", event.kind);
            continue;
        }
        let Some(text) = event.message.and_then(|m| m.text) else {
            log::debug!("line webhook: skipping non-text message event #{}", index);
            continue;
        };
        let sender_id = event
            .source
            .and_then(|s| s.user_id)
            .unwrap_or_else(|| UNKNOWN_SENDER.to_string());
        out.push(InboundEvent::FromLine { sender_id, text });
    }
    Ok(out)
}

/// LINE Messaging API client bound to one channel access token.
pub struct LineChannel {
    id: String,
    access_token: String,
    api_base: String,
    client: reqwest::Client,
}

impl LineChannel {
    pub fn new(access_token: String, api_base: String) -> Self {
        Self {
            id: "line".to_string(),
            access_token,
            api_base: api_base.trim_end_matches('/').to_string(),
            client: reqwest::Client::new(),
        }
    }

    /// API URL under the base. Each segment is escaped on its own, so ids cannot add path parts.
    fn endpoint(&self, segments: &[&str]) -> Result<Url, ChannelError> {
        let mut url = Url::parse(&self.api_base)
            .map_err(|e| ChannelError::Malformed(format!("line api base: {}", e)))?;
        url.path_segments_mut()
            .map_err(|_| ChannelError::Malformed("line api base cannot hold a path".to_string()))?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    /// GET /v2/bot/profile/{userId}.
    pub async fn get_profile(&self, user_id: &str) -> Result<LineProfile, ChannelError> {
        let url = self.endpoint(&["v2", "bot", "profile", user_id])?;
        let res = self
            .client
            .get(url)
            .bearer_auth(&self.access_token)
            .send()
            .await?;
        if !res.status().is_success() {
            return Err(ChannelError::rejected("line profile", res).await);
        }
        Ok(res.json().await?)
    }

    /// POST /v2/bot/message/push with a single text message.
    pub async fn push_text(&self, to: &str, text: &str) -> Result<(), ChannelError> {
        let url = self.endpoint(&["v2", "bot", "message", "push"])?;
        let body = serde_json::json!({
            "to": to,
            "messages": [{ "type": "text", "text": text }],
        });
        let res = self
            .client
            .post(url)
            .bearer_auth(&self.access_token)
            .json(&body)
            .send()
            .await?;
        if !res.status().is_success() {
            return Err(ChannelError::rejected("line push", res).await);
        }
        Ok(())
    }
}

impl ChannelHandle for LineChannel {
    fn id(&self) -> &str {
        &self.id
    }
}
