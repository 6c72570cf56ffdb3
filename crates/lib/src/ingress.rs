//! Discord ingress: consume a chat session and relay each eligible message to LINE.

use crate::channels::discord::webhook_id_from_url;
use crate::channels::{ChatMessage, ChatSession, InboundEvent};
use crate::config::Config;
use crate::relay::Relay;
use std::sync::Arc;

/// Which Discord messages are relayed.
#[derive(Debug, Clone, Default)]
pub struct IngressFilter {
    /// Only relay from this channel when set.
    pub channel_id: Option<String>,
    /// Id of the webhook the relay posts LINE messages through; its posts are never relayed back.
    pub own_webhook_id: Option<String>,
    /// Drop messages from every webhook, not only our own.
    pub ignore_webhook_messages: bool,
}

impl IngressFilter {
    pub fn from_config(config: &Config) -> Self {
        Self {
            channel_id: config
                .discord
                .channel_id
                .as_ref()
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty()),
            own_webhook_id: config
                .discord
                .webhook_url
                .as_deref()
                .and_then(webhook_id_from_url),
            ignore_webhook_messages: config.discord.ignore_webhook_messages,
        }
    }
}

/// Decide whether `msg` goes to LINE. Returns the event to dispatch, or `None` to drop it.
pub fn to_inbound(msg: &ChatMessage, self_id: Option<&str>, filter: &IngressFilter) -> Option<InboundEvent> {
    if self_id == Some(msg.author_id.as_str()) {
        return None;
    }
    if let Some(ref webhook_id) = msg.webhook_id {
        if filter.ignore_webhook_messages || filter.own_webhook_id.as_ref() == Some(webhook_id) {
            log::debug!("discord ingress: skipping webhook {} message in {}", webhook_id, msg.channel_id);
            return None;
        }
    }
    if let Some(ref channel) = filter.channel_id {
        if *channel != msg.channel_id {
            return None;
        }
    }
    if msg.content.trim().is_empty() {
        log::debug!("discord ingress: skipping message without text from {}", msg.author_id);
        return None;
    }
    Some(InboundEvent::FromDiscord {
        author_name: msg.display_name().to_string(),
        text: msg.content.clone(),
    })
}

/// Relay messages until the session ends. Each message is forwarded before the next is read.
pub async fn run_discord_ingress<S: ChatSession>(mut session: S, relay: Arc<Relay>, filter: IngressFilter) {
    while let Some(msg) = session.next_message().await {
        log::debug!(
            "discord ingress: message from {} in {}",
            msg.display_name(),
            msg.channel_id
        );
        if let Some(event) = to_inbound(&msg, session.self_id(), &filter) {
            relay.dispatch(event).await;
        }
    }
    log::info!("discord ingress: session ended");
}
