//! Relay service: resolve LINE display names and forward messages in both directions.
//!
//! Stateless apart from the channel clients; shared by the webhook handler and the
//! Discord ingress loop behind an `Arc`. Forwarding failures are logged and swallowed.

use crate::channels::discord::DiscordWebhook;
use crate::channels::line::LineChannel;
use crate::channels::{ChannelError, InboundEvent};
use crate::config::{self, Config, Credentials};
use std::sync::Arc;

/// Prefix marking messages that came from LINE when they show up in Discord.
const LINE_PREFIX: &str = "[Line]";

/// Content posted to Discord for a LINE message.
pub fn format_for_discord(name: &str, text: &str) -> String {
    format!("{} {}: {}", LINE_PREFIX, name, text)
}

/// Text pushed to LINE for a Discord message.
pub fn format_for_line(name: &str, text: &str) -> String {
    format!("{}: {}", name, text)
}

pub struct Relay {
    line: Arc<LineChannel>,
    discord: Arc<DiscordWebhook>,
    line_group_id: String,
}

impl Relay {
    pub fn new(line: Arc<LineChannel>, discord: Arc<DiscordWebhook>, line_group_id: String) -> Self {
        Self {
            line,
            discord,
            line_group_id,
        }
    }

    /// Build the relay and its two outbound clients from resolved credentials.
    pub fn from_config(config: &Config, credentials: &Credentials) -> Self {
        let line = LineChannel::new(
            credentials.line_access_token.clone(),
            config::resolve_line_api_base(config),
        );
        let discord = DiscordWebhook::new(credentials.discord_webhook_url.clone());
        Self::new(
            Arc::new(line),
            Arc::new(discord),
            credentials.line_group_id.clone(),
        )
    }

    pub fn line(&self) -> Arc<LineChannel> {
        self.line.clone()
    }

    pub fn discord(&self) -> Arc<DiscordWebhook> {
        self.discord.clone()
    }

    /// LINE display name for `user_id`, or `user_id` itself when the lookup fails.
    /// Every call performs a lookup.
    pub async fn resolve_display_name(&self, user_id: &str) -> String {
        match self.line.get_profile(user_id).await {
            Ok(profile) => match profile.display_name.filter(|n| !n.trim().is_empty()) {
                Some(name) => name,
                None => {
                    log::debug!("line profile for {} has no displayName", user_id);
                    user_id.to_string()
                }
            },
            Err(e) => {
                log::warn!("line profile lookup for {} failed: {}", user_id, e);
                user_id.to_string()
            }
        }
    }

    /// LINE → Discord: resolve the sender and post `[Line] <name>: <text>` through the webhook.
    pub async fn forward_line_to_discord(&self, sender_id: &str, text: &str) {
        let name = self.resolve_display_name(sender_id).await;
        let content = format_for_discord(&name, text);
        log::info!("relaying to discord: {}", content);
        match self.discord.execute(&content).await {
            Ok(()) => log::debug!("discord webhook accepted message"),
            Err(e) => log_forward_error("discord", &e),
        }
    }

    /// Discord → LINE: push `<name>: <text>` into the configured group.
    pub async fn forward_discord_to_line(&self, author_name: &str, text: &str) {
        let message = format_for_line(author_name, text);
        log::info!("relaying to line: {}", message);
        match self.line.push_text(&self.line_group_id, &message).await {
            Ok(()) => log::debug!("line push accepted message"),
            Err(e) => log_forward_error("line", &e),
        }
    }

    /// Forward one inbound event to the opposite platform.
    pub async fn dispatch(&self, event: InboundEvent) {
        match event {
            InboundEvent::FromLine { sender_id, text } => {
                self.forward_line_to_discord(&sender_id, &text).await
            }
            InboundEvent::FromDiscord { author_name, text } => {
                self.forward_discord_to_line(&author_name, &text).await
            }
        }
    }
}

fn log_forward_error(target: &str, e: &ChannelError) {
    match e {
        ChannelError::Rejected { .. } => log::warn!("forward to {} rejected: {}", target, e),
        _ => log::warn!("forward to {} failed: {}", target, e),
    }
}
