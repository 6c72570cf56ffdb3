//! Inbound events: one per LINE webhook entry or Discord gateway message.

/// A message to be relayed to the opposite platform.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InboundEvent {
    /// Text posted in LINE; the sender still has to be resolved to a display name.
    FromLine { sender_id: String, text: String },
    /// Text posted in Discord; the author name is already the best available one.
    FromDiscord { author_name: String, text: String },
}

/// A message surfaced by a chat session (Discord `MESSAGE_CREATE`).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ChatMessage {
    pub author_id: String,
    pub username: String,
    /// Account-wide display name, if the user set one.
    pub global_name: Option<String>,
    /// Per-server nickname; only present for guild messages.
    pub nick: Option<String>,
    pub channel_id: String,
    pub content: String,
    /// Set when the message was posted through a webhook.
    pub webhook_id: Option<String>,
}

impl ChatMessage {
    /// Best available name: server nickname, then global display name, then username.
    pub fn display_name(&self) -> &str {
        [self.nick.as_deref(), self.global_name.as_deref()]
            .into_iter()
            .flatten()
            .map(str::trim)
            .find(|s| !s.is_empty())
            .unwrap_or(self.username.as_str())
    }
}
