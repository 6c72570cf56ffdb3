//! Chat session: a long-lived connection that yields inbound messages.

use crate::channels::ChatMessage;
use async_trait::async_trait;

/// A persistent-connection session (e.g. the Discord gateway). Reconnection is the
/// session's own concern; consumers only see messages and the relay's own identity.
#[async_trait]
pub trait ChatSession: Send {
    /// Wait for the next message. `None` means the session has ended for good.
    async fn next_message(&mut self) -> Option<ChatMessage>;

    /// User id of the connected identity, once known.
    fn self_id(&self) -> Option<&str>;
}
