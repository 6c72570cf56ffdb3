//! `ChatSession` over the Discord gateway task.

use crate::channels::inbound::ChatMessage;
use crate::channels::session::ChatSession;
use async_trait::async_trait;
use tokio::sync::mpsc;

/// Event forwarded by the gateway connection task.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GatewayEvent {
    /// Session (re)identified; carries the bot's own user id.
    Ready { user_id: String },
    Message(ChatMessage),
}

/// Receiving end of the gateway task. Ends when the task stops (shutdown or terminal failure).
pub struct DiscordSession {
    rx: mpsc::Receiver<GatewayEvent>,
    self_id: Option<String>,
}

impl DiscordSession {
    pub fn new(rx: mpsc::Receiver<GatewayEvent>) -> Self {
        Self { rx, self_id: None }
    }
}

#[async_trait]
impl ChatSession for DiscordSession {
    async fn next_message(&mut self) -> Option<ChatMessage> {
        while let Some(event) = self.rx.recv().await {
            match event {
                GatewayEvent::Ready { user_id } => {
                    log::info!("discord session ready as user {}", user_id);
                    self.self_id = Some(user_id);
                }
                GatewayEvent::Message(msg) => return Some(msg),
            }
        }
        None
    }

    fn self_id(&self) -> Option<&str> {
        self.self_id.as_deref()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn ready_sets_self_id_and_messages_pass_through() {
        let (tx, rx) = mpsc::channel(8);
        let mut session = DiscordSession::new(rx);
        assert_eq!(session.self_id(), None);

        tx.send(GatewayEvent::Ready {
            user_id: "900".to_string(),
        })
        .await
        .unwrap();
        tx.send(GatewayEvent::Message(ChatMessage {
            author_id: "42".to_string(),
            content: "yo".to_string(),
            ..Default::default()
        }))
        .await
        .unwrap();
        drop(tx);

        let msg = session.next_message().await.unwrap();
        assert_eq!(msg.content, "yo");
        assert_eq!(session.self_id(), Some("900"));
        assert!(session.next_message().await.is_none());
    }
}
