//! Communication channels: LINE (webhook in, push out) and Discord (gateway in, webhook out).
//!
//! Channel handles share the `ChannelHandle` trait so the server can list and stop them.
//! Messages read from a persistent connection are surfaced through `ChatSession`.

pub mod discord;
mod inbound;
pub mod line;
mod registry;
mod session;

pub use inbound::{ChatMessage, InboundEvent};
pub use registry::{ChannelHandle, ChannelRegistry};
pub use session::ChatSession;

/// Upstream bodies included in errors and logs are cut to this many characters.
const MAX_ERROR_BODY_CHARS: usize = 200;

/// Failure talking to a platform API or reading its payloads.
#[derive(Debug, thiserror::Error)]
pub enum ChannelError {
    #[error("request failed: {0}")]
    Network(reqwest::Error),
    #[error("{endpoint} rejected request: {status} {body}")]
    Rejected {
        endpoint: String,
        status: u16,
        body: String,
    },
    #[error("malformed payload: {0}")]
    Malformed(String),
}

/// The request URL is dropped: Discord webhook URLs carry the webhook token.
impl From<reqwest::Error> for ChannelError {
    fn from(e: reqwest::Error) -> Self {
        ChannelError::Network(e.without_url())
    }
}

impl ChannelError {
    /// Build a `Rejected` error from a non-success response, reading (and truncating) its body.
    pub(crate) async fn rejected(endpoint: &str, res: reqwest::Response) -> Self {
        let status = res.status().as_u16();
        let body = res.text().await.unwrap_or_default();
        ChannelError::Rejected {
            endpoint: endpoint.to_string(),
            status,
            body: truncate_body(&body),
        }
    }
}

/// Truncate an upstream body for logging (char-boundary safe).
pub fn truncate_body(body: &str) -> String {
    let trimmed = body.trim();
    match trimmed.char_indices().nth(MAX_ERROR_BODY_CHARS) {
        Some((i, _)) => format!("{}…", &trimmed[..i]),
        None => trimmed.to_string(),
    }
}
