//! Discord channel webhook: post plain content into the channel the webhook belongs to.

use crate::channels::registry::ChannelHandle;
use crate::channels::ChannelError;
use reqwest::{StatusCode, Url};

/// Executes a Discord webhook. Discord answers 204 No Content on success (without `?wait=true`).
pub struct DiscordWebhook {
    id: String,
    url: String,
    client: reqwest::Client,
}

impl DiscordWebhook {
    pub fn new(url: String) -> Self {
        Self {
            id: "discord-webhook".to_string(),
            url,
            client: reqwest::Client::new(),
        }
    }

    /// POST `{"content": ...}` to the webhook URL. Anything but 204 is a rejection.
    pub async fn execute(&self, content: &str) -> Result<(), ChannelError> {
        let body = serde_json::json!({ "content": content });
        let res = self.client.post(&self.url).json(&body).send().await?;
        if res.status() != StatusCode::NO_CONTENT {
            return Err(ChannelError::rejected("discord webhook", res).await);
        }
        Ok(())
    }
}

impl ChannelHandle for DiscordWebhook {
    fn id(&self) -> &str {
        &self.id
    }
}

/// Webhook id from an execute URL (`.../api/webhooks/{id}/{token}`).
/// Messages the webhook posts arrive on the gateway with this id as `webhook_id`.
pub fn webhook_id_from_url(url: &str) -> Option<String> {
    let url = Url::parse(url.trim()).ok()?;
    let mut segments = url.path_segments()?;
    segments.find(|s| *s == "webhooks")?;
    segments
        .next()
        .filter(|id| !id.is_empty())
        .map(str::to_string)
}
