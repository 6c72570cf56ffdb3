//! Channel registry: the running connectors, listed by the health probe and stopped on shutdown.

use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

/// Handle to a channel connector.
pub trait ChannelHandle: Send + Sync {
    /// Channel id (e.g. "line", "discord-webhook").
    fn id(&self) -> &str;
    /// Stop any background connection. No-op for request/response channels.
    fn stop(&self) {}
}

/// Registry of channel ids to handles. Shared across the server.
pub struct ChannelRegistry {
    inner: Arc<RwLock<HashMap<String, Arc<dyn ChannelHandle>>>>,
}

impl Default for ChannelRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl ChannelRegistry {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Register under the handle's own id; a previous handle with that id is stopped.
    pub async fn register(&self, handle: Arc<dyn ChannelHandle>) {
        let mut g = self.inner.write().await;
        if let Some(old) = g.insert(handle.id().to_string(), handle) {
            old.stop();
        }
    }

    /// Registered ids, sorted.
    pub async fn ids(&self) -> Vec<String> {
        let g = self.inner.read().await;
        let mut ids: Vec<String> = g.keys().cloned().collect();
        ids.sort();
        ids
    }

    pub async fn stop_all(&self) {
        let g = self.inner.read().await;
        for handle in g.values() {
            handle.stop();
        }
    }
}
