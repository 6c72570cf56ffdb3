//! Configuration types and loading.
//!
//! Config is loaded from a JSON file (e.g. `~/.linecord/config.json`) and the environment.
//! Environment variables override file values; the four credentials are usually supplied
//! only through the environment (or a `.env` file loaded by the binary).

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

pub const DEFAULT_LINE_API_BASE: &str = "https://api.line.me";
pub const DEFAULT_DISCORD_GATEWAY_URL: &str = "wss://gateway.discord.gg/?v=10&encoding=json";

/// Top-level application config.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Config {
    /// HTTP listener for the LINE webhook.
    #[serde(default)]
    pub gateway: GatewayConfig,

    /// Discord bot and webhook settings.
    #[serde(default)]
    pub discord: DiscordConfig,

    /// LINE Messaging API settings.
    #[serde(default)]
    pub line: LineConfig,
}

/// Listener bind address and port.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GatewayConfig {
    /// Port for the webhook listener (default 5000).
    #[serde(default = "default_gateway_port")]
    pub port: u16,

    /// Bind address (default "0.0.0.0"; LINE must be able to reach the webhook).
    #[serde(default = "default_gateway_bind")]
    pub bind: String,
}

fn default_gateway_port() -> u16 {
    5000
}

fn default_gateway_bind() -> String {
    "0.0.0.0".to_string()
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            port: default_gateway_port(),
            bind: default_gateway_bind(),
        }
    }
}

/// Discord side: gateway bot token and the channel webhook messages from LINE are posted to.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DiscordConfig {
    /// Bot token. Overridden by DISCORD_TOKEN.
    pub bot_token: Option<String>,
    /// Channel webhook URL. Overridden by DISCORD_WEBHOOK_URL.
    pub webhook_url: Option<String>,
    /// Gateway websocket URL. Overridden by DISCORD_GATEWAY_URL.
    pub gateway_url: Option<String>,
    /// When set, only messages from this channel are relayed to LINE. Overridden by DISCORD_CHANNEL_ID.
    pub channel_id: Option<String>,
    /// Skip messages posted by any webhook, not just the relay's own. Default: false.
    #[serde(default)]
    pub ignore_webhook_messages: bool,
}

impl Default for DiscordConfig {
    fn default() -> Self {
        Self {
            bot_token: None,
            webhook_url: None,
            gateway_url: None,
            channel_id: None,
            ignore_webhook_messages: false,
        }
    }
}

/// LINE side: channel access token and the group messages from Discord are pushed to.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LineConfig {
    /// Channel access token. Overridden by LINE_ACCESS_TOKEN.
    pub access_token: Option<String>,
    /// Destination group id. Overridden by LINE_GROUP_ID.
    pub group_id: Option<String>,
    /// Messaging API base URL. Overridden by LINE_API_BASE.
    pub api_base: Option<String>,
}

/// The four values the relay cannot run without. Resolved once at startup.
#[derive(Clone)]
pub struct Credentials {
    pub discord_token: String,
    pub discord_webhook_url: String,
    pub line_access_token: String,
    pub line_group_id: String,
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("discord_token", &"<redacted>")
            .field("discord_webhook_url", &"<redacted>")
            .field("line_access_token", &"<redacted>")
            .field("line_group_id", &self.line_group_id)
            .finish()
    }
}

fn non_empty(value: Option<&String>) -> Option<String> {
    value
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
}

impl Config {
    /// Apply environment overrides. `lookup` is `std::env::var` in production; tests pass a map.
    pub fn apply_env<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| {
            lookup(key)
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
        };
        if let Some(v) = get("DISCORD_TOKEN") {
            self.discord.bot_token = Some(v);
        }
        if let Some(v) = get("DISCORD_WEBHOOK_URL") {
            self.discord.webhook_url = Some(v);
        }
        if let Some(v) = get("DISCORD_GATEWAY_URL") {
            self.discord.gateway_url = Some(v);
        }
        if let Some(v) = get("DISCORD_CHANNEL_ID") {
            self.discord.channel_id = Some(v);
        }
        if let Some(v) = get("LINE_ACCESS_TOKEN") {
            self.line.access_token = Some(v);
        }
        if let Some(v) = get("LINE_GROUP_ID") {
            self.line.group_id = Some(v);
        }
        if let Some(v) = get("LINE_API_BASE") {
            self.line.api_base = Some(v);
        }
        if let Some(v) = get("LINECORD_BIND") {
            self.gateway.bind = v;
        }
        match get("PORT").map(|p| p.parse::<u16>()) {
            Some(Ok(port)) => self.gateway.port = port,
            Some(Err(_)) => log::warn!("ignoring invalid PORT value"),
            None => {}
        }
    }

    /// Names of required values that are missing (env variable names, for error messages).
    pub fn missing_credentials(&self) -> Vec<&'static str> {
        let mut missing = Vec::new();
        if non_empty(self.discord.bot_token.as_ref()).is_none() {
            missing.push("DISCORD_TOKEN");
        }
        if non_empty(self.discord.webhook_url.as_ref()).is_none() {
            missing.push("DISCORD_WEBHOOK_URL");
        }
        if non_empty(self.line.access_token.as_ref()).is_none() {
            missing.push("LINE_ACCESS_TOKEN");
        }
        if non_empty(self.line.group_id.as_ref()).is_none() {
            missing.push("LINE_GROUP_ID");
        }
        missing
    }

    /// Validate and extract the required credentials.
    pub fn credentials(&self) -> Result<Credentials> {
        let missing = self.missing_credentials();
        if !missing.is_empty() {
            anyhow::bail!("missing required configuration: {}", missing.join(", "));
        }
        Ok(Credentials {
            discord_token: non_empty(self.discord.bot_token.as_ref()).unwrap_or_default(),
            discord_webhook_url: non_empty(self.discord.webhook_url.as_ref()).unwrap_or_default(),
            line_access_token: non_empty(self.line.access_token.as_ref()).unwrap_or_default(),
            line_group_id: non_empty(self.line.group_id.as_ref()).unwrap_or_default(),
        })
    }
}

/// LINE API base without a trailing slash.
pub fn resolve_line_api_base(config: &Config) -> String {
    non_empty(config.line.api_base.as_ref())
        .map(|s| s.trim_end_matches('/').to_string())
        .unwrap_or_else(|| DEFAULT_LINE_API_BASE.to_string())
}

pub fn resolve_discord_gateway_url(config: &Config) -> String {
    non_empty(config.discord.gateway_url.as_ref())
        .unwrap_or_else(|| DEFAULT_DISCORD_GATEWAY_URL.to_string())
}

/// Resolve config path from env or default.
pub fn default_config_path() -> PathBuf {
    std::env::var("LINECORD_CONFIG_PATH")
        .map(PathBuf::from)
        .unwrap_or_else(|_| {
            dirs::home_dir()
                .map(|h| h.join(".linecord").join("config.json"))
                .unwrap_or_else(|| PathBuf::from("config.json"))
        })
}

/// Load config from the given path (or the default). Missing file => default config.
/// Environment overrides are applied on top. Returns the config and the path that was used.
pub fn load_config(path: Option<PathBuf>) -> Result<(Config, PathBuf)> {
    let path = path.unwrap_or_else(default_config_path);
    let mut config = if !path.exists() {
        log::debug!("config file not found, using defaults: {}", path.display());
        Config::default()
    } else {
        let s = std::fs::read_to_string(&path)
            .with_context(|| format!("reading config from {}", path.display()))?;
        serde_json::from_str(&s)
            .with_context(|| format!("parsing config from {}", path.display()))?
    };
    config.apply_env(|key| std::env::var(key).ok());
    Ok((config, path))
}
