//! Discord channel: gateway websocket session for inbound messages, channel webhook for outbound.

mod gateway;
mod protocol;
mod session;
mod webhook;

pub use gateway::{ConnectionState, DiscordGateway};
pub use protocol::{GatewayError, DEFAULT_INTENTS};
pub use session::{DiscordSession, GatewayEvent};
pub use webhook::{webhook_id_from_url, DiscordWebhook};
