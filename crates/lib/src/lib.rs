//! Linecord core library: relays chat messages between a LINE group and Discord.
//!
//! LINE events arrive on an HTTP webhook and are posted to a Discord channel webhook;
//! Discord messages arrive over the gateway websocket and are pushed to the LINE group.

pub mod channels;
pub mod config;
pub mod ingress;
pub mod relay;
pub mod server;
