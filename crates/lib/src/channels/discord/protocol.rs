//! Discord gateway wire protocol (API v10, JSON encoding): frames, opcodes, and close codes.
//!
//! Interpretation of received frames is kept free of I/O so it can be tested directly;
//! the connection loop in `gateway.rs` acts on the returned `Action`.

use crate::channels::inbound::ChatMessage;
use crate::channels::discord::session::GatewayEvent;
use serde::Deserialize;
use serde_json::{json, Value};

pub const OP_DISPATCH: u8 = 0;
pub const OP_HEARTBEAT: u8 = 1;
pub const OP_IDENTIFY: u8 = 2;
pub const OP_RESUME: u8 = 6;
pub const OP_RECONNECT: u8 = 7;
pub const OP_INVALID_SESSION: u8 = 9;
pub const OP_HELLO: u8 = 10;
pub const OP_HEARTBEAT_ACK: u8 = 11;

const INTENT_GUILDS: u64 = 1 << 0;
const INTENT_GUILD_MESSAGES: u64 = 1 << 9;
const INTENT_DIRECT_MESSAGES: u64 = 1 << 12;
const INTENT_MESSAGE_CONTENT: u64 = 1 << 15;

/// Guilds, guild and direct messages, and message content (privileged; enable it for the bot).
pub const DEFAULT_INTENTS: u64 =
    INTENT_GUILDS | INTENT_GUILD_MESSAGES | INTENT_DIRECT_MESSAGES | INTENT_MESSAGE_CONTENT;

const CLOSE_AUTHENTICATION_FAILED: u16 = 4004;
const CLOSE_INVALID_SEQ: u16 = 4007;
const CLOSE_SESSION_TIMED_OUT: u16 = 4009;

/// Errors that end one gateway connection. Terminal ones also end the session.
#[derive(Debug, thiserror::Error)]
pub enum GatewayError {
    #[error("websocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),
    #[error("invalid gateway frame: {0}")]
    Json(#[from] serde_json::Error),
    #[error("gateway protocol error: {0}")]
    Protocol(String),
    #[error("gateway closed the connection ({code:?}): {reason}")]
    Closed { code: Option<u16>, reason: String },
    #[error("no heartbeat ack since the last heartbeat")]
    ZombieConnection,
}

impl GatewayError {
    /// Close codes Discord documents as not reconnectable: bad token, sharding, API version, intents.
    pub fn is_terminal(&self) -> bool {
        match self {
            GatewayError::Closed { code: Some(code), .. } => {
                *code == CLOSE_AUTHENTICATION_FAILED || (4010..=4014).contains(code)
            }
            _ => false,
        }
    }

    /// Whether the current session can no longer be resumed and must re-identify.
    pub fn invalidates_session(&self) -> bool {
        matches!(
            self,
            GatewayError::Closed { code: Some(CLOSE_INVALID_SEQ | CLOSE_SESSION_TIMED_OUT), .. }
        )
    }
}

/// One gateway frame.
#[derive(Debug, Deserialize)]
pub struct GatewayPayload {
    pub op: u8,
    #[serde(default)]
    pub d: Value,
    #[serde(default)]
    pub s: Option<u64>,
    #[serde(default)]
    pub t: Option<String>,
}

/// Session data kept across connections so a dropped connection can be resumed.
#[derive(Debug, Default, Clone)]
pub struct SessionState {
    pub session_id: Option<String>,
    pub seq: Option<u64>,
    pub resume_url: Option<String>,
}

impl SessionState {
    pub fn can_resume(&self) -> bool {
        self.session_id.is_some() && self.seq.is_some()
    }

    /// Forget the session; the next connection identifies from scratch.
    pub fn reset(&mut self) {
        *self = SessionState::default();
    }

    /// URL to reconnect to: the resume URL from READY when resuming, else `default_url`.
    pub fn connect_url(&self, default_url: &str) -> String {
        match (&self.resume_url, self.can_resume()) {
            (Some(url), true) => {
                format!("{}/?v=10&encoding=json", url.trim_end_matches('/'))
            }
            _ => default_url.to_string(),
        }
    }
}

/// What the connection loop should do after a frame.
#[derive(Debug, PartialEq)]
pub enum Action {
    None,
    HeartbeatNow,
    HeartbeatAck,
    Emit(GatewayEvent),
    /// Session established or resumed.
    Connected,
    Reconnect,
    InvalidSession { resumable: bool },
}

#[derive(Debug, Deserialize)]
struct Ready {
    user: ReadyUser,
    session_id: String,
    #[serde(default)]
    resume_gateway_url: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ReadyUser {
    id: String,
}

#[derive(Debug, Deserialize)]
struct MessageCreate {
    channel_id: String,
    author: Author,
    #[serde(default)]
    member: Option<Member>,
    #[serde(default)]
    content: String,
    #[serde(default)]
    webhook_id: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Author {
    id: String,
    username: String,
    #[serde(default)]
    global_name: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Member {
    #[serde(default)]
    nick: Option<String>,
}

impl From<MessageCreate> for ChatMessage {
    fn from(m: MessageCreate) -> Self {
        ChatMessage {
            author_id: m.author.id,
            username: m.author.username,
            global_name: m.author.global_name,
            nick: m.member.and_then(|mem| mem.nick),
            channel_id: m.channel_id,
            content: m.content,
            webhook_id: m.webhook_id,
        }
    }
}

/// Interpret one received frame, updating the session state.
pub fn interpret(payload: GatewayPayload, state: &mut SessionState) -> Result<Action, GatewayError> {
    if let Some(seq) = payload.s {
        state.seq = Some(seq);
    }
    let action = match payload.op {
        OP_DISPATCH => interpret_dispatch(payload.t.as_deref(), payload.d, state)?,
        OP_HEARTBEAT => Action::HeartbeatNow,
        OP_HEARTBEAT_ACK => Action::HeartbeatAck,
        OP_RECONNECT => Action::Reconnect,
        OP_INVALID_SESSION => Action::InvalidSession {
            resumable: payload.d.as_bool().unwrap_or(false),
        },
        OP_HELLO => {
            return Err(GatewayError::Protocol("unexpected hello".to_string()));
        }
        other => {
            log::debug!("discord gateway: ignoring opcode {}", other);
            Action::None
        }
    };
    Ok(action)
}

fn interpret_dispatch(
    event: Option<&str>,
    d: Value,
    state: &mut SessionState,
) -> Result<Action, GatewayError> {
    match event {
        Some("READY") => {
            let ready: Ready = serde_json::from_value(d)?;
            state.session_id = Some(ready.session_id);
            state.resume_url = ready.resume_gateway_url;
            Ok(Action::Emit(GatewayEvent::Ready {
                user_id: ready.user.id,
            }))
        }
        Some("RESUMED") => Ok(Action::Connected),
        Some("MESSAGE_CREATE") => match serde_json::from_value::<MessageCreate>(d) {
            Ok(m) => Ok(Action::Emit(GatewayEvent::Message(m.into()))),
            Err(e) => {
                log::debug!("discord gateway: skipping undecodable MESSAGE_CREATE: {}", e);
                Ok(Action::None)
            }
        },
        _ => Ok(Action::None),
    }
}

/// Heartbeat interval from a HELLO frame, in milliseconds.
pub fn hello_interval(payload: &GatewayPayload) -> Result<u64, GatewayError> {
    if payload.op != OP_HELLO {
        return Err(GatewayError::Protocol(format!(
            "expected hello, got opcode {}",
            payload.op
        )));
    }
    payload
        .d
        .get("heartbeat_interval")
        .and_then(Value::as_u64)
        .filter(|ms| *ms > 0)
        .ok_or_else(|| GatewayError::Protocol("hello without heartbeat_interval".to_string()))
}

pub fn heartbeat(seq: Option<u64>) -> Value {
    json!({ "op": OP_HEARTBEAT, "d": seq })
}

pub fn identify(token: &str, intents: u64) -> Value {
    json!({
        "op": OP_IDENTIFY,
        "d": {
            "token": token,
            "intents": intents,
            "properties": {
                "os": std::env::consts::OS,
                "browser": "linecord",
                "device": "linecord"
            }
        }
    })
}

pub fn resume(token: &str, state: &SessionState) -> Value {
    json!({
        "op": OP_RESUME,
        "d": {
            "token": token,
            "session_id": state.session_id,
            "seq": state.seq
        }
    })
}
