//! JSON text protocol spoken by the browser chess client.
//!
//! Inbound frames are JSON objects. The relay only looks at four fields;
//! everything else is opaque and travels byte-for-byte:
//! ```text
//! { "joinRoom": "r1" }                         join
//! { "username": "alice", "color": "w" }        role claim
//! { "FEN": "<position>", "from": .., "to": .. } position update
//! { "restartRequest": true, .. }               opaque relay
//! ```
//!
//! Outbound records are either a snapshot of the room, the current role
//! pair, or an inbound frame relayed verbatim.

use serde::Serialize;
use serde_json::{Map, Value};
use thiserror::Error;

/// Canonical starting position every room history is seeded with.
pub const START_POSITION: &str = "rnbqkbnr/pppppppp/8/8/8/8/PPPPPPPP/RNBQKBNR w KQkq - 0 1";

pub const FIELD_JOIN: &str = "joinRoom";
pub const FIELD_USERNAME: &str = "username";
pub const FIELD_COLOR: &str = "color";
pub const FIELD_POSITION: &str = "FEN";

/// One of the two exclusive seats in a room.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Role {
    /// First mover, claimed with `"color": "w"`
    White,
    /// Second mover, claimed with `"color": "b"`
    Black,
}

impl Role {
    /// Parse the single-letter color code used on the wire.
    pub fn from_code(code: &str) -> Option<Self> {
        match code {
            "w" => Some(Self::White),
            "b" => Some(Self::Black),
            _ => None,
        }
    }

    pub fn code(self) -> &'static str {
        match self {
            Self::White => "w",
            Self::Black => "b",
        }
    }

    pub fn opposite(self) -> Self {
        match self {
            Self::White => Self::Black,
            Self::Black => Self::White,
        }
    }
}

/// A classified inbound frame.
#[derive(Debug, Clone, PartialEq)]
pub enum Inbound {
    /// Attach to a room. The identifier is still unvalidated here.
    Join { room: String },
    /// Anything that needs the sender to be attached to a room.
    Room(RoomMessage),
}

/// Messages that operate on the sender's current room.
#[derive(Debug, Clone, PartialEq)]
pub enum RoomMessage {
    /// Seat claim. `role` is `None` when the color code is unknown,
    /// which makes the claim fail silently.
    RoleClaim { username: String, role: Option<Role> },
    /// New position plus the full message it arrived in.
    PositionUpdate { position: String, message: Value },
    /// Client-defined signal relayed without interpretation.
    Relay,
}

impl Inbound {
    /// Parse and classify a text frame.
    pub fn parse(text: &str) -> Result<Self, ProtocolError> {
        let value: Value = serde_json::from_str(text)?;
        Self::classify(value)
    }

    /// Classify an already-parsed frame.
    ///
    /// Precedence: join, then position update, then role claim, then relay.
    /// A frame carrying both a name and a position is a position update.
    /// A position that is not a string is kept in its compact JSON form.
    /// A truthy `username` that is not a string is rejected.
    pub fn classify(value: Value) -> Result<Self, ProtocolError> {
        let fields = match &value {
            Value::Object(fields) => fields,
            _ => return Ok(Self::Room(RoomMessage::Relay)),
        };

        if let Some(room) = present(fields, FIELD_JOIN) {
            let room = match room {
                Value::String(room) => room.clone(),
                Value::Number(n) => n.to_string(),
                other => return Err(ProtocolError::InvalidRoomField(json_kind(other))),
            };
            return Ok(Self::Join { room });
        }

        let position = present(fields, FIELD_POSITION).map(|position| match position {
            Value::String(position) => position.clone(),
            other => other.to_string(),
        });

        let message = match position {
            Some(position) => RoomMessage::PositionUpdate { position, message: value },
            None => match fields.get(FIELD_USERNAME) {
                Some(Value::String(username)) if !username.is_empty() => {
                    let role = fields
                        .get(FIELD_COLOR)
                        .and_then(Value::as_str)
                        .and_then(Role::from_code);
                    RoomMessage::RoleClaim {
                        username: username.clone(),
                        role,
                    }
                }
                Some(other) if is_truthy(other) => {
                    return Err(ProtocolError::InvalidUsername(json_kind(other)));
                }
                _ => RoomMessage::Relay,
            },
        };
        Ok(Self::Room(message))
    }
}

fn present<'a>(fields: &'a Map<String, Value>, key: &str) -> Option<&'a Value> {
    fields.get(key).filter(|v| !v.is_null())
}

/// Truthiness as the browser client sees it.
fn is_truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().is_some_and(|n| n != 0.0),
        Value::String(s) => !s.is_empty(),
        Value::Array(_) | Value::Object(_) => true,
    }
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

/// State view sent to a joining connection, and to the survivors of a reset.
///
/// `lastMove` is omitted while the history only holds the seed.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SnapshotView {
    #[serde(rename = "lastMove", skip_serializing_if = "Option::is_none")]
    pub last_update: Option<Value>,
    /// Second-to-last history entry (the seed when there is only one)
    #[serde(rename = "FEN")]
    pub previous: String,
    /// Last history entry
    #[serde(rename = "currentFEN")]
    pub current: String,
    /// Number of attached connections
    pub online: usize,
    pub white: Option<String>,
    pub black: Option<String>,
}

impl SnapshotView {
    pub fn encode(&self) -> Result<String, ProtocolError> {
        encode(self)
    }
}

/// Role pair broadcast after a successful claim. Unassigned seats are `null`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RolesView {
    pub white: Option<String>,
    pub black: Option<String>,
}

impl RolesView {
    pub fn encode(&self) -> Result<String, ProtocolError> {
        encode(self)
    }
}

fn encode<T: Serialize>(record: &T) -> Result<String, ProtocolError> {
    serde_json::to_string(record).map_err(|e| ProtocolError::Serialization(e.to_string()))
}

/// Protocol errors.
#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("Malformed JSON: {0}")]
    Malformed(#[from] serde_json::Error),
    #[error("Binary frame is not valid UTF-8")]
    NotUtf8,
    #[error("Room identifier must be a string or number, got {0}")]
    InvalidRoomField(&'static str),
    #[error("Username must be a string, got {0}")]
    InvalidUsername(&'static str),
    #[error("Serialization error: {0}")]
    Serialization(String),
}
