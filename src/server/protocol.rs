//! Protocol message definitions
//!
//! Defines the JSON messages exchanged between clients and the server.
//! Every outbound message carries a numeric `status` (1 for success, 0 for
//! failure); inbound messages only need a `packet_id`.

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Number, Value};
use thiserror::Error;

/// Status value carried by Welcome and Acknowledgment messages
pub const STATUS_OK: u8 = 1;

/// Status value carried by Error messages
pub const STATUS_ERROR: u8 = 0;

/// Text of the message sent to every new connection
pub const WELCOME_TEXT: &str = "Connected to WebSocket server";

/// Name of the required correlation field in inbound messages
pub const PACKET_ID_FIELD: &str = "packet_id";

// ============================================================================
// Error Types
// ============================================================================

/// Reasons a single inbound frame cannot be acknowledged
///
/// The display strings are sent verbatim to the client in the `error` field.
#[derive(Debug, Error)]
pub enum FrameError {
    #[error("Invalid JSON format")]
    InvalidJson(#[source] serde_json::Error),

    #[error("packet_id is required")]
    MissingPacketId,

    #[error("packet_id must be a number or string")]
    UnsupportedPacketId,
}

/// Protocol-related errors on the outbound path
#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("JSON serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),
}

/// Result type for protocol operations
pub type ProtocolResult<T> = Result<T, ProtocolError>;

// ============================================================================
// Packet Identifiers
// ============================================================================

/// Client-supplied correlation token
///
/// Numbers keep their JSON representation, so an integer is echoed as an
/// integer and a float as a float.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PacketId {
    Number(Number),
    Text(String),
}

impl TryFrom<Value> for PacketId {
    type Error = FrameError;

    fn try_from(value: Value) -> Result<Self, Self::Error> {
        match value {
            Value::Number(n) => Ok(PacketId::Number(n)),
            Value::String(s) => Ok(PacketId::Text(s)),
            Value::Null => Err(FrameError::MissingPacketId),
            Value::Bool(_) | Value::Array(_) | Value::Object(_) => {
                Err(FrameError::UnsupportedPacketId)
            }
        }
    }
}

impl From<i64> for PacketId {
    fn from(n: i64) -> Self {
        PacketId::Number(n.into())
    }
}

impl From<&str> for PacketId {
    fn from(s: &str) -> Self {
        PacketId::Text(s.to_string())
    }
}

impl std::fmt::Display for PacketId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PacketId::Number(n) => write!(f, "{}", n),
            PacketId::Text(s) => write!(f, "{:?}", s),
        }
    }
}

/// Parse an inbound frame payload and extract its packet id
///
/// The payload must be a UTF-8 encoded JSON object. Fields other than
/// `packet_id` are ignored.
pub fn parse_frame(payload: impl AsRef<[u8]>) -> Result<PacketId, FrameError> {
    let mut fields: Map<String, Value> =
        serde_json::from_slice(payload.as_ref()).map_err(FrameError::InvalidJson)?;

    match fields.remove(PACKET_ID_FIELD) {
        None => Err(FrameError::MissingPacketId),
        Some(value) => PacketId::try_from(value),
    }
}

// ============================================================================
// Server Messages
// ============================================================================

/// Messages sent from server to client
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(untagged)]
pub enum ServerMessage {
    /// Sent once, right after the connection is accepted
    Welcome {
        status: u8,
        message: String,
        /// ISO-8601 UTC timestamp
        timestamp: String,
    },

    /// Confirms receipt of a valid frame
    Ack { status: u8, packet_id: PacketId },

    /// Rejects an invalid frame
    Error { status: u8, error: String },
}

impl ServerMessage {
    /// Create a Welcome message stamped with the current time
    pub fn welcome() -> Self {
        Self::welcome_at(Utc::now())
    }

    /// Create a Welcome message stamped with the given time
    pub fn welcome_at(now: DateTime<Utc>) -> Self {
        ServerMessage::Welcome {
            status: STATUS_OK,
            message: WELCOME_TEXT.to_string(),
            timestamp: now.to_rfc3339_opts(SecondsFormat::Millis, true),
        }
    }

    /// Create an Acknowledgment echoing the packet id
    pub fn ack(packet_id: PacketId) -> Self {
        ServerMessage::Ack {
            status: STATUS_OK,
            packet_id,
        }
    }

    /// Create an Error message
    pub fn error(reason: impl Into<String>) -> Self {
        ServerMessage::Error {
            status: STATUS_ERROR,
            error: reason.into(),
        }
    }

    /// Serialize the message to JSON
    pub fn to_json(&self) -> ProtocolResult<String> {
        Ok(serde_json::to_string(self)?)
    }
}

impl From<FrameError> for ServerMessage {
    fn from(err: FrameError) -> Self {
        ServerMessage::error(err.to_string())
    }
}

// ============================================================================
// Tests
// ============================================================================
