use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::alarms::Alarm;
use crate::error::ErrorCode;
use crate::subscriptions::{SubscribeOutcome, UnsubscribeOutcome};
use crate::types::StreamCode;

/// Schema version clients must announce in their handshake
pub const SUPPORTED_SCHEMA_ID: u64 = 1;

const KNOWN_TYPES: [&str; 4] = ["HANDSHAKE", "SUBSCRIBE", "UNSUBSCRIBE", "ALARM_ACKED"];

/// Control messages sent by clients
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "messageType", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ClientMessage {
    #[serde(rename_all = "camelCase")]
    Handshake { schema_id: u64 },

    /// Stream ids stay raw so each one can be judged separately
    Subscribe { streams: Vec<Value> },

    Unsubscribe { streams: Vec<Value> },

    AlarmAcked { payload: AlarmAckPayload },
}

impl ClientMessage {
    pub fn message_type(&self) -> &'static str {
        match self {
            ClientMessage::Handshake { .. } => "HANDSHAKE",
            ClientMessage::Subscribe { .. } => "SUBSCRIBE",
            ClientMessage::Unsubscribe { .. } => "UNSUBSCRIBE",
            ClientMessage::AlarmAcked { .. } => "ALARM_ACKED",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AlarmAckPayload {
    pub alarm_id: String,
    pub operator_name: String,
    pub role: String,
}

/// Why an inbound message could not be decoded
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum ProtocolError {
    #[error("Malformed JSON: {0}")]
    Malformed(String),

    #[error("Missing messageType")]
    MissingType,

    #[error("Unknown messageType: {0}")]
    UnknownType(String),

    #[error("Invalid {message_type} payload: {reason}")]
    InvalidPayload {
        message_type: String,
        reason: String,
    },
}

impl ProtocolError {
    /// Malformed input ends the connection wherever it arrives
    pub fn is_fatal(&self) -> bool {
        matches!(self, ProtocolError::Malformed(_))
    }

    pub fn code(&self) -> ErrorCode {
        match self {
            ProtocolError::Malformed(_) => ErrorCode::ParseError,
            ProtocolError::MissingType | ProtocolError::UnknownType(_) => {
                ErrorCode::UnknownMessageType
            }
            ProtocolError::InvalidPayload { .. } => ErrorCode::InvalidPayload,
        }
    }

    pub fn message_type(&self) -> Option<&str> {
        match self {
            ProtocolError::UnknownType(t) => Some(t),
            ProtocolError::InvalidPayload { message_type, .. } => Some(message_type),
            _ => None,
        }
    }
}

/// Decode one inbound frame (text or binary, both UTF-8 JSON)
pub fn decode(raw: &[u8]) -> Result<ClientMessage, ProtocolError> {
    let text = std::str::from_utf8(raw).map_err(|e| ProtocolError::Malformed(e.to_string()))?;
    let value: Value =
        serde_json::from_str(text).map_err(|e| ProtocolError::Malformed(e.to_string()))?;

    let message_type = value
        .get("messageType")
        .and_then(Value::as_str)
        .ok_or(ProtocolError::MissingType)?
        .to_string();

    if !KNOWN_TYPES.contains(&message_type.as_str()) {
        return Err(ProtocolError::UnknownType(message_type));
    }

    serde_json::from_value(value).map_err(|e| ProtocolError::InvalidPayload {
        message_type,
        reason: e.to_string(),
    })
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HandshakeAckPayload {
    pub status: String,
    pub available_streams: Vec<StreamCode>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SubscribeAckPayload {
    pub accepted: Vec<StreamCode>,
    pub rejected: Vec<Value>,
    pub current_subscriptions: Vec<StreamCode>,
}

impl From<SubscribeOutcome> for SubscribeAckPayload {
    fn from(outcome: SubscribeOutcome) -> Self {
        Self {
            accepted: outcome.accepted,
            rejected: outcome.rejected,
            current_subscriptions: outcome.current,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UnsubscribeAckPayload {
    pub removed: Vec<StreamCode>,
    pub not_found: Vec<Value>,
    pub current_subscriptions: Vec<StreamCode>,
}

impl From<UnsubscribeOutcome> for UnsubscribeAckPayload {
    fn from(outcome: UnsubscribeOutcome) -> Self {
        Self {
            removed: outcome.removed,
            not_found: outcome.not_found,
            current_subscriptions: outcome.current,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ErrorPayload {
    pub code: ErrorCode,
    pub message: String,
}

/// Control messages sent by the server
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "messageType", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ServerMessage {
    HandshakeAck { payload: HandshakeAckPayload },
    SubscribeAck { payload: SubscribeAckPayload },
    UnsubscribeAck { payload: UnsubscribeAckPayload },
    AlarmRaised { payload: Alarm },
    AlarmAcked { payload: Alarm },
    Error { payload: ErrorPayload },
}

impl ServerMessage {
    pub fn handshake_ok(available_streams: Vec<StreamCode>) -> Self {
        ServerMessage::HandshakeAck {
            payload: HandshakeAckPayload {
                status: "OK".to_string(),
                available_streams,
            },
        }
    }

    pub fn error(code: ErrorCode, message: impl Into<String>) -> Self {
        ServerMessage::Error {
            payload: ErrorPayload {
                code,
                message: message.into(),
            },
        }
    }
}
