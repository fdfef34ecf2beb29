use serde::{Deserialize, Serialize};

use crate::sample::SourceError;

/// Result type for hub operations
pub type HubResult<T> = Result<T, HubError>;

/// Errors that can occur in the hub itself
#[derive(Debug, thiserror::Error)]
pub enum HubError {
    #[error("Sample source error: {0}")]
    Source(#[from] SourceError),
}

/// Stable error codes carried in ERROR replies
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    ParseError,
    ProtocolViolation,
    UnsupportedSchema,
    UnknownMessageType,
    InvalidPayload,
    InvalidState,
    AlarmNotFound,
    AlreadyAcked,
}

impl ErrorCode {
    pub fn as_str(self) -> &'static str {
        match self {
            ErrorCode::ParseError => "PARSE_ERROR",
            ErrorCode::ProtocolViolation => "PROTOCOL_VIOLATION",
            ErrorCode::UnsupportedSchema => "UNSUPPORTED_SCHEMA",
            ErrorCode::UnknownMessageType => "UNKNOWN_MESSAGE_TYPE",
            ErrorCode::InvalidPayload => "INVALID_PAYLOAD",
            ErrorCode::InvalidState => "INVALID_STATE",
            ErrorCode::AlarmNotFound => "ALARM_NOT_FOUND",
            ErrorCode::AlreadyAcked => "ALREADY_ACKED",
        }
    }
}

impl std::fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
