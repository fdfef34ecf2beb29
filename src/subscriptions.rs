//! Per-connection stream subscriptions

use serde_json::Value;

use crate::connection::Connection;
use crate::error::ErrorCode;
use crate::lifecycle::ConnectionState;
use crate::types::{StreamCode, StreamDefinition};

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum SubscriptionError {
    #[error("Subscriptions cannot change while {0}")]
    InvalidState(ConnectionState),
}

impl SubscriptionError {
    pub fn code(&self) -> ErrorCode {
        match self {
            SubscriptionError::InvalidState(_) => ErrorCode::InvalidState,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct SubscribeOutcome {
    pub accepted: Vec<StreamCode>,
    pub rejected: Vec<Value>,
    pub current: Vec<StreamCode>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct UnsubscribeOutcome {
    pub removed: Vec<StreamCode>,
    pub not_found: Vec<Value>,
    pub current: Vec<StreamCode>,
}

fn parse_stream(raw: &Value) -> Option<StreamDefinition> {
    raw.as_u64().and_then(StreamDefinition::from_code)
}

fn check_state(conn: &Connection) -> Result<(), SubscriptionError> {
    let state = conn.state();
    if state.accepts_subscriptions() {
        Ok(())
    } else {
        Err(SubscriptionError::InvalidState(state))
    }
}

/// Add streams to the connection's set.
///
/// The state check gates the whole request; past it every id is judged on
/// its own and valid ones are applied even if others are rejected.
pub fn subscribe(
    conn: &mut Connection,
    streams: &[Value],
) -> Result<SubscribeOutcome, SubscriptionError> {
    check_state(conn)?;

    let mut accepted = Vec::new();
    let mut rejected = Vec::new();
    for raw in streams {
        match parse_stream(raw) {
            Some(stream) => {
                conn.subscriptions.insert(stream);
                if !accepted.contains(&stream.code()) {
                    accepted.push(stream.code());
                }
            }
            None => rejected.push(raw.clone()),
        }
    }

    Ok(SubscribeOutcome {
        accepted,
        rejected,
        current: conn.subscription_codes(),
    })
}

/// Remove streams from the connection's set
pub fn unsubscribe(
    conn: &mut Connection,
    streams: &[Value],
) -> Result<UnsubscribeOutcome, SubscriptionError> {
    check_state(conn)?;

    let mut removed = Vec::new();
    let mut not_found = Vec::new();
    for raw in streams {
        match parse_stream(raw) {
            Some(stream) if conn.subscriptions.remove(&stream) => removed.push(stream.code()),
            _ => not_found.push(raw.clone()),
        }
    }

    Ok(UnsubscribeOutcome {
        removed,
        not_found,
        current: conn.subscription_codes(),
    })
}
