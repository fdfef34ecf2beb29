//! Inbound control message routing
//!
//! Messages are decoded once at this boundary. While a connection is
//! handshaking the only acceptable message is HANDSHAKE; anything else,
//! and malformed JSON at any point, closes it with a policy violation.

use std::time::Instant;
use tracing::{debug, info, warn};

use crate::connection::{Connection, ConnectionId};
use crate::error::ErrorCode;
use crate::hub::{send_message, TelemetryHub};
use crate::lifecycle::ConnectionState;
use crate::protocol::{self, AlarmAckPayload, ClientMessage, ServerMessage, SUPPORTED_SCHEMA_ID};
use crate::subscriptions;
use crate::types::{close_code, StreamDefinition};

/// Close `conn` after telling the client why
fn reject_and_close(conn: &mut Connection, code: ErrorCode, message: &str) {
    send_message(conn.transport.as_ref(), &ServerMessage::error(code, message));
    conn.close_with(close_code::POLICY_VIOLATION, message);
}

fn reply_error(conn: &Connection, code: ErrorCode, message: impl Into<String>) {
    send_message(conn.transport.as_ref(), &ServerMessage::error(code, message));
}

fn handle_handshake(conn: &mut Connection, schema_id: u64) {
    if schema_id != SUPPORTED_SCHEMA_ID {
        warn!("Connection {} requested unsupported schema {}", conn.id, schema_id);
        reject_and_close(
            conn,
            ErrorCode::UnsupportedSchema,
            &format!("Unsupported schema {}", schema_id),
        );
        return;
    }

    if conn.complete_handshake().is_applied() {
        info!("Connection {} completed handshake", conn.id);
        send_message(
            conn.transport.as_ref(),
            &ServerMessage::handshake_ok(StreamDefinition::available_codes()),
        );
    }
}

impl TelemetryHub {
    /// Process one inbound message from connection `id`
    pub fn handle_message(&self, id: ConnectionId, raw: &[u8], now: Instant) {
        let decoded = protocol::decode(raw);

        let ack = {
            let mut connections = self.connections.write();
            let Some(conn) = connections.get_mut(&id) else {
                debug!("Message for unknown connection {}", id);
                return;
            };
            match dispatch(conn, decoded, now) {
                Some(ack) => ack,
                None => return,
            }
        };

        // The alarm book is locked before connections, so the connection
        // lock above is released first.
        if let Err(e) = self.acknowledge_alarm(&ack.alarm_id, &ack.operator_name, &ack.role) {
            warn!("Connection {} alarm acknowledgment failed: {}", id, e);
            if let Some(conn) = self.connections.read().get(&id) {
                reply_error(conn, e.code(), e.to_string());
            }
        }
    }
}

/// Apply a decoded message to `conn`.
///
/// Alarm acknowledgments need the alarm book and are handed back to the
/// caller instead of being handled here.
fn dispatch(
    conn: &mut Connection,
    decoded: Result<ClientMessage, protocol::ProtocolError>,
    now: Instant,
) -> Option<AlarmAckPayload> {
    let state = conn.state();
    if matches!(state, ConnectionState::Closing | ConnectionState::Closed) {
        debug!("Ignoring message on {} connection {}", state, conn.id);
        return None;
    }

    let message = match decoded {
        Ok(message) => message,
        Err(e) if e.is_fatal() => {
            warn!("Connection {} sent malformed message: {}", conn.id, e);
            reject_and_close(conn, e.code(), &e.to_string());
            return None;
        }
        Err(e) if state != ConnectionState::Active && state != ConnectionState::Idle => {
            warn!("Connection {} violated handshake ordering: {}", conn.id, e);
            reject_and_close(conn, ErrorCode::ProtocolViolation, "Expected HANDSHAKE");
            return None;
        }
        Err(e) => {
            debug!("Connection {} sent bad message: {}", conn.id, e);
            conn.touch(now);
            reply_error(conn, e.code(), e.to_string());
            return None;
        }
    };

    if state == ConnectionState::Connecting || state == ConnectionState::Handshaking {
        match message {
            ClientMessage::Handshake { schema_id } => {
                conn.touch(now);
                handle_handshake(conn, schema_id);
            }
            other => {
                warn!(
                    "Connection {} sent {} before handshake",
                    conn.id,
                    other.message_type()
                );
                reject_and_close(conn, ErrorCode::ProtocolViolation, "Expected HANDSHAKE");
            }
        }
        return None;
    }

    conn.touch(now);
    if state == ConnectionState::Idle {
        conn.transition(ConnectionState::Active);
    }

    match message {
        ClientMessage::Handshake { .. } => {
            reply_error(conn, ErrorCode::InvalidState, "Handshake already completed");
            None
        }
        ClientMessage::Subscribe { streams } => {
            match subscriptions::subscribe(conn, &streams) {
                Ok(outcome) => {
                    debug!("Connection {} subscribed to {:?}", conn.id, outcome.accepted);
                    send_message(
                        conn.transport.as_ref(),
                        &ServerMessage::SubscribeAck {
                            payload: outcome.into(),
                        },
                    );
                }
                Err(e) => reply_error(conn, e.code(), e.to_string()),
            }
            None
        }
        ClientMessage::Unsubscribe { streams } => {
            match subscriptions::unsubscribe(conn, &streams) {
                Ok(outcome) => send_message(
                    conn.transport.as_ref(),
                    &ServerMessage::UnsubscribeAck {
                        payload: outcome.into(),
                    },
                ),
                Err(e) => reply_error(conn, e.code(), e.to_string()),
            }
            None
        }
        ClientMessage::AlarmAcked { payload } => Some(payload),
    }
}
