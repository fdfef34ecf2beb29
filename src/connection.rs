use crate::lifecycle::{ConnectionState, Lifecycle, Transition};
use crate::types::StreamDefinition;
use axum::body::Bytes;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Instant;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

/// Unique identifier for connections
pub type ConnectionId = Uuid;

/// Outbound side of a client transport.
///
/// Every method is fire-and-forget: implementations queue the data and
/// return immediately, so the hub never waits on a slow peer.
pub trait Transport: Send + Sync {
    /// Queue a JSON control message
    fn send_text(&self, text: String);

    /// Queue a binary telemetry frame
    fn send_binary(&self, frame: Bytes);

    /// Queue a liveness ping
    fn ping(&self);

    /// Bytes queued but not yet written to the peer
    fn buffered_amount(&self) -> usize;

    /// Whether the transport can still carry data
    fn is_open(&self) -> bool;

    /// Graceful close with a WebSocket close code
    fn close(&self, code: u16, reason: &str);

    /// Abrupt termination without a close handshake
    fn terminate(&self);
}

/// Single-owner handle for the handshake timeout.
///
/// The timer task waits on the token; cancelling it here is the only way
/// the timer is disarmed, and `cancel` reports whether this call did it.
#[derive(Debug, Default)]
pub struct HandshakeTimer {
    token: Option<CancellationToken>,
}

impl HandshakeTimer {
    pub fn armed() -> (Self, CancellationToken) {
        let token = CancellationToken::new();
        (
            Self {
                token: Some(token.clone()),
            },
            token,
        )
    }

    pub fn is_armed(&self) -> bool {
        self.token.is_some()
    }

    pub fn cancel(&mut self) -> bool {
        match self.token.take() {
            Some(token) => {
                token.cancel();
                true
            }
            None => false,
        }
    }
}

/// Per-session server state
pub struct Connection {
    pub id: ConnectionId,
    pub transport: Arc<dyn Transport>,
    lifecycle: Lifecycle,
    /// Cleared before each ping, set again by the pong
    pub alive: bool,
    pub last_activity: Instant,
    pub subscriptions: HashSet<StreamDefinition>,
    /// First tick the send queue was observed above the backpressure limit
    pub slow_since: Option<Instant>,
    pub dropped_frames: u64,
    pub handshake_timer: HandshakeTimer,
    /// Liveness sweeps that found the connection already closing
    pub close_sweeps: u32,
}

impl Connection {
    pub fn new(id: ConnectionId, transport: Arc<dyn Transport>, now: Instant) -> Self {
        Self {
            id,
            transport,
            lifecycle: Lifecycle::new(),
            alive: true,
            last_activity: now,
            subscriptions: HashSet::new(),
            slow_since: None,
            dropped_frames: 0,
            handshake_timer: HandshakeTimer::default(),
            close_sweeps: 0,
        }
    }

    pub fn state(&self) -> ConnectionState {
        self.lifecycle.state()
    }

    pub fn transition(&mut self, next: ConnectionState) -> Transition {
        let outcome = self.lifecycle.transition(next);
        self.after_transition(outcome);
        outcome
    }

    pub fn complete_handshake(&mut self) -> Transition {
        let outcome = self.lifecycle.complete_handshake();
        if outcome.is_applied() {
            self.handshake_timer.cancel();
        }
        outcome
    }

    pub fn begin_close(&mut self) -> Transition {
        let outcome = self.lifecycle.begin_close();
        self.after_transition(outcome);
        outcome
    }

    pub fn finish(&mut self) -> Transition {
        let outcome = self.lifecycle.finish();
        self.after_transition(outcome);
        outcome
    }

    /// Close the transport with `code` and move towards `Closed`
    pub fn close_with(&mut self, code: u16, reason: &str) -> Transition {
        self.transport.close(code, reason);
        self.begin_close()
    }

    pub fn touch(&mut self, now: Instant) {
        self.last_activity = now;
    }

    pub fn is_subscribed(&self, stream: StreamDefinition) -> bool {
        self.subscriptions.contains(&stream)
    }

    /// Subscriptions as wire codes, sorted
    pub fn subscription_codes(&self) -> Vec<u8> {
        let mut codes: Vec<u8> = self.subscriptions.iter().map(|s| s.code()).collect();
        codes.sort_unstable();
        codes
    }

    fn after_transition(&mut self, outcome: Transition) {
        if let Transition::Applied { to, .. } = outcome {
            if matches!(to, ConnectionState::Closing | ConnectionState::Closed) {
                self.handshake_timer.cancel();
            }
        }
    }
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("id", &self.id)
            .field("state", &self.state())
            .field("alive", &self.alive)
            .field("subscriptions", &self.subscriptions)
            .field("slow_since", &self.slow_since)
            .field("dropped_frames", &self.dropped_frames)
            .finish()
    }
}
