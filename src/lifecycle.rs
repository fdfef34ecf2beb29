//! Connection lifecycle state machine
//!
//! Connecting -> Handshaking -> Active <-> Idle -> Closing -> Closed
//!
//! The static table below covers every edge except Handshaking -> Active,
//! which only the protocol dispatcher may take after validating a handshake
//! (see `Lifecycle::complete_handshake`).

use serde::{Deserialize, Serialize};
use tracing::warn;

/// Lifecycle state of a client connection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ConnectionState {
    /// Transport accepted, nothing exchanged yet
    Connecting,
    /// Waiting for the client's HANDSHAKE message
    Handshaking,
    /// Handshake done, receiving telemetry
    Active,
    /// No inbound activity for a while, telemetry paused
    Idle,
    /// Close initiated, waiting for the transport to go away
    Closing,
    /// Terminal
    Closed,
}

impl ConnectionState {
    /// States reachable from `self` through the static table
    pub fn allowed_targets(self) -> &'static [ConnectionState] {
        use ConnectionState::*;
        match self {
            Connecting => &[Handshaking, Closing],
            Handshaking => &[Closed],
            Active => &[Idle, Closing, Closed],
            Idle => &[Active, Closing, Closed],
            Closing => &[Closed],
            Closed => &[],
        }
    }

    pub fn can_transition_to(self, next: ConnectionState) -> bool {
        self.allowed_targets().contains(&next)
    }

    /// Whether subscriptions may be changed in this state
    pub fn accepts_subscriptions(self) -> bool {
        matches!(self, ConnectionState::Active | ConnectionState::Idle)
    }

    /// The state a close request should move to from here
    pub fn close_target(self) -> ConnectionState {
        if self.can_transition_to(ConnectionState::Closing) {
            ConnectionState::Closing
        } else {
            ConnectionState::Closed
        }
    }
}

impl std::fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            ConnectionState::Connecting => "connecting",
            ConnectionState::Handshaking => "handshaking",
            ConnectionState::Active => "active",
            ConnectionState::Idle => "idle",
            ConnectionState::Closing => "closing",
            ConnectionState::Closed => "closed",
        };
        f.write_str(name)
    }
}

/// Result of a transition request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    /// State changed from `from` to `to`
    Applied {
        from: ConnectionState,
        to: ConnectionState,
    },
    /// Edge not in the table, state unchanged
    Rejected {
        from: ConnectionState,
        requested: ConnectionState,
    },
    /// Connection already closed, nothing to do
    Ignored,
}

impl Transition {
    pub fn is_applied(&self) -> bool {
        matches!(self, Transition::Applied { .. })
    }
}

/// Holder of a single connection's state, the only place it changes
#[derive(Debug, Clone)]
pub struct Lifecycle {
    state: ConnectionState,
}

impl Lifecycle {
    pub fn new() -> Self {
        Self {
            state: ConnectionState::Connecting,
        }
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    /// Request a transition along the static table
    pub fn transition(&mut self, next: ConnectionState) -> Transition {
        let from = self.state;
        if from == ConnectionState::Closed {
            return Transition::Ignored;
        }
        if !from.can_transition_to(next) {
            warn!("Protocol warning: illegal transition {} -> {}", from, next);
            return Transition::Rejected {
                from,
                requested: next,
            };
        }
        self.state = next;
        Transition::Applied { from, to: next }
    }

    /// Handshaking -> Active, the one edge outside the static table
    pub fn complete_handshake(&mut self) -> Transition {
        match self.state {
            ConnectionState::Handshaking => {
                self.state = ConnectionState::Active;
                Transition::Applied {
                    from: ConnectionState::Handshaking,
                    to: ConnectionState::Active,
                }
            }
            ConnectionState::Closed => Transition::Ignored,
            from => {
                warn!("Protocol warning: handshake completion requested in state {}", from);
                Transition::Rejected {
                    from,
                    requested: ConnectionState::Active,
                }
            }
        }
    }

    /// Move towards closure along legal edges
    pub fn begin_close(&mut self) -> Transition {
        let target = self.state.close_target();
        self.transition(target)
    }

    /// Drive to `Closed` along legal edges, used when the transport is gone
    pub fn finish(&mut self) -> Transition {
        let from = self.state;
        if from == ConnectionState::Closed {
            return Transition::Ignored;
        }
        if !from.can_transition_to(ConnectionState::Closed) {
            self.transition(ConnectionState::Closing);
        }
        self.transition(ConnectionState::Closed);
        Transition::Applied {
            from,
            to: self.state,
        }
    }
}

impl Default for Lifecycle {
    fn default() -> Self {
        Self::new()
    }
}
