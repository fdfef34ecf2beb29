//! Frame fan-out with slow-consumer eviction
//!
//! A connection whose transport has more than `backpressure_threshold`
//! bytes queued gets no new frames; each skipped frame is counted. If it
//! stays over the limit for longer than `slow_consumer_grace` it is closed
//! with 1009. The check and the send for one connection happen under the
//! connections write lock, so `slow_since` is never observed half-updated.

use std::time::{Duration, Instant};
use tracing::{info, warn};

use crate::connection::Connection;
use crate::framer::TelemetryFrame;
use crate::hub::TelemetryHub;
use crate::lifecycle::ConnectionState;
use crate::types::close_code;

/// Outcome of offering one frame to one connection
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    Sent,
    /// Closed transport, not active, or not subscribed
    Skipped,
    /// Over the backpressure limit, frame dropped
    Dropped,
    /// Over the limit past the grace period, connection closed
    Evicted,
}

/// Counts for one broadcast
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BroadcastReport {
    pub sent: usize,
    pub dropped: usize,
    pub evicted: usize,
}

impl BroadcastReport {
    fn record(&mut self, delivery: Delivery) {
        match delivery {
            Delivery::Sent => self.sent += 1,
            Delivery::Dropped => self.dropped += 1,
            Delivery::Evicted => {
                self.dropped += 1;
                self.evicted += 1;
            }
            Delivery::Skipped => {}
        }
    }
}

/// Backpressure limits applied per connection
#[derive(Debug, Clone, Copy)]
pub struct BackpressurePolicy {
    pub threshold: usize,
    pub grace: Duration,
}

pub fn deliver(
    conn: &mut Connection,
    frame: &TelemetryFrame,
    policy: BackpressurePolicy,
    now: Instant,
) -> Delivery {
    if !conn.transport.is_open()
        || conn.state() != ConnectionState::Active
        || !conn.is_subscribed(frame.stream)
    {
        return Delivery::Skipped;
    }

    let queued = conn.transport.buffered_amount();
    if queued <= policy.threshold {
        conn.slow_since = None;
        conn.transport.send_binary(frame.bytes.clone());
        return Delivery::Sent;
    }

    conn.dropped_frames += 1;
    let slow_since = *conn.slow_since.get_or_insert(now);
    if now.saturating_duration_since(slow_since) > policy.grace {
        warn!(
            "Evicting slow consumer {} ({} bytes queued, {} frames dropped)",
            conn.id, queued, conn.dropped_frames
        );
        conn.close_with(close_code::OVERLOADED, "Consumer too slow");
        return Delivery::Evicted;
    }
    Delivery::Dropped
}

impl TelemetryHub {
    fn backpressure_policy(&self) -> BackpressurePolicy {
        BackpressurePolicy {
            threshold: self.config().backpressure_threshold,
            grace: self.config().slow_consumer_grace,
        }
    }

    /// Offer `frame` to every active subscriber of its stream
    pub fn broadcast_frame(&self, frame: &TelemetryFrame, now: Instant) -> BroadcastReport {
        let policy = self.backpressure_policy();
        let mut report = BroadcastReport::default();

        let mut connections = self.connections.write();
        for conn in connections.values_mut() {
            report.record(deliver(conn, frame, policy, now));
        }

        if report.evicted > 0 {
            info!(
                "Broadcast {} seq {}: {} sent, {} dropped, {} evicted",
                frame.stream, frame.sequence, report.sent, report.dropped, report.evicted
            );
        }
        report
    }
}
