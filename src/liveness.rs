//! Liveness pings and idle detection
//!
//! Every sweep pings live connections and terminates the ones that missed
//! the previous ping. Connections already closing get one full interval for
//! the close handshake; if the transport is still around on the next sweep
//! it is terminated and the connection is dropped from the hub.

use std::sync::Arc;
use std::time::Instant;
use tokio::time::{interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::connection::{Connection, ConnectionId};
use crate::hub::TelemetryHub;
use crate::lifecycle::ConnectionState;

/// What one sweep did across all connections
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepReport {
    pub pinged: usize,
    pub idled: usize,
    pub terminated: usize,
    /// Stuck closing connections torn down and removed
    pub reaped: usize,
}

/// Returns true when the connection should leave the hub
fn sweep_connection(
    conn: &mut Connection,
    now: Instant,
    idle_threshold: std::time::Duration,
    report: &mut SweepReport,
) -> bool {
    if matches!(conn.state(), ConnectionState::Closing | ConnectionState::Closed) {
        conn.close_sweeps += 1;
        if conn.close_sweeps < 2 {
            return false;
        }
        info!(
            "Connection {} stuck in {} for a full sweep, terminating",
            conn.id,
            conn.state()
        );
        conn.transport.terminate();
        conn.finish();
        report.reaped += 1;
        return true;
    }

    if conn.state() == ConnectionState::Active
        && now.saturating_duration_since(conn.last_activity) > idle_threshold
        && conn.transition(ConnectionState::Idle).is_applied()
    {
        debug!("Connection {} idle", conn.id);
        report.idled += 1;
    }

    if !conn.alive {
        info!("Connection {} missed liveness ping, terminating", conn.id);
        conn.transport.terminate();
        conn.begin_close();
        report.terminated += 1;
        return false;
    }

    conn.alive = false;
    conn.transport.ping();
    report.pinged += 1;
    false
}

impl TelemetryHub {
    /// Ping every connection and idle the quiet ones.
    ///
    /// A connection that has not answered the previous ping is terminated;
    /// the transport close callback finishes it off. One whose close has not
    /// completed by the following sweep is removed here instead.
    pub fn liveness_sweep(&self, now: Instant) -> SweepReport {
        let idle_threshold = self.config().idle_threshold;
        let mut report = SweepReport::default();

        let mut connections = self.connections.write();
        connections.retain(|_, conn| !sweep_connection(conn, now, idle_threshold, &mut report));
        report
    }

    /// Pong from the client
    pub fn record_pong(&self, id: ConnectionId) {
        let mut connections = self.connections.write();
        let Some(conn) = connections.get_mut(&id) else {
            return;
        };
        conn.alive = true;
        if conn.state() == ConnectionState::Idle && conn.transition(ConnectionState::Active).is_applied() {
            debug!("Connection {} active again after pong", id);
        }
    }
}

/// Run liveness sweeps until `shutdown` fires
pub async fn run_liveness(hub: Arc<TelemetryHub>, shutdown: CancellationToken) {
    let mut ticker = interval(hub.config().liveness_interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    // The first tick completes immediately; skip it so new connections get
    // a full interval before their first ping.
    ticker.tick().await;

    loop {
        tokio::select! {
            biased;

            _ = shutdown.cancelled() => {
                info!("Liveness monitor stopped");
                break;
            }

            _ = ticker.tick() => {
                let report = hub.liveness_sweep(Instant::now());
                if report.idled > 0 || report.terminated > 0 || report.reaped > 0 {
                    info!(
                        "Liveness sweep: {} pinged, {} idled, {} terminated, {} reaped",
                        report.pinged, report.idled, report.terminated, report.reaped
                    );
                }
            }
        }
    }
}
