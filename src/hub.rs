use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::alarms::{Alarm, AlarmBook, AlarmError, AlarmThresholds};
use crate::connection::{Connection, ConnectionId, HandshakeTimer, Transport};
use crate::error::ErrorCode;
use crate::lifecycle::ConnectionState;
use crate::protocol::ServerMessage;
use crate::types::{close_code, Severity, StreamCode};

/// Timing and threshold settings the hub runs with
#[derive(Debug, Clone)]
pub struct HubConfig {
    /// Telemetry sample cadence
    pub tick_interval: Duration,
    /// Liveness sweep cadence
    pub liveness_interval: Duration,
    /// Inactivity after which an active connection goes idle
    pub idle_threshold: Duration,
    /// Time a client has to send its handshake
    pub handshake_timeout: Duration,
    /// Queued bytes above which a connection counts as slow
    pub backpressure_threshold: usize,
    /// How long a connection may stay slow before eviction
    pub slow_consumer_grace: Duration,
    /// A geo frame goes out every `geo_divisor` ticks
    pub geo_divisor: u64,
    pub alarm_thresholds: AlarmThresholds,
}

impl Default for HubConfig {
    fn default() -> Self {
        Self {
            tick_interval: Duration::from_millis(100),
            liveness_interval: Duration::from_secs(5),
            idle_threshold: Duration::from_secs(15),
            handshake_timeout: Duration::from_secs(5),
            backpressure_threshold: 2 * 1024 * 1024,
            slow_consumer_grace: Duration::from_secs(5),
            geo_divisor: 10,
            alarm_thresholds: AlarmThresholds::default(),
        }
    }
}

/// Read-only view of a connection, for health output and tests
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectionSnapshot {
    pub id: ConnectionId,
    pub state: ConnectionState,
    pub alive: bool,
    pub subscriptions: Vec<StreamCode>,
    pub dropped_frames: u64,
    pub slow: bool,
    pub handshake_pending: bool,
}

impl From<&Connection> for ConnectionSnapshot {
    fn from(conn: &Connection) -> Self {
        Self {
            id: conn.id,
            state: conn.state(),
            alive: conn.alive,
            subscriptions: conn.subscription_codes(),
            dropped_frames: conn.dropped_frames,
            slow: conn.slow_since.is_some(),
            handshake_pending: conn.handshake_timer.is_armed(),
        }
    }
}

/// Serialize and queue a control message on one transport
pub(crate) fn send_message(transport: &dyn Transport, message: &ServerMessage) {
    match serde_json::to_string(message) {
        Ok(json) => transport.send_text(json),
        Err(e) => error!("Failed to serialize message: {}", e),
    }
}

/// Server context: every connection and every alarm.
///
/// Lock order is alarms before connections. Code holding the connections
/// lock must release it before touching the alarm book.
pub struct TelemetryHub {
    config: HubConfig,
    pub(crate) connections: RwLock<HashMap<ConnectionId, Connection>>,
    pub(crate) alarms: Mutex<AlarmBook>,
    started_at: Instant,
}

impl TelemetryHub {
    pub fn new(config: HubConfig) -> Self {
        Self {
            config,
            connections: RwLock::new(HashMap::new()),
            alarms: Mutex::new(AlarmBook::new()),
            started_at: Instant::now(),
        }
    }

    pub fn shared(config: HubConfig) -> Arc<Self> {
        Arc::new(Self::new(config))
    }

    pub fn config(&self) -> &HubConfig {
        &self.config
    }

    pub fn uptime_seconds(&self) -> u64 {
        self.started_at.elapsed().as_secs()
    }

    /// Register a freshly accepted transport.
    ///
    /// The connection starts handshaking right away. The returned token is
    /// cancelled when the handshake timer is disarmed; the caller owns the
    /// task that waits on it.
    pub fn accept(&self, transport: Arc<dyn Transport>, now: Instant) -> (ConnectionId, CancellationToken) {
        let id = Uuid::new_v4();
        let mut conn = Connection::new(id, transport, now);
        conn.transition(ConnectionState::Handshaking);
        let (timer, token) = HandshakeTimer::armed();
        conn.handshake_timer = timer;

        let mut connections = self.connections.write();
        connections.insert(id, conn);
        info!("Connection {} accepted ({} total)", id, connections.len());
        (id, token)
    }

    /// Handshake deadline passed; close if the client never completed it
    pub fn handshake_timed_out(&self, id: ConnectionId) {
        let mut connections = self.connections.write();
        let Some(conn) = connections.get_mut(&id) else {
            return;
        };
        if conn.state() != ConnectionState::Handshaking {
            return;
        }
        warn!("Connection {} did not complete handshake in time", id);
        send_message(
            conn.transport.as_ref(),
            &ServerMessage::error(ErrorCode::ProtocolViolation, "Handshake timeout"),
        );
        conn.close_with(close_code::POLICY_VIOLATION, "Handshake timeout");
    }

    /// The transport is gone; finish the lifecycle and forget the connection
    pub fn on_transport_closed(&self, id: ConnectionId) -> Option<ConnectionSnapshot> {
        let mut connections = self.connections.write();
        let mut conn = connections.remove(&id)?;
        conn.finish();
        info!(
            "Connection {} closed ({} dropped frames, {} remaining)",
            id,
            conn.dropped_frames,
            connections.len()
        );
        Some(ConnectionSnapshot::from(&conn))
    }

    /// Close every live connection with a normal closure
    pub fn close_all(&self, reason: &str) -> usize {
        let mut connections = self.connections.write();
        let mut closed = 0;
        for conn in connections.values_mut() {
            if matches!(conn.state(), ConnectionState::Closing | ConnectionState::Closed) {
                continue;
            }
            conn.close_with(close_code::NORMAL, reason);
            closed += 1;
        }
        if closed > 0 {
            info!("Closed {} connections: {}", closed, reason);
        }
        closed
    }

    pub fn snapshot(&self, id: ConnectionId) -> Option<ConnectionSnapshot> {
        self.connections.read().get(&id).map(ConnectionSnapshot::from)
    }

    pub fn snapshots(&self) -> Vec<ConnectionSnapshot> {
        self.connections.read().values().map(ConnectionSnapshot::from).collect()
    }

    pub fn connection_state(&self, id: ConnectionId) -> Option<ConnectionState> {
        self.connections.read().get(&id).map(|c| c.state())
    }

    pub fn connection_count(&self) -> usize {
        self.connections.read().len()
    }

    pub fn active_connection_count(&self) -> usize {
        self.connections
            .read()
            .values()
            .filter(|c| c.state() == ConnectionState::Active)
            .count()
    }

    /// Queue a control message on every active connection
    pub(crate) fn broadcast_control(&self, message: &ServerMessage) -> usize {
        let json = match serde_json::to_string(message) {
            Ok(json) => json,
            Err(e) => {
                error!("Failed to serialize broadcast: {}", e);
                return 0;
            }
        };

        let connections = self.connections.read();
        let mut sent = 0;
        for conn in connections.values() {
            if conn.state() == ConnectionState::Active && conn.transport.is_open() {
                conn.transport.send_text(json.clone());
                sent += 1;
            }
        }
        sent
    }

    /// Raise an alarm and announce it to every active connection.
    ///
    /// Returns `None` when an unacknowledged alarm with `code` exists.
    pub fn raise_alarm(&self, code: &str, message: &str, severity: Severity) -> Option<Alarm> {
        let mut alarms = self.alarms.lock();
        let alarm = alarms.raise(code, message, severity)?;
        let notified = self.broadcast_control(&ServerMessage::AlarmRaised {
            payload: alarm.clone(),
        });
        info!(
            "Alarm {} raised: {} [{}] ({} notified)",
            alarm.id, alarm.code, alarm.severity, notified
        );
        Some(alarm)
    }

    /// Acknowledge an alarm and announce it to every active connection
    pub fn acknowledge_alarm(
        &self,
        alarm_id: &str,
        operator_name: &str,
        role: &str,
    ) -> Result<Alarm, AlarmError> {
        let mut alarms = self.alarms.lock();
        let alarm = alarms.acknowledge(alarm_id, operator_name, role)?;
        self.broadcast_control(&ServerMessage::AlarmAcked {
            payload: alarm.clone(),
        });
        info!(
            "Alarm {} ({}) acknowledged by {} ({})",
            alarm.id, alarm.code, operator_name, role
        );
        Ok(alarm)
    }

    pub fn alarms(&self) -> Vec<Alarm> {
        self.alarms.lock().list()
    }

    pub fn active_alarm_count(&self) -> usize {
        self.alarms.lock().active_count()
    }
}
