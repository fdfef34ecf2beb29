// End-to-end hub behavior over a recording transport: no sockets, time is
// passed in explicitly.

use axum::body::Bytes;
use parking_lot::Mutex;
use rig_telemetry::framer;
use rig_telemetry::sample::{RigSample, SampleSource, SourceError};
use rig_telemetry::{
    ConnectionId, ConnectionState, HubConfig, Severity, StreamDefinition, TelemetryHub, TelemetryPump,
    Transport,
};
use serde_json::{json, Value};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

#[derive(Default)]
struct Recorder {
    texts: Mutex<Vec<String>>,
    frames: Mutex<Vec<Bytes>>,
    pings: AtomicUsize,
    buffered: AtomicUsize,
    closed: Mutex<Option<u16>>,
    terminated: AtomicBool,
}

impl Recorder {
    fn messages(&self) -> Vec<Value> {
        self.texts
            .lock()
            .iter()
            .map(|t| serde_json::from_str(t).unwrap())
            .collect()
    }

    fn of_type(&self, message_type: &str) -> Vec<Value> {
        self.messages()
            .into_iter()
            .filter(|m| m["messageType"] == message_type)
            .collect()
    }

    fn frames(&self) -> Vec<Bytes> {
        self.frames.lock().clone()
    }

    fn close_code(&self) -> Option<u16> {
        *self.closed.lock()
    }
}

impl Transport for Recorder {
    fn send_text(&self, text: String) {
        self.texts.lock().push(text);
    }

    fn send_binary(&self, frame: Bytes) {
        self.frames.lock().push(frame);
    }

    fn ping(&self) {
        self.pings.fetch_add(1, Ordering::SeqCst);
    }

    fn buffered_amount(&self) -> usize {
        self.buffered.load(Ordering::SeqCst)
    }

    fn is_open(&self) -> bool {
        self.closed.lock().is_none() && !self.terminated.load(Ordering::SeqCst)
    }

    fn close(&self, code: u16, _reason: &str) {
        self.closed.lock().get_or_insert(code);
    }

    fn terminate(&self) {
        self.terminated.store(true, Ordering::SeqCst);
    }
}

/// Steady rig with one gas reading per tick
struct GasScript {
    gas: Vec<f32>,
}

impl SampleSource for GasScript {
    fn next_sample(&mut self, tick: u64) -> Result<RigSample, SourceError> {
        let gas = self.gas.get(tick as usize).copied().unwrap_or(0.5);
        Ok(RigSample {
            timestamp_ms: 1_700_000_000_000 + tick * 100,
            depth: 1500.0 + tick as f32 * 0.01,
            rpm: 120.0,
            wob: 25.0,
            torque: 15.0,
            hook_load: 180.0,
            spp: 2500.0,
            gamma: 80.0,
            rop: 30.0,
            gas,
            inclination: 2.0,
            azimuth: 45.0,
        })
    }
}

fn connect(hub: &TelemetryHub, now: Instant) -> (ConnectionId, Arc<Recorder>) {
    let transport = Arc::new(Recorder::default());
    let (id, _) = hub.accept(transport.clone(), now);
    (id, transport)
}

fn send(hub: &TelemetryHub, id: ConnectionId, message: Value, now: Instant) {
    hub.handle_message(id, message.to_string().as_bytes(), now);
}

fn handshake(hub: &TelemetryHub, id: ConnectionId, now: Instant) {
    send(hub, id, json!({"messageType": "HANDSHAKE", "schemaId": 1}), now);
}

// =============================================================================
// HANDSHAKE
// =============================================================================

#[test]
fn test_handshake_then_subscribe() {
    let hub = TelemetryHub::new(HubConfig::default());
    let now = Instant::now();
    let (id, client) = connect(&hub, now);
    assert_eq!(hub.connection_state(id), Some(ConnectionState::Handshaking));

    handshake(&hub, id, now);
    send(&hub, id, json!({"messageType": "SUBSCRIBE", "streams": [101, 102, 999]}), now);

    let acks = client.of_type("HANDSHAKE_ACK");
    assert_eq!(acks[0]["payload"]["availableStreams"], json!([101, 102]));

    let sub = &client.of_type("SUBSCRIBE_ACK")[0]["payload"];
    assert_eq!(sub["accepted"], json!([101, 102]));
    assert_eq!(sub["rejected"], json!([999]));
    assert_eq!(hub.snapshot(id).unwrap().subscriptions, vec![101, 102]);
}

#[test]
fn test_subscribe_before_handshake_closes() {
    let hub = TelemetryHub::new(HubConfig::default());
    let now = Instant::now();
    let (id, client) = connect(&hub, now);

    send(&hub, id, json!({"messageType": "SUBSCRIBE", "streams": [101]}), now);

    assert_eq!(client.close_code(), Some(1008));
    assert_eq!(client.of_type("ERROR")[0]["payload"]["code"], "PROTOCOL_VIOLATION");
    assert_eq!(hub.connection_state(id), Some(ConnectionState::Closed));
    assert!(client.of_type("SUBSCRIBE_ACK").is_empty());
}

#[test]
fn test_wrong_schema_closes() {
    let hub = TelemetryHub::new(HubConfig::default());
    let now = Instant::now();
    let (id, client) = connect(&hub, now);

    send(&hub, id, json!({"messageType": "HANDSHAKE", "schemaId": 2}), now);

    assert_eq!(client.close_code(), Some(1008));
    assert_eq!(client.of_type("ERROR")[0]["payload"]["code"], "UNSUPPORTED_SCHEMA");
}

#[test]
fn test_malformed_json_closes_active_connection() {
    let hub = TelemetryHub::new(HubConfig::default());
    let now = Instant::now();
    let (id, client) = connect(&hub, now);
    handshake(&hub, id, now);

    hub.handle_message(id, b"{not json", now);

    assert_eq!(client.close_code(), Some(1008));
    assert_eq!(hub.connection_state(id), Some(ConnectionState::Closing));

    hub.on_transport_closed(id);
    assert_eq!(hub.connection_count(), 0);
}

#[test]
fn test_handshake_timeout_closes() {
    let hub = TelemetryHub::new(HubConfig::default());
    let (id, client) = connect(&hub, Instant::now());

    hub.handshake_timed_out(id);

    assert_eq!(client.close_code(), Some(1008));
    assert_eq!(hub.connection_state(id), Some(ConnectionState::Closed));
}

#[test]
fn test_handshake_timeout_after_handshake_is_ignored() {
    let hub = TelemetryHub::new(HubConfig::default());
    let now = Instant::now();
    let (id, client) = connect(&hub, now);
    handshake(&hub, id, now);

    hub.handshake_timed_out(id);

    assert_eq!(client.close_code(), None);
    assert_eq!(hub.connection_state(id), Some(ConnectionState::Active));
}

// =============================================================================
// TELEMETRY
// =============================================================================

#[test]
fn test_frames_follow_subscriptions() {
    let hub = TelemetryHub::new(HubConfig::default());
    let now = Instant::now();
    let (drill_id, drill_client) = connect(&hub, now);
    let (geo_id, geo_client) = connect(&hub, now);
    let (_, silent_client) = connect(&hub, now);

    handshake(&hub, drill_id, now);
    handshake(&hub, geo_id, now);
    send(&hub, drill_id, json!({"messageType": "SUBSCRIBE", "streams": [101]}), now);
    send(&hub, geo_id, json!({"messageType": "SUBSCRIBE", "streams": [102]}), now);

    let mut pump = TelemetryPump::new(Box::new(GasScript { gas: vec![] }), 10);
    for _ in 0..20 {
        pump.step(&hub, now).unwrap();
    }

    let drill: Vec<_> = drill_client
        .frames()
        .iter()
        .map(|f| framer::decode(f).unwrap())
        .collect();
    assert_eq!(drill.len(), 20);
    assert!(drill.iter().all(|f| f.stream == StreamDefinition::Drill));
    assert!(drill.windows(2).all(|w| w[1].sequence == w[0].sequence + 1));

    let geo = geo_client.frames();
    assert_eq!(geo.len(), 2);
    assert!(geo.iter().all(|f| f.len() == 40 && f[0] == 102));

    assert!(silent_client.frames().is_empty());
}

#[test]
fn test_unsubscribe_stops_frames() {
    let hub = TelemetryHub::new(HubConfig::default());
    let now = Instant::now();
    let (id, client) = connect(&hub, now);
    handshake(&hub, id, now);
    send(&hub, id, json!({"messageType": "SUBSCRIBE", "streams": [101]}), now);

    let mut pump = TelemetryPump::new(Box::new(GasScript { gas: vec![] }), 10);
    pump.step(&hub, now).unwrap();
    send(&hub, id, json!({"messageType": "UNSUBSCRIBE", "streams": [101]}), now);
    pump.step(&hub, now).unwrap();

    assert_eq!(client.frames().len(), 1);
    assert_eq!(client.of_type("UNSUBSCRIBE_ACK")[0]["payload"]["removed"], json!([101]));
}

#[test]
fn test_slow_consumer_is_evicted_and_others_keep_flowing() {
    let config = HubConfig::default();
    let grace = config.slow_consumer_grace;
    let threshold = config.backpressure_threshold;
    let hub = TelemetryHub::new(config);
    let start = Instant::now();

    let (slow_id, slow) = connect(&hub, start);
    let (fast_id, fast) = connect(&hub, start);
    for id in [slow_id, fast_id] {
        handshake(&hub, id, start);
        send(&hub, id, json!({"messageType": "SUBSCRIBE", "streams": [101]}), start);
    }
    slow.buffered.store(threshold + 1, Ordering::SeqCst);

    let mut pump = TelemetryPump::new(Box::new(GasScript { gas: vec![] }), 10);
    let first = pump.step(&hub, start).unwrap();
    assert_eq!(first.drill.sent, 1);
    assert_eq!(first.drill.dropped, 1);

    let within_grace = pump.step(&hub, start + grace / 2).unwrap();
    assert_eq!(within_grace.drill.evicted, 0);
    assert_eq!(slow.close_code(), None);

    let late = pump.step(&hub, start + grace + Duration::from_millis(1)).unwrap();
    assert_eq!(late.drill.evicted, 1);
    assert_eq!(slow.close_code(), Some(1009));
    assert!(slow.frames().is_empty());
    assert_eq!(fast.frames().len(), 3);
}

#[test]
fn test_backlog_draining_restores_delivery() {
    let hub = TelemetryHub::new(HubConfig::default());
    let now = Instant::now();
    let (id, client) = connect(&hub, now);
    handshake(&hub, id, now);
    send(&hub, id, json!({"messageType": "SUBSCRIBE", "streams": [101]}), now);

    let mut pump = TelemetryPump::new(Box::new(GasScript { gas: vec![] }), 10);
    client.buffered.store(usize::MAX / 2, Ordering::SeqCst);
    pump.step(&hub, now).unwrap();
    client.buffered.store(0, Ordering::SeqCst);
    pump.step(&hub, now).unwrap();

    let snapshot = hub.snapshot(id).unwrap();
    assert_eq!(snapshot.dropped_frames, 1);
    assert!(!snapshot.slow);
    assert_eq!(client.frames().len(), 1);
}

// =============================================================================
// ALARMS
// =============================================================================

#[test]
fn test_gas_spike_raises_once_and_acks() {
    let hub = TelemetryHub::new(HubConfig::default());
    let now = Instant::now();
    let (id, client) = connect(&hub, now);
    handshake(&hub, id, now);

    let mut pump = TelemetryPump::new(Box::new(GasScript { gas: vec![8.0, 9.0, 9.5] }), 10);
    let first = pump.step(&hub, now).unwrap();
    pump.step(&hub, now).unwrap();
    pump.step(&hub, now).unwrap();

    assert_eq!(first.alarms_raised.len(), 1);
    let raised = client.of_type("ALARM_RAISED");
    assert_eq!(raised.len(), 1);
    assert_eq!(raised[0]["payload"]["code"], "HIGH_GAS");
    assert_eq!(raised[0]["payload"]["severity"], "CRITICAL");

    let alarm_id = raised[0]["payload"]["id"].as_str().unwrap().to_string();
    send(
        &hub,
        id,
        json!({
            "messageType": "ALARM_ACKED",
            "payload": {"alarmId": alarm_id, "operatorName": "J. Doe", "role": "Driller"}
        }),
        now,
    );

    let acked = client.of_type("ALARM_ACKED");
    assert_eq!(acked.len(), 1);
    assert_eq!(acked[0]["payload"]["acknowledged"], true);
    assert_eq!(acked[0]["payload"]["acknowledgment"]["operatorName"], "J. Doe");
    assert_eq!(hub.active_alarm_count(), 0);

    send(
        &hub,
        id,
        json!({
            "messageType": "ALARM_ACKED",
            "payload": {"alarmId": alarm_id, "operatorName": "J. Doe", "role": "Driller"}
        }),
        now,
    );
    assert_eq!(client.of_type("ERROR")[0]["payload"]["code"], "ALREADY_ACKED");

    // Acknowledged, so the same condition may raise again
    let mut pump = TelemetryPump::new(Box::new(GasScript { gas: vec![9.0] }), 10);
    assert_eq!(pump.step(&hub, now).unwrap().alarms_raised.len(), 1);
    assert_eq!(hub.alarms().len(), 2);
}

#[test]
fn test_ack_unknown_alarm() {
    let hub = TelemetryHub::new(HubConfig::default());
    let now = Instant::now();
    let (id, client) = connect(&hub, now);
    handshake(&hub, id, now);

    send(
        &hub,
        id,
        json!({
            "messageType": "ALARM_ACKED",
            "payload": {"alarmId": "ALM-999999", "operatorName": "op", "role": "Driller"}
        }),
        now,
    );

    assert_eq!(client.of_type("ERROR")[0]["payload"]["code"], "ALARM_NOT_FOUND");
    assert_eq!(hub.connection_state(id), Some(ConnectionState::Active));
}

#[test]
fn test_alarms_skip_handshaking_connections() {
    let hub = TelemetryHub::new(HubConfig::default());
    let now = Instant::now();
    let (_, pending) = connect(&hub, now);

    hub.raise_alarm("HIGH_TORQUE", "Torque above limit", Severity::Warning);

    assert!(pending.of_type("ALARM_RAISED").is_empty());
}

// =============================================================================
// LIVENESS
// =============================================================================

#[test]
fn test_idle_connection_wakes_on_message() {
    let config = HubConfig::default();
    let idle_after = config.idle_threshold;
    let hub = TelemetryHub::new(config);
    let start = Instant::now();
    let (id, client) = connect(&hub, start);
    handshake(&hub, id, start);

    let later = start + idle_after + Duration::from_secs(1);
    let report = hub.liveness_sweep(later);
    assert_eq!(report.idled, 1);
    assert_eq!(hub.connection_state(id), Some(ConnectionState::Idle));

    send(&hub, id, json!({"messageType": "SUBSCRIBE", "streams": [102]}), later);
    assert_eq!(hub.connection_state(id), Some(ConnectionState::Active));
    assert_eq!(client.of_type("SUBSCRIBE_ACK").len(), 1);
}

#[test]
fn test_unanswered_ping_terminates() {
    let hub = TelemetryHub::new(HubConfig::default());
    let now = Instant::now();
    let (id, client) = connect(&hub, now);
    handshake(&hub, id, now);

    hub.liveness_sweep(now);
    assert_eq!(client.pings.load(Ordering::SeqCst), 1);

    let report = hub.liveness_sweep(now);
    assert_eq!(report.terminated, 1);
    assert!(client.terminated.load(Ordering::SeqCst));

    hub.on_transport_closed(id);
    assert!(hub.snapshot(id).is_none());
}

#[test]
fn test_pong_keeps_connection() {
    let hub = TelemetryHub::new(HubConfig::default());
    let now = Instant::now();
    let (id, client) = connect(&hub, now);
    handshake(&hub, id, now);

    for _ in 0..3 {
        hub.liveness_sweep(now);
        hub.record_pong(id);
    }

    assert!(!client.terminated.load(Ordering::SeqCst));
    assert_eq!(client.pings.load(Ordering::SeqCst), 3);
    assert!(hub.snapshot(id).unwrap().alive);
}
