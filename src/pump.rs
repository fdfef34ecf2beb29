//! Telemetry pump - turns sample ticks into frames and alarms
//!
//! Each step draws one sample, broadcasts a drill frame, broadcasts a geo
//! frame every `geo_divisor` ticks, then scans the sample for alarm
//! conditions. A failed or panicking step is logged and the next tick runs
//! as usual.

use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::time::Instant;
use tokio::time::{interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use crate::alarms;
use crate::broadcast::BroadcastReport;
use crate::error::HubResult;
use crate::framer::{FrameEncoder, FrameFields};
use crate::hub::TelemetryHub;
use crate::sample::SampleSource;

/// What one pump step produced
#[derive(Debug, Clone, Default)]
pub struct PumpStep {
    pub tick: u64,
    pub drill_sequence: u32,
    pub geo_sequence: Option<u32>,
    pub drill: BroadcastReport,
    pub geo: Option<BroadcastReport>,
    pub alarms_raised: Vec<String>,
}

pub struct TelemetryPump {
    source: Box<dyn SampleSource>,
    encoder: FrameEncoder,
    tick: u64,
    geo_divisor: u64,
}

impl TelemetryPump {
    pub fn new(source: Box<dyn SampleSource>, geo_divisor: u64) -> Self {
        Self {
            source,
            encoder: FrameEncoder::new(),
            tick: 0,
            geo_divisor: geo_divisor.max(1),
        }
    }

    pub fn tick(&self) -> u64 {
        self.tick
    }

    pub fn step(&mut self, hub: &TelemetryHub, now: Instant) -> HubResult<PumpStep> {
        let tick = self.tick;
        self.tick = self.tick.wrapping_add(1);

        let sample = self.source.next_sample(tick)?;

        let drill = self.encoder.encode(&FrameFields::drill(&sample), sample.timestamp_ms);
        let mut step = PumpStep {
            tick,
            drill_sequence: drill.sequence,
            drill: hub.broadcast_frame(&drill, now),
            ..Default::default()
        };

        if tick % self.geo_divisor == 0 {
            let geo = self.encoder.encode(&FrameFields::geo(&sample), sample.timestamp_ms);
            step.geo_sequence = Some(geo.sequence);
            step.geo = Some(hub.broadcast_frame(&geo, now));
        }

        for condition in alarms::scan(&sample, &hub.config().alarm_thresholds) {
            if let Some(alarm) = hub.raise_alarm(condition.code, &condition.message, condition.severity) {
                step.alarms_raised.push(alarm.id);
            }
        }

        Ok(step)
    }
}

/// One guarded step: errors and panics are logged, never propagated.
///
/// parking_lot locks do not poison, so the hub stays usable after a panic
/// unwinds out of a step.
pub fn run_tick(pump: &mut TelemetryPump, hub: &TelemetryHub, now: Instant) -> Option<PumpStep> {
    let Ok(result) = panic::catch_unwind(AssertUnwindSafe(|| pump.step(hub, now))) else {
        error!("Telemetry tick {} panicked", pump.tick().wrapping_sub(1));
        return None;
    };
    match result {
        Ok(step) => Some(step),
        Err(e) => {
            error!("Telemetry tick {} failed: {}", pump.tick().wrapping_sub(1), e);
            None
        }
    }
}

/// Run the pump on the configured tick until `shutdown` fires
pub async fn run_pump(mut pump: TelemetryPump, hub: Arc<TelemetryHub>, shutdown: CancellationToken) {
    let mut ticker = interval(hub.config().tick_interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    info!("Telemetry pump started ({:?} tick)", hub.config().tick_interval);

    loop {
        tokio::select! {
            biased;

            _ = shutdown.cancelled() => {
                info!("Telemetry pump stopped after {} ticks", pump.tick());
                break;
            }

            _ = ticker.tick() => {
                if let Some(step) = run_tick(&mut pump, &hub, Instant::now()) {
                    if !step.alarms_raised.is_empty() {
                        debug!("Tick {} raised {:?}", step.tick, step.alarms_raised);
                    }
                }
            }
        }
    }
}
