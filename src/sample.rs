//! Sample sources feeding the telemetry pump
//!
//! The hub only needs "given a tick, produce a sample". `PhysicsSampleSource`
//! is a mock rig good enough for demos: lagged RPM/WOB, coupled torque,
//! SPP and hook load, depth that only advances while drilling, and a slow
//! random walk for the geology channels.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::Serialize;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum SourceError {
    #[error("Sample source unavailable: {0}")]
    Unavailable(String),

    #[error("Invalid reading: {0}")]
    InvalidReading(String),
}

/// One reading of every rig channel
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RigSample {
    /// Unix milliseconds
    pub timestamp_ms: u64,
    pub depth: f32,
    pub rpm: f32,
    pub wob: f32,
    pub torque: f32,
    pub hook_load: f32,
    pub spp: f32,
    pub gamma: f32,
    pub rop: f32,
    pub gas: f32,
    pub inclination: f32,
    pub azimuth: f32,
}

pub trait SampleSource: Send {
    fn next_sample(&mut self, tick: u64) -> Result<RigSample, SourceError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RigActivity {
    Drilling,
    Connection,
}

/// Tuning for the mock rig
#[derive(Debug, Clone)]
pub struct PhysicsConfig {
    pub string_weight: f32,
    pub block_weight: f32,
    pub bit_friction: f32,
    pub drilling_rpm: f32,
    pub drilling_wob: f32,
    /// Chance per tick of switching between drilling and connection
    pub activity_switch_probability: f64,
    /// Chance per tick of a gas kick starting
    pub gas_kick_probability: f64,
    pub noise_rpm: f32,
    pub noise_wob: f32,
    pub noise_torque: f32,
    pub noise_spp: f32,
    pub noise_hook_load: f32,
    /// Depth gained per tick while drilling, metres
    pub depth_step: f32,
}

impl Default for PhysicsConfig {
    fn default() -> Self {
        Self {
            string_weight: 250.0,
            block_weight: 40.0,
            bit_friction: 0.35,
            drilling_rpm: 120.0,
            drilling_wob: 25.0,
            activity_switch_probability: 0.001,
            gas_kick_probability: 0.0005,
            noise_rpm: 0.5,
            noise_wob: 2.5,
            noise_torque: 1.2,
            noise_spp: 5.0,
            noise_hook_load: 1.5,
            depth_step: 0.002,
        }
    }
}

fn lag(current: f32, target: f32, factor: f32) -> f32 {
    current + (target - current) * factor
}

pub struct PhysicsSampleSource {
    config: PhysicsConfig,
    rng: StdRng,
    start_ms: u64,
    tick_interval_ms: u64,
    activity: RigActivity,
    depth: f32,
    target_rpm: f32,
    current_rpm: f32,
    target_wob: f32,
    current_wob: f32,
    vibration_phase: f32,
    gamma: f32,
    gas: f32,
    gas_kick_ticks: u32,
    inclination: f32,
    azimuth: f32,
}

impl PhysicsSampleSource {
    pub fn new(config: PhysicsConfig, start_ms: u64, tick_interval_ms: u64) -> Self {
        Self::with_rng(config, StdRng::from_entropy(), start_ms, tick_interval_ms)
    }

    /// Deterministic source for tests and replays
    pub fn seeded(config: PhysicsConfig, seed: u64, start_ms: u64, tick_interval_ms: u64) -> Self {
        Self::with_rng(config, StdRng::seed_from_u64(seed), start_ms, tick_interval_ms)
    }

    fn with_rng(config: PhysicsConfig, rng: StdRng, start_ms: u64, tick_interval_ms: u64) -> Self {
        Self {
            target_rpm: config.drilling_rpm,
            target_wob: config.drilling_wob,
            config,
            rng,
            start_ms,
            tick_interval_ms,
            activity: RigActivity::Drilling,
            depth: 1500.0,
            current_rpm: 0.0,
            current_wob: 0.0,
            vibration_phase: 0.0,
            gamma: 60.0,
            gas: 0.8,
            gas_kick_ticks: 0,
            inclination: 12.0,
            azimuth: 145.0,
        }
    }

    pub fn activity(&self) -> RigActivity {
        self.activity
    }

    /// Box-Muller
    fn gaussian(&mut self, mean: f32, std_dev: f32) -> f32 {
        let u: f64 = self.rng.gen_range(f64::EPSILON..1.0);
        let v: f64 = self.rng.gen_range(0.0..1.0);
        let z = (-2.0 * u.ln()).sqrt() * (2.0 * std::f64::consts::PI * v).cos();
        mean + (z as f32) * std_dev
    }

    fn maybe_switch_activity(&mut self) {
        if self.rng.gen_bool(self.config.activity_switch_probability) {
            match self.activity {
                RigActivity::Drilling => {
                    self.activity = RigActivity::Connection;
                    self.target_rpm = 0.0;
                    self.target_wob = 0.0;
                }
                RigActivity::Connection => {
                    self.activity = RigActivity::Drilling;
                    self.target_rpm = self.config.drilling_rpm;
                    self.target_wob = self.config.drilling_wob;
                }
            }
        }
    }

    fn step_geology(&mut self, drilling: bool) -> f32 {
        self.gamma = (self.gamma + self.gaussian(0.0, 0.8)).clamp(10.0, 200.0);
        self.inclination = (self.inclination + self.gaussian(0.0, 0.01)).clamp(0.0, 90.0);
        self.azimuth = (self.azimuth + self.gaussian(0.0, 0.02)).rem_euclid(360.0);

        if self.gas_kick_ticks == 0 && self.rng.gen_bool(self.config.gas_kick_probability) {
            self.gas_kick_ticks = 300;
        }
        let background = if self.gas_kick_ticks > 0 {
            self.gas_kick_ticks -= 1;
            8.0
        } else {
            0.8
        };
        self.gas = lag(self.gas, background, 0.05).max(0.0);

        let ticks_per_hour = 3_600_000.0 / self.tick_interval_ms.max(1) as f32;
        if drilling {
            (self.config.depth_step * ticks_per_hour + self.gaussian(0.0, 0.5)).max(0.0)
        } else {
            0.0
        }
    }
}

impl SampleSource for PhysicsSampleSource {
    fn next_sample(&mut self, tick: u64) -> Result<RigSample, SourceError> {
        self.vibration_phase += 0.2;
        self.maybe_switch_activity();

        self.current_rpm = lag(self.current_rpm, self.target_rpm, 0.05);
        let rpm = self.gaussian(self.current_rpm, self.config.noise_rpm);

        self.current_wob = lag(self.current_wob, self.target_wob, 0.1);
        let wob = self.gaussian(self.current_wob, self.config.noise_wob).max(0.0);

        let stick_slip = if wob > 5.0 && rpm > 10.0 {
            self.vibration_phase.sin() * 1.5
        } else {
            0.0
        };
        let base_torque = wob * self.config.bit_friction + stick_slip;
        let torque = self.gaussian(base_torque, self.config.noise_torque).max(0.0);

        let pumps_on = self.current_rpm > 10.0;
        let base_spp = if pumps_on { self.current_rpm * 20.0 } else { 0.0 };
        let spp = self.gaussian(base_spp, self.config.noise_spp).max(0.0);

        let static_weight = self.config.string_weight + self.config.block_weight;
        let hook_load = self.gaussian(static_weight - wob, self.config.noise_hook_load);

        let drilling = self.activity == RigActivity::Drilling && wob > 5.0 && rpm > 10.0;
        if drilling {
            self.depth += self.config.depth_step;
        }
        let rop = self.step_geology(drilling);

        let sample = RigSample {
            timestamp_ms: self.start_ms + tick * self.tick_interval_ms,
            depth: self.depth,
            rpm,
            wob,
            torque,
            hook_load,
            spp,
            gamma: self.gamma,
            rop,
            gas: self.gas,
            inclination: self.inclination,
            azimuth: self.azimuth,
        };

        if !sample.depth.is_finite() {
            return Err(SourceError::InvalidReading(format!("depth {}", sample.depth)));
        }
        Ok(sample)
    }
}
