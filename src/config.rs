use std::env;
use std::str::FromStr;
use std::time::Duration;

use crate::alarms::AlarmThresholds;
use crate::hub::HubConfig;

/// Server configuration loaded from environment variables
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Port to listen on
    pub port: u16,
    /// Bind address (0.0.0.0 for LAN, 127.0.0.1 for localhost)
    pub bind_addr: String,
    /// Telemetry sample cadence in milliseconds
    pub tick_interval_ms: u64,
    /// Liveness sweep cadence in milliseconds
    pub liveness_interval_ms: u64,
    /// Inactivity before an active connection goes idle, milliseconds
    pub idle_threshold_ms: u64,
    /// Time allowed for the client handshake, milliseconds
    pub handshake_timeout_ms: u64,
    /// Queued bytes above which a consumer counts as slow
    pub backpressure_threshold_bytes: usize,
    /// How long a consumer may stay slow before eviction, milliseconds
    pub slow_consumer_grace_ms: u64,
    /// Geo frames go out every N ticks
    pub geo_divisor: u64,
    /// HIGH_GAS threshold, percent
    pub alarm_gas_threshold: f32,
    /// HIGH_TORQUE threshold, kNm
    pub alarm_torque_threshold: f32,
    /// LOW_SPP_WHILE_ROTATING threshold, psi
    pub alarm_spp_min: f32,
    /// CORS allowed origins (comma-separated in env var, any origin when empty)
    pub cors_origins: Vec<String>,
}

fn parse_var<T: FromStr>(name: &str, default: T) -> Result<T, ConfigError> {
    match env::var(name) {
        Ok(raw) => raw
            .trim()
            .parse()
            .map_err(|_| ConfigError::InvalidValue(format!("{}={}", name, raw))),
        Err(_) => Ok(default),
    }
}

impl ServerConfig {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();
        let defaults = Self::default();

        let config = Self {
            port: env::var("RIG_PORT")
                .unwrap_or_else(|_| defaults.port.to_string())
                .parse()
                .map_err(|_| ConfigError::InvalidPort)?,
            bind_addr: env::var("RIG_BIND_ADDR").unwrap_or(defaults.bind_addr),
            tick_interval_ms: parse_var("TICK_INTERVAL_MS", defaults.tick_interval_ms)?,
            liveness_interval_ms: parse_var("LIVENESS_INTERVAL_MS", defaults.liveness_interval_ms)?,
            idle_threshold_ms: parse_var("IDLE_THRESHOLD_MS", defaults.idle_threshold_ms)?,
            handshake_timeout_ms: parse_var("HANDSHAKE_TIMEOUT_MS", defaults.handshake_timeout_ms)?,
            backpressure_threshold_bytes: parse_var(
                "BACKPRESSURE_THRESHOLD_BYTES",
                defaults.backpressure_threshold_bytes,
            )?,
            slow_consumer_grace_ms: parse_var("SLOW_CONSUMER_GRACE_MS", defaults.slow_consumer_grace_ms)?,
            geo_divisor: parse_var("GEO_DIVISOR", defaults.geo_divisor)?,
            alarm_gas_threshold: parse_var("ALARM_GAS_THRESHOLD", defaults.alarm_gas_threshold)?,
            alarm_torque_threshold: parse_var("ALARM_TORQUE_THRESHOLD", defaults.alarm_torque_threshold)?,
            alarm_spp_min: parse_var("ALARM_SPP_MIN", defaults.alarm_spp_min)?,
            cors_origins: env::var("CORS_ORIGINS")
                .map(|s| {
                    s.split(',')
                        .map(|s| s.trim().to_string())
                        .filter(|s| !s.is_empty())
                        .collect()
                })
                .unwrap_or_default(),
        };

        config.validate()?;
        Ok(config)
    }

    /// Reject settings the hub cannot run with
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.tick_interval_ms == 0 || self.liveness_interval_ms == 0 {
            return Err(ConfigError::InvalidValue(
                "tick and liveness intervals must be positive".to_string(),
            ));
        }
        if self.geo_divisor == 0 {
            return Err(ConfigError::InvalidValue("GEO_DIVISOR must be at least 1".to_string()));
        }
        Ok(())
    }

    /// Get the full bind address (addr:port)
    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.bind_addr, self.port)
    }

    /// Timing and thresholds for the hub
    pub fn hub_config(&self) -> HubConfig {
        HubConfig {
            tick_interval: Duration::from_millis(self.tick_interval_ms),
            liveness_interval: Duration::from_millis(self.liveness_interval_ms),
            idle_threshold: Duration::from_millis(self.idle_threshold_ms),
            handshake_timeout: Duration::from_millis(self.handshake_timeout_ms),
            backpressure_threshold: self.backpressure_threshold_bytes,
            slow_consumer_grace: Duration::from_millis(self.slow_consumer_grace_ms),
            geo_divisor: self.geo_divisor,
            alarm_thresholds: AlarmThresholds {
                gas_max: self.alarm_gas_threshold,
                torque_max: self.alarm_torque_threshold,
                spp_min: self.alarm_spp_min,
                ..AlarmThresholds::default()
            },
        }
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        let hub = HubConfig::default();
        Self {
            port: 8080,
            bind_addr: "0.0.0.0".to_string(),
            tick_interval_ms: hub.tick_interval.as_millis() as u64,
            liveness_interval_ms: hub.liveness_interval.as_millis() as u64,
            idle_threshold_ms: hub.idle_threshold.as_millis() as u64,
            handshake_timeout_ms: hub.handshake_timeout.as_millis() as u64,
            backpressure_threshold_bytes: hub.backpressure_threshold,
            slow_consumer_grace_ms: hub.slow_consumer_grace.as_millis() as u64,
            geo_divisor: hub.geo_divisor,
            alarm_gas_threshold: hub.alarm_thresholds.gas_max,
            alarm_torque_threshold: hub.alarm_thresholds.torque_max,
            alarm_spp_min: hub.alarm_thresholds.spp_min,
            cors_origins: Vec::new(),
        }
    }
}

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid port number")]
    InvalidPort,
    #[error("Invalid configuration value: {0}")]
    InvalidValue(String),
}
