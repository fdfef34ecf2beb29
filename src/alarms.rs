use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};

use crate::error::ErrorCode;
use crate::sample::RigSample;
use crate::types::Severity;

/// Alarm identifier as sent to clients
pub type AlarmId = String;

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum AlarmError {
    #[error("Alarm not found: {0}")]
    NotFound(AlarmId),

    #[error("Alarm already acknowledged: {0}")]
    AlreadyAcked(AlarmId),
}

impl AlarmError {
    pub fn code(&self) -> ErrorCode {
        match self {
            AlarmError::NotFound(_) => ErrorCode::AlarmNotFound,
            AlarmError::AlreadyAcked(_) => ErrorCode::AlreadyAcked,
        }
    }
}

/// Who acknowledged an alarm and when
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Acknowledgment {
    pub operator_name: String,
    pub role: String,
    pub acknowledged_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Alarm {
    pub id: AlarmId,
    /// Deduplication key
    pub code: String,
    pub message: String,
    pub severity: Severity,
    pub raised_at: DateTime<Utc>,
    pub acknowledged: bool,
    pub acknowledgment: Option<Acknowledgment>,
    #[serde(skip)]
    sequence: u64,
}

/// Every alarm raised since startup.
///
/// Acknowledged alarms stay in the map; only their code leaves the
/// active set so the same condition can fire again.
#[derive(Debug, Default)]
pub struct AlarmBook {
    alarms: HashMap<AlarmId, Alarm>,
    active_codes: HashSet<String>,
    next_sequence: u64,
}

impl AlarmBook {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a new alarm unless one with `code` is still unacknowledged
    pub fn raise(&mut self, code: &str, message: &str, severity: Severity) -> Option<Alarm> {
        if self.active_codes.contains(code) {
            return None;
        }

        self.next_sequence += 1;
        let sequence = self.next_sequence;
        let alarm = Alarm {
            id: format!("ALM-{:06}", sequence),
            code: code.to_string(),
            message: message.to_string(),
            severity,
            raised_at: Utc::now(),
            acknowledged: false,
            acknowledgment: None,
            sequence,
        };

        self.active_codes.insert(alarm.code.clone());
        self.alarms.insert(alarm.id.clone(), alarm.clone());
        Some(alarm)
    }

    pub fn acknowledge(
        &mut self,
        alarm_id: &str,
        operator_name: &str,
        role: &str,
    ) -> Result<Alarm, AlarmError> {
        let alarm = self
            .alarms
            .get_mut(alarm_id)
            .ok_or_else(|| AlarmError::NotFound(alarm_id.to_string()))?;

        if alarm.acknowledged {
            return Err(AlarmError::AlreadyAcked(alarm_id.to_string()));
        }

        alarm.acknowledged = true;
        alarm.acknowledgment = Some(Acknowledgment {
            operator_name: operator_name.to_string(),
            role: role.to_string(),
            acknowledged_at: Utc::now(),
        });
        self.active_codes.remove(&alarm.code);
        Ok(alarm.clone())
    }

    pub fn get(&self, alarm_id: &str) -> Option<&Alarm> {
        self.alarms.get(alarm_id)
    }

    pub fn is_active(&self, code: &str) -> bool {
        self.active_codes.contains(code)
    }

    pub fn active_count(&self) -> usize {
        self.active_codes.len()
    }

    pub fn len(&self) -> usize {
        self.alarms.len()
    }

    pub fn is_empty(&self) -> bool {
        self.alarms.is_empty()
    }

    /// All alarms, oldest first
    pub fn list(&self) -> Vec<Alarm> {
        let mut alarms: Vec<Alarm> = self.alarms.values().cloned().collect();
        alarms.sort_by_key(|a| a.sequence);
        alarms
    }
}

/// Thresholds for the per-tick alarm scan
#[derive(Debug, Clone)]
pub struct AlarmThresholds {
    /// Total gas, percent
    pub gas_max: f32,
    /// Surface torque, kNm
    pub torque_max: f32,
    /// Minimum standpipe pressure while rotating, psi
    pub spp_min: f32,
    /// RPM above which the string counts as rotating
    pub rotating_rpm: f32,
}

impl Default for AlarmThresholds {
    fn default() -> Self {
        Self {
            gas_max: 5.0,
            torque_max: 30.0,
            spp_min: 500.0,
            rotating_rpm: 30.0,
        }
    }
}

/// A condition found in a sample
#[derive(Debug, Clone, PartialEq)]
pub struct AlarmCondition {
    pub code: &'static str,
    pub message: String,
    pub severity: Severity,
}

/// Conditions present in `sample`
pub fn scan(sample: &RigSample, thresholds: &AlarmThresholds) -> Vec<AlarmCondition> {
    let mut conditions = Vec::new();

    if sample.gas > thresholds.gas_max {
        conditions.push(AlarmCondition {
            code: "HIGH_GAS",
            message: format!(
                "Total gas {:.2}% above {:.2}% at {:.1} m",
                sample.gas, thresholds.gas_max, sample.depth
            ),
            severity: Severity::Critical,
        });
    }

    if sample.torque > thresholds.torque_max {
        conditions.push(AlarmCondition {
            code: "HIGH_TORQUE",
            message: format!(
                "Torque {:.1} kNm above {:.1} kNm",
                sample.torque, thresholds.torque_max
            ),
            severity: Severity::Warning,
        });
    }

    if sample.rpm > thresholds.rotating_rpm && sample.spp < thresholds.spp_min {
        conditions.push(AlarmCondition {
            code: "LOW_SPP_WHILE_ROTATING",
            message: format!(
                "SPP {:.0} psi below {:.0} psi while rotating at {:.0} rpm",
                sample.spp, thresholds.spp_min, sample.rpm
            ),
            severity: Severity::Warning,
        });
    }

    conditions
}
