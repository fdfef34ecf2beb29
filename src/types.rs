use serde::{Deserialize, Serialize};

/// Identifier of a telemetry stream as it appears on the wire
pub type StreamCode = u8;

/// Known telemetry streams
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(into = "u8", try_from = "u8")]
pub enum StreamDefinition {
    /// Drilling mechanics: depth, RPM, WOB, torque, hook load, SPP
    Drill,
    /// Geology and survey: depth, gamma, ROP, gas, inclination, azimuth
    Geo,
}

impl StreamDefinition {
    pub const ALL: [StreamDefinition; 2] = [StreamDefinition::Drill, StreamDefinition::Geo];

    pub fn code(self) -> StreamCode {
        match self {
            StreamDefinition::Drill => 101,
            StreamDefinition::Geo => 102,
        }
    }

    pub fn from_code(code: u64) -> Option<Self> {
        match code {
            101 => Some(StreamDefinition::Drill),
            102 => Some(StreamDefinition::Geo),
            _ => None,
        }
    }

    /// Codes of every stream, in ascending order
    pub fn available_codes() -> Vec<StreamCode> {
        Self::ALL.iter().map(|s| s.code()).collect()
    }
}

impl From<StreamDefinition> for u8 {
    fn from(stream: StreamDefinition) -> Self {
        stream.code()
    }
}

impl TryFrom<u8> for StreamDefinition {
    type Error = String;

    fn try_from(code: u8) -> Result<Self, Self::Error> {
        StreamDefinition::from_code(code as u64).ok_or_else(|| format!("unknown stream {}", code))
    }
}

impl std::fmt::Display for StreamDefinition {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StreamDefinition::Drill => write!(f, "drill({})", self.code()),
            StreamDefinition::Geo => write!(f, "geo({})", self.code()),
        }
    }
}

/// Alarm severity
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Severity {
    Info,
    Warning,
    Critical,
}

impl std::fmt::Display for Severity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Severity::Info => write!(f, "info"),
            Severity::Warning => write!(f, "warning"),
            Severity::Critical => write!(f, "critical"),
        }
    }
}

/// WebSocket close codes used by the server
pub mod close_code {
    /// Normal closure
    pub const NORMAL: u16 = 1000;
    /// Protocol violation, unsupported schema, handshake timeout
    pub const POLICY_VIOLATION: u16 = 1008;
    /// Slow consumer evicted
    pub const OVERLOADED: u16 = 1009;
}
