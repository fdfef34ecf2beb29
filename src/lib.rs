pub mod alarms;
pub mod broadcast;
pub mod cli;
pub mod config;
pub mod connection;
pub mod dispatcher;
pub mod error;
pub mod framer;
pub mod hub;
pub mod lifecycle;
pub mod liveness;
pub mod protocol;
pub mod pump;
pub mod sample;
pub mod server;
pub mod subscriptions;
pub mod types;
pub mod websocket;

#[cfg(test)]
pub(crate) mod test_support;

pub use alarms::{Alarm, AlarmBook, AlarmError};
pub use broadcast::BroadcastReport;
pub use config::{ConfigError, ServerConfig};
pub use connection::{ConnectionId, Transport};
pub use error::{ErrorCode, HubError, HubResult};
pub use framer::{FrameEncoder, TelemetryFrame};
pub use hub::{ConnectionSnapshot, HubConfig, TelemetryHub};
pub use lifecycle::ConnectionState;
pub use pump::TelemetryPump;
pub use sample::{PhysicsConfig, PhysicsSampleSource, RigSample, SampleSource};
pub use types::{Severity, StreamDefinition};
