//! Mesurable Agent - telemetry registry and control protocol
//!
//! Tracks the hardware units of a device and the measurements they produce,
//! publishes their state over MQTT and applies remote control commands:
//! - Telemetry registry with deterministic status/config views
//! - Topic-addressed command router (`sensors/config`, `sensors/enable`)
//! - Independent publish timers driven by the host run loop
//! - Collaborator traits for transport, persistent config and host callbacks

pub mod address;
pub mod agent;
pub mod clock;
pub mod config;
pub mod mqtt;
pub mod notify;
pub mod registry;
pub mod router;
pub mod scheduler;
pub mod store;
pub mod topics;
pub mod transport;

pub use address::{build_address, parse_address, AddressError};
pub use agent::{AgentError, InfoProvider, PublishError, TelemetryAgent};
pub use clock::{Clock, MonotonicClock};
pub use config::{AgentConfig, MqttSettings, PublishSettings, StorageSettings};
pub use mqtt::MqttTransport;
pub use notify::HostCallbacks;
pub use registry::{
    HardwareUnit, Measurement, MeasurementStatus, RegistryError, SerializeError,
    TelemetryRegistry, DEFAULT_INTERVAL_MS,
};
pub use router::{Change, Command, CommandRouter, RouteError};
pub use scheduler::{IntervalTimer, PublishKind, PublishScheduler};
pub use store::{ConfigStore, JsonFileStore, MemoryStore, StoreError, UnitSettings};
pub use topics::DeviceTopics;
pub use transport::{LinkEvent, Transport, TransportError};
