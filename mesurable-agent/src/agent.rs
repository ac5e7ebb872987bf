//! Telemetry agent
//!
//! Host-facing facade wiring the registry, the command router and the publish
//! scheduler to their collaborators. All collaborators are injected; the
//! agent holds no global state.
//!
//! Typical host loop:
//! ```ignore
//! let mut agent = TelemetryAgent::new("growbox-01", transport, store, clock, &settings)?;
//! agent.register_unit("dht22", "DHT22")?;
//! agent.add_measurement("dht22", "temperature")?;
//! agent.connect()?;
//! loop {
//!     // on link event: agent.handle_link_event(event);
//!     agent.publish_value("dht22", "temperature", 23.5);
//!     agent.tick();
//! }
//! ```

use crate::clock::Clock;
use crate::config::PublishSettings;
use crate::notify::HostCallbacks;
use crate::registry::{RegistryError, SerializeError, TelemetryRegistry, DEFAULT_INTERVAL_MS};
use crate::router::{Change, CommandRouter};
use crate::scheduler::{PublishKind, PublishScheduler};
use crate::store::ConfigStore;
use crate::topics::DeviceTopics;
use crate::transport::{LinkEvent, Transport, TransportError};
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info, warn};

#[derive(Debug, Error)]
pub enum AgentError {
    #[error("device id must not be empty")]
    EmptyDeviceId,
    #[error("device id `{0}` contains a topic separator or wildcard")]
    InvalidDeviceId(String),
}

/// Produces the extended-info payload. Entirely host-defined.
pub type InfoProvider = Box<dyn FnMut() -> serde_json::Value + Send>;

pub struct TelemetryAgent<T: Transport, S: ConfigStore> {
    registry: TelemetryRegistry,
    router: CommandRouter,
    scheduler: PublishScheduler,
    transport: T,
    store: S,
    callbacks: HostCallbacks,
    clock: Arc<dyn Clock>,
    info_provider: Option<InfoProvider>,
}

impl<T: Transport, S: ConfigStore> TelemetryAgent<T, S> {
    pub fn new(
        device_id: &str,
        transport: T,
        store: S,
        clock: Arc<dyn Clock>,
        settings: &PublishSettings,
    ) -> Result<Self, AgentError> {
        if device_id.is_empty() {
            return Err(AgentError::EmptyDeviceId);
        }
        if device_id.contains(['/', '+', '#']) {
            return Err(AgentError::InvalidDeviceId(device_id.to_string()));
        }

        let mut registry = TelemetryRegistry::with_clock(clock.clone());
        registry.set_payload_limit(settings.payload_limit());
        let scheduler = PublishScheduler::new(settings, clock.now_ms());

        info!("Telemetry agent ready for device {}", device_id);
        Ok(Self {
            registry,
            router: CommandRouter::new(device_id),
            scheduler,
            transport,
            store,
            callbacks: HostCallbacks::new(),
            clock,
            info_provider: None,
        })
    }

    // ---------------------------------------------------------------------
    // Host callbacks
    // ---------------------------------------------------------------------

    pub fn on_config_change<F>(&mut self, callback: F)
    where
        F: FnMut(&str, u64) + Send + 'static,
    {
        self.callbacks.set_on_config_change(callback);
    }

    pub fn on_enable_change<F>(&mut self, callback: F)
    where
        F: FnMut(&str, bool) + Send + 'static,
    {
        self.callbacks.set_on_enable_change(callback);
    }

    pub fn on_connection_change<F>(&mut self, callback: F)
    where
        F: FnMut(bool) + Send + 'static,
    {
        self.callbacks.set_on_connection_change(callback);
    }

    /// Installs the extended-info source published on `<deviceId>/device/info`.
    pub fn set_info_provider<F>(&mut self, provider: F)
    where
        F: FnMut() -> serde_json::Value + Send + 'static,
    {
        self.info_provider = Some(Box::new(provider));
        let now = self.clock.now_ms();
        self.scheduler.enable_info(now);
    }

    /// Removes the extended-info source and stops its timer.
    pub fn clear_info_provider(&mut self) {
        self.info_provider = None;
        self.scheduler.disable_info();
    }

    // ---------------------------------------------------------------------
    // Registration
    // ---------------------------------------------------------------------

    /// Registers a unit and restores its persisted enabled flag and interval.
    pub fn register_unit(&mut self, key: &str, display_name: &str) -> Result<(), RegistryError> {
        self.registry.register_unit(key, display_name)?;

        let enabled = self.store.load_enabled(key, true);
        let interval_ms = self.store.load_interval(key, DEFAULT_INTERVAL_MS);
        self.registry.set_enabled(key, enabled);
        self.registry.set_interval(key, interval_ms);

        info!(
            "Registered {} ({}), enabled: {}, interval: {} ms",
            key, display_name, enabled, interval_ms
        );
        Ok(())
    }

    pub fn add_measurement(&mut self, unit_key: &str, kind: &str) -> Result<(), RegistryError> {
        self.registry.add_measurement(unit_key, kind)
    }

    // ---------------------------------------------------------------------
    // Publishing
    // ---------------------------------------------------------------------

    /// Records a reading and sends it on `<deviceId>/<unit>/<type>`.
    ///
    /// Returns `false` without recording anything when the unit is disabled
    /// or the measurement is unknown. Non-finite readings are recorded (the
    /// measurement turns `missing`) but not sent.
    pub fn publish_value(&mut self, unit_key: &str, kind: &str, value: impl Into<f64>) -> bool {
        if !self.registry.is_enabled(unit_key) {
            return false;
        }
        let value = value.into();
        if !self.registry.update_value(unit_key, kind, value) {
            debug!("Unknown measurement {}:{}", unit_key, kind);
            return false;
        }

        if !value.is_finite() {
            debug!("Not sending non-finite reading for {}:{}", unit_key, kind);
        } else if self.transport.is_connected() {
            let topic = self.router.topics().measurement(unit_key, kind);
            let payload = format!("{value:.2}");
            if let Err(e) = self.transport.publish(&topic, payload.as_bytes(), true) {
                warn!("Failed to publish {}: {}", topic, e);
            }
        }
        true
    }

    /// Polls the scheduler and publishes every snapshot that is due.
    pub fn tick(&mut self) -> Vec<PublishKind> {
        let now = self.clock.now_ms();
        let due = self.scheduler.due(now);
        for kind in &due {
            if let Err(e) = self.publish_now(*kind) {
                match e {
                    PublishError::Transport(TransportError::NotConnected) => {
                        debug!("Skipping {:?} snapshot while disconnected", kind)
                    }
                    e => warn!("Skipping {:?} snapshot: {}", kind, e),
                }
            }
        }
        due
    }

    /// Serializes and sends one snapshot immediately, retained.
    pub fn publish_now(&mut self, kind: PublishKind) -> Result<(), PublishError> {
        if !self.transport.is_connected() {
            return Err(PublishError::Transport(TransportError::NotConnected));
        }

        let topics = self.router.topics();
        let (topic, payload) = match kind {
            PublishKind::Status => (topics.status.clone(), self.registry.serialize_status()?),
            PublishKind::Config => (topics.config.clone(), self.registry.serialize_config()?),
            PublishKind::Info => {
                let provider = self
                    .info_provider
                    .as_mut()
                    .ok_or(PublishError::NoInfoProvider)?;
                let info = provider();
                (topics.info.clone(), serde_json::to_string(&info).map_err(SerializeError::Json)?)
            }
        };

        self.transport.publish(&topic, payload.as_bytes(), true)?;
        debug!("Published {:?} snapshot ({} bytes)", kind, payload.len());
        Ok(())
    }

    // ---------------------------------------------------------------------
    // Transport events
    // ---------------------------------------------------------------------

    pub fn connect(&mut self) -> Result<(), TransportError> {
        self.transport.connect()
    }

    /// Entry point for everything the transport reports.
    pub fn handle_link_event(&mut self, event: LinkEvent) -> Vec<Change> {
        match event {
            LinkEvent::Connected => {
                self.handle_connection(true);
                Vec::new()
            }
            LinkEvent::Disconnected => {
                self.handle_connection(false);
                Vec::new()
            }
            LinkEvent::Message { topic, payload } => self.handle_message(&topic, &payload),
        }
    }

    /// Subscriptions do not survive a reconnect, so they are renewed on
    /// every connect.
    pub fn handle_connection(&mut self, connected: bool) {
        if connected {
            for topic in self.router.subscriptions() {
                match self.transport.subscribe(topic) {
                    Ok(()) => info!("Subscribed to commands on: {}", topic),
                    Err(e) => warn!("Failed to subscribe to {}: {}", topic, e),
                }
            }
        } else {
            warn!("Transport disconnected");
        }
        self.callbacks.connection_changed(connected);
    }

    /// Routes a command. When it changes a unit, the retained config view is
    /// refreshed at once so the broker never replays a stale one.
    pub fn handle_message(&mut self, topic: &str, payload: &[u8]) -> Vec<Change> {
        let before = self.unit_settings();
        let changes = self.router.dispatch(
            topic,
            payload,
            &mut self.registry,
            &mut self.store,
            &mut self.callbacks,
        );

        // our own view coming back from the broker changes nothing, so this
        // cannot loop
        if before != self.unit_settings() && self.transport.is_connected() {
            if let Err(e) = self.publish_now(PublishKind::Config) {
                warn!("Failed to refresh config view: {}", e);
            }
        }
        changes
    }

    fn unit_settings(&self) -> Vec<(bool, u64)> {
        self.registry
            .units()
            .iter()
            .map(|u| (u.is_enabled(), u.publish_interval_ms()))
            .collect()
    }

    // ---------------------------------------------------------------------
    // State
    // ---------------------------------------------------------------------

    pub fn device_id(&self) -> &str {
        self.router.topics().device_id()
    }

    pub fn topics(&self) -> &DeviceTopics {
        self.router.topics()
    }

    pub fn is_connected(&self) -> bool {
        self.transport.is_connected()
    }

    pub fn is_enabled(&self, unit_key: &str) -> bool {
        self.registry.is_enabled(unit_key)
    }

    pub fn registry(&self) -> &TelemetryRegistry {
        &self.registry
    }

    pub fn scheduler(&self) -> &PublishScheduler {
        &self.scheduler
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn now_ms(&self) -> u64 {
        self.clock.now_ms()
    }
}

#[derive(Debug, Error)]
pub enum PublishError {
    #[error(transparent)]
    Transport(#[from] TransportError),
    #[error(transparent)]
    Serialize(#[from] SerializeError),
    #[error("no extended-info provider installed")]
    NoInfoProvider,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::MonotonicClock;
    use crate::store::MemoryStore;

    /// Transport that is never connected.
    struct Offline;

    impl Transport for Offline {
        fn connect(&mut self) -> Result<(), TransportError> {
            Ok(())
        }
        fn is_connected(&self) -> bool {
            false
        }
        fn subscribe(&mut self, _topic: &str) -> Result<(), TransportError> {
            Err(TransportError::NotConnected)
        }
        fn publish(&mut self, _: &str, _: &[u8], _: bool) -> Result<(), TransportError> {
            Err(TransportError::NotConnected)
        }
    }

    fn agent(device_id: &str) -> Result<TelemetryAgent<Offline, MemoryStore>, AgentError> {
        TelemetryAgent::new(
            device_id,
            Offline,
            MemoryStore::new(),
            Arc::new(MonotonicClock::new()),
            &PublishSettings::default(),
        )
    }

    #[test]
    fn test_device_id_validation() {
        assert!(matches!(agent(""), Err(AgentError::EmptyDeviceId)));
        assert!(matches!(agent("a/b"), Err(AgentError::InvalidDeviceId(_))));
        assert!(matches!(agent("dev#"), Err(AgentError::InvalidDeviceId(_))));
        assert_eq!(agent("growbox-01").unwrap().device_id(), "growbox-01");
    }

    #[test]
    fn test_disabled_unit_rejects_values() {
        let mut agent = agent("growbox-01").unwrap();
        agent.register_unit("dht22", "DHT22").unwrap();
        agent.add_measurement("dht22", "temperature").unwrap();

        assert!(agent.publish_value("dht22", "temperature", 21.5));
        agent.handle_message("growbox-01/sensors/enable", br#"{"hardware":"dht22","enabled":false}"#);
        assert!(!agent.publish_value("dht22", "temperature", 30));
        assert_eq!(
            agent.registry().measurement("dht22", "temperature").unwrap().last_value(),
            Some(21.5)
        );
    }

    #[test]
    fn test_publish_unknown_measurement() {
        let mut agent = agent("growbox-01").unwrap();
        agent.register_unit("dht22", "DHT22").unwrap();
        assert!(!agent.publish_value("dht22", "pressure", 1.0));
        assert!(!agent.publish_value("ghost", "pressure", 1.0));
    }

    #[test]
    fn test_info_timer_follows_provider() {
        let mut agent = agent("growbox-01").unwrap();
        assert!(agent.scheduler().info_timer().is_none());

        agent.set_info_provider(|| serde_json::json!({}));
        assert!(agent.scheduler().info_timer().is_some());

        agent.clear_info_provider();
        assert!(agent.scheduler().info_timer().is_none());
    }

    #[test]
    fn test_publish_now_while_offline() {
        let mut agent = agent("growbox-01").unwrap();
        assert!(matches!(
            agent.publish_now(PublishKind::Status),
            Err(PublishError::Transport(TransportError::NotConnected))
        ));
    }
}
