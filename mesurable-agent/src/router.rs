//! Command router
//!
//! Turns inbound `(topic, payload)` pairs into registry mutations:
//! - `<deviceId>/sensors/config`: `{"sensors": {"dht22": {"interval": 30}}}`
//! - `<deviceId>/sensors/enable`: `{"hardware": "dht22", "enabled": false}`
//!
//! Parsing is all-or-nothing: a payload that fails to parse or validate is
//! dropped without touching the registry, the store or the host callbacks.

use crate::notify::HostCallbacks;
use crate::registry::TelemetryRegistry;
use crate::store::ConfigStore;
use crate::topics::DeviceTopics;
use serde::Deserialize;
use std::collections::HashMap;
use thiserror::Error;
use tracing::{debug, info, warn};

#[derive(Debug, Error)]
pub enum RouteError {
    #[error("topic `{0}` is not a command topic")]
    UnknownTopic(String),
    #[error("malformed payload on `{topic}`: {source}")]
    Malformed {
        topic: String,
        #[source]
        source: serde_json::Error,
    },
    #[error("enable command without a `hardware` field")]
    MissingHardware,
    #[error("invalid interval for `{unit_key}`: {interval}")]
    InvalidInterval { unit_key: String, interval: f64 },
}

/// A parsed control command.
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    /// New intervals in milliseconds, keyed by unit. May name unknown units.
    UpdateIntervals(HashMap<String, u64>),
    SetEnabled { unit_key: String, enabled: bool },
}

/// A mutation actually applied to the registry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Change {
    Interval { unit_key: String, interval_ms: u64 },
    Enabled { unit_key: String, enabled: bool },
}

#[derive(Debug, Deserialize)]
struct ConfigPayload {
    #[serde(default)]
    sensors: Option<HashMap<String, UnitConfigPatch>>,
}

#[derive(Debug, Deserialize)]
struct UnitConfigPatch {
    /// Whole seconds. Outer `None`: key absent. Inner `None`: explicit `null`,
    /// which counts as present and reads as 0.
    #[serde(default, deserialize_with = "present_field")]
    interval: Option<Option<f64>>,
}

fn present_field<'de, D>(deserializer: D) -> Result<Option<Option<f64>>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    Option::<f64>::deserialize(deserializer).map(Some)
}

#[derive(Debug, Deserialize)]
struct EnablePayload {
    #[serde(default)]
    hardware: Option<String>,
    #[serde(default)]
    enabled: bool,
}

#[derive(Debug, Clone)]
pub struct CommandRouter {
    topics: DeviceTopics,
}

impl CommandRouter {
    pub fn new(device_id: &str) -> Self {
        Self {
            topics: DeviceTopics::new(device_id),
        }
    }

    pub fn topics(&self) -> &DeviceTopics {
        &self.topics
    }

    /// Topics to (re-)subscribe on every connect.
    pub fn subscriptions(&self) -> [&str; 2] {
        self.topics.subscriptions()
    }

    /// Decodes a command without applying it.
    pub fn parse(&self, topic: &str, payload: &[u8]) -> Result<Command, RouteError> {
        if topic == self.topics.config {
            let payload: ConfigPayload = serde_json::from_slice(payload)
                .map_err(|source| RouteError::Malformed {
                    topic: topic.to_string(),
                    source,
                })?;
            parse_intervals(payload).map(Command::UpdateIntervals)
        } else if topic == self.topics.enable {
            let payload: EnablePayload = serde_json::from_slice(payload)
                .map_err(|source| RouteError::Malformed {
                    topic: topic.to_string(),
                    source,
                })?;
            let unit_key = payload.hardware.ok_or(RouteError::MissingHardware)?;
            Ok(Command::SetEnabled {
                unit_key,
                enabled: payload.enabled,
            })
        } else {
            Err(RouteError::UnknownTopic(topic.to_string()))
        }
    }

    /// Applies a command to registered units, persists it and notifies the
    /// host. Units the registry does not know are skipped.
    pub fn apply(
        &self,
        command: Command,
        registry: &mut TelemetryRegistry,
        store: &mut dyn ConfigStore,
        callbacks: &mut HostCallbacks,
    ) -> Vec<Change> {
        let mut changes = Vec::new();

        match command {
            Command::UpdateIntervals(intervals) => {
                // registration order, not payload order
                let keys: Vec<String> = registry
                    .units()
                    .iter()
                    .map(|u| u.key().to_string())
                    .collect();
                for unit_key in keys {
                    let Some(&interval_ms) = intervals.get(&unit_key) else {
                        continue;
                    };
                    registry.set_interval(&unit_key, interval_ms);
                    if let Err(e) = store.save_interval(&unit_key, interval_ms) {
                        warn!("Failed to persist interval of {}: {}", unit_key, e);
                    }
                    callbacks.config_changed(&unit_key, interval_ms);
                    info!("Interval of {} set to {} ms", unit_key, interval_ms);
                    changes.push(Change::Interval {
                        unit_key,
                        interval_ms,
                    });
                }
                let ignored = intervals.len() - changes.len();
                if ignored > 0 {
                    debug!("Ignored {} interval entries for unknown units", ignored);
                }
            }
            Command::SetEnabled { unit_key, enabled } => {
                if !registry.set_enabled(&unit_key, enabled) {
                    debug!("Enable command for unknown unit {}", unit_key);
                    return changes;
                }
                if let Err(e) = store.save_enabled(&unit_key, enabled) {
                    warn!("Failed to persist enabled flag of {}: {}", unit_key, e);
                }
                callbacks.enable_changed(&unit_key, enabled);
                info!("Unit {} {}", unit_key, if enabled { "enabled" } else { "disabled" });
                changes.push(Change::Enabled { unit_key, enabled });
            }
        }

        changes
    }

    /// Parses and applies. Never fails: rejected messages are logged and
    /// produce no change.
    pub fn dispatch(
        &self,
        topic: &str,
        payload: &[u8],
        registry: &mut TelemetryRegistry,
        store: &mut dyn ConfigStore,
        callbacks: &mut HostCallbacks,
    ) -> Vec<Change> {
        match self.parse(topic, payload) {
            Ok(command) => self.apply(command, registry, store, callbacks),
            Err(RouteError::UnknownTopic(topic)) => {
                debug!("Ignoring message on {}", topic);
                Vec::new()
            }
            Err(e) => {
                warn!("Discarding command: {}", e);
                Vec::new()
            }
        }
    }
}

fn parse_intervals(payload: ConfigPayload) -> Result<HashMap<String, u64>, RouteError> {
    let mut intervals = HashMap::new();
    for (unit_key, patch) in payload.sensors.unwrap_or_default() {
        let Some(secs) = patch.interval else {
            continue;
        };
        let secs = secs.unwrap_or(0.0);
        let interval_ms = seconds_to_ms(secs).ok_or_else(|| RouteError::InvalidInterval {
            unit_key: unit_key.clone(),
            interval: secs,
        })?;
        intervals.insert(unit_key, interval_ms);
    }
    Ok(intervals)
}

/// Whole seconds to milliseconds; fractions are truncated.
fn seconds_to_ms(secs: f64) -> Option<u64> {
    if !secs.is_finite() || secs < 0.0 || secs > u64::MAX as f64 {
        return None;
    }
    (secs.trunc() as u64).checked_mul(1000)
}
