//! Telemetry registry
//!
//! Owns the hardware units of the device, the measurements attached to them,
//! and their enable/interval state. Builds the two serialized views published
//! by the agent:
//! - status view: `{"unit:type": {"status": "ok", "value": 23.50}, ...}`
//! - config view: `{"sensors": {"unit": {"name", "enabled", "interval", "measurements"}}}`
//!
//! Units and measurements live in insertion-ordered `Vec`s. Lookups are linear
//! scans; the collections hold tens of entries at most.

use crate::address::build_address;
use crate::clock::{Clock, MonotonicClock};
use serde::ser::{SerializeMap, SerializeStruct};
use serde::{Serialize, Serializer};
use serde_json::value::RawValue;
use std::fmt;
use std::sync::Arc;
use thiserror::Error;
use tracing::debug;

/// Publish interval given to a unit at registration.
pub const DEFAULT_INTERVAL_MS: u64 = 60_000;

/// Longest accepted unit key, in bytes.
pub const MAX_KEY_LEN: usize = 31;
/// Longest accepted display name, in bytes.
pub const MAX_NAME_LEN: usize = 63;
/// Longest accepted measurement type, in bytes.
pub const MAX_TYPE_LEN: usize = 31;

/// Characters a key may not contain: the address separator, the topic level
/// separator and the MQTT wildcards.
const RESERVED_CHARS: &[char] = &[':', '/', '+', '#'];

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RegistryError {
    #[error("unit key must not be empty")]
    EmptyKey,
    #[error("measurement type must not be empty")]
    EmptyMeasurementType,
    #[error("{field} `{value}` is longer than {max} bytes")]
    TooLong {
        field: &'static str,
        value: String,
        max: usize,
    },
    #[error("`{0}` contains a reserved character (one of `: / + #`)")]
    ReservedCharacter(String),
    #[error("unit `{0}` is already registered")]
    DuplicateUnit(String),
    #[error("unit `{0}` is not registered")]
    UnknownUnit(String),
    #[error("measurement `{unit_key}:{kind}` already exists")]
    DuplicateMeasurement { unit_key: String, kind: String },
}

#[derive(Debug, Error)]
pub enum SerializeError {
    #[error("JSON serialization failed: {0}")]
    Json(#[from] serde_json::Error),
    #[error("serialized payload is {len} bytes, limit is {limit}")]
    PayloadTooLarge { len: usize, limit: usize },
}

/// Derived state of a measurement.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum MeasurementStatus {
    Ok,
    Missing,
    Disabled,
}

impl MeasurementStatus {
    /// Disabled wins over everything, then a valid reading means `ok`.
    pub fn derive(unit_enabled: bool, reading: Option<f64>) -> Self {
        match (unit_enabled, reading) {
            (false, _) => Self::Disabled,
            (true, Some(_)) => Self::Ok,
            (true, None) => Self::Missing,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Ok => "ok",
            Self::Missing => "missing",
            Self::Disabled => "disabled",
        }
    }
}

impl fmt::Display for MeasurementStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single reading type produced by a unit.
#[derive(Debug, Clone)]
pub struct Measurement {
    kind: String,
    status: MeasurementStatus,
    last_value: f64,
    has_value: bool,
    last_update_ms: u64,
}

impl Measurement {
    fn new(kind: &str) -> Self {
        Self {
            kind: kind.to_string(),
            status: MeasurementStatus::Missing,
            last_value: 0.0,
            has_value: false,
            last_update_ms: 0,
        }
    }

    pub fn kind(&self) -> &str {
        &self.kind
    }

    /// Status cached at the last mutation. The serialized views recompute it.
    pub fn status(&self) -> MeasurementStatus {
        self.status
    }

    /// Last recorded value, `None` until a reading has been recorded.
    pub fn last_value(&self) -> Option<f64> {
        self.has_value.then_some(self.last_value)
    }

    pub fn has_value(&self) -> bool {
        self.has_value
    }

    pub fn last_update_ms(&self) -> u64 {
        self.last_update_ms
    }

    /// Last value if it is a usable number (finite).
    pub fn valid_reading(&self) -> Option<f64> {
        self.last_value().filter(|v| v.is_finite())
    }

    fn refresh_status(&mut self, unit_enabled: bool) {
        self.status = MeasurementStatus::derive(unit_enabled, self.valid_reading());
    }
}

/// A physical component producing one or more measurements.
#[derive(Debug, Clone)]
pub struct HardwareUnit {
    key: String,
    display_name: String,
    enabled: bool,
    publish_interval_ms: u64,
    measurements: Vec<Measurement>,
}

impl HardwareUnit {
    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn display_name(&self) -> &str {
        &self.display_name
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub fn publish_interval_ms(&self) -> u64 {
        self.publish_interval_ms
    }

    pub fn measurements(&self) -> &[Measurement] {
        &self.measurements
    }

    pub fn measurement(&self, kind: &str) -> Option<&Measurement> {
        self.measurements.iter().find(|m| m.kind == kind)
    }

    fn measurement_mut(&mut self, kind: &str) -> Option<&mut Measurement> {
        self.measurements.iter_mut().find(|m| m.kind == kind)
    }

    /// Status as published: recomputed from the current enabled flag.
    pub fn effective_status(&self, measurement: &Measurement) -> MeasurementStatus {
        MeasurementStatus::derive(self.enabled, measurement.valid_reading())
    }
}

/// In-memory registry of units and measurements.
pub struct TelemetryRegistry {
    units: Vec<HardwareUnit>,
    clock: Arc<dyn Clock>,
    payload_limit: Option<usize>,
}

impl fmt::Debug for TelemetryRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TelemetryRegistry")
            .field("units", &self.units)
            .field("payload_limit", &self.payload_limit)
            .finish()
    }
}

impl Default for TelemetryRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl TelemetryRegistry {
    pub fn new() -> Self {
        Self::with_clock(Arc::new(MonotonicClock::new()))
    }

    pub fn with_clock(clock: Arc<dyn Clock>) -> Self {
        Self {
            units: Vec::with_capacity(8),
            clock,
            payload_limit: None,
        }
    }

    /// Serialized views longer than `limit` bytes are refused instead of
    /// being handed to the transport.
    pub fn set_payload_limit(&mut self, limit: Option<usize>) {
        self.payload_limit = limit;
    }

    pub fn payload_limit(&self) -> Option<usize> {
        self.payload_limit
    }

    // ---------------------------------------------------------------------
    // Registration
    // ---------------------------------------------------------------------

    /// Registers a unit, enabled, with the default interval.
    ///
    /// An empty display name falls back to the key.
    pub fn register_unit(&mut self, key: &str, display_name: &str) -> Result<(), RegistryError> {
        validate_identifier(key, "unit key", MAX_KEY_LEN, RegistryError::EmptyKey)?;
        if display_name.len() > MAX_NAME_LEN {
            return Err(RegistryError::TooLong {
                field: "display name",
                value: display_name.to_string(),
                max: MAX_NAME_LEN,
            });
        }
        if self.has_unit(key) {
            return Err(RegistryError::DuplicateUnit(key.to_string()));
        }

        let display_name = if display_name.is_empty() { key } else { display_name };
        self.units.push(HardwareUnit {
            key: key.to_string(),
            display_name: display_name.to_string(),
            enabled: true,
            publish_interval_ms: DEFAULT_INTERVAL_MS,
            measurements: Vec::new(),
        });
        debug!("Registered unit {}", key);
        Ok(())
    }

    /// Appends a measurement to an existing unit, status `missing`.
    pub fn add_measurement(&mut self, unit_key: &str, kind: &str) -> Result<(), RegistryError> {
        validate_identifier(
            kind,
            "measurement type",
            MAX_TYPE_LEN,
            RegistryError::EmptyMeasurementType,
        )?;
        let unit = self
            .unit_mut(unit_key)
            .ok_or_else(|| RegistryError::UnknownUnit(unit_key.to_string()))?;
        if unit.measurement(kind).is_some() {
            return Err(RegistryError::DuplicateMeasurement {
                unit_key: unit_key.to_string(),
                kind: kind.to_string(),
            });
        }

        let mut measurement = Measurement::new(kind);
        measurement.refresh_status(unit.enabled);
        unit.measurements.push(measurement);
        debug!("Added measurement {}:{}", unit_key, kind);
        Ok(())
    }

    // ---------------------------------------------------------------------
    // Queries
    // ---------------------------------------------------------------------

    pub fn has_unit(&self, key: &str) -> bool {
        self.unit(key).is_some()
    }

    pub fn has_measurement(&self, unit_key: &str, kind: &str) -> bool {
        self.measurement(unit_key, kind).is_some()
    }

    pub fn unit(&self, key: &str) -> Option<&HardwareUnit> {
        self.units.iter().find(|u| u.key == key)
    }

    fn unit_mut(&mut self, key: &str) -> Option<&mut HardwareUnit> {
        self.units.iter_mut().find(|u| u.key == key)
    }

    pub fn measurement(&self, unit_key: &str, kind: &str) -> Option<&Measurement> {
        self.unit(unit_key)?.measurement(kind)
    }

    /// Units in registration order.
    pub fn units(&self) -> &[HardwareUnit] {
        &self.units
    }

    /// Unknown units report `false`.
    pub fn is_enabled(&self, unit_key: &str) -> bool {
        self.unit(unit_key).is_some_and(|u| u.enabled)
    }

    pub fn interval_ms(&self, unit_key: &str) -> Option<u64> {
        self.unit(unit_key).map(|u| u.publish_interval_ms)
    }

    // ---------------------------------------------------------------------
    // State management
    // ---------------------------------------------------------------------

    /// Sets the enabled flag and refreshes every owned measurement status.
    ///
    /// Returns `false` when the unit is unknown (nothing changes).
    pub fn set_enabled(&mut self, unit_key: &str, enabled: bool) -> bool {
        let Some(unit) = self.unit_mut(unit_key) else {
            return false;
        };
        unit.enabled = enabled;
        for measurement in &mut unit.measurements {
            measurement.refresh_status(enabled);
        }
        true
    }

    /// Records a reading, stamped with the clock's current time.
    ///
    /// Returns `false` when the unit or the measurement is unknown.
    pub fn update_value(&mut self, unit_key: &str, kind: &str, value: f64) -> bool {
        let now = self.clock.now_ms();
        let Some(unit) = self.unit_mut(unit_key) else {
            return false;
        };
        let enabled = unit.enabled;
        let Some(measurement) = unit.measurement_mut(kind) else {
            return false;
        };
        measurement.last_value = value;
        measurement.has_value = true;
        measurement.last_update_ms = now;
        measurement.refresh_status(enabled);
        true
    }

    /// Stores the interval verbatim. Returns `false` when the unit is unknown.
    pub fn set_interval(&mut self, unit_key: &str, interval_ms: u64) -> bool {
        match self.unit_mut(unit_key) {
            Some(unit) => {
                unit.publish_interval_ms = interval_ms;
                true
            }
            None => false,
        }
    }

    // ---------------------------------------------------------------------
    // Serialized views
    // ---------------------------------------------------------------------

    /// Flat status object keyed by composite address.
    pub fn serialize_status(&self) -> Result<String, SerializeError> {
        let json = serde_json::to_string(&StatusView(&self.units))?;
        self.check_limit(json)
    }

    /// Per-unit name/enabled/interval summary, shaped like a `sensors/config`
    /// command.
    pub fn serialize_config(&self) -> Result<String, SerializeError> {
        let json = serde_json::to_string(&ConfigView(&self.units))?;
        self.check_limit(json)
    }

    fn check_limit(&self, json: String) -> Result<String, SerializeError> {
        match self.payload_limit {
            Some(limit) if json.len() > limit => Err(SerializeError::PayloadTooLarge {
                len: json.len(),
                limit,
            }),
            _ => Ok(json),
        }
    }
}

fn validate_identifier(
    value: &str,
    field: &'static str,
    max: usize,
    empty: RegistryError,
) -> Result<(), RegistryError> {
    if value.is_empty() {
        return Err(empty);
    }
    if value.contains(RESERVED_CHARS) {
        return Err(RegistryError::ReservedCharacter(value.to_string()));
    }
    if value.len() > max {
        return Err(RegistryError::TooLong {
            field,
            value: value.to_string(),
            max,
        });
    }
    Ok(())
}

/// A reading rendered with exactly two fractional digits.
struct FixedPoint(f64);

impl Serialize for FixedPoint {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let raw = RawValue::from_string(format!("{:.2}", self.0)).map_err(serde::ser::Error::custom)?;
        raw.serialize(serializer)
    }
}

struct StatusView<'a>(&'a [HardwareUnit]);

impl Serialize for StatusView<'_> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let count = self.0.iter().map(|u| u.measurements.len()).sum();
        let mut map = serializer.serialize_map(Some(count))?;
        for unit in self.0 {
            for measurement in &unit.measurements {
                let entry = StatusEntry {
                    status: unit.effective_status(measurement),
                    value: measurement.valid_reading().map(FixedPoint),
                };
                map.serialize_entry(&build_address(&unit.key, &measurement.kind), &entry)?;
            }
        }
        map.end()
    }
}

#[derive(Serialize)]
struct StatusEntry {
    status: MeasurementStatus,
    value: Option<FixedPoint>,
}

struct ConfigView<'a>(&'a [HardwareUnit]);

impl Serialize for ConfigView<'_> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut root = serializer.serialize_struct("ConfigView", 1)?;
        root.serialize_field("sensors", &UnitConfigs(self.0))?;
        root.end()
    }
}

struct UnitConfigs<'a>(&'a [HardwareUnit]);

impl Serialize for UnitConfigs<'_> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.0.len()))?;
        for unit in self.0 {
            map.serialize_entry(
                &unit.key,
                &UnitConfigEntry {
                    name: &unit.display_name,
                    enabled: unit.enabled,
                    // whole seconds, the unit `sensors/config` commands use
                    interval: unit.publish_interval_ms / 1000,
                    measurements: unit.measurements.iter().map(|m| m.kind.as_str()).collect(),
                },
            )?;
        }
        map.end()
    }
}

#[derive(Serialize)]
struct UnitConfigEntry<'a> {
    name: &'a str,
    enabled: bool,
    interval: u64,
    measurements: Vec<&'a str>,
}
