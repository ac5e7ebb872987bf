//! Host probes backed by sysinfo
//!
//! Two units are exposed:
//! - `system`: `cpu` (%), `memory` (%), `swap` (%), `load` (1 min average)
//! - `thermal`: one measurement per temperature component (°C)
//!
//! A unit is sampled only while enabled, and no faster than its publish
//! interval.

use mesurable_agent::{ConfigStore, RegistryError, TelemetryAgent, Transport};
use std::collections::HashMap;
use sysinfo::{Components, System};
use tracing::{debug, info};

pub const SYSTEM_UNIT: &str = "system";
pub const THERMAL_UNIT: &str = "thermal";

const SYSTEM_MEASUREMENTS: [&str; 4] = ["cpu", "memory", "swap", "load"];
const MAX_LABEL_LEN: usize = mesurable_agent::registry::MAX_TYPE_LEN;

pub struct SystemProbe {
    system: System,
    components: Components,
    /// Measurement type for each component, in component order.
    thermal_kinds: Vec<String>,
    last_sample_ms: HashMap<&'static str, u64>,
}

impl SystemProbe {
    pub fn new() -> Self {
        let system = System::new_all();
        let components = Components::new_with_refreshed_list();
        let thermal_kinds = measurement_kinds(components.list().iter().map(|c| c.label()));

        Self {
            system,
            components,
            thermal_kinds,
            last_sample_ms: HashMap::new(),
        }
    }

    /// Registers the probe units and their measurements on the agent.
    pub fn register<T: Transport, S: ConfigStore>(
        &self,
        agent: &mut TelemetryAgent<T, S>,
    ) -> Result<(), RegistryError> {
        agent.register_unit(SYSTEM_UNIT, "System load")?;
        for kind in SYSTEM_MEASUREMENTS {
            agent.add_measurement(SYSTEM_UNIT, kind)?;
        }

        if self.thermal_kinds.is_empty() {
            info!("No temperature components found, skipping thermal unit");
            return Ok(());
        }
        agent.register_unit(THERMAL_UNIT, "Temperature sensors")?;
        for kind in &self.thermal_kinds {
            agent.add_measurement(THERMAL_UNIT, kind)?;
        }
        Ok(())
    }

    /// Samples every unit that is enabled and due.
    pub fn sample<T: Transport, S: ConfigStore>(&mut self, agent: &mut TelemetryAgent<T, S>) {
        let now = agent.now_ms();

        if self.is_due(agent, SYSTEM_UNIT, now) {
            self.sample_system(agent);
        }
        if !self.thermal_kinds.is_empty() && self.is_due(agent, THERMAL_UNIT, now) {
            self.sample_thermal(agent);
        }
    }

    fn is_due<T: Transport, S: ConfigStore>(
        &mut self,
        agent: &TelemetryAgent<T, S>,
        unit_key: &'static str,
        now_ms: u64,
    ) -> bool {
        if !agent.is_enabled(unit_key) {
            return false;
        }
        let Some(interval_ms) = agent.registry().interval_ms(unit_key) else {
            return false;
        };
        match self.last_sample_ms.get(unit_key) {
            Some(last) if now_ms.saturating_sub(*last) < interval_ms => false,
            _ => {
                self.last_sample_ms.insert(unit_key, now_ms);
                true
            }
        }
    }

    fn sample_system<T: Transport, S: ConfigStore>(&mut self, agent: &mut TelemetryAgent<T, S>) {
        self.system.refresh_cpu_usage();
        self.system.refresh_memory();

        let cpu = self.system.global_cpu_info().cpu_usage();
        let memory = percent(
            self.system.total_memory().saturating_sub(self.system.available_memory()),
            self.system.total_memory(),
        );
        let swap = percent(self.system.used_swap(), self.system.total_swap());
        let load = System::load_average().one;

        debug!("System sample: cpu {:.1}%, memory {:.1}%", cpu, memory);
        agent.publish_value(SYSTEM_UNIT, "cpu", cpu);
        agent.publish_value(SYSTEM_UNIT, "memory", memory);
        agent.publish_value(SYSTEM_UNIT, "swap", swap);
        agent.publish_value(SYSTEM_UNIT, "load", load);
    }

    fn sample_thermal<T: Transport, S: ConfigStore>(&mut self, agent: &mut TelemetryAgent<T, S>) {
        self.components.refresh();
        for (component, kind) in self.components.list().iter().zip(&self.thermal_kinds) {
            agent.publish_value(THERMAL_UNIT, kind, component.temperature());
        }
    }
}

/// Share of `total` in percent. An empty total (no swap) reads 0.
fn percent(used: u64, total: u64) -> f64 {
    if total == 0 {
        0.0
    } else {
        used as f64 / total as f64 * 100.0
    }
}

/// Turns component labels into unique, topic-safe measurement types of at
/// most `MAX_LABEL_LEN` bytes.
fn measurement_kinds<'a>(labels: impl Iterator<Item = &'a str>) -> Vec<String> {
    let mut kinds: Vec<String> = Vec::new();
    for (index, label) in labels.enumerate() {
        let sanitized: String = label
            .trim()
            .chars()
            .map(|c| {
                if c.is_ascii_alphanumeric() {
                    c.to_ascii_lowercase()
                } else {
                    '_'
                }
            })
            .collect();
        let mut kind = clip(&sanitized, MAX_LABEL_LEN);
        if kind.is_empty() {
            kind = format!("sensor{index}");
        }
        if kinds.contains(&kind) {
            let suffix = format!("_{index}");
            kind = format!("{}{}", clip(&kind, MAX_LABEL_LEN - suffix.len()), suffix);
        }
        kinds.push(kind);
    }
    kinds
}

/// ASCII `value` cut to `max` bytes, without surrounding underscores.
fn clip(value: &str, max: usize) -> String {
    let value = value.trim_matches('_');
    value[..value.len().min(max)].trim_end_matches('_').to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_measurement_kinds() {
        let kinds = measurement_kinds(
            ["coretemp Package id 0", "acpitz temp1", "", "acpitz temp1"].into_iter(),
        );
        assert_eq!(
            kinds,
            vec!["coretemp_package_id_0", "acpitz_temp1", "sensor2", "acpitz_temp1_3"]
        );
    }

    #[test]
    fn test_long_label_truncated() {
        let label = "x".repeat(80);
        let kinds = measurement_kinds([label.as_str()].into_iter());
        assert_eq!(kinds[0].len(), MAX_LABEL_LEN);
    }

    #[test]
    fn test_long_labels_sharing_a_prefix_stay_unique() {
        let kinds = measurement_kinds(
            [
                "nvme composite samsung ssd 980 temp1",
                "nvme composite samsung ssd 980 temp2",
                "nvme composite samsung ssd 980 pro sensor 1",
            ]
            .into_iter(),
        );
        assert_eq!(
            kinds,
            vec![
                "nvme_composite_samsung_ssd_980",
                "nvme_composite_samsung_ssd_98_1",
                "nvme_composite_samsung_ssd_98_2",
            ]
        );
        for kind in &kinds {
            assert!(kind.len() <= MAX_LABEL_LEN);
            assert!(!kind.ends_with('_'));
        }
    }

    #[test]
    fn test_percent() {
        assert_eq!(percent(0, 0), 0.0);
        assert_eq!(percent(25, 100), 25.0);
    }
}
