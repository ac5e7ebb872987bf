//! Agent configuration
//!
//! Handles:
//! - Device identifier used to scope every topic
//! - MQTT broker settings
//! - Publish periods and payload limit
//! - Location of the unit settings store
//!
//! Read from `$MESURABLE_CONFIG` or `<config_dir>/mesurable-agent/config.toml`.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Environment variable overriding the config file location.
pub const CONFIG_ENV: &str = "MESURABLE_CONFIG";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AgentConfig {
    pub device_id: String,
    pub mqtt: MqttSettings,
    pub publish: PublishSettings,
    pub storage: StorageSettings,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MqttSettings {
    pub broker_host: String,
    pub broker_port: u16,
    pub client_id: Option<String>,
    pub keep_alive_secs: u64,
    pub reconnect_delay_secs: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PublishSettings {
    pub status_interval_secs: u64,
    pub config_interval_secs: u64,
    /// 0 disables the extended-info snapshot.
    pub info_interval_secs: u64,
    pub tick_millis: u64,
    /// 0 means unlimited.
    pub max_payload_bytes: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageSettings {
    pub path: Option<PathBuf>,
}

impl Default for AgentConfig {
    fn default() -> Self {
        let hostname = gethostname::gethostname().to_string_lossy().to_string();
        Self {
            device_id: default_device_id(&hostname),
            mqtt: MqttSettings::default(),
            publish: PublishSettings::default(),
            storage: StorageSettings::default(),
        }
    }
}

impl Default for MqttSettings {
    fn default() -> Self {
        Self {
            broker_host: "127.0.0.1".to_string(),
            broker_port: 1883,
            client_id: None,
            keep_alive_secs: 30,
            reconnect_delay_secs: 5,
        }
    }
}

impl Default for PublishSettings {
    fn default() -> Self {
        Self {
            status_interval_secs: 5,
            config_interval_secs: 60,
            info_interval_secs: 300,
            tick_millis: 250,
            max_payload_bytes: 8192,
        }
    }
}

impl PublishSettings {
    pub fn payload_limit(&self) -> Option<usize> {
        (self.max_payload_bytes > 0).then_some(self.max_payload_bytes)
    }
}

impl AgentConfig {
    /// Load config from `$MESURABLE_CONFIG` or the OS-specific location.
    /// A missing file yields the default config.
    pub async fn load() -> Result<Self> {
        let config_path = Self::config_file_path()?;

        if config_path.exists() {
            let content = tokio::fs::read_to_string(&config_path)
                .await
                .with_context(|| format!("Failed to read {}", config_path.display()))?;
            Self::from_toml(&content)
                .with_context(|| format!("Invalid config in {}", config_path.display()))
        } else {
            Ok(Self::default())
        }
    }

    pub fn from_toml(content: &str) -> Result<Self> {
        Ok(toml::from_str(content)?)
    }

    /// Save config to the location `load` reads from.
    pub async fn save(&self) -> Result<()> {
        let config_path = Self::config_file_path()?;

        if let Some(parent) = config_path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        let content = toml::to_string_pretty(self)?;
        tokio::fs::write(&config_path, content).await?;
        Ok(())
    }

    pub fn config_file_path() -> Result<PathBuf> {
        if let Ok(path) = std::env::var(CONFIG_ENV) {
            return Ok(PathBuf::from(path));
        }

        let mut path = dirs::config_dir()
            .ok_or_else(|| anyhow::anyhow!("Could not find config directory"))?;
        path.push("mesurable-agent");
        path.push("config.toml");
        Ok(path)
    }

    pub fn is_first_time_setup() -> bool {
        Self::config_file_path()
            .map(|p| !p.exists())
            .unwrap_or(true)
    }

    /// Where unit settings are persisted.
    pub fn storage_path(&self) -> Result<PathBuf> {
        if let Some(path) = &self.storage.path {
            return Ok(path.clone());
        }

        let mut path = dirs::data_dir()
            .ok_or_else(|| anyhow::anyhow!("Could not find data directory"))?;
        path.push("mesurable-agent");
        path.push("units.json");
        Ok(path)
    }

    /// Configured client id, or the device id plus a random suffix so two
    /// agents sharing a device id do not kick each other off the broker.
    pub fn client_id(&self) -> String {
        match &self.mqtt.client_id {
            Some(id) => id.clone(),
            None => {
                let suffix = uuid::Uuid::new_v4().simple().to_string();
                format!("{}-{}", self.device_id, &suffix[..8])
            }
        }
    }
}

fn default_device_id(hostname: &str) -> String {
    let host: String = hostname
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '-' || c == '_' {
                c.to_ascii_lowercase()
            } else {
                '-'
            }
        })
        .collect();
    if host.is_empty() {
        "mesurable".to_string()
    } else {
        format!("mesurable-{host}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = AgentConfig::default();
        assert_eq!(config.mqtt.broker_port, 1883);
        assert_eq!(config.publish.status_interval_secs, 5);
        assert_eq!(config.publish.payload_limit(), Some(8192));
        assert!(config.device_id.starts_with("mesurable"));
        assert!(!config.device_id.contains('/'));
    }

    #[test]
    fn test_partial_toml_keeps_defaults() {
        let config = AgentConfig::from_toml(
            r#"
            device_id = "growbox-01"

            [mqtt]
            broker_host = "broker.local"

            [publish]
            status_interval_secs = 10
            max_payload_bytes = 0
            "#,
        )
        .unwrap();

        assert_eq!(config.device_id, "growbox-01");
        assert_eq!(config.mqtt.broker_host, "broker.local");
        assert_eq!(config.mqtt.broker_port, 1883);
        assert_eq!(config.publish.status_interval_secs, 10);
        assert_eq!(config.publish.config_interval_secs, 60);
        assert_eq!(config.publish.payload_limit(), None);
        assert_eq!(config.storage.path, None);
    }

    #[test]
    fn test_invalid_toml_is_an_error() {
        assert!(AgentConfig::from_toml("device_id = [").is_err());
        assert!(AgentConfig::from_toml("[mqtt]\nbroker_port = \"x\"").is_err());
    }

    #[test]
    fn test_client_id() {
        let mut config = AgentConfig::from_toml(r#"device_id = "growbox-01""#).unwrap();
        let generated = config.client_id();
        assert!(generated.starts_with("growbox-01-"));
        assert_eq!(generated.len(), "growbox-01-".len() + 8);

        config.mqtt.client_id = Some("fixed".into());
        assert_eq!(config.client_id(), "fixed");
    }

    #[test]
    fn test_explicit_storage_path() {
        let config = AgentConfig::from_toml("[storage]\npath = \"/tmp/units.json\"").unwrap();
        assert_eq!(config.storage_path().unwrap(), PathBuf::from("/tmp/units.json"));
    }

    #[test]
    fn test_default_device_id_is_topic_safe() {
        assert_eq!(default_device_id("My Host/1"), "mesurable-my-host-1");
        assert_eq!(default_device_id(""), "mesurable");
    }
}
