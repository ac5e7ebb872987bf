//! Persistent per-unit configuration
//!
//! The agent reads the stored enabled flag and interval of a unit when it is
//! registered, and writes them back whenever a remote command changes them.
//! Host-driven value updates never touch the store.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, info};

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Key/value store for unit settings.
pub trait ConfigStore: Send {
    fn load_enabled(&self, unit_key: &str, default: bool) -> bool;
    fn save_enabled(&mut self, unit_key: &str, enabled: bool) -> Result<(), StoreError>;
    fn load_interval(&self, unit_key: &str, default: u64) -> u64;
    fn save_interval(&mut self, unit_key: &str, interval_ms: u64) -> Result<(), StoreError>;
}

/// Stored settings of one unit. Absent fields fall back to the caller's default.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnitSettings {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub enabled: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub interval_ms: Option<u64>,
}

/// Volatile store, lost on restart.
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    units: BTreeMap<String, UnitSettings>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Pre-seeds the settings of a unit, as if persisted by a previous run.
    pub fn with_unit(mut self, unit_key: &str, settings: UnitSettings) -> Self {
        self.units.insert(unit_key.to_string(), settings);
        self
    }

    pub fn settings(&self, unit_key: &str) -> Option<&UnitSettings> {
        self.units.get(unit_key)
    }
}

impl ConfigStore for MemoryStore {
    fn load_enabled(&self, unit_key: &str, default: bool) -> bool {
        self.units
            .get(unit_key)
            .and_then(|s| s.enabled)
            .unwrap_or(default)
    }

    fn save_enabled(&mut self, unit_key: &str, enabled: bool) -> Result<(), StoreError> {
        self.units.entry(unit_key.to_string()).or_default().enabled = Some(enabled);
        Ok(())
    }

    fn load_interval(&self, unit_key: &str, default: u64) -> u64 {
        self.units
            .get(unit_key)
            .and_then(|s| s.interval_ms)
            .unwrap_or(default)
    }

    fn save_interval(&mut self, unit_key: &str, interval_ms: u64) -> Result<(), StoreError> {
        self.units.entry(unit_key.to_string()).or_default().interval_ms = Some(interval_ms);
        Ok(())
    }
}

/// Settings kept in a pretty-printed JSON file, rewritten on every save.
#[derive(Debug)]
pub struct JsonFileStore {
    storage_path: PathBuf,
    cache: MemoryStore,
}

impl JsonFileStore {
    /// Opens the store, creating the parent directory if needed. A missing
    /// file starts an empty store.
    pub fn open<P: Into<PathBuf>>(storage_path: P) -> Result<Self, StoreError> {
        let mut store = Self {
            storage_path: storage_path.into(),
            cache: MemoryStore::new(),
        };
        store.load_from_disk()?;
        info!("Unit settings store at {}", store.storage_path.display());
        Ok(store)
    }

    pub fn path(&self) -> &Path {
        &self.storage_path
    }

    pub fn settings(&self, unit_key: &str) -> Option<&UnitSettings> {
        self.cache.settings(unit_key)
    }

    fn load_from_disk(&mut self) -> Result<(), StoreError> {
        if let Some(parent) = self.storage_path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }
        if !self.storage_path.exists() {
            debug!("No settings file yet at {}", self.storage_path.display());
            return Ok(());
        }

        let content = fs::read_to_string(&self.storage_path)?;
        if content.trim().is_empty() {
            return Ok(());
        }
        self.cache.units = serde_json::from_str(&content)?;
        debug!("Loaded settings for {} units", self.cache.units.len());
        Ok(())
    }

    /// Writes a sibling temp file, then renames it over the store file so a
    /// crash mid-write never leaves truncated JSON behind.
    fn save_to_disk(&self) -> Result<(), StoreError> {
        let json = serde_json::to_string_pretty(&self.cache.units)?;
        let tmp_path = self.tmp_path();
        fs::write(&tmp_path, json)?;
        fs::rename(&tmp_path, &self.storage_path)?;
        Ok(())
    }

    fn tmp_path(&self) -> PathBuf {
        let mut name = self
            .storage_path
            .file_name()
            .map(|n| n.to_os_string())
            .unwrap_or_default();
        name.push(".tmp");
        self.storage_path.with_file_name(name)
    }
}

impl ConfigStore for JsonFileStore {
    fn load_enabled(&self, unit_key: &str, default: bool) -> bool {
        self.cache.load_enabled(unit_key, default)
    }

    fn save_enabled(&mut self, unit_key: &str, enabled: bool) -> Result<(), StoreError> {
        self.cache.save_enabled(unit_key, enabled)?;
        self.save_to_disk()
    }

    fn load_interval(&self, unit_key: &str, default: u64) -> u64 {
        self.cache.load_interval(unit_key, default)
    }

    fn save_interval(&mut self, unit_key: &str, interval_ms: u64) -> Result<(), StoreError> {
        self.cache.save_interval(unit_key, interval_ms)?;
        self.save_to_disk()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_memory_store_defaults() {
        let store = MemoryStore::new();
        assert!(store.load_enabled("dht22", true));
        assert!(!store.load_enabled("dht22", false));
        assert_eq!(store.load_interval("dht22", 60_000), 60_000);
    }

    #[test]
    fn test_memory_store_save_and_load() {
        let mut store = MemoryStore::new();
        store.save_enabled("dht22", false).unwrap();
        store.save_interval("dht22", 30_000).unwrap();

        assert!(!store.load_enabled("dht22", true));
        assert_eq!(store.load_interval("dht22", 60_000), 30_000);
        assert_eq!(
            store.settings("dht22"),
            Some(&UnitSettings {
                enabled: Some(false),
                interval_ms: Some(30_000),
            })
        );
    }

    #[test]
    fn test_file_store_survives_reopen() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("nested").join("units.json");

        let mut store = JsonFileStore::open(&path).unwrap();
        store.save_interval("sps30", 15_000).unwrap();
        store.save_enabled("dht22", false).unwrap();
        drop(store);

        let reopened = JsonFileStore::open(&path).unwrap();
        assert_eq!(reopened.load_interval("sps30", 60_000), 15_000);
        assert!(reopened.load_enabled("sps30", true));
        assert!(!reopened.load_enabled("dht22", true));
        assert_eq!(reopened.load_interval("dht22", 60_000), 60_000);
    }

    #[test]
    fn test_file_store_save_replaces_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("units.json");
        fs::write(&path, r#"{"dht22":{"enabled":true}}"#).unwrap();

        let mut store = JsonFileStore::open(&path).unwrap();
        store.save_interval("dht22", 30_000).unwrap();

        // a stale temp file from an interrupted write is overwritten
        fs::write(dir.path().join("units.json.tmp"), "{\"dht22\":").unwrap();
        store.save_enabled("dht22", false).unwrap();

        assert!(!dir.path().join("units.json.tmp").exists());
        let reopened = JsonFileStore::open(&path).unwrap();
        assert_eq!(
            reopened.settings("dht22"),
            Some(&UnitSettings {
                enabled: Some(false),
                interval_ms: Some(30_000),
            })
        );
    }

    #[test]
    fn test_file_store_rejects_corrupt_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("units.json");
        fs::write(&path, "{not json").unwrap();

        assert!(matches!(
            JsonFileStore::open(&path),
            Err(StoreError::Serialization(_))
        ));
    }

    #[test]
    fn test_file_store_empty_file_is_empty_store() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("units.json");
        fs::write(&path, "").unwrap();

        let store = JsonFileStore::open(&path).unwrap();
        assert!(store.settings("dht22").is_none());
    }
}
