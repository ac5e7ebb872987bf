//! Device identification for the extended-info snapshot
//!
//! Static facts (hostname, OS, architecture, kernel) are discovered once;
//! uptime and timestamp are refreshed on every snapshot.

use chrono::{DateTime, Utc};
use serde::Serialize;
use sysinfo::System;
use tracing::info;

#[derive(Debug, Clone, Serialize)]
pub struct DeviceInfo {
    pub device_id: String,
    pub hostname: String,
    pub os: String,
    pub os_version: Option<String>,
    pub kernel_version: Option<String>,
    pub architecture: String,
    pub agent_version: String,
}

/// Payload of `<deviceId>/device/info`.
#[derive(Debug, Serialize)]
pub struct DeviceSnapshot<'a> {
    #[serde(flatten)]
    pub info: &'a DeviceInfo,
    pub uptime_seconds: u64,
    pub timestamp: DateTime<Utc>,
}

impl DeviceInfo {
    pub fn discover(device_id: &str) -> Self {
        let hostname = gethostname::gethostname().to_string_lossy().to_string();
        let os = std::env::consts::OS.to_string();
        let architecture = std::env::consts::ARCH.to_string();

        info!(
            "Discovery complete - Device: {}, Hostname: {}, OS: {}",
            device_id, hostname, os
        );

        Self {
            device_id: device_id.to_string(),
            hostname,
            os,
            os_version: System::long_os_version(),
            kernel_version: System::kernel_version(),
            architecture,
            agent_version: env!("CARGO_PKG_VERSION").to_string(),
        }
    }

    pub fn snapshot(&self) -> serde_json::Value {
        let snapshot = DeviceSnapshot {
            info: self,
            uptime_seconds: System::uptime(),
            timestamp: Utc::now(),
        };
        serde_json::to_value(snapshot).unwrap_or(serde_json::Value::Null)
    }
}
