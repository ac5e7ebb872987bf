//! Wire topics, all scoped under the device identifier

pub const STATUS_SUFFIX: &str = "sensors/status";
pub const CONFIG_SUFFIX: &str = "sensors/config";
pub const ENABLE_SUFFIX: &str = "sensors/enable";
pub const INFO_SUFFIX: &str = "device/info";

/// Fully qualified topics of one device.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceTopics {
    device_id: String,
    pub status: String,
    pub config: String,
    pub enable: String,
    pub info: String,
}

impl DeviceTopics {
    pub fn new(device_id: &str) -> Self {
        Self {
            device_id: device_id.to_string(),
            status: format!("{device_id}/{STATUS_SUFFIX}"),
            config: format!("{device_id}/{CONFIG_SUFFIX}"),
            enable: format!("{device_id}/{ENABLE_SUFFIX}"),
            info: format!("{device_id}/{INFO_SUFFIX}"),
        }
    }

    pub fn device_id(&self) -> &str {
        &self.device_id
    }

    /// `<deviceId>/<unitKey>/<measurementType>`, where single readings go.
    pub fn measurement(&self, unit_key: &str, kind: &str) -> String {
        format!("{}/{unit_key}/{kind}", self.device_id)
    }

    /// Topics the command router listens on.
    pub fn subscriptions(&self) -> [&str; 2] {
        [&self.config, &self.enable]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_device_topics() {
        let topics = DeviceTopics::new("growbox-01");
        assert_eq!(topics.status, "growbox-01/sensors/status");
        assert_eq!(topics.config, "growbox-01/sensors/config");
        assert_eq!(topics.enable, "growbox-01/sensors/enable");
        assert_eq!(topics.info, "growbox-01/device/info");
        assert_eq!(
            topics.measurement("dht22", "temperature"),
            "growbox-01/dht22/temperature"
        );
        assert_eq!(
            topics.subscriptions(),
            ["growbox-01/sensors/config", "growbox-01/sensors/enable"]
        );
    }
}
