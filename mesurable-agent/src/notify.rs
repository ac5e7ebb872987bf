//! Host notification sink
//!
//! Optional closures fired synchronously when a remote command changes a unit
//! or when the transport connects/disconnects. A missing closure is a no-op.

use std::fmt;

pub type ConfigChangeFn = Box<dyn FnMut(&str, u64) + Send>;
pub type EnableChangeFn = Box<dyn FnMut(&str, bool) + Send>;
pub type ConnectionChangeFn = Box<dyn FnMut(bool) + Send>;

#[derive(Default)]
pub struct HostCallbacks {
    on_config_change: Option<ConfigChangeFn>,
    on_enable_change: Option<EnableChangeFn>,
    on_connection_change: Option<ConnectionChangeFn>,
}

impl HostCallbacks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Called with `(unit_key, interval_ms)` after an interval update.
    pub fn set_on_config_change<F>(&mut self, callback: F)
    where
        F: FnMut(&str, u64) + Send + 'static,
    {
        self.on_config_change = Some(Box::new(callback));
    }

    /// Called with `(unit_key, enabled)` after an enable command.
    pub fn set_on_enable_change<F>(&mut self, callback: F)
    where
        F: FnMut(&str, bool) + Send + 'static,
    {
        self.on_enable_change = Some(Box::new(callback));
    }

    pub fn set_on_connection_change<F>(&mut self, callback: F)
    where
        F: FnMut(bool) + Send + 'static,
    {
        self.on_connection_change = Some(Box::new(callback));
    }

    pub fn config_changed(&mut self, unit_key: &str, interval_ms: u64) {
        if let Some(callback) = self.on_config_change.as_mut() {
            callback(unit_key, interval_ms);
        }
    }

    pub fn enable_changed(&mut self, unit_key: &str, enabled: bool) {
        if let Some(callback) = self.on_enable_change.as_mut() {
            callback(unit_key, enabled);
        }
    }

    pub fn connection_changed(&mut self, connected: bool) {
        if let Some(callback) = self.on_connection_change.as_mut() {
            callback(connected);
        }
    }
}

impl fmt::Debug for HostCallbacks {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HostCallbacks")
            .field("on_config_change", &self.on_config_change.is_some())
            .field("on_enable_change", &self.on_enable_change.is_some())
            .field("on_connection_change", &self.on_connection_change.is_some())
            .finish()
    }
}
