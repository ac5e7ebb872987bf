//! Publish scheduler
//!
//! Independent interval timers polled on every run-loop tick. A timer that is
//! due always moves its `last_fired` mark to `now`, whether or not the publish
//! behind it goes out, so a long disconnection never turns into a burst of
//! catch-up publishes.

use crate::config::PublishSettings;

/// One periodic timer on the host loop time base.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IntervalTimer {
    period_ms: u64,
    last_fired_ms: u64,
}

impl IntervalTimer {
    /// The first fire happens one full period after `now_ms`.
    pub fn new(period_ms: u64, now_ms: u64) -> Self {
        Self {
            period_ms,
            last_fired_ms: now_ms,
        }
    }

    pub fn period_ms(&self) -> u64 {
        self.period_ms
    }

    pub fn last_fired_ms(&self) -> u64 {
        self.last_fired_ms
    }

    /// Returns `true` when the period has elapsed, and restarts the timer.
    pub fn poll(&mut self, now_ms: u64) -> bool {
        if now_ms.saturating_sub(self.last_fired_ms) >= self.period_ms {
            self.last_fired_ms = now_ms;
            true
        } else {
            false
        }
    }
}

/// Snapshot kinds the scheduler emits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PublishKind {
    Status,
    Config,
    Info,
}

#[derive(Debug, Clone)]
pub struct PublishScheduler {
    status: IntervalTimer,
    config: IntervalTimer,
    /// 0 keeps the extended-info timer off.
    info_period_ms: u64,
    info: Option<IntervalTimer>,
}

impl PublishScheduler {
    /// Status and config timers start at `now_ms`. The extended-info timer
    /// stays off until [`enable_info`](Self::enable_info).
    pub fn new(settings: &PublishSettings, now_ms: u64) -> Self {
        Self {
            status: IntervalTimer::new(secs_to_ms(settings.status_interval_secs), now_ms),
            config: IntervalTimer::new(secs_to_ms(settings.config_interval_secs), now_ms),
            info_period_ms: secs_to_ms(settings.info_interval_secs),
            info: None,
        }
    }

    /// Starts the extended-info timer from `now_ms`. No-op with a zero period.
    pub fn enable_info(&mut self, now_ms: u64) {
        if self.info_period_ms > 0 {
            self.info = Some(IntervalTimer::new(self.info_period_ms, now_ms));
        }
    }

    pub fn disable_info(&mut self) {
        self.info = None;
    }

    pub fn status_timer(&self) -> &IntervalTimer {
        &self.status
    }

    pub fn config_timer(&self) -> &IntervalTimer {
        &self.config
    }

    pub fn info_timer(&self) -> Option<&IntervalTimer> {
        self.info.as_ref()
    }

    /// Polls every timer once and returns the kinds that are due.
    pub fn due(&mut self, now_ms: u64) -> Vec<PublishKind> {
        let mut due = Vec::with_capacity(3);
        if self.status.poll(now_ms) {
            due.push(PublishKind::Status);
        }
        if self.config.poll(now_ms) {
            due.push(PublishKind::Config);
        }
        if self.info.as_mut().is_some_and(|t| t.poll(now_ms)) {
            due.push(PublishKind::Info);
        }
        due
    }
}

fn secs_to_ms(secs: u64) -> u64 {
    secs.saturating_mul(1000)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn settings(status: u64, config: u64, info: u64) -> PublishSettings {
        PublishSettings {
            status_interval_secs: status,
            config_interval_secs: config,
            info_interval_secs: info,
            ..PublishSettings::default()
        }
    }

    #[test]
    fn test_timer_fires_after_period() {
        let mut timer = IntervalTimer::new(5_000, 0);
        assert!(!timer.poll(0));
        assert!(!timer.poll(4_999));
        assert!(timer.poll(5_000));
        assert_eq!(timer.last_fired_ms(), 5_000);
        assert!(!timer.poll(9_999));
        assert!(timer.poll(10_000));
    }

    #[test]
    fn test_timer_does_not_catch_up() {
        let mut timer = IntervalTimer::new(5_000, 0);
        // a long stall only yields a single fire
        assert!(timer.poll(60_000));
        assert!(!timer.poll(60_001));
        assert!(!timer.poll(64_999));
        assert!(timer.poll(65_000));
    }

    #[test]
    fn test_zero_period_fires_every_poll() {
        let mut timer = IntervalTimer::new(0, 100);
        assert!(timer.poll(100));
        assert!(timer.poll(100));
    }

    #[test]
    fn test_timers_are_independent() {
        let mut scheduler = PublishScheduler::new(&settings(5, 60, 300), 0);
        scheduler.enable_info(0);
        assert!(scheduler.due(4_000).is_empty());
        assert_eq!(scheduler.due(5_000), vec![PublishKind::Status]);
        assert_eq!(scheduler.due(10_000), vec![PublishKind::Status]);
        assert_eq!(
            scheduler.due(60_000),
            vec![PublishKind::Status, PublishKind::Config]
        );
        // firing status never pushes config forward, and vice versa
        assert_eq!(scheduler.status_timer().last_fired_ms(), 60_000);
        assert_eq!(scheduler.config_timer().last_fired_ms(), 60_000);
        assert_eq!(
            scheduler.due(300_000),
            vec![PublishKind::Status, PublishKind::Config, PublishKind::Info]
        );
    }

    #[test]
    fn test_info_timer_disabled() {
        let mut scheduler = PublishScheduler::new(&settings(5, 60, 0), 0);
        scheduler.enable_info(0);
        assert!(scheduler.info_timer().is_none());
        assert!(!scheduler.due(1_000_000).contains(&PublishKind::Info));

        // off until enabled
        let mut scheduler = PublishScheduler::new(&settings(5, 60, 10), 0);
        assert!(scheduler.info_timer().is_none());
        scheduler.enable_info(20_000);
        assert!(!scheduler.due(29_999).contains(&PublishKind::Info));
        assert!(scheduler.due(30_000).contains(&PublishKind::Info));

        scheduler.disable_info();
        assert_eq!(
            scheduler.due(60_000),
            vec![PublishKind::Status, PublishKind::Config]
        );
    }
}
