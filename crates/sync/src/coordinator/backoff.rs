use std::time::Duration;

use corkscan_core::AppConfig;

/// Exponential backoff between failed sync passes.
///
/// The first failure waits `initial`; each further consecutive failure
/// doubles the wait, capped at `max`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BackoffPolicy {
    pub initial: Duration,
    pub max: Duration,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self { initial: Duration::from_secs(5), max: Duration::from_secs(300) }
    }
}

impl BackoffPolicy {
    pub fn from_config(config: &AppConfig) -> Self {
        Self { initial: config.backoff_initial(), max: config.backoff_max() }
    }

    /// Delay after another failure, given the current delay (zero when the
    /// last pass succeeded).
    pub fn next_delay(&self, current: Duration) -> Duration {
        if current.is_zero() { self.initial.min(self.max) } else { current.saturating_mul(2).min(self.max) }
    }
}
