//! Configuration validation rules.
//!
//! This module provides validation logic for `AppConfig` values
//! after they have been loaded from environment, files, or defaults.

use crate::config::AppConfig;
use thiserror::Error;

/// Configuration validation errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to load configuration: {0}")]
    LoadFailed(String),

    #[error("invalid configuration: {field} - {reason}")]
    Invalid { field: String, reason: String },

    #[error("missing required configuration: {field} ({hint})")]
    Missing { field: String, hint: String },
}

fn invalid(field: &str, reason: &str) -> ConfigError {
    ConfigError::Invalid { field: field.into(), reason: reason.into() }
}

impl AppConfig {
    /// Validate configuration values after loading.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::Invalid` if:
    /// - `timeout_ms` is less than 100ms or exceeds 5 minutes
    /// - `upload_max_attempts` is outside 1..=10
    /// - `backoff_initial_ms` is 0 or `backoff_max_ms` is below it
    /// - `dedupe_window_secs` exceeds one day
    /// - `user_agent` or `remote_table` is empty
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.timeout_ms < 100 {
            return Err(invalid("timeout_ms", "must be at least 100ms"));
        }
        if self.timeout_ms > 300_000 {
            return Err(invalid("timeout_ms", "must not exceed 5 minutes (300000ms)"));
        }

        if !(1..=10).contains(&self.upload_max_attempts) {
            return Err(invalid("upload_max_attempts", "must be between 1 and 10"));
        }

        if self.backoff_initial_ms == 0 {
            return Err(invalid("backoff_initial_ms", "must be greater than 0"));
        }
        if self.backoff_max_ms < self.backoff_initial_ms {
            return Err(invalid("backoff_max_ms", "must not be below backoff_initial_ms"));
        }

        if self.dedupe_window_secs > 86_400 {
            return Err(invalid("dedupe_window_secs", "must not exceed one day (86400s)"));
        }

        if self.probe_interval_ms < 1_000 {
            return Err(invalid("probe_interval_ms", "must be at least 1000ms"));
        }

        if self.user_agent.is_empty() {
            return Err(invalid("user_agent", "must not be empty"));
        }
        if self.remote_table.is_empty() {
            return Err(invalid("remote_table", "must not be empty"));
        }

        if self.remote_url.is_some() && self.remote_api_key.is_none() {
            tracing::warn!("remote_url is set without remote_api_key; requests will be unauthenticated");
        }

        Ok(())
    }
}
