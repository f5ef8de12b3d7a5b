//! Application configuration with layered loading.
//!
//! This module provides configuration management using figment for layered
//! configuration loading from multiple sources:
//!
//! 1. Environment variables (CORKSCAN_*)
//! 2. TOML config file (if CORKSCAN_CONFIG_FILE set)
//! 3. Built-in defaults

use std::path::PathBuf;
use std::time::Duration;

use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use serde::{Deserialize, Serialize};

mod validation;

pub use validation::ConfigError;

/// Application configuration with layered loading.
///
/// Loading precedence (highest wins):
/// 1. Environment variables (CORKSCAN_*)
/// 2. TOML config file (if CORKSCAN_CONFIG_FILE set)
/// 3. Built-in defaults
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    /// Path to the SQLite database holding the cache and the queue.
    ///
    /// Set via CORKSCAN_DB_PATH environment variable.
    #[serde(default = "default_db_path")]
    pub db_path: PathBuf,

    /// Base URL of the remote REST store (e.g. `https://db.example.com/rest/v1`).
    ///
    /// Set via CORKSCAN_REMOTE_URL. Required only for sync commands.
    #[serde(default)]
    pub remote_url: Option<String>,

    /// API key sent to the remote store.
    ///
    /// Set via CORKSCAN_REMOTE_API_KEY environment variable.
    #[serde(default)]
    pub remote_api_key: Option<String>,

    /// Remote table that receives scans.
    #[serde(default = "default_remote_table")]
    pub remote_table: String,

    /// Owner of uploaded scans on the remote store.
    ///
    /// Set via CORKSCAN_USER_ID. Required only for sync commands.
    #[serde(default)]
    pub user_id: Option<String>,

    /// URL probed to decide whether the device is online.
    ///
    /// Falls back to `remote_url` when unset.
    #[serde(default)]
    pub probe_url: Option<String>,

    /// How often the connectivity probe runs, in milliseconds.
    #[serde(default = "default_probe_interval_ms")]
    pub probe_interval_ms: u64,

    /// HTTP request timeout in milliseconds.
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,

    /// User-Agent string for HTTP requests.
    #[serde(default = "default_user_agent")]
    pub user_agent: String,

    /// Half-width of the window in which a remote record with the same
    /// correlation key counts as a duplicate, in seconds.
    #[serde(default = "default_dedupe_window_secs")]
    pub dedupe_window_secs: u64,

    /// Upload attempts per record before giving up for this pass.
    #[serde(default = "default_upload_max_attempts")]
    pub upload_max_attempts: u32,

    /// Delay before the second upload attempt, in milliseconds; doubles per attempt.
    #[serde(default = "default_upload_base_delay_ms")]
    pub upload_base_delay_ms: u64,

    /// First retry delay after a failed pass, in milliseconds.
    #[serde(default = "default_backoff_initial_ms")]
    pub backoff_initial_ms: u64,

    /// Upper bound for the retry delay, in milliseconds.
    #[serde(default = "default_backoff_max_ms")]
    pub backoff_max_ms: u64,

    /// Unsaved cache entries kept before the oldest are evicted.
    #[serde(default = "default_cache_max_unsaved")]
    pub cache_max_unsaved: usize,
}

fn default_db_path() -> PathBuf {
    PathBuf::from("./corkscan.sqlite")
}

fn default_remote_table() -> String {
    "scans".into()
}

fn default_probe_interval_ms() -> u64 {
    15_000
}

fn default_timeout_ms() -> u64 {
    15_000
}

fn default_user_agent() -> String {
    "corkscan/0.1".into()
}

fn default_dedupe_window_secs() -> u64 {
    300
}

fn default_upload_max_attempts() -> u32 {
    3
}

fn default_upload_base_delay_ms() -> u64 {
    1_000
}

fn default_backoff_initial_ms() -> u64 {
    5_000
}

fn default_backoff_max_ms() -> u64 {
    300_000
}

fn default_cache_max_unsaved() -> usize {
    200
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            db_path: default_db_path(),
            remote_url: None,
            remote_api_key: None,
            remote_table: default_remote_table(),
            user_id: None,
            probe_url: None,
            probe_interval_ms: default_probe_interval_ms(),
            timeout_ms: default_timeout_ms(),
            user_agent: default_user_agent(),
            dedupe_window_secs: default_dedupe_window_secs(),
            upload_max_attempts: default_upload_max_attempts(),
            upload_base_delay_ms: default_upload_base_delay_ms(),
            backoff_initial_ms: default_backoff_initial_ms(),
            backoff_max_ms: default_backoff_max_ms(),
            cache_max_unsaved: default_cache_max_unsaved(),
        }
    }
}

impl AppConfig {
    /// Timeout as Duration for use with reqwest/tokio.
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    pub fn probe_interval(&self) -> Duration {
        Duration::from_millis(self.probe_interval_ms)
    }

    pub fn dedupe_window(&self) -> Duration {
        Duration::from_secs(self.dedupe_window_secs)
    }

    pub fn upload_base_delay(&self) -> Duration {
        Duration::from_millis(self.upload_base_delay_ms)
    }

    pub fn backoff_initial(&self) -> Duration {
        Duration::from_millis(self.backoff_initial_ms)
    }

    pub fn backoff_max(&self) -> Duration {
        Duration::from_millis(self.backoff_max_ms)
    }

    /// Load configuration from all sources with layered precedence.
    ///
    /// Priority (highest wins):
    /// 1. Environment variables prefixed with `CORKSCAN_`
    /// 2. TOML file from `CORKSCAN_CONFIG_FILE` (if set)
    /// 3. Built-in defaults via `Default::default()`
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if:
    /// - Configuration file cannot be read
    /// - Environment variables cannot be parsed
    /// - Validation fails after loading
    pub fn load() -> Result<Self, ConfigError> {
        let mut figment = Figment::from(Serialized::defaults(Self::default()));

        if let Ok(config_path) = std::env::var("CORKSCAN_CONFIG_FILE") {
            figment = figment.merge(Toml::file(&config_path));
        }

        figment = figment.merge(
            Env::prefixed("CORKSCAN_")
                .ignore(&["CONFIG_FILE"])
                .map(|key| key.as_str().to_lowercase().into())
                .split("__"),
        );

        let config: Self = figment.extract().map_err(|e| ConfigError::LoadFailed(e.to_string()))?;

        config.validate()?;

        Ok(config)
    }

    /// Remote store URL, required by sync commands.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::Missing` if the remote URL is not set.
    pub fn require_remote_url(&self) -> Result<&str, ConfigError> {
        self.remote_url.as_deref().ok_or_else(|| ConfigError::Missing {
            field: "remote_url".into(),
            hint: "Set CORKSCAN_REMOTE_URL environment variable".into(),
        })
    }

    /// Remote owner id, required by sync commands.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::Missing` if the user id is not set.
    pub fn require_user_id(&self) -> Result<&str, ConfigError> {
        self.user_id.as_deref().ok_or_else(|| ConfigError::Missing {
            field: "user_id".into(),
            hint: "Set CORKSCAN_USER_ID environment variable".into(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = AppConfig::default();
        assert_eq!(config.db_path, PathBuf::from("./corkscan.sqlite"));
        assert_eq!(config.remote_table, "scans");
        assert_eq!(config.user_agent, "corkscan/0.1");
        assert_eq!(config.dedupe_window_secs, 300);
        assert_eq!(config.upload_max_attempts, 3);
        assert_eq!(config.backoff_initial_ms, 5_000);
        assert_eq!(config.backoff_max_ms, 300_000);
        assert!(config.remote_url.is_none());
        assert!(config.user_id.is_none());
    }

    #[test]
    fn test_durations() {
        let config = AppConfig::default();
        assert_eq!(config.timeout(), Duration::from_millis(15_000));
        assert_eq!(config.dedupe_window(), Duration::from_secs(300));
        assert_eq!(config.backoff_initial(), Duration::from_secs(5));
        assert_eq!(config.backoff_max(), Duration::from_secs(300));
    }

    #[test]
    fn test_require_remote_url_missing() {
        let config = AppConfig::default();
        assert!(matches!(config.require_remote_url(), Err(ConfigError::Missing { .. })));
    }

    #[test]
    fn test_require_user_id_present() {
        let config = AppConfig { user_id: Some("user-1".into()), ..Default::default() };
        assert_eq!(config.require_user_id().unwrap(), "user-1");
    }

    #[test]
    fn test_figment_layers_toml_over_defaults() {
        let figment = Figment::from(Serialized::defaults(AppConfig::default()))
            .merge(Toml::string("dedupe_window_secs = 120\nremote_url = \"https://db.example.com\""));
        let config: AppConfig = figment.extract().unwrap();
        assert_eq!(config.dedupe_window_secs, 120);
        assert_eq!(config.remote_url.as_deref(), Some("https://db.example.com"));
        assert_eq!(config.upload_max_attempts, 3);
    }
}
