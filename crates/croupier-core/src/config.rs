//! Hot-reload configuration.
//!
//! Configuration is read from TOML. Missing keys take the defaults below and
//! unknown keys are ignored, so older SDKs accept newer config files.
//!
//! ```toml
//! enabled = true
//! auto_reconnect = true
//! reconnect_delay = 5.0
//! max_retry_attempts = 10
//! health_check_interval = 30.0
//! graceful_shutdown_timeout = 30.0
//!
//! [file_watching]
//! enabled = true
//! watch_dir = "./functions"
//! patterns = ["*.rs", "*.toml"]
//! ```

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// Default delay before the second reconnect attempt, in seconds.
pub const DEFAULT_RECONNECT_DELAY_SECS: f64 = 5.0;

/// Default number of reconnect attempts per recovery cycle.
pub const DEFAULT_MAX_RETRY_ATTEMPTS: u32 = 10;

/// Default period of the health-check and auto-reconnect loops, in seconds.
pub const DEFAULT_HEALTH_CHECK_INTERVAL_SECS: f64 = 30.0;

/// Default bound on the disconnect step of a graceful shutdown, in seconds.
pub const DEFAULT_GRACEFUL_SHUTDOWN_TIMEOUT_SECS: f64 = 30.0;

/// Default file polling period, in seconds.
pub const DEFAULT_POLL_INTERVAL_SECS: f64 = 1.0;

/// Longest accepted duration for any timing field (one day).
pub const MAX_DURATION_SECS: f64 = 86_400.0;

/// [`MAX_DURATION_SECS`] as a `Duration`; loop periods are clamped to it.
pub const MAX_DURATION: Duration = Duration::from_secs(86_400);

/// Configuration snapshot for a hot-reload client.
///
/// Snapshots are immutable: replacing one is itself a reload event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HotReloadConfig {
    /// Master switch for background reload support.
    pub enabled: bool,

    /// Run the auto-reconnect loop.
    pub auto_reconnect: bool,

    /// Initial backoff delay in seconds.
    pub reconnect_delay: f64,

    /// Attempts per recovery cycle.
    pub max_retry_attempts: u32,

    /// Period of the health-check and auto-reconnect loops in seconds.
    pub health_check_interval: f64,

    /// Upper bound on the disconnect step of a graceful shutdown in seconds.
    pub graceful_shutdown_timeout: f64,

    pub file_watching: FileWatchingConfig,
}

impl Default for HotReloadConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            auto_reconnect: true,
            reconnect_delay: DEFAULT_RECONNECT_DELAY_SECS,
            max_retry_attempts: DEFAULT_MAX_RETRY_ATTEMPTS,
            health_check_interval: DEFAULT_HEALTH_CHECK_INTERVAL_SECS,
            graceful_shutdown_timeout: DEFAULT_GRACEFUL_SHUTDOWN_TIMEOUT_SECS,
            file_watching: FileWatchingConfig::default(),
        }
    }
}

/// File-watching section of the configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FileWatchingConfig {
    pub enabled: bool,

    /// Directory scanned recursively for changes.
    pub watch_dir: PathBuf,

    /// Glob patterns matched against file names.
    pub patterns: Vec<String>,

    /// Scan period in seconds.
    pub poll_interval: f64,
}

impl Default for FileWatchingConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            watch_dir: PathBuf::from("./functions"),
            patterns: vec![
                "*.rs".to_string(),
                "*.toml".to_string(),
                "*.json".to_string(),
                "*.yaml".to_string(),
            ],
            poll_interval: DEFAULT_POLL_INTERVAL_SECS,
        }
    }
}

impl HotReloadConfig {
    /// Parses and validates a TOML document.
    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        let config: Self =
            toml::from_str(content).map_err(|e| ConfigError::Parse(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Reads, parses and validates a TOML file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::Read {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;
        Self::from_toml_str(&content)
    }

    /// Checks that every duration is finite, within one day and usable as a
    /// timer period.
    pub fn validate(&self) -> Result<(), ConfigError> {
        non_negative("reconnect_delay", self.reconnect_delay)?;
        positive("health_check_interval", self.health_check_interval)?;
        non_negative("graceful_shutdown_timeout", self.graceful_shutdown_timeout)?;
        positive("file_watching.poll_interval", self.file_watching.poll_interval)?;
        Ok(())
    }

    pub fn reconnect_delay(&self) -> Duration {
        secs(self.reconnect_delay, DEFAULT_RECONNECT_DELAY_SECS)
    }

    pub fn health_check_interval(&self) -> Duration {
        secs(self.health_check_interval, DEFAULT_HEALTH_CHECK_INTERVAL_SECS)
    }

    pub fn graceful_shutdown_timeout(&self) -> Duration {
        secs(
            self.graceful_shutdown_timeout,
            DEFAULT_GRACEFUL_SHUTDOWN_TIMEOUT_SECS,
        )
    }

    /// Returns true if a loop period differs from `other`.
    ///
    /// Running loops keep their period until restarted.
    pub fn intervals_differ(&self, other: &Self) -> bool {
        self.health_check_interval != other.health_check_interval
            || self.file_watching.poll_interval != other.file_watching.poll_interval
    }
}

impl FileWatchingConfig {
    pub fn poll_interval(&self) -> Duration {
        secs(self.poll_interval, DEFAULT_POLL_INTERVAL_SECS)
    }
}

fn secs(value: f64, fallback: f64) -> Duration {
    Duration::try_from_secs_f64(value)
        .or_else(|_| Duration::try_from_secs_f64(fallback))
        .unwrap_or_default()
}

fn non_negative(field: &str, value: f64) -> Result<(), ConfigError> {
    if value.is_finite() && (0.0..=MAX_DURATION_SECS).contains(&value) {
        Ok(())
    } else {
        Err(ConfigError::invalid(field, value, "0 to 86400 seconds"))
    }
}

fn positive(field: &str, value: f64) -> Result<(), ConfigError> {
    if value.is_finite() && value > 0.0 && value <= MAX_DURATION_SECS {
        Ok(())
    } else {
        Err(ConfigError::invalid(field, value, "> 0 and <= 86400 seconds"))
    }
}
