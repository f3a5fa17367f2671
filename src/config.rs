//! # Configuration Module
//!
//! Handles loading and validating configuration from TOML files.

use serde::de::Error;
use serde::Deserialize;
use std::fs;
use std::path::Path;
use std::time::Duration;

use crate::downstream::client::DEFAULT_CALTOPO_BASE_URL;
use crate::error::{RelayError, Result};
use crate::relay::RelaySettings;
use crate::upstream::client::DEFAULT_SKYDIO_BASE_URL;

/// Environment variable that overrides `upstream.api_token`
pub const API_TOKEN_ENV: &str = "SKYDIO_API_TOKEN";

/// Downstream convention: at most one report per 5 seconds per device
pub const MIN_POLL_INTERVAL_S: u64 = 5;

/// Main configuration structure
#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub upstream: UpstreamConfig,
    pub downstream: DownstreamConfig,
    #[serde(default)]
    pub relay: RelayConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Drone-fleet API configuration
#[derive(Debug, Deserialize, Clone)]
pub struct UpstreamConfig {
    #[serde(default = "default_upstream_base_url")]
    pub base_url: String,

    #[serde(default)]
    pub api_token: String,

    pub vehicle_serial: String,

    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
}

/// Location tracker configuration
#[derive(Debug, Deserialize, Clone)]
pub struct DownstreamConfig {
    #[serde(default = "default_downstream_base_url")]
    pub base_url: String,

    pub connect_key: String,

    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
}

/// Relay loop timing
#[derive(Debug, Deserialize, Clone)]
pub struct RelayConfig {
    #[serde(default = "default_poll_interval_s")]
    pub poll_interval_s: u64,

    #[serde(default = "default_max_backoff_s")]
    pub max_backoff_s: u64,

    #[serde(default = "default_status_interval_s")]
    pub status_interval_s: u64,
}

/// Logging configuration
#[derive(Debug, Deserialize, Clone)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Log file path; empty disables file logging
    #[serde(default)]
    pub file: String,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            poll_interval_s: default_poll_interval_s(),
            max_backoff_s: default_max_backoff_s(),
            status_interval_s: default_status_interval_s(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            file: String::new(),
        }
    }
}

// Default value functions
fn default_upstream_base_url() -> String { DEFAULT_SKYDIO_BASE_URL.to_string() }
fn default_downstream_base_url() -> String { DEFAULT_CALTOPO_BASE_URL.to_string() }
fn default_timeout_ms() -> u64 { 5000 }

fn default_poll_interval_s() -> u64 { 10 }
fn default_max_backoff_s() -> u64 { 300 }
fn default_status_interval_s() -> u64 { 30 }

fn default_log_level() -> String { "info".to_string() }

fn invalid(msg: impl std::fmt::Display) -> RelayError {
    RelayError::Config(toml::de::Error::custom(msg))
}

impl Config {
    /// Load configuration from a TOML file
    ///
    /// Applies the `SKYDIO_API_TOKEN` override before validating.
    ///
    /// # Arguments
    ///
    /// * `path` - Path to the configuration file
    ///
    /// # Errors
    ///
    /// Returns error if:
    /// - File cannot be read
    /// - TOML parsing fails
    /// - Validation fails (including a missing API token)
    ///
    /// # Examples
    ///
    /// ```no_run
    /// use sar_relay::config::Config;
    ///
    /// let config = Config::load("config/default.toml")?;
    /// # Ok::<(), Box<dyn std::error::Error>>(())
    /// ```
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let contents = fs::read_to_string(path)?;
        let token = std::env::var(API_TOKEN_ENV).ok();
        Self::from_toml(&contents, token)
    }

    /// Parse and validate configuration text
    ///
    /// A non-empty `token_override` replaces `upstream.api_token`.
    pub fn from_toml(contents: &str, token_override: Option<String>) -> Result<Self> {
        let mut config: Config = toml::from_str(contents)?;
        if let Some(token) = token_override.filter(|t| !t.trim().is_empty()) {
            config.upstream.api_token = token;
        }
        config.validate()?;
        Ok(config)
    }

    /// Validate configuration values
    fn validate(&self) -> Result<()> {
        if self.upstream.base_url.is_empty() {
            return Err(invalid("upstream base_url cannot be empty"));
        }

        if self.upstream.api_token.trim().is_empty() {
            return Err(invalid(format!(
                "upstream api_token is required (set it in the config file or {})",
                API_TOKEN_ENV
            )));
        }

        if self.upstream.vehicle_serial.trim().is_empty() {
            return Err(invalid("upstream vehicle_serial cannot be empty"));
        }

        if self.downstream.base_url.is_empty() {
            return Err(invalid("downstream base_url cannot be empty"));
        }

        if self.downstream.connect_key.is_empty() {
            return Err(invalid("downstream connect_key cannot be empty"));
        }

        if self.relay.poll_interval_s < MIN_POLL_INTERVAL_S || self.relay.poll_interval_s > 3600 {
            return Err(invalid(format!(
                "poll_interval_s must be between {} and 3600",
                MIN_POLL_INTERVAL_S
            )));
        }

        if self.relay.max_backoff_s < self.relay.poll_interval_s {
            return Err(invalid("max_backoff_s must be at least poll_interval_s"));
        }

        if self.relay.status_interval_s == 0 {
            return Err(invalid("status_interval_s must be greater than 0"));
        }

        // Each request must finish before the next tick is due
        let poll_ms = self.relay.poll_interval_s * 1000;
        for (name, timeout_ms) in [
            ("upstream timeout_ms", self.upstream.timeout_ms),
            ("downstream timeout_ms", self.downstream.timeout_ms),
        ] {
            if timeout_ms == 0 || timeout_ms >= poll_ms {
                return Err(invalid(format!(
                    "{} must be between 1 and {} (below the poll interval)",
                    name,
                    poll_ms - 1
                )));
            }
        }

        if self.logging.level.trim().is_empty() {
            return Err(invalid("logging level cannot be empty"));
        }

        Ok(())
    }

    pub fn upstream_timeout(&self) -> Duration {
        Duration::from_millis(self.upstream.timeout_ms)
    }

    pub fn downstream_timeout(&self) -> Duration {
        Duration::from_millis(self.downstream.timeout_ms)
    }

    pub fn status_interval(&self) -> Duration {
        Duration::from_secs(self.relay.status_interval_s)
    }

    /// Relay loop timing derived from `[relay]`
    pub fn relay_settings(&self) -> RelaySettings {
        RelaySettings {
            poll_interval: Duration::from_secs(self.relay.poll_interval_s),
            max_backoff: Duration::from_secs(self.relay.max_backoff_s),
        }
    }
}
