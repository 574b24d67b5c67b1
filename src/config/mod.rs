//! Configuration management
//!
//! The exporter reads one TOML file with a section per remote system:
//! `[synology]` for the NAS being polled, `[graylog]` and `[influxdb]` for
//! the two sinks. Sinks are disabled unless their section enables them.

use crate::error::ConfigError;
use crate::sinks::gelf::{DEFAULT_CHUNK_SIZE, MIN_CHUNK_SIZE};
use serde::Deserialize;
use std::path::Path;
use std::time::Duration;

/// Application configuration
#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct Config {
    pub synology: SynologyConfig,
    #[serde(default)]
    pub graylog: GraylogConfig,
    #[serde(default)]
    pub influxdb: InfluxConfig,
}

/// NAS management API settings
#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct SynologyConfig {
    /// Base address including scheme, e.g. `https://nas.local:5001`
    pub address: String,
    pub username: String,
    #[serde(default)]
    pub password: String,
    /// Seconds between the end of one tick and the start of the next
    #[serde(default = "default_interval_seconds", alias = "update")]
    pub interval_seconds: u64,
    /// Number of log records requested per poll
    #[serde(default = "default_log_window")]
    pub log_window: usize,
    #[serde(default = "default_request_timeout_seconds")]
    pub request_timeout_seconds: u64,
    #[serde(default)]
    pub accept_invalid_certs: bool,
}

/// Graylog GELF UDP input settings
#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(default)]
pub struct GraylogConfig {
    pub enabled: bool,
    pub address: String,
    pub port: u16,
    /// Value of the GELF `host` field
    pub source: String,
    /// Largest UDP datagram payload; longer messages are chunked
    pub chunk_size: usize,
}

/// InfluxDB 1.x settings
#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(default)]
pub struct InfluxConfig {
    pub enabled: bool,
    pub address: String,
    pub port: u16,
    #[serde(alias = "username")]
    pub user: String,
    pub password: String,
    pub database: String,
}

fn default_interval_seconds() -> u64 {
    60
}

fn default_log_window() -> usize {
    crate::collectors::log_poller::DEFAULT_LOG_WINDOW
}

fn default_request_timeout_seconds() -> u64 {
    30
}

impl Default for GraylogConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            address: String::new(),
            port: 12201,
            source: "synology".to_string(),
            chunk_size: DEFAULT_CHUNK_SIZE,
        }
    }
}

impl Default for InfluxConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            address: String::new(),
            port: 8086,
            user: String::new(),
            password: String::new(),
            database: String::new(),
        }
    }
}

impl Config {
    /// Load and validate configuration from a TOML file
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::ReadError` if the file cannot be read,
    /// `ConfigError::TomlError` if it is not valid TOML for this schema and
    /// `ConfigError::ValidationError` if a value is out of range.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::ReadError(format!("{}: {}", path.display(), e)))?;
        Self::from_toml_str(&content)
    }

    /// Parse and validate configuration from TOML text
    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        let config: Config = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Check every value the exporter relies on
    pub fn validate(&self) -> Result<(), ConfigError> {
        let synology = &self.synology;

        if !(synology.address.starts_with("http://") || synology.address.starts_with("https://"))
        {
            return Err(ConfigError::ValidationError(format!(
                "synology.address must start with http:// or https://, got '{}'",
                synology.address
            )));
        }
        if synology.username.is_empty() {
            return Err(ConfigError::ValidationError(
                "synology.username must not be empty".to_string(),
            ));
        }
        if synology.interval_seconds == 0 {
            return Err(ConfigError::ValidationError(
                "synology.interval_seconds must be greater than 0".to_string(),
            ));
        }
        if synology.log_window == 0 {
            return Err(ConfigError::ValidationError(
                "synology.log_window must be greater than 0".to_string(),
            ));
        }
        if synology.request_timeout_seconds == 0 {
            return Err(ConfigError::ValidationError(
                "synology.request_timeout_seconds must be greater than 0".to_string(),
            ));
        }

        if self.graylog.enabled {
            check_endpoint("graylog", &self.graylog.address, self.graylog.port)?;
            if self.graylog.chunk_size < MIN_CHUNK_SIZE {
                return Err(ConfigError::ValidationError(format!(
                    "graylog.chunk_size must be at least {}",
                    MIN_CHUNK_SIZE
                )));
            }
        }

        if self.influxdb.enabled {
            check_endpoint("influxdb", &self.influxdb.address, self.influxdb.port)?;
            if self.influxdb.database.is_empty() {
                return Err(ConfigError::ValidationError(
                    "influxdb.database must not be empty".to_string(),
                ));
            }
        }

        Ok(())
    }

    /// Time to sleep between ticks
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.synology.interval_seconds)
    }

    /// Timeout applied to every outgoing HTTP request
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.synology.request_timeout_seconds)
    }
}

fn check_endpoint(section: &str, address: &str, port: u16) -> Result<(), ConfigError> {
    if address.is_empty() {
        return Err(ConfigError::ValidationError(format!(
            "{}.address must not be empty when the sink is enabled",
            section
        )));
    }
    if port == 0 {
        return Err(ConfigError::ValidationError(format!(
            "{}.port must not be 0",
            section
        )));
    }
    Ok(())
}
