//! Configuration loading and management
//!
//! Configuration is loaded from `~/.config/emissary/config.toml` and passed
//! explicitly into each component; there is no process-wide singleton.
//!
//! This module follows the XDG Base Directory Specification:
//! - Config: `$XDG_CONFIG_HOME/emissary/` (~/.config/emissary/)
//! - Data: `$XDG_DATA_HOME/emissary/` (~/.local/share/emissary/)
//! - State/Logs: `$XDG_STATE_HOME/emissary/` (~/.local/state/emissary/)

use crate::error::{Error, Result};
use serde::Deserialize;
use std::path::PathBuf;

/// Returns a best-effort home directory path.
fn home_dir() -> PathBuf {
    std::env::var_os("HOME")
        .map(PathBuf::from)
        .or_else(dirs::home_dir)
        .unwrap_or_else(|| PathBuf::from("."))
}

/// Returns XDG_CONFIG_HOME or ~/.config
fn xdg_config_home() -> PathBuf {
    std::env::var("XDG_CONFIG_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| home_dir().join(".config"))
}

/// Returns XDG_DATA_HOME or ~/.local/share
fn xdg_data_home() -> PathBuf {
    std::env::var("XDG_DATA_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| home_dir().join(".local/share"))
}

/// Returns XDG_STATE_HOME or ~/.local/state
fn xdg_state_home() -> PathBuf {
    std::env::var("XDG_STATE_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| home_dir().join(".local/state"))
}

/// Main configuration struct
#[derive(Debug, Deserialize, Default, Clone)]
pub struct Config {
    /// Project identity and host-app metadata
    #[serde(default)]
    pub tracker: TrackerConfig,

    /// Delivery endpoint and batching
    #[serde(default)]
    pub delivery: DeliveryConfig,

    /// Session lifecycle configuration
    #[serde(default)]
    pub session: SessionConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Project identity configuration
#[derive(Debug, Deserialize, Clone)]
pub struct TrackerConfig {
    /// Project token stamped into every built payload
    #[serde(default)]
    pub project_token: String,

    /// Host application version, attached to session events when set
    pub app_version: Option<String>,
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self {
            project_token: String::new(),
            app_version: None,
        }
    }
}

/// Delivery endpoint configuration
#[derive(Debug, Deserialize, Clone)]
pub struct DeliveryConfig {
    /// Base URL of the collection endpoint
    #[serde(default = "default_target")]
    pub target: String,

    /// Commands per delivery attempt (max 49)
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,

    /// Seconds between automatic flushes
    #[serde(default = "default_flush_interval")]
    pub flush_interval_secs: u64,

    /// HTTP request timeout in seconds
    #[serde(default = "default_timeout")]
    pub timeout_secs: u64,
}

impl Default for DeliveryConfig {
    fn default() -> Self {
        Self {
            target: default_target(),
            batch_size: default_batch_size(),
            flush_interval_secs: default_flush_interval(),
            timeout_secs: default_timeout(),
        }
    }
}

impl DeliveryConfig {
    /// Validate configuration, returning error message if invalid
    pub fn validate(&self) -> Result<()> {
        if self.target.is_empty() {
            return Err(Error::Config("delivery.target must not be empty".to_string()));
        }
        if self.batch_size == 0 || self.batch_size > 49 {
            return Err(Error::Config(
                "delivery.batch_size must be between 1 and 49".to_string(),
            ));
        }
        if self.flush_interval_secs == 0 {
            return Err(Error::Config(
                "delivery.flush_interval_secs must be at least 1".to_string(),
            ));
        }
        Ok(())
    }

    /// The bulk delivery URL derived from the target
    pub fn bulk_url(&self) -> String {
        format!("{}/bulk", self.target.trim_end_matches('/'))
    }
}

fn default_target() -> String {
    "https://api.emissary.io".to_string()
}

fn default_batch_size() -> usize {
    49
}

fn default_flush_interval() -> u64 {
    10
}

fn default_timeout() -> u64 {
    10
}

/// Session lifecycle configuration
#[derive(Debug, Deserialize, Clone)]
pub struct SessionConfig {
    /// Seconds of background inactivity after which a session expires
    #[serde(default = "default_session_timeout")]
    pub timeout_secs: f64,

    /// Seconds between keep-alive/re-validation ticks
    #[serde(default = "default_heartbeat")]
    pub heartbeat_secs: u64,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            timeout_secs: default_session_timeout(),
            heartbeat_secs: default_heartbeat(),
        }
    }
}

fn default_session_timeout() -> f64 {
    60.0
}

fn default_heartbeat() -> u64 {
    10
}

/// Logging configuration
#[derive(Debug, Deserialize, Clone)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Config {
    /// Load configuration from the default path
    pub fn load() -> Result<Self> {
        let config_path = Self::config_path();

        if !config_path.exists() {
            tracing::info!("No config file found at {:?}, using defaults", config_path);
            return Ok(Config::default());
        }

        Self::load_from(&config_path)
    }

    /// Load configuration from a specific path
    pub fn load_from(path: &PathBuf) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| Error::Config(format!("failed to read config file {:?}: {}", path, e)))?;

        let config: Config = toml::from_str(&content)
            .map_err(|e| Error::Config(format!("failed to parse config: {}", e)))?;

        config.delivery.validate()?;
        Ok(config)
    }

    /// Returns the default config file path
    ///
    /// `$XDG_CONFIG_HOME/emissary/config.toml` (~/.config/emissary/config.toml)
    pub fn config_path() -> PathBuf {
        xdg_config_home().join("emissary").join("config.toml")
    }

    /// Returns the data directory path (for the SQLite store)
    ///
    /// `$XDG_DATA_HOME/emissary/` (~/.local/share/emissary/)
    pub fn data_dir() -> PathBuf {
        xdg_data_home().join("emissary")
    }

    /// Returns the state directory path (for logs)
    ///
    /// `$XDG_STATE_HOME/emissary/` (~/.local/state/emissary/)
    pub fn state_dir() -> PathBuf {
        xdg_state_home().join("emissary")
    }

    /// Returns the command store file path
    ///
    /// `$XDG_DATA_HOME/emissary/commands.db` (~/.local/share/emissary/commands.db)
    pub fn database_path() -> PathBuf {
        Self::data_dir().join("commands.db")
    }

    /// Returns the log file path
    ///
    /// `$XDG_STATE_HOME/emissary/emissary.log` (~/.local/state/emissary/emissary.log)
    pub fn log_path() -> PathBuf {
        Self::state_dir().join("emissary.log")
    }
}
