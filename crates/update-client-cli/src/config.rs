//! Configuration management for the update-client CLI
//!
//! Wraps the library's [`UpdateConfig`] with the settings only the command
//! line driver needs: log level, where installed versions and persisted
//! version data live. Configuration is stored in TOML format.
//!
//! # Configuration File Locations
//!
//! - Unix: `~/.config/update-client/cli.toml`
//! - Windows: `%APPDATA%\update-client\cli.toml`

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use update_client::UpdateConfig;

/// Configuration errors
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Failed to read config file
    #[error("Failed to read config file: {0}")]
    ReadError(#[from] std::io::Error),

    /// Failed to parse config file
    #[error("Failed to parse config file: {0}")]
    ParseError(#[from] toml::de::Error),

    /// Failed to serialize config
    #[error("Failed to serialize config: {0}")]
    SerializeError(#[from] toml::ser::Error),

    /// Invalid configuration value
    #[error("Invalid configuration: {0}")]
    ValidationError(String),
}

/// CLI configuration
///
/// # Example TOML
///
/// ```toml
/// persisted_data_path = "/var/lib/update-client/versions.json"
/// install_root = "/var/lib/update-client/installed"
///
/// [update]
/// enabled_deltas = true
/// max_update_delay_secs = 18000
///
/// [update.network]
/// timeout_seconds = 30
///
/// [logging]
/// level = "warn"
/// ```
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct CliConfig {
    /// Update behavior handed to every session
    #[serde(default)]
    pub update: UpdateConfig,

    /// Logging settings
    #[serde(default)]
    pub logging: LoggingConfig,

    /// Persisted version store (empty = `<data dir>/versions.json`)
    #[serde(default)]
    pub persisted_data_path: Option<PathBuf>,

    /// Root of installed component versions (empty = `<data dir>/installed`)
    #[serde(default)]
    pub install_root: Option<PathBuf>,
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level: "error", "warn", "info", "debug", "trace"
    #[serde(default = "default_log_level")]
    pub level: String,
}

fn default_log_level() -> String {
    "warn".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

impl CliConfig {
    /// Load configuration from file
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        let config: CliConfig = toml::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from default location
    pub fn load_default() -> Result<Self, ConfigError> {
        if let Some(path) = Self::default_path() {
            if path.exists() {
                return Self::load(&path);
            }
        }
        Ok(Self::default())
    }

    /// Load configuration from custom path or default
    pub fn load_from(custom_path: Option<&Path>) -> Result<Self, ConfigError> {
        match custom_path {
            Some(path) => Self::load(path),
            None => Self::load_default(),
        }
    }

    /// Get default configuration file path
    pub fn default_path() -> Option<PathBuf> {
        directories::ProjectDirs::from("org", "update-client", "update-client")
            .map(|dirs| dirs.config_dir().join("cli.toml"))
    }

    /// Get the data directory path
    pub fn data_dir() -> Option<PathBuf> {
        directories::ProjectDirs::from("org", "update-client", "update-client")
            .map(|dirs| dirs.data_dir().to_path_buf())
    }

    /// Save configuration to file
    pub fn save(&self, path: &Path) -> Result<(), ConfigError> {
        let content = toml::to_string_pretty(self)?;
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<(), ConfigError> {
        let valid_levels = ["error", "warn", "info", "debug", "trace"];
        if !valid_levels.contains(&self.logging.level.to_lowercase().as_str()) {
            return Err(ConfigError::ValidationError(format!(
                "Invalid log level '{}'. Must be one of: {}",
                self.logging.level,
                valid_levels.join(", ")
            )));
        }

        if self.update.network.timeout_seconds == 0 {
            return Err(ConfigError::ValidationError(
                "network timeout_seconds must be greater than 0".to_string(),
            ));
        }

        Ok(())
    }

    /// Resolved persisted version store path.
    pub fn persisted_data_path(&self) -> PathBuf {
        self.persisted_data_path
            .clone()
            .unwrap_or_else(|| self.fallback_dir().join("versions.json"))
    }

    /// Resolved install root.
    pub fn install_root(&self) -> PathBuf {
        self.install_root
            .clone()
            .unwrap_or_else(|| self.fallback_dir().join("installed"))
    }

    fn fallback_dir(&self) -> PathBuf {
        Self::data_dir().unwrap_or_else(|| self.update.work_dir())
    }
}
