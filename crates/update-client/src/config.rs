//! Configuration structures for the update client.
//!
//! Defines the per-session update behavior (differential updates, update
//! duration clamp, scratch and cache locations) and network settings for
//! the payload downloader.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::UpdateError;

/// Main update configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpdateConfig {
    /// Whether differential updates (and cache reuse for full installs)
    /// are enabled
    #[serde(default = "default_true")]
    pub enabled_deltas: bool,

    /// Upper bound reported by a component's update duration, in seconds
    #[serde(default = "default_max_update_delay")]
    pub max_update_delay_secs: u64,

    /// Scratch directory for downloads, patch output, and unpacking
    /// (empty = default location)
    #[serde(default)]
    pub work_dir: Option<PathBuf>,

    /// Root of the payload cache (empty = `<work_dir>/crx_cache`)
    #[serde(default)]
    pub cache_dir: Option<PathBuf>,

    /// Network configuration
    #[serde(default)]
    pub network: NetworkConfig,
}

impl Default for UpdateConfig {
    fn default() -> Self {
        Self {
            enabled_deltas: true,
            max_update_delay_secs: default_max_update_delay(),
            work_dir: None,
            cache_dir: None,
            network: NetworkConfig::default(),
        }
    }
}

impl UpdateConfig {
    /// Load configuration from a TOML file.
    pub fn load_from_file(path: &Path) -> Result<Self, UpdateError> {
        let content = std::fs::read_to_string(path)?;
        let config: Self =
            toml::from_str(&content).map_err(|e| UpdateError::ConfigError(e.to_string()))?;
        Ok(config)
    }

    /// Save configuration to a TOML file.
    pub fn save_to_file(&self, path: &Path) -> Result<(), UpdateError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content =
            toml::to_string_pretty(self).map_err(|e| UpdateError::ConfigError(e.to_string()))?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Maximum update duration as a `Duration`.
    pub fn max_update_delay(&self) -> Duration {
        Duration::from_secs(self.max_update_delay_secs)
    }

    /// Get the scratch directory, using the default if not specified.
    pub fn work_dir(&self) -> PathBuf {
        match &self.work_dir {
            Some(dir) => dir.clone(),
            None => std::env::temp_dir().join("update-client"),
        }
    }

    /// Get the cache directory, using the default if not specified.
    pub fn cache_dir(&self) -> PathBuf {
        match &self.cache_dir {
            Some(dir) => dir.clone(),
            None => self.work_dir().join("crx_cache"),
        }
    }
}

/// Network configuration for payload downloads.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NetworkConfig {
    /// Connection timeout in seconds
    #[serde(default = "default_timeout")]
    pub timeout_seconds: u64,

    /// Read timeout for streaming bodies in seconds
    #[serde(default = "default_read_timeout")]
    pub read_timeout_seconds: u64,

    /// User agent sent with every request
    #[serde(default = "default_user_agent")]
    pub user_agent: String,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            timeout_seconds: default_timeout(),
            read_timeout_seconds: default_read_timeout(),
            user_agent: default_user_agent(),
        }
    }
}

// Default value functions for serde
fn default_true() -> bool {
    true
}

fn default_max_update_delay() -> u64 {
    5 * 60 * 60 // 5 hours
}

fn default_timeout() -> u64 {
    30
}

fn default_read_timeout() -> u64 {
    60
}

fn default_user_agent() -> String {
    format!("update-client/{}", env!("CARGO_PKG_VERSION"))
}
