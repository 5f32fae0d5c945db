//! Configuration management for imgsrv.
//!
//! Configuration is loaded from the platform config directory with sensible
//! defaults. The loaded [`Config`] is passed explicitly to [`crate::ImgSrv`];
//! there is no process-wide configuration singleton.

mod types;
mod validate;

pub use types::*;

use crate::error::ConfigError;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Root configuration structure for imgsrv.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Source and artifact directories
    pub storage: StorageConfig,

    /// HTTP server settings
    pub server: ServerConfig,

    /// Reservation coordinator settings
    pub coordinator: CoordinatorConfig,

    /// Resource limits
    pub limits: LimitsConfig,

    /// Artifact encoder settings
    pub output: OutputConfig,

    /// Logging settings
    pub logging: LoggingConfig,
}

impl Config {
    /// Load configuration from the default location.
    ///
    /// Returns default configuration if the file doesn't exist.
    pub fn load() -> Result<Self, ConfigError> {
        let path = Self::default_path();
        if path.exists() {
            Self::load_from(&path)
        } else {
            Ok(Self::default())
        }
    }

    /// Load configuration from a specific file path.
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// Get the default config file path.
    ///
    /// Uses platform-appropriate directories:
    /// - macOS: ~/Library/Application Support/com.imgsrv.imgsrv/config.toml
    /// - Linux: ~/.config/imgsrv/config.toml
    /// - Windows: C:\Users\<User>\AppData\Roaming\imgsrv\config\config.toml
    ///
    /// Falls back to ~/.imgsrv/config.toml if directory detection fails.
    pub fn default_path() -> PathBuf {
        directories::ProjectDirs::from("com", "imgsrv", "imgsrv")
            .map(|dirs| dirs.config_dir().to_path_buf().join("config.toml"))
            .unwrap_or_else(|| {
                let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
                PathBuf::from(home).join(".imgsrv").join("config.toml")
            })
    }

    /// Resolved source directory (with ~ expansion).
    pub fn upload_dir(&self) -> PathBuf {
        expand(&self.storage.upload_dir)
    }

    /// Resolved derivative cache directory (with ~ expansion).
    pub fn cache_dir(&self) -> PathBuf {
        expand(&self.storage.cache_dir)
    }

    /// Lease duration, or `None` when leases are disabled.
    pub fn lease_timeout(&self) -> Option<Duration> {
        match self.coordinator.lease_timeout_ms {
            0 => None,
            ms => Some(Duration::from_millis(ms)),
        }
    }

    /// Serialize the config to a pretty TOML string.
    pub fn to_toml(&self) -> Result<String, ConfigError> {
        toml::to_string_pretty(self).map_err(|e| ConfigError::ValidationError(e.to_string()))
    }
}

fn expand(path: &Path) -> PathBuf {
    let path_str = path.to_string_lossy();
    let expanded = shellexpand::tilde(&path_str);
    PathBuf::from(expanded.into_owned())
}
