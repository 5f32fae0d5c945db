//! Configuration validation with range checks.

use crate::error::ConfigError;

use super::{Config, CoordinatorMode};

impl Config {
    /// Validate configuration values are within acceptable ranges.
    pub(crate) fn validate(&self) -> Result<(), ConfigError> {
        if self.coordinator.command_buffer == 0 {
            return Err(ConfigError::ValidationError(
                "coordinator.command_buffer must be > 0".into(),
            ));
        }
        if self.coordinator.mode == CoordinatorMode::Remote && self.coordinator.address.is_none()
        {
            return Err(ConfigError::ValidationError(
                "coordinator.address is required in remote mode".into(),
            ));
        }
        if self.coordinator.lease_timeout_ms > 0 && self.coordinator.sweep_interval_ms == 0 {
            return Err(ConfigError::ValidationError(
                "coordinator.sweep_interval_ms must be > 0 when leases are enabled".into(),
            ));
        }
        if self.limits.max_file_size_mb == 0 {
            return Err(ConfigError::ValidationError(
                "limits.max_file_size_mb must be > 0".into(),
            ));
        }
        if self.limits.max_image_dimension == 0 {
            return Err(ConfigError::ValidationError(
                "limits.max_image_dimension must be > 0".into(),
            ));
        }
        if self.limits.decode_timeout_ms == 0 {
            return Err(ConfigError::ValidationError(
                "limits.decode_timeout_ms must be > 0".into(),
            ));
        }
        if self.limits.transform_timeout_ms == 0 {
            return Err(ConfigError::ValidationError(
                "limits.transform_timeout_ms must be > 0".into(),
            ));
        }
        if self.limits.fetch_timeout_ms == 0 {
            return Err(ConfigError::ValidationError(
                "limits.fetch_timeout_ms must be > 0".into(),
            ));
        }
        if !(1..=100).contains(&self.output.jpeg_quality) {
            return Err(ConfigError::ValidationError(
                "output.jpeg_quality must be between 1 and 100".into(),
            ));
        }
        if !self.server.base_route.starts_with('/') || !self.server.base_route.ends_with('/') {
            return Err(ConfigError::ValidationError(
                "server.base_route must start and end with '/'".into(),
            ));
        }
        Ok(())
    }
}
