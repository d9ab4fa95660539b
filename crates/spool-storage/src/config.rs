//! Storage configuration.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::StorageError;

/// Configuration for one storage directory.
///
/// Every field has a default so a partial TOML table deserializes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Root directory holding the blobs.
    pub directory: PathBuf,

    /// Byte ceiling for everything in the directory.
    pub max_size_bytes: u64,

    /// Optional ceiling on the number of blobs.
    pub max_blobs: Option<usize>,

    /// Lease applied by consumers that don't ask for a specific one.
    pub default_lease_ms: u64,

    /// Interval between full maintenance sweeps.
    pub maintenance_period_ms: u64,

    /// Blobs older than this are expired by maintenance and skipped by enumeration.
    pub retention_period_ms: u64,

    /// Temp files older than this are treated as abandoned writes.
    pub write_timeout_ms: u64,

    /// Directory for JSONL maintenance event logs. None disables persistence.
    pub event_log_dir: Option<PathBuf>,
}

impl Default for StorageConfig {
    fn default() -> Self {
        StorageConfig {
            directory: default_storage_dir(),
            max_size_bytes: crate::DEFAULT_MAX_SIZE_BYTES,
            max_blobs: None,
            default_lease_ms: crate::DEFAULT_LEASE_MS,
            maintenance_period_ms: crate::DEFAULT_MAINTENANCE_PERIOD_MS,
            retention_period_ms: crate::DEFAULT_RETENTION_PERIOD_MS,
            write_timeout_ms: crate::DEFAULT_WRITE_TIMEOUT_MS,
            event_log_dir: None,
        }
    }
}

impl StorageConfig {
    /// Create config with defaults rooted at `directory`.
    pub fn new(directory: impl Into<PathBuf>) -> Self {
        StorageConfig {
            directory: directory.into(),
            ..Default::default()
        }
    }

    /// Set the byte ceiling.
    pub fn with_max_size_bytes(mut self, bytes: u64) -> Self {
        self.max_size_bytes = bytes;
        self
    }

    /// Set an entry-count ceiling.
    pub fn with_max_blobs(mut self, count: usize) -> Self {
        self.max_blobs = Some(count);
        self
    }

    /// Set the default lease period.
    pub fn with_default_lease(mut self, lease: Duration) -> Self {
        self.default_lease_ms = lease.as_millis() as u64;
        self
    }

    /// Set the maintenance period.
    pub fn with_maintenance_period(mut self, period: Duration) -> Self {
        self.maintenance_period_ms = period.as_millis() as u64;
        self
    }

    /// Set the retention period.
    pub fn with_retention_period(mut self, period: Duration) -> Self {
        self.retention_period_ms = period.as_millis() as u64;
        self
    }

    /// Set the abandoned-write timeout.
    pub fn with_write_timeout(mut self, timeout: Duration) -> Self {
        self.write_timeout_ms = timeout.as_millis() as u64;
        self
    }

    /// Persist maintenance events as JSONL under `dir`.
    pub fn with_event_log_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.event_log_dir = Some(dir.into());
        self
    }

    pub fn directory(&self) -> &Path {
        &self.directory
    }

    pub fn default_lease(&self) -> Duration {
        Duration::from_millis(self.default_lease_ms)
    }

    pub fn maintenance_period(&self) -> Duration {
        Duration::from_millis(self.maintenance_period_ms)
    }

    pub fn retention_period(&self) -> Duration {
        Duration::from_millis(self.retention_period_ms)
    }

    pub fn write_timeout(&self) -> Duration {
        Duration::from_millis(self.write_timeout_ms)
    }

    /// Validate configuration.
    pub fn validate(&self) -> Result<(), StorageError> {
        if self.directory.as_os_str().is_empty() {
            return Err(StorageError::InvalidConfig(
                "directory must not be empty".to_string(),
            ));
        }
        if self.max_size_bytes == 0 {
            return Err(StorageError::InvalidConfig(
                "max_size_bytes must be greater than 0".to_string(),
            ));
        }
        if self.max_blobs == Some(0) {
            return Err(StorageError::InvalidConfig(
                "max_blobs must be greater than 0 when set".to_string(),
            ));
        }

        for (name, value) in [
            ("default_lease_ms", self.default_lease_ms),
            ("maintenance_period_ms", self.maintenance_period_ms),
            ("retention_period_ms", self.retention_period_ms),
            ("write_timeout_ms", self.write_timeout_ms),
        ] {
            if value == 0 {
                return Err(StorageError::InvalidConfig(format!(
                    "{} must be greater than 0",
                    name
                )));
            }
        }

        if self.retention_period_ms < self.write_timeout_ms {
            return Err(StorageError::InvalidConfig(format!(
                "retention_period_ms ({}) must not be shorter than write_timeout_ms ({})",
                self.retention_period_ms, self.write_timeout_ms
            )));
        }

        Ok(())
    }
}

/// Get the default storage directory under the XDG data dir.
pub fn default_storage_dir() -> PathBuf {
    dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("spool")
        .join("blobs")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_defaults() {
        let config = StorageConfig::default();
        assert_eq!(config.max_size_bytes, 50 * 1024 * 1024);
        assert_eq!(config.max_blobs, None);
        assert_eq!(config.maintenance_period(), Duration::from_secs(120));
        assert_eq!(config.retention_period(), Duration::from_secs(2 * 24 * 3600));
        assert_eq!(config.write_timeout(), Duration::from_secs(60));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_default_storage_dir() {
        let dir = default_storage_dir();
        assert!(dir.to_string_lossy().contains("spool"));
        assert!(dir.ends_with("blobs"));
    }

    #[test]
    fn test_builder_overrides() {
        let config = StorageConfig::new("/tmp/spool")
            .with_max_size_bytes(1024)
            .with_max_blobs(2)
            .with_default_lease(Duration::from_millis(250))
            .with_retention_period(Duration::from_secs(3600));

        assert_eq!(config.directory(), Path::new("/tmp/spool"));
        assert_eq!(config.max_size_bytes, 1024);
        assert_eq!(config.max_blobs, Some(2));
        assert_eq!(config.default_lease(), Duration::from_millis(250));
        assert_eq!(config.retention_period_ms, 3_600_000);
    }

    #[test]
    fn test_validation_rejects_zero_ceilings() {
        let config = StorageConfig::new("/tmp/spool").with_max_size_bytes(0);
        assert!(matches!(
            config.validate(),
            Err(StorageError::InvalidConfig(_))
        ));

        let config = StorageConfig::new("/tmp/spool").with_max_blobs(0);
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validation_rejects_zero_periods() {
        let config = StorageConfig::new("/tmp/spool").with_maintenance_period(Duration::ZERO);
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("maintenance_period_ms"));
    }

    #[test]
    fn test_validation_rejects_retention_shorter_than_write_timeout() {
        let config = StorageConfig::new("/tmp/spool")
            .with_write_timeout(Duration::from_secs(60))
            .with_retention_period(Duration::from_secs(30));
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_partial_config_deserializes() {
        let config: StorageConfig =
            serde_json::from_str(r#"{"directory": "/var/spool", "max_blobs": 10}"#).unwrap();
        assert_eq!(config.directory, PathBuf::from("/var/spool"));
        assert_eq!(config.max_blobs, Some(10));
        assert_eq!(config.max_size_bytes, crate::DEFAULT_MAX_SIZE_BYTES);
    }
}
