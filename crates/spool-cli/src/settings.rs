//! Storage configuration resolution for the CLI.
//!
//! Resolution order: built-in defaults → config file → CLI flags / environment.
//! The config file is TOML with the same field names as `StorageConfig`.

use std::path::{Path, PathBuf};

use spool_storage::StorageConfig;
use thiserror::Error;
use tracing::debug;

/// Environment variable naming the config file.
pub const ENV_CONFIG: &str = "SPOOL_CONFIG";

/// Environment variable naming the storage directory.
pub const ENV_DIR: &str = "SPOOL_DIR";

#[derive(Debug, Error)]
pub enum SettingsError {
    #[error("failed to read config {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
}

/// Values given on the command line (or through their environment variables).
#[derive(Debug, Clone, Default)]
pub struct Overrides {
    pub directory: Option<PathBuf>,
    pub max_size_bytes: Option<u64>,
    pub max_blobs: Option<usize>,
    pub event_log_dir: Option<PathBuf>,
}

/// Where the effective settings came from.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum ConfigSource {
    ConfigFile(PathBuf),
    #[default]
    BuiltinDefault,
}

impl std::fmt::Display for ConfigSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigSource::ConfigFile(path) => write!(f, "config file {}", path.display()),
            ConfigSource::BuiltinDefault => write!(f, "builtin default"),
        }
    }
}

/// Load the config file, if any, and apply overrides on top.
///
/// Validation is left to `StorageDirectory::open`.
pub fn resolve(
    config_path: Option<&Path>,
    overrides: &Overrides,
) -> Result<(StorageConfig, ConfigSource), SettingsError> {
    let (mut config, source) = match config_path {
        Some(path) => (load_file(path)?, ConfigSource::ConfigFile(path.to_path_buf())),
        None => (StorageConfig::default(), ConfigSource::BuiltinDefault),
    };

    if let Some(directory) = &overrides.directory {
        config.directory = directory.clone();
    }
    if let Some(max_size_bytes) = overrides.max_size_bytes {
        config.max_size_bytes = max_size_bytes;
    }
    if let Some(max_blobs) = overrides.max_blobs {
        config.max_blobs = Some(max_blobs);
    }
    if let Some(event_log_dir) = &overrides.event_log_dir {
        config.event_log_dir = Some(event_log_dir.clone());
    }

    debug!(
        "Storage settings from {}: dir={} max_size_bytes={} max_blobs={:?}",
        source,
        config.directory.display(),
        config.max_size_bytes,
        config.max_blobs
    );
    Ok((config, source))
}

fn load_file(path: &Path) -> Result<StorageConfig, SettingsError> {
    let content = std::fs::read_to_string(path).map_err(|source| SettingsError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    toml::from_str(&content).map_err(|source| SettingsError::Parse {
        path: path.to_path_buf(),
        source,
    })
}
