//! Errors from storage operations.

use std::io;
use std::path::{Path, PathBuf};

use thiserror::Error;

/// Errors from blob, directory and provider operations.
///
/// Lease races are reported as `Io` (typically `NotFound` on the source name):
/// losing a race and hitting a disk hiccup mean the same thing to a caller.
#[derive(Error, Debug)]
pub enum StorageError {
    #[error("I/O error during {op} on {}: {source}", path.display())]
    Io {
        op: &'static str,
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("Blob not found: {}", .0.display())]
    NotFound(PathBuf),

    #[error(
        "Capacity exceeded: {used_bytes}/{max_bytes} bytes in {blob_count} blobs, \
         no evictable blob left for {incoming_bytes} incoming bytes"
    )]
    CapacityExceeded {
        used_bytes: u64,
        max_bytes: u64,
        blob_count: usize,
        incoming_bytes: u64,
    },

    #[error("Payload of {size} bytes exceeds the {max_bytes} byte ceiling")]
    PayloadTooLarge { size: u64, max_bytes: u64 },

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Invalid blob name: {0}")]
    InvalidBlobName(String),
}

impl StorageError {
    /// Wrap an I/O error with the operation and path it came from.
    pub fn io(op: &'static str, path: impl AsRef<Path>, source: io::Error) -> Self {
        StorageError::Io {
            op,
            path: path.as_ref().to_path_buf(),
            source,
        }
    }

    /// Whether this error means the blob is gone (deleted, evicted, or leased away).
    pub fn is_not_found(&self) -> bool {
        match self {
            StorageError::NotFound(_) => true,
            StorageError::Io { source, .. } => source.kind() == io::ErrorKind::NotFound,
            _ => false,
        }
    }

    /// Whether this error is a capacity refusal rather than an I/O failure.
    pub fn is_capacity(&self) -> bool {
        matches!(
            self,
            StorageError::CapacityExceeded { .. } | StorageError::PayloadTooLarge { .. }
        )
    }
}
