//! Spool durable blob storage.
//!
//! This crate provides:
//! - Crash-atomic blob writes (temp file, fsync, no-replace rename)
//! - Time-bounded leases encoded in the blob's file name
//! - A storage directory manager with retention and capacity eviction
//! - A provider facade for producers and consumers
//!
//! The directory listing is the only index. Every state transition is a single
//! create, rename or delete, so independent processes can share one root
//! without any coordinator.

pub mod blob;
pub mod config;
pub mod directory;
pub mod error;
pub mod fs_ops;
pub mod maintenance;
pub mod naming;
pub mod provider;

pub use blob::FileBlob;
pub use config::StorageConfig;
pub use directory::{
    BlobEntry, BlobIter, CapacityReport, EntryState, EntrySummary, MaintenanceEvent,
    MaintenanceReason, MaintenanceReport, StorageDirectory, StorageStatus, Usage,
};
pub use error::StorageError;
pub use maintenance::MaintenanceHandle;
pub use naming::{BlobName, BlobState};
pub use provider::BlobProvider;

/// Default byte ceiling (50 MiB).
pub const DEFAULT_MAX_SIZE_BYTES: u64 = 50 * 1024 * 1024;

/// Default lease period in milliseconds.
pub const DEFAULT_LEASE_MS: u64 = 30_000;

/// Default interval between maintenance sweeps in milliseconds.
pub const DEFAULT_MAINTENANCE_PERIOD_MS: u64 = 120_000;

/// Default retention period in milliseconds (2 days).
pub const DEFAULT_RETENTION_PERIOD_MS: u64 = 2 * 24 * 3600 * 1000;

/// Default time after which an unpublished temp file is considered abandoned.
pub const DEFAULT_WRITE_TIMEOUT_MS: u64 = 60_000;
