//! Blob provider facade.
//!
//! Producers call [`BlobProvider::create_blob`]. Consumers walk
//! [`BlobProvider::blobs`], lease a candidate, and only read and delete it if
//! the lease was won; losing a race means moving on to the next candidate.
//!
//! # Example
//!
//! ```no_run
//! use std::time::Duration;
//! use spool_storage::{BlobProvider, StorageConfig};
//!
//! let provider = BlobProvider::new(StorageConfig::new("/var/lib/spool"))?;
//! provider.create_blob(b"export batch", None)?;
//!
//! if let Some(blob) = provider.lease_next(Some(Duration::from_secs(30))) {
//!     if let Some(payload) = blob.try_read() {
//!         // deliver payload...
//!         # let _ = payload;
//!         blob.try_delete();
//!     }
//! }
//! # Ok::<(), spool_storage::StorageError>(())
//! ```

use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use tracing::{debug, warn};

use crate::blob::FileBlob;
use crate::config::StorageConfig;
use crate::directory::{BlobIter, MaintenanceReport, StorageDirectory, StorageStatus};
use crate::error::StorageError;
use crate::maintenance::MaintenanceHandle;

/// Facade over one storage directory.
///
/// Holds no blob state: every call goes back to the filesystem. The only
/// per-instance state is when this instance last ran a maintenance sweep.
#[derive(Debug)]
pub struct BlobProvider {
    directory: StorageDirectory,
    last_maintenance: Mutex<Option<Instant>>,
}

impl BlobProvider {
    /// Validate `config`, create the root, and build a provider.
    pub fn new(config: StorageConfig) -> Result<Self, StorageError> {
        Ok(BlobProvider {
            directory: StorageDirectory::open(config)?,
            last_maintenance: Mutex::new(None),
        })
    }

    pub fn directory(&self) -> &StorageDirectory {
        &self.directory
    }

    pub fn config(&self) -> &StorageConfig {
        self.directory.config()
    }

    /// Persist `payload` as a new blob, evicting old unleased blobs if needed.
    ///
    /// With `lease`, the blob is published already leased to the caller.
    /// Fails with `CapacityExceeded` when everything left is under lease.
    pub fn create_blob(
        &self,
        payload: &[u8],
        lease: Option<Duration>,
    ) -> Result<FileBlob, StorageError> {
        self.maintain_if_due();

        let size = payload.len() as u64;
        let max_bytes = self.config().max_size_bytes;
        if size > max_bytes {
            return Err(StorageError::PayloadTooLarge { size, max_bytes });
        }

        let capacity = self.directory.maintain_capacity(Some(size))?;
        if !capacity.satisfied {
            return Err(StorageError::CapacityExceeded {
                used_bytes: capacity.after.total_bytes,
                max_bytes,
                blob_count: capacity.after.blob_count,
                incoming_bytes: size,
            });
        }

        let mut blob = self.directory.allocate_blob();
        blob.write(payload, lease)?;
        Ok(blob)
    }

    /// [`create_blob`](Self::create_blob) that logs failures. A lease of 0 means unleased.
    pub fn try_create_blob(&self, payload: &[u8], lease_ms: u64) -> Option<FileBlob> {
        let lease = (lease_ms > 0).then(|| Duration::from_millis(lease_ms));
        match self.create_blob(payload, lease) {
            Ok(blob) => Some(blob),
            Err(e) => {
                warn!(
                    "Could not create blob in {}: {}",
                    self.directory.root().display(),
                    e
                );
                None
            }
        }
    }

    /// Claimable blobs, oldest first.
    pub fn blobs(&self) -> Result<BlobIter, StorageError> {
        self.directory.enumerate()
    }

    /// [`blobs`](Self::blobs) that logs a failed listing and yields nothing.
    pub fn enumerate_blobs(&self) -> impl Iterator<Item = FileBlob> {
        let listing = match self.directory.enumerate() {
            Ok(iter) => Some(iter),
            Err(e) => {
                warn!(
                    "Could not enumerate {}: {}",
                    self.directory.root().display(),
                    e
                );
                None
            }
        };
        listing.into_iter().flatten()
    }

    /// Oldest claimable blob, unleased.
    pub fn get_blob(&self) -> Option<FileBlob> {
        self.enumerate_blobs().next()
    }

    /// Walk the claimable blobs and return the first one whose lease this
    /// caller wins. `None` uses the configured default lease.
    pub fn lease_next(&self, period: Option<Duration>) -> Option<FileBlob> {
        let period = period.unwrap_or_else(|| self.config().default_lease());
        for mut blob in self.enumerate_blobs() {
            if blob.try_lease(period) {
                return Some(blob);
            }
            debug!("Lost lease race on {}, trying next", blob.path().display());
        }
        None
    }

    /// Run a full maintenance sweep now.
    pub fn maintain(&self) -> Result<MaintenanceReport, StorageError> {
        self.mark_maintained();
        self.directory.maintain()
    }

    /// Run a sweep if this instance hasn't run one within the maintenance period.
    pub fn maintain_if_due(&self) -> Option<MaintenanceReport> {
        if !self.claim_due_sweep() {
            return None;
        }
        match self.directory.maintain() {
            Ok(report) => Some(report),
            Err(e) => {
                warn!(
                    "Maintenance of {} failed: {}",
                    self.directory.root().display(),
                    e
                );
                None
            }
        }
    }

    pub fn status(&self) -> Result<StorageStatus, StorageError> {
        self.directory.status()
    }

    /// Sweep on a background thread every maintenance period.
    pub fn spawn_maintenance(self: &Arc<Self>) -> Result<MaintenanceHandle, StorageError> {
        MaintenanceHandle::spawn(Arc::clone(self), self.config().maintenance_period())
    }

    fn mark_maintained(&self) {
        let mut last = self
            .last_maintenance
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        *last = Some(Instant::now());
    }

    /// Check-and-set under the lock so concurrent creators sweep once.
    fn claim_due_sweep(&self) -> bool {
        let period = self.config().maintenance_period();
        let mut last = self
            .last_maintenance
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        let due = last.map_or(true, |at| at.elapsed() >= period);
        if due {
            *last = Some(Instant::now());
        }
        due
    }
}
