//! A single blob on disk.
//!
//! A [`FileBlob`] is a path, nothing more. Every operation re-reads the
//! filesystem, so handles held by different threads or processes never go
//! stale in a dangerous way: the worst outcome is a clean `NotFound`.
//!
//! Each operation comes in two forms. The `Result` form (`write`, `read`,
//! `lease`, `release`, `delete`) reports why it failed. The `try_*` form logs
//! the failure with its path and returns a plain success indicator, for
//! callers that only need to know whether to move on to the next blob.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::{DateTime, Utc};
use tracing::{debug, warn};

use crate::error::StorageError;
use crate::fs_ops;
use crate::naming::{lease_expiry_after, BlobName, BlobState};

/// Handle to a blob identified by its current path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileBlob {
    path: PathBuf,
}

impl FileBlob {
    /// Handle to whatever blob currently lives at `path`.
    pub fn open(path: impl Into<PathBuf>) -> Self {
        FileBlob { path: path.into() }
    }

    /// Handle to a fresh, not yet written blob in `dir`.
    pub fn allocate(dir: &Path) -> Self {
        Self::open(dir.join(BlobName::generate().file_name()))
    }

    /// Current path. Changes when the blob is leased, renewed or released.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Parsed file name, or None for a path that is not a blob name.
    pub fn name(&self) -> Option<BlobName> {
        let file_name = self.path.file_name()?.to_str()?;
        BlobName::parse(file_name).ok()
    }

    /// Lease expiry encoded in the current path.
    pub fn lease_expiry(&self) -> Option<DateTime<Utc>> {
        self.name().and_then(|name| name.lease_expiry())
    }

    /// Persist `payload` under this blob's name.
    ///
    /// The bytes go to `<name>.tmp` (exclusive create + fsync) and are then
    /// renamed into place, so the final name never holds a partial payload.
    /// With a lease the blob is published directly in leased form.
    pub fn write(&mut self, payload: &[u8], lease: Option<Duration>) -> Result<(), StorageError> {
        let name = self.require_name()?;
        let dir = self.dir();

        let temp_path = dir.join(name.temp().file_name());
        fs_ops::write_new_synced(&temp_path, payload)
            .map_err(|e| StorageError::io("write", &temp_path, e))?;

        let final_name = match lease.filter(|period| !period.is_zero()) {
            Some(period) => name.leased_until(lease_expiry_after(Utc::now(), period)),
            None => name.committed(),
        };
        let final_path = dir.join(final_name.file_name());

        if let Err(e) = fs_ops::atomic_rename(&temp_path, &final_path) {
            if let Err(cleanup) = fs_ops::remove_if_exists(&temp_path) {
                debug!(
                    "Could not remove temp file {}: {}",
                    temp_path.display(),
                    cleanup
                );
            }
            return Err(StorageError::io("publish", &final_path, e));
        }
        fs_ops::sync_dir(&dir);

        debug!(
            "Published blob {} ({} bytes)",
            final_path.display(),
            payload.len()
        );
        self.path = final_path;
        Ok(())
    }

    /// Read the full payload at the current path.
    pub fn read(&self) -> Result<Vec<u8>, StorageError> {
        fs::read(&self.path).map_err(|e| self.stat_error("read", e))
    }

    /// Claim the blob until `now + period`, replacing any existing lease marker.
    ///
    /// Succeeds only if this handle's rename wins. Returns the new expiry.
    pub fn lease(&mut self, period: Duration) -> Result<DateTime<Utc>, StorageError> {
        let name = self.require_name()?;
        if name.state() == BlobState::Temp {
            return Err(StorageError::InvalidBlobName(format!(
                "cannot lease unpublished blob {}",
                self.path.display()
            )));
        }

        let leased = name.leased_until(lease_expiry_after(Utc::now(), period));
        let expires_at = leased
            .lease_expiry()
            .ok_or_else(|| StorageError::InvalidBlobName(leased.file_name()))?;
        let new_path = self.dir().join(leased.file_name());
        if new_path == self.path {
            // Renewal landed on the same stamp (same tick, or clamped to the
            // maximum). The lease is still ours as long as the file exists.
            fs::symlink_metadata(&self.path).map_err(|e| self.stat_error("lease", e))?;
            debug!("Lease on {} unchanged", new_path.display());
            return Ok(expires_at);
        }
        fs_ops::atomic_rename(&self.path, &new_path)
            .map_err(|e| StorageError::io("lease", &self.path, e))?;

        debug!("Leased {} until {}", new_path.display(), expires_at);
        self.path = new_path;
        Ok(expires_at)
    }

    /// Give the lease back early by renaming to the committed name.
    pub fn release(&mut self) -> Result<(), StorageError> {
        let name = self.require_name()?;
        if !matches!(name.state(), BlobState::Leased { .. }) {
            return Ok(());
        }

        let committed_path = self.dir().join(name.committed().file_name());
        fs_ops::atomic_rename(&self.path, &committed_path)
            .map_err(|e| StorageError::io("release", &self.path, e))?;

        debug!("Released lease on {}", committed_path.display());
        self.path = committed_path;
        Ok(())
    }

    /// Remove the blob. Deleting a blob that is already gone succeeds.
    pub fn delete(&self) -> Result<(), StorageError> {
        let removed = fs_ops::remove_if_exists(&self.path)
            .map_err(|e| StorageError::io("delete", &self.path, e))?;
        if removed {
            debug!("Deleted blob {}", self.path.display());
        }
        Ok(())
    }

    /// Size of the stored payload.
    pub fn size(&self) -> Result<u64, StorageError> {
        fs::metadata(&self.path)
            .map(|metadata| metadata.len())
            .map_err(|e| StorageError::io("stat", &self.path, e))
    }

    pub fn try_write(&mut self, payload: &[u8], lease: Option<Duration>) -> bool {
        self.write(payload, lease)
            .map_err(|e| log_failure("write", &self.path, &e))
            .is_ok()
    }

    pub fn try_read(&self) -> Option<Vec<u8>> {
        self.read()
            .map_err(|e| log_failure("read", &self.path, &e))
            .ok()
    }

    pub fn try_lease(&mut self, period: Duration) -> bool {
        self.lease(period)
            .map_err(|e| log_failure("lease", &self.path, &e))
            .is_ok()
    }

    pub fn try_release(&mut self) -> bool {
        self.release()
            .map_err(|e| log_failure("release", &self.path, &e))
            .is_ok()
    }

    pub fn try_delete(&self) -> bool {
        self.delete()
            .map_err(|e| log_failure("delete", &self.path, &e))
            .is_ok()
    }

    fn dir(&self) -> PathBuf {
        self.path
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_else(|| PathBuf::from("."))
    }

    fn stat_error(&self, op: &'static str, e: io::Error) -> StorageError {
        if e.kind() == io::ErrorKind::NotFound {
            StorageError::NotFound(self.path.clone())
        } else {
            StorageError::io(op, &self.path, e)
        }
    }

    fn require_name(&self) -> Result<BlobName, StorageError> {
        self.name()
            .ok_or_else(|| StorageError::InvalidBlobName(self.path.display().to_string()))
    }
}

/// A vanished blob is an expected race; anything else is worth a warning.
fn log_failure(op: &str, path: &Path, err: &StorageError) {
    if err.is_not_found() {
        debug!("Could not {} blob {}: {}", op, path.display(), err);
    } else {
        warn!("Could not {} blob {}: {}", op, path.display(), err);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn blob_files(dir: &Path) -> Vec<String> {
        let mut names: Vec<_> = fs::read_dir(dir)
            .unwrap()
            .filter_map(|e| e.ok())
            .map(|e| e.file_name().to_string_lossy().into_owned())
            .collect();
        names.sort();
        names
    }

    #[test]
    fn test_write_then_read() {
        let dir = TempDir::new().unwrap();
        let mut blob = FileBlob::allocate(dir.path());

        blob.write(b"span batch", None).unwrap();
        assert_eq!(blob.read().unwrap(), b"span batch");
        assert!(blob.path().to_string_lossy().ends_with(".blob"));
        assert_eq!(blob.size().unwrap(), 10);
    }

    #[test]
    fn test_write_empty_payload() {
        let dir = TempDir::new().unwrap();
        let mut blob = FileBlob::allocate(dir.path());

        blob.write(&[], None).unwrap();
        assert_eq!(blob.read().unwrap(), Vec::<u8>::new());
    }

    #[test]
    fn test_write_leaves_no_temp_file() {
        let dir = TempDir::new().unwrap();
        let mut blob = FileBlob::allocate(dir.path());
        blob.write(b"x", None).unwrap();

        let files = blob_files(dir.path());
        assert_eq!(files.len(), 1);
        assert!(!files[0].ends_with(".tmp"));
    }

    #[test]
    fn test_write_with_lease_publishes_leased() {
        let dir = TempDir::new().unwrap();
        let mut blob = FileBlob::allocate(dir.path());
        let before = Utc::now();

        blob.write(b"x", Some(Duration::from_secs(60))).unwrap();

        let expiry = blob.lease_expiry().unwrap();
        assert!(expiry > before + chrono::Duration::seconds(59));
        assert!(blob.path().to_string_lossy().ends_with(".lock"));
        assert_eq!(blob.read().unwrap(), b"x");
    }

    #[test]
    fn test_write_zero_lease_is_unleased() {
        let dir = TempDir::new().unwrap();
        let mut blob = FileBlob::allocate(dir.path());
        blob.write(b"x", Some(Duration::ZERO)).unwrap();
        assert!(blob.lease_expiry().is_none());
    }

    #[test]
    fn test_rewrite_does_not_replace_published_blob() {
        let dir = TempDir::new().unwrap();
        let mut blob = FileBlob::allocate(dir.path());
        blob.write(b"original", None).unwrap();

        let mut again = FileBlob::open(blob.path());
        assert!(again.write(b"replacement", None).is_err());
        assert_eq!(blob.read().unwrap(), b"original");
        assert_eq!(blob_files(dir.path()).len(), 1);
    }

    #[test]
    fn test_lease_renames_and_renewal_replaces_marker() {
        let dir = TempDir::new().unwrap();
        let mut blob = FileBlob::allocate(dir.path());
        blob.write(b"x", None).unwrap();
        let base = blob.name().unwrap().base().to_string();

        let first = blob.lease(Duration::from_secs(10)).unwrap();
        let second = blob.lease(Duration::from_secs(20)).unwrap();
        assert!(second > first);

        let files = blob_files(dir.path());
        assert_eq!(files.len(), 1);
        assert!(files[0].starts_with(&base));
        assert_eq!(files[0].matches('@').count(), 1);
        assert_eq!(blob.lease_expiry(), Some(second));
    }

    #[test]
    fn test_renewal_at_same_stamp_keeps_lease() {
        let dir = TempDir::new().unwrap();
        let mut blob = FileBlob::allocate(dir.path());
        blob.write(b"x", None).unwrap();

        let first = blob.lease(Duration::from_secs(u64::MAX)).unwrap();
        let held = blob.path().to_path_buf();
        let second = blob.lease(Duration::from_secs(u64::MAX)).unwrap();

        assert_eq!(first, second);
        assert_eq!(blob.path(), held.as_path());
        assert_eq!(blob.read().unwrap(), b"x");
        assert_eq!(blob_files(dir.path()).len(), 1);
    }

    #[test]
    fn test_same_stamp_renewal_of_vanished_blob_is_not_found() {
        let dir = TempDir::new().unwrap();
        let mut blob = FileBlob::allocate(dir.path());
        blob.write(b"x", Some(Duration::from_secs(u64::MAX))).unwrap();
        fs::remove_file(blob.path()).unwrap();

        let err = blob.lease(Duration::from_secs(u64::MAX)).unwrap_err();
        assert!(err.is_not_found());
    }

    #[test]
    fn test_stale_handle_cannot_lease() {
        let dir = TempDir::new().unwrap();
        let mut blob = FileBlob::allocate(dir.path());
        blob.write(b"x", None).unwrap();

        let mut other = FileBlob::open(blob.path());
        assert!(blob.try_lease(Duration::from_secs(10)));
        assert!(!other.try_lease(Duration::from_secs(10)));
        let err = other.lease(Duration::from_secs(10)).unwrap_err();
        assert!(err.is_not_found());
    }

    #[test]
    fn test_release_restores_committed_name() {
        let dir = TempDir::new().unwrap();
        let mut blob = FileBlob::allocate(dir.path());
        blob.write(b"x", Some(Duration::from_secs(60))).unwrap();

        blob.release().unwrap();
        assert!(blob.lease_expiry().is_none());
        assert!(blob.path().to_string_lossy().ends_with(".blob"));
        assert!(blob.path().exists());

        // Releasing an unleased blob is a no-op.
        blob.release().unwrap();
    }

    #[test]
    fn test_read_missing_blob_is_not_found() {
        let dir = TempDir::new().unwrap();
        let blob = FileBlob::allocate(dir.path());
        let err = blob.read().unwrap_err();
        assert!(matches!(err, StorageError::NotFound(_)));
        assert!(blob.try_read().is_none());
    }

    #[test]
    fn test_delete_is_idempotent() {
        let dir = TempDir::new().unwrap();
        let mut blob = FileBlob::allocate(dir.path());
        blob.write(b"x", None).unwrap();

        assert!(blob.try_delete());
        assert!(blob.try_delete());
        assert!(!blob.path().exists());
    }

    #[test]
    fn test_foreign_path_is_rejected() {
        let dir = TempDir::new().unwrap();
        let mut blob = FileBlob::open(dir.path().join("notes.txt"));
        assert!(matches!(
            blob.write(b"x", None),
            Err(StorageError::InvalidBlobName(_))
        ));
        assert!(!blob.try_lease(Duration::from_secs(1)));
    }
}
