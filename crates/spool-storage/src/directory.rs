//! Storage directory management.
//!
//! This module owns everything that looks at the directory as a whole:
//! - Enumeration of claimable blobs, oldest first
//! - Capacity enforcement (byte and entry ceilings) by oldest-first eviction
//! - Retention, abandoned-write cleanup and stale lease reclamation
//! - Status reporting
//!
//! Nothing is cached between calls. Other processes may be creating, leasing
//! and deleting blobs at the same time, so every operation starts from a
//! fresh listing and treats a vanished file as someone else's progress.
//!
//! Every deletion made here is reported as a [`MaintenanceEvent`] and logged;
//! with `event_log_dir` set, events are also appended to a JSONL file.
//!
//! # Example
//!
//! ```no_run
//! use spool_storage::{StorageConfig, StorageDirectory};
//!
//! let config = StorageConfig::new("/var/lib/spool").with_max_blobs(1000);
//! let directory = StorageDirectory::open(config)?;
//!
//! let report = directory.maintain()?;
//! for event in &report.events {
//!     println!("{} - {:?}", event.file_name, event.reason);
//! }
//! # Ok::<(), spool_storage::StorageError>(())
//! ```

use std::fs::{self, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::blob::FileBlob;
use crate::config::StorageConfig;
use crate::error::StorageError;
use crate::fs_ops;
use crate::naming::{BlobName, BlobState};

/// State of a directory entry at a given instant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntryState {
    Committed,
    Leased,
    LeaseExpired,
    Temp,
    /// Not a blob name. Counted toward usage, never touched.
    Foreign,
}

/// One file found while scanning the directory.
#[derive(Debug, Clone)]
pub struct BlobEntry {
    /// Full path to the file.
    pub path: PathBuf,

    /// File name as found on disk.
    pub file_name: String,

    /// Parsed name, None for foreign files.
    pub name: Option<BlobName>,

    /// File size in bytes.
    pub size_bytes: u64,

    /// File modification time.
    pub modified: SystemTime,
}

impl BlobEntry {
    /// Classify the entry at `now`.
    pub fn state(&self, now: DateTime<Utc>) -> EntryState {
        match &self.name {
            None => EntryState::Foreign,
            Some(name) => match name.state() {
                BlobState::Committed => EntryState::Committed,
                BlobState::Temp => EntryState::Temp,
                BlobState::Leased { expires_at } if expires_at > now => EntryState::Leased,
                BlobState::Leased { .. } => EntryState::LeaseExpired,
            },
        }
    }

    /// Creation time: embedded in the name, or the mtime for foreign files.
    pub fn created(&self) -> DateTime<Utc> {
        self.name
            .as_ref()
            .map(BlobName::created)
            .unwrap_or_else(|| DateTime::<Utc>::from(self.modified))
    }

    /// Age of the entry at `now`.
    pub fn age(&self, now: DateTime<Utc>) -> Duration {
        (now - self.created()).to_std().unwrap_or_default()
    }

    /// Published blob, leased or not.
    pub fn is_blob(&self) -> bool {
        matches!(
            self.name.as_ref().map(BlobName::state),
            Some(BlobState::Committed) | Some(BlobState::Leased { .. })
        )
    }

    /// Whether capacity eviction may delete this entry at `now`.
    pub fn is_evictable(&self, now: DateTime<Utc>) -> bool {
        matches!(
            self.state(now),
            EntryState::Committed | EntryState::LeaseExpired
        )
    }

    /// Handle for this entry's current path.
    pub fn to_blob(&self) -> FileBlob {
        FileBlob::open(self.path.clone())
    }

    /// Serializable view for listings.
    pub fn summary(&self, now: DateTime<Utc>) -> EntrySummary {
        EntrySummary {
            file_name: self.file_name.clone(),
            state: self.state(now),
            size_bytes: self.size_bytes,
            created: self.created(),
            age_secs: self.age(now).as_secs(),
            lease_expires_at: self.name.as_ref().and_then(BlobName::lease_expiry),
        }
    }
}

/// Listing row for one directory entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EntrySummary {
    pub file_name: String,
    pub state: EntryState,
    pub size_bytes: u64,
    pub created: DateTime<Utc>,
    pub age_secs: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lease_expires_at: Option<DateTime<Utc>>,
}

/// Aggregate consumption of the directory.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Usage {
    /// Bytes of every file in the directory, blobs or not.
    pub total_bytes: u64,

    /// Published blobs (committed or leased). Temp and foreign files excluded.
    pub blob_count: usize,
}

impl Usage {
    fn from_entries(entries: &[BlobEntry]) -> Self {
        Usage {
            total_bytes: entries.iter().map(|e| e.size_bytes).sum(),
            blob_count: entries.iter().filter(|e| e.is_blob()).count(),
        }
    }

    fn remove(&mut self, entry: &BlobEntry) {
        self.total_bytes = self.total_bytes.saturating_sub(entry.size_bytes);
        if entry.is_blob() {
            self.blob_count = self.blob_count.saturating_sub(1);
        }
    }
}

/// Why maintenance removed or renamed a file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MaintenanceReason {
    /// Temp file outlived the write timeout.
    StaleTemp { write_timeout_ms: u64 },

    /// Blob outlived the retention period.
    RetentionExpired { retention_period_ms: u64 },

    /// Expired lease marker stripped so the blob reads as committed again.
    LeaseReclaimed { expired_at: DateTime<Utc> },

    /// Oldest unleased blob evicted to get under the ceiling.
    CapacityExceeded {
        max_size_bytes: u64,
        max_blobs: Option<usize>,
        used_bytes: u64,
        blob_count: usize,
    },
}

/// A record of one maintenance action.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MaintenanceEvent {
    /// When the action was taken.
    pub timestamp: DateTime<Utc>,

    /// File name acted upon.
    pub file_name: String,

    /// Size of the file in bytes.
    pub size_bytes: u64,

    /// Age of the blob when acted upon.
    pub age_secs: u64,

    pub reason: MaintenanceReason,
}

/// Outcome of a capacity check.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CapacityReport {
    pub before: Usage,
    pub after: Usage,

    /// Blobs evicted, oldest first.
    pub evicted: Vec<MaintenanceEvent>,

    /// Whether usage (plus the incoming blob, if any) fits under the ceilings.
    pub satisfied: bool,
}

/// Outcome of a full maintenance sweep.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MaintenanceReport {
    pub started_at: DateTime<Utc>,
    pub before: Usage,
    pub after: Usage,
    pub events: Vec<MaintenanceEvent>,
    pub capacity_satisfied: bool,
}

/// Snapshot of the directory for operators.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageStatus {
    /// Root storage directory.
    pub root_dir: String,

    /// Total disk usage in bytes.
    pub total_bytes: u64,

    /// Total file count, including temp and foreign files.
    pub total_files: usize,

    pub committed: usize,
    pub leased: usize,
    pub lease_expired: usize,
    pub temp: usize,
    pub foreign: usize,

    /// Age of the oldest published blob.
    pub oldest_blob_age_secs: Option<u64>,

    /// Configured byte ceiling.
    pub max_size_bytes: u64,

    /// Configured entry ceiling.
    pub max_blobs: Option<usize>,

    /// Percentage of the byte ceiling used.
    pub budget_used_pct: f64,

    /// Blobs old enough to be removed by the next sweep.
    pub retention_eligible: usize,
}

/// Manager for one storage root.
///
/// Construct one per root with explicit configuration; several can coexist
/// in a process and several processes can share one root.
#[derive(Debug, Clone)]
pub struct StorageDirectory {
    config: StorageConfig,
}

impl StorageDirectory {
    /// Validate `config` and create the root directory if needed.
    pub fn open(config: StorageConfig) -> Result<Self, StorageError> {
        config.validate()?;
        fs::create_dir_all(config.directory())
            .map_err(|e| StorageError::io("create directory", config.directory(), e))?;
        Ok(StorageDirectory { config })
    }

    pub fn root(&self) -> &Path {
        self.config.directory()
    }

    pub fn config(&self) -> &StorageConfig {
        &self.config
    }

    /// Handle for a new blob name in this directory.
    pub fn allocate_blob(&self) -> FileBlob {
        FileBlob::allocate(self.root())
    }

    /// List every file in the root, oldest first.
    ///
    /// Files that disappear between listing and stat are skipped.
    pub fn scan(&self) -> Result<Vec<BlobEntry>, StorageError> {
        let root = self.root();
        let mut entries = Vec::new();

        let listing = fs::read_dir(root).map_err(|e| StorageError::io("scan", root, e))?;
        for dir_entry in listing {
            let dir_entry = dir_entry.map_err(|e| StorageError::io("scan", root, e))?;
            let path = dir_entry.path();

            let metadata = match dir_entry.metadata() {
                Ok(metadata) => metadata,
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => continue,
                Err(e) => return Err(StorageError::io("stat", &path, e)),
            };
            if !metadata.is_file() {
                continue;
            }

            let file_name = dir_entry.file_name().to_string_lossy().into_owned();
            let name = BlobName::parse(&file_name).ok();
            entries.push(BlobEntry {
                path,
                file_name,
                name,
                size_bytes: metadata.len(),
                modified: metadata.modified().unwrap_or(SystemTime::UNIX_EPOCH),
            });
        }

        entries.sort_by(|a, b| {
            a.created()
                .cmp(&b.created())
                .then_with(|| a.file_name.cmp(&b.file_name))
        });
        Ok(entries)
    }

    /// Current usage.
    pub fn usage(&self) -> Result<Usage, StorageError> {
        Ok(Usage::from_entries(&self.scan()?))
    }

    /// Claimable blobs: committed ones oldest first, then expired leases
    /// oldest first.
    ///
    /// The listing is a snapshot; lease and retention state is checked again
    /// as each item is yielded. Call again for a fresh view.
    pub fn enumerate(&self) -> Result<BlobIter, StorageError> {
        let (committed, leased): (Vec<_>, Vec<_>) = self
            .scan()?
            .into_iter()
            .filter(BlobEntry::is_blob)
            .partition(|entry| {
                matches!(
                    entry.name.as_ref().map(BlobName::state),
                    Some(BlobState::Committed)
                )
            });

        let mut ordered = committed;
        ordered.extend(leased);
        Ok(BlobIter {
            entries: ordered.into_iter(),
            retention: to_chrono(self.config.retention_period()),
        })
    }

    /// Evict oldest unleased blobs until the directory fits its ceilings.
    ///
    /// With `incoming_bytes`, room is made for one more blob of that size.
    /// Blobs under an unexpired lease are never evicted. The report says
    /// whether the ceiling was met; not meeting it is not an error here.
    pub fn maintain_capacity(
        &self,
        incoming_bytes: Option<u64>,
    ) -> Result<CapacityReport, StorageError> {
        let now = Utc::now();
        let entries = self.scan()?;
        let before = Usage::from_entries(&entries);
        let mut usage = before;
        let mut evicted = Vec::new();

        for candidate in entries.iter().filter(|e| e.is_evictable(now)) {
            if self.fits(&usage, incoming_bytes) {
                break;
            }

            match fs_ops::remove_if_exists(&candidate.path) {
                Ok(true) => {
                    let event = MaintenanceEvent {
                        timestamp: now,
                        file_name: candidate.file_name.clone(),
                        size_bytes: candidate.size_bytes,
                        age_secs: candidate.age(now).as_secs(),
                        reason: MaintenanceReason::CapacityExceeded {
                            max_size_bytes: self.config.max_size_bytes,
                            max_blobs: self.config.max_blobs,
                            used_bytes: usage.total_bytes,
                            blob_count: usage.blob_count,
                        },
                    };
                    info!(
                        "Evicting: {} ({} bytes, {}s old) - over capacity",
                        candidate.file_name,
                        candidate.size_bytes,
                        event.age_secs
                    );
                    usage.remove(candidate);
                    evicted.push(event);
                }
                Ok(false) => {
                    // Leased, deleted or evicted by someone else since the scan.
                    debug!("Eviction candidate vanished: {}", candidate.file_name);
                }
                Err(e) => {
                    warn!("Failed to evict {}: {}", candidate.path.display(), e);
                }
            }
        }

        let satisfied = self.fits(&usage, incoming_bytes);
        if !satisfied {
            warn!(
                "Storage over capacity with no evictable blobs: {} bytes in {} blobs (max {} bytes)",
                usage.total_bytes, usage.blob_count, self.config.max_size_bytes
            );
        }

        Ok(CapacityReport {
            before,
            after: usage,
            evicted,
            satisfied,
        })
    }

    /// Full sweep: abandoned temps, retention, stale leases, then capacity.
    pub fn maintain(&self) -> Result<MaintenanceReport, StorageError> {
        let started_at = Utc::now();
        let entries = self.scan()?;
        let before = Usage::from_entries(&entries);
        let mut events = Vec::new();

        let write_timeout = self.config.write_timeout();
        let retention = self.config.retention_period();

        for entry in &entries {
            let age = entry.age(started_at);
            let reason = match entry.state(started_at) {
                EntryState::Temp if age > write_timeout => MaintenanceReason::StaleTemp {
                    write_timeout_ms: self.config.write_timeout_ms,
                },
                EntryState::Committed | EntryState::LeaseExpired if age > retention => {
                    MaintenanceReason::RetentionExpired {
                        retention_period_ms: self.config.retention_period_ms,
                    }
                }
                EntryState::LeaseExpired => {
                    if let Some(event) = self.reclaim_lease(entry, started_at) {
                        events.push(event);
                    }
                    continue;
                }
                _ => continue,
            };

            match fs_ops::remove_if_exists(&entry.path) {
                Ok(true) => {
                    info!(
                        "Pruning: {} ({} bytes, {}s old) - {:?}",
                        entry.file_name,
                        entry.size_bytes,
                        age.as_secs(),
                        reason
                    );
                    events.push(MaintenanceEvent {
                        timestamp: started_at,
                        file_name: entry.file_name.clone(),
                        size_bytes: entry.size_bytes,
                        age_secs: age.as_secs(),
                        reason,
                    });
                }
                Ok(false) => debug!("Already gone: {}", entry.file_name),
                Err(e) => warn!("Failed to delete {}: {}", entry.path.display(), e),
            }
        }

        let capacity = self.maintain_capacity(None)?;
        events.extend(capacity.evicted);

        if let Some(log_dir) = &self.config.event_log_dir {
            if let Err(e) = persist_events(&events, log_dir) {
                warn!(
                    "Failed to persist maintenance events to {}: {}",
                    log_dir.display(),
                    e
                );
            }
        }

        debug!(
            "Maintenance of {} done: {} events, {} -> {} bytes",
            self.root().display(),
            events.len(),
            before.total_bytes,
            capacity.after.total_bytes
        );

        Ok(MaintenanceReport {
            started_at,
            before,
            after: capacity.after,
            events,
            capacity_satisfied: capacity.satisfied,
        })
    }

    /// Current status.
    pub fn status(&self) -> Result<StorageStatus, StorageError> {
        let now = Utc::now();
        let entries = self.scan()?;
        let usage = Usage::from_entries(&entries);
        let retention = self.config.retention_period();

        let count = |state: EntryState| entries.iter().filter(|e| e.state(now) == state).count();

        let budget_used_pct = if self.config.max_size_bytes > 0 {
            (usage.total_bytes as f64 / self.config.max_size_bytes as f64) * 100.0
        } else {
            0.0
        };

        Ok(StorageStatus {
            root_dir: self.root().display().to_string(),
            total_bytes: usage.total_bytes,
            total_files: entries.len(),
            committed: count(EntryState::Committed),
            leased: count(EntryState::Leased),
            lease_expired: count(EntryState::LeaseExpired),
            temp: count(EntryState::Temp),
            foreign: count(EntryState::Foreign),
            oldest_blob_age_secs: entries
                .iter()
                .filter(|e| e.is_blob())
                .map(|e| e.age(now).as_secs())
                .max(),
            max_size_bytes: self.config.max_size_bytes,
            max_blobs: self.config.max_blobs,
            budget_used_pct,
            retention_eligible: entries
                .iter()
                .filter(|e| e.is_evictable(now) && e.age(now) > retention)
                .count(),
        })
    }

    fn fits(&self, usage: &Usage, incoming_bytes: Option<u64>) -> bool {
        let (extra_bytes, extra_blobs) = match incoming_bytes {
            Some(bytes) => (bytes, 1),
            None => (0, 0),
        };
        let bytes_ok = usage.total_bytes.saturating_add(extra_bytes) <= self.config.max_size_bytes;
        let count_ok = self
            .config
            .max_blobs
            .map_or(true, |max| usage.blob_count + extra_blobs <= max);
        bytes_ok && count_ok
    }

    /// Rename an expired-lease blob back to its committed name.
    fn reclaim_lease(&self, entry: &BlobEntry, now: DateTime<Utc>) -> Option<MaintenanceEvent> {
        let name = entry.name.as_ref()?;
        let expired_at = name.lease_expiry()?;
        let committed_path = self.root().join(name.committed().file_name());

        match fs_ops::atomic_rename(&entry.path, &committed_path) {
            Ok(()) => {
                info!(
                    "Reclaimed expired lease: {} (expired {})",
                    entry.file_name, expired_at
                );
                Some(MaintenanceEvent {
                    timestamp: now,
                    file_name: entry.file_name.clone(),
                    size_bytes: entry.size_bytes,
                    age_secs: entry.age(now).as_secs(),
                    reason: MaintenanceReason::LeaseReclaimed { expired_at },
                })
            }
            Err(e) => {
                // A consumer re-leased it first.
                debug!("Could not reclaim {}: {}", entry.file_name, e);
                None
            }
        }
    }
}

/// Lazy, snapshot-based sequence of claimable blobs.
///
/// Entries may vanish before the caller gets to them; that is expected.
#[derive(Debug)]
pub struct BlobIter {
    entries: std::vec::IntoIter<BlobEntry>,
    retention: chrono::Duration,
}

impl Iterator for BlobIter {
    type Item = FileBlob;

    fn next(&mut self) -> Option<FileBlob> {
        for entry in self.entries.by_ref() {
            let now = Utc::now();
            let Some(name) = entry.name.as_ref() else {
                continue;
            };
            if !name.is_available(now) || now - name.created() > self.retention {
                continue;
            }
            return Some(FileBlob::open(entry.path));
        }
        None
    }
}

/// Append maintenance events to today's JSONL file.
fn persist_events(events: &[MaintenanceEvent], log_dir: &Path) -> std::io::Result<()> {
    if events.is_empty() {
        return Ok(());
    }

    fs::create_dir_all(log_dir)?;

    let filename = format!(
        "maintenance_events_{}.jsonl",
        Utc::now().format("%Y%m%d")
    );
    let log_path = log_dir.join(filename);

    let file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(&log_path)?;
    let mut writer = BufWriter::new(file);

    for event in events {
        serde_json::to_writer(&mut writer, event)?;
        writer.write_all(b"\n")?;
    }
    writer.flush()?;

    info!(
        "Wrote {} maintenance events to {}",
        events.len(),
        log_path.display()
    );
    Ok(())
}

fn to_chrono(d: Duration) -> chrono::Duration {
    chrono::Duration::from_std(d).unwrap_or_else(|_| chrono::Duration::days(365 * 1000))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    /// Place a committed blob whose name says it was created `age` ago.
    fn place_blob(dir: &Path, age: Duration, size: usize) -> PathBuf {
        let name = BlobName::generate_at(Utc::now() - to_chrono(age));
        let path = dir.join(name.file_name());
        fs::write(&path, vec![7u8; size]).unwrap();
        path
    }

    fn place_leased(dir: &Path, age: Duration, lease_left: chrono::Duration) -> PathBuf {
        let name = BlobName::generate_at(Utc::now() - to_chrono(age));
        let path = dir.join(name.leased_until(Utc::now() + lease_left).file_name());
        fs::write(&path, b"leased").unwrap();
        path
    }

    fn open(dir: &TempDir) -> StorageDirectory {
        StorageDirectory::open(StorageConfig::new(dir.path())).unwrap()
    }

    #[test]
    fn test_open_rejects_invalid_config() {
        let dir = TempDir::new().unwrap();
        let config = StorageConfig::new(dir.path()).with_max_size_bytes(0);
        assert!(matches!(
            StorageDirectory::open(config),
            Err(StorageError::InvalidConfig(_))
        ));
    }

    #[test]
    fn test_open_creates_root() {
        let dir = TempDir::new().unwrap();
        let root = dir.path().join("nested/spool");
        let directory = StorageDirectory::open(StorageConfig::new(&root)).unwrap();
        assert!(root.is_dir());
        assert_eq!(directory.root(), root.as_path());
    }

    #[test]
    fn test_empty_directory_status() {
        let dir = TempDir::new().unwrap();
        let status = open(&dir).status().unwrap();
        assert_eq!(status.total_files, 0);
        assert_eq!(status.total_bytes, 0);
        assert_eq!(status.oldest_blob_age_secs, None);
    }

    #[test]
    fn test_scan_orders_oldest_first_and_classifies() {
        let dir = TempDir::new().unwrap();
        let newer = place_blob(dir.path(), Duration::from_secs(10), 4);
        let older = place_blob(dir.path(), Duration::from_secs(100), 4);
        fs::write(dir.path().join("README"), b"hello").unwrap();
        fs::create_dir(dir.path().join("subdir")).unwrap();

        let entries = open(&dir).scan().unwrap();
        let blobs: Vec<_> = entries.iter().filter(|e| e.is_blob()).collect();
        assert_eq!(blobs.len(), 2);
        assert_eq!(blobs[0].path, older);
        assert_eq!(blobs[1].path, newer);

        let foreign: Vec<_> = entries
            .iter()
            .filter(|e| e.state(Utc::now()) == EntryState::Foreign)
            .collect();
        assert_eq!(foreign.len(), 1);
        assert_eq!(entries.len(), 3);
    }

    #[test]
    fn test_usage_counts_foreign_bytes_not_entries() {
        let dir = TempDir::new().unwrap();
        place_blob(dir.path(), Duration::from_secs(1), 10);
        fs::write(dir.path().join("notes.txt"), vec![0u8; 5]).unwrap();

        let usage = open(&dir).usage().unwrap();
        assert_eq!(usage.total_bytes, 15);
        assert_eq!(usage.blob_count, 1);
    }

    #[test]
    fn test_enumerate_skips_active_leases_and_temps() {
        let dir = TempDir::new().unwrap();
        let committed = place_blob(dir.path(), Duration::from_secs(50), 1);
        place_leased(dir.path(), Duration::from_secs(100), chrono::Duration::seconds(60));
        let expired = place_leased(
            dir.path(),
            Duration::from_secs(200),
            chrono::Duration::seconds(-5),
        );
        let temp = BlobName::generate().temp();
        fs::write(dir.path().join(temp.file_name()), b"partial").unwrap();

        let paths: Vec<_> = open(&dir)
            .enumerate()
            .unwrap()
            .map(|blob| blob.path().to_path_buf())
            .collect();
        assert_eq!(paths, vec![committed, expired]);
    }

    #[test]
    fn test_enumerate_skips_blobs_past_retention() {
        let dir = TempDir::new().unwrap();
        let config =
            StorageConfig::new(dir.path()).with_retention_period(Duration::from_secs(3600));
        let directory = StorageDirectory::open(config).unwrap();
        place_blob(dir.path(), Duration::from_secs(7200), 1);
        let fresh = place_blob(dir.path(), Duration::from_secs(10), 1);

        let paths: Vec<_> = directory
            .enumerate()
            .unwrap()
            .map(|blob| blob.path().to_path_buf())
            .collect();
        assert_eq!(paths, vec![fresh]);
    }

    #[test]
    fn test_enumerate_is_restartable() {
        let dir = TempDir::new().unwrap();
        let directory = open(&dir);
        place_blob(dir.path(), Duration::from_secs(1), 1);

        assert_eq!(directory.enumerate().unwrap().count(), 1);
        place_blob(dir.path(), Duration::from_secs(0), 1);
        assert_eq!(directory.enumerate().unwrap().count(), 2);
    }

    #[test]
    fn test_capacity_evicts_oldest_unleased_first() {
        let dir = TempDir::new().unwrap();
        let config = StorageConfig::new(dir.path()).with_max_size_bytes(25);
        let directory = StorageDirectory::open(config).unwrap();

        let oldest = place_blob(dir.path(), Duration::from_secs(300), 10);
        let middle = place_blob(dir.path(), Duration::from_secs(200), 10);
        let newest = place_blob(dir.path(), Duration::from_secs(100), 10);

        let report = directory.maintain_capacity(None).unwrap();
        assert!(report.satisfied);
        assert_eq!(report.evicted.len(), 1);
        assert!(!oldest.exists());
        assert!(middle.exists());
        assert!(newest.exists());
        assert_eq!(report.after.total_bytes, 20);
    }

    #[test]
    fn test_capacity_never_evicts_active_lease() {
        let dir = TempDir::new().unwrap();
        let config = StorageConfig::new(dir.path()).with_max_blobs(1);
        let directory = StorageDirectory::open(config).unwrap();

        let leased = place_leased(dir.path(), Duration::from_secs(300), chrono::Duration::hours(1));
        let committed = place_blob(dir.path(), Duration::from_secs(100), 1);

        let report = directory.maintain_capacity(None).unwrap();
        assert!(report.satisfied);
        assert!(leased.exists());
        assert!(!committed.exists());

        // Room for one more is impossible while the lease is held.
        let report = directory.maintain_capacity(Some(1)).unwrap();
        assert!(!report.satisfied);
        assert!(report.evicted.is_empty());
        assert!(leased.exists());
    }

    #[test]
    fn test_capacity_makes_room_for_incoming() {
        let dir = TempDir::new().unwrap();
        let config = StorageConfig::new(dir.path()).with_max_blobs(2);
        let directory = StorageDirectory::open(config).unwrap();

        let a = place_blob(dir.path(), Duration::from_secs(20), 1);
        let b = place_blob(dir.path(), Duration::from_secs(10), 1);

        assert!(directory.maintain_capacity(None).unwrap().evicted.is_empty());

        let report = directory.maintain_capacity(Some(1)).unwrap();
        assert!(report.satisfied);
        assert!(!a.exists());
        assert!(b.exists());
    }

    #[test]
    fn test_maintain_removes_stale_temp_only() {
        let dir = TempDir::new().unwrap();
        let directory = open(&dir);

        let stale = BlobName::generate_at(Utc::now() - chrono::Duration::minutes(5)).temp();
        let fresh = BlobName::generate().temp();
        let stale_path = dir.path().join(stale.file_name());
        let fresh_path = dir.path().join(fresh.file_name());
        fs::write(&stale_path, b"abandoned").unwrap();
        fs::write(&fresh_path, b"in flight").unwrap();

        let report = directory.maintain().unwrap();
        assert!(!stale_path.exists());
        assert!(fresh_path.exists());
        assert_eq!(report.events.len(), 1);
        assert!(matches!(
            report.events[0].reason,
            MaintenanceReason::StaleTemp { .. }
        ));
    }

    #[test]
    fn test_maintain_applies_retention() {
        let dir = TempDir::new().unwrap();
        let config =
            StorageConfig::new(dir.path()).with_retention_period(Duration::from_secs(3600));
        let directory = StorageDirectory::open(config).unwrap();

        let expired = place_blob(dir.path(), Duration::from_secs(7200), 3);
        let kept = place_blob(dir.path(), Duration::from_secs(60), 3);
        let leased_old =
            place_leased(dir.path(), Duration::from_secs(7200), chrono::Duration::hours(1));

        let report = directory.maintain().unwrap();
        assert!(!expired.exists());
        assert!(kept.exists());
        assert!(leased_old.exists(), "active leases survive retention");
        assert_eq!(
            report.events[0].reason,
            MaintenanceReason::RetentionExpired {
                retention_period_ms: 3_600_000
            }
        );
    }

    #[test]
    fn test_maintain_reclaims_expired_leases() {
        let dir = TempDir::new().unwrap();
        let directory = open(&dir);
        let expired = place_leased(dir.path(), Duration::from_secs(10), chrono::Duration::seconds(-1));

        let report = directory.maintain().unwrap();
        assert!(!expired.exists());
        assert_eq!(report.events.len(), 1);
        assert!(matches!(
            report.events[0].reason,
            MaintenanceReason::LeaseReclaimed { .. }
        ));

        let status = directory.status().unwrap();
        assert_eq!(status.committed, 1);
        assert_eq!(status.lease_expired, 0);
    }

    #[test]
    fn test_maintain_persists_events() {
        let dir = TempDir::new().unwrap();
        let root = dir.path().join("blobs");
        let log_dir = dir.path().join("events");
        let config = StorageConfig::new(&root)
            .with_max_blobs(1)
            .with_event_log_dir(&log_dir);
        let directory = StorageDirectory::open(config).unwrap();

        place_blob(&root, Duration::from_secs(20), 1);
        place_blob(&root, Duration::from_secs(10), 1);
        directory.maintain().unwrap();

        let logs: Vec<_> = fs::read_dir(&log_dir)
            .unwrap()
            .filter_map(|e| e.ok())
            .collect();
        assert_eq!(logs.len(), 1);
        let content = fs::read_to_string(logs[0].path()).unwrap();
        let event: MaintenanceEvent = serde_json::from_str(content.trim()).unwrap();
        assert!(matches!(
            event.reason,
            MaintenanceReason::CapacityExceeded { .. }
        ));
    }

    #[test]
    fn test_maintain_survives_unwritable_event_log() {
        let dir = TempDir::new().unwrap();
        let root = dir.path().join("blobs");
        let not_a_dir = dir.path().join("events");
        fs::write(&not_a_dir, b"regular file").unwrap();
        let config = StorageConfig::new(&root)
            .with_max_blobs(1)
            .with_event_log_dir(&not_a_dir);
        let directory = StorageDirectory::open(config).unwrap();

        place_blob(&root, Duration::from_secs(20), 1);
        place_blob(&root, Duration::from_secs(10), 1);
        let report = directory.maintain().unwrap();

        assert_eq!(report.events.len(), 1);
        assert_eq!(report.after.blob_count, 1);
        assert_eq!(fs::read(&not_a_dir).unwrap(), b"regular file");
    }

    #[test]
    fn test_status_reporting() {
        let dir = TempDir::new().unwrap();
        let config = StorageConfig::new(dir.path()).with_max_size_bytes(1000);
        let directory = StorageDirectory::open(config).unwrap();

        place_blob(dir.path(), Duration::from_secs(30), 100);
        place_blob(dir.path(), Duration::from_secs(20), 100);
        place_leased(dir.path(), Duration::from_secs(10), chrono::Duration::hours(1));
        place_leased(dir.path(), Duration::from_secs(5), chrono::Duration::seconds(-1));

        let status = directory.status().unwrap();
        assert_eq!(status.committed, 2);
        assert_eq!(status.leased, 1);
        assert_eq!(status.lease_expired, 1);
        assert_eq!(status.total_bytes, 212);
        assert!((status.budget_used_pct - 21.2).abs() < 1e-9);
        assert!(status.oldest_blob_age_secs.unwrap() >= 29);
    }

    #[test]
    fn test_maintenance_reason_serialization() {
        let reason = MaintenanceReason::StaleTemp {
            write_timeout_ms: 60_000,
        };
        let json = serde_json::to_string(&reason).unwrap();
        assert!(json.contains("stale_temp"));
        assert!(json.contains("60000"));
    }
}
