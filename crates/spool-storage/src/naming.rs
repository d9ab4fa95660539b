//! Blob file naming.
//!
//! A blob's file name is its whole state:
//!
//! ```text
//! 2026-10-19T083015.1234567Z-<32 hex>.blob                                   committed
//! 2026-10-19T083015.1234567Z-<32 hex>.blob@2026-10-19T083045.1234567Z.lock   leased
//! 2026-10-19T083015.1234567Z-<32 hex>.blob.tmp                               being written
//! ```
//!
//! Stamps are UTC with 100ns ticks, fixed width, so lexical order is
//! chronological order and a lease can be checked without opening the file.

use std::fmt;

use chrono::{DateTime, Duration, NaiveDateTime, Utc};

use crate::error::StorageError;

/// Extension of a committed blob.
pub const BLOB_EXTENSION: &str = ".blob";

/// Suffix appended to a blob name while it is being written.
pub const TEMP_SUFFIX: &str = ".tmp";

/// Suffix closing a lease marker.
pub const LOCK_SUFFIX: &str = ".lock";

/// Separates the blob name from its lease expiry stamp.
pub const LEASE_SEPARATOR: char = '@';

/// Length of an encoded stamp: `YYYY-MM-DDTHHMMSS.fffffffZ`.
pub const STAMP_LEN: usize = 26;

const STAMP_DATE_TIME_LEN: usize = 17;
const STAMP_DATE_TIME_FORMAT: &str = "%Y-%m-%dT%H%M%S";

/// Encode a timestamp as a fixed-width, sortable, path-safe stamp.
pub fn format_stamp(ts: DateTime<Utc>) -> String {
    // Leap seconds report nanos >= 1e9; clamp so the width never changes.
    let ticks = ts.timestamp_subsec_nanos().min(999_999_999) / 100;
    format!("{}.{:07}Z", ts.format(STAMP_DATE_TIME_FORMAT), ticks)
}

/// Decode a stamp produced by [`format_stamp`].
pub fn parse_stamp(s: &str) -> Option<DateTime<Utc>> {
    if s.len() != STAMP_LEN || !s.is_ascii() {
        return None;
    }
    let bytes = s.as_bytes();
    if bytes[STAMP_DATE_TIME_LEN] != b'.' || bytes[STAMP_LEN - 1] != b'Z' {
        return None;
    }

    let fraction = &s[STAMP_DATE_TIME_LEN + 1..STAMP_LEN - 1];
    if !fraction.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    let ticks: i64 = fraction.parse().ok()?;

    let naive =
        NaiveDateTime::parse_from_str(&s[..STAMP_DATE_TIME_LEN], STAMP_DATE_TIME_FORMAT).ok()?;
    Some(naive.and_utc() + Duration::nanoseconds(ticks * 100))
}

/// Absolute expiry for a lease of `period` starting at `now`.
///
/// Clamped to the last instant a stamp can encode.
pub fn lease_expiry_after(now: DateTime<Utc>, period: std::time::Duration) -> DateTime<Utc> {
    let max = NaiveDateTime::parse_from_str("9999-12-31T235959", STAMP_DATE_TIME_FORMAT)
        .map(|naive| naive.and_utc())
        .unwrap_or(now);
    Duration::from_std(period)
        .ok()
        .and_then(|delta| now.checked_add_signed(delta))
        .map_or(max, |expiry| expiry.min(max))
}

/// Lifecycle state encoded in a blob file name.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlobState {
    /// Published and unleased.
    Committed,
    /// Claimed until `expires_at`. Expired leases are advisory only.
    Leased { expires_at: DateTime<Utc> },
    /// Still being written; never visible to consumers.
    Temp,
}

/// A parsed blob file name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlobName {
    base: String,
    created: DateTime<Utc>,
    state: BlobState,
}

impl BlobName {
    /// Allocate a fresh, unique committed name stamped with the current time.
    pub fn generate() -> Self {
        Self::generate_at(Utc::now())
    }

    /// Allocate a fresh, unique committed name with an explicit creation time.
    pub fn generate_at(created: DateTime<Utc>) -> Self {
        let base = format!("{}-{}", format_stamp(created), uuid::Uuid::new_v4().simple());
        // Round-trip through the stamp so `created` matches what a reader parses.
        let created = parse_stamp(&base[..STAMP_LEN]).unwrap_or(created);
        BlobName {
            base,
            created,
            state: BlobState::Committed,
        }
    }

    /// Parse a file name found in the storage directory.
    pub fn parse(file_name: &str) -> Result<Self, StorageError> {
        let invalid = || StorageError::InvalidBlobName(file_name.to_string());

        let (stem, state) = if let Some(stem) = file_name.strip_suffix(TEMP_SUFFIX) {
            (
                stem.strip_suffix(BLOB_EXTENSION).ok_or_else(invalid)?,
                BlobState::Temp,
            )
        } else if let Some(stem) = file_name.strip_suffix(BLOB_EXTENSION) {
            (stem, BlobState::Committed)
        } else if let Some(locked) = file_name.strip_suffix(LOCK_SUFFIX) {
            let at = locked.rfind(LEASE_SEPARATOR).ok_or_else(invalid)?;
            let expires_at = parse_stamp(&locked[at + 1..]).ok_or_else(invalid)?;
            (
                locked[..at].strip_suffix(BLOB_EXTENSION).ok_or_else(invalid)?,
                BlobState::Leased { expires_at },
            )
        } else {
            return Err(invalid());
        };

        let created = parse_base(stem).ok_or_else(invalid)?;
        Ok(BlobName {
            base: stem.to_string(),
            created,
            state,
        })
    }

    /// Stable identifier shared by every state of this blob.
    pub fn base(&self) -> &str {
        &self.base
    }

    /// Creation time embedded in the name.
    pub fn created(&self) -> DateTime<Utc> {
        self.created
    }

    pub fn state(&self) -> BlobState {
        self.state
    }

    /// Lease expiry, if the name carries a lease marker.
    pub fn lease_expiry(&self) -> Option<DateTime<Utc>> {
        match self.state {
            BlobState::Leased { expires_at } => Some(expires_at),
            _ => None,
        }
    }

    /// Whether someone holds an unexpired lease at `now`.
    pub fn is_lease_active(&self, now: DateTime<Utc>) -> bool {
        matches!(self.state, BlobState::Leased { expires_at } if expires_at > now)
    }

    /// Whether a consumer may claim this blob at `now`.
    pub fn is_available(&self, now: DateTime<Utc>) -> bool {
        match self.state {
            BlobState::Committed => true,
            BlobState::Leased { expires_at } => expires_at <= now,
            BlobState::Temp => false,
        }
    }

    /// Same blob, committed form.
    pub fn committed(&self) -> BlobName {
        self.with_state(BlobState::Committed)
    }

    /// Same blob, leased until `expires_at`. Any existing lease marker is replaced.
    pub fn leased_until(&self, expires_at: DateTime<Utc>) -> BlobName {
        // Truncate to stamp precision so the in-memory value equals the parsed one.
        let expires_at = parse_stamp(&format_stamp(expires_at)).unwrap_or(expires_at);
        self.with_state(BlobState::Leased { expires_at })
    }

    /// Same blob, temp form used while writing.
    pub fn temp(&self) -> BlobName {
        self.with_state(BlobState::Temp)
    }

    /// File name for this state.
    pub fn file_name(&self) -> String {
        match self.state {
            BlobState::Committed => format!("{}{}", self.base, BLOB_EXTENSION),
            BlobState::Temp => format!("{}{}{}", self.base, BLOB_EXTENSION, TEMP_SUFFIX),
            BlobState::Leased { expires_at } => format!(
                "{}{}{}{}{}",
                self.base,
                BLOB_EXTENSION,
                LEASE_SEPARATOR,
                format_stamp(expires_at),
                LOCK_SUFFIX
            ),
        }
    }

    fn with_state(&self, state: BlobState) -> BlobName {
        BlobName {
            base: self.base.clone(),
            created: self.created,
            state,
        }
    }
}

impl fmt::Display for BlobName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.file_name())
    }
}

/// Base names are `<stamp>-<alphanumeric id>`.
fn parse_base(base: &str) -> Option<DateTime<Utc>> {
    if base.len() <= STAMP_LEN + 1 || !base.is_ascii() {
        return None;
    }
    let (stamp, rest) = base.split_at(STAMP_LEN);
    let id = rest.strip_prefix('-')?;
    if !id.bytes().all(|b| b.is_ascii_alphanumeric()) {
        return None;
    }
    parse_stamp(stamp)
}
