//! Exit codes for the spool CLI.
//!
//! Exit code ranges:
//! - 0-9: Operational outcomes (parse outcome from code, not output)
//! - 10-19: User/environment errors (recoverable by user action)
//! - 20-29: Storage and I/O errors

use spool_storage::StorageError;

/// Exit codes for spool operations.
///
/// These codes are a stable contract for scripts driving the CLI.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(i32)]
pub enum ExitCode {
    // ========================================================================
    // Operational Outcomes (0-9)
    // ========================================================================
    /// Success
    Clean = 0,

    /// Nothing to do (no blob available to take)
    NothingAvailable = 1,

    // ========================================================================
    // User / Environment Errors (10-19)
    // ========================================================================
    /// Invalid arguments or configuration
    ArgsError = 10,

    // ========================================================================
    // Storage and I/O Errors (20-29)
    // ========================================================================
    /// Storage operation failed
    StorageError = 20,

    /// Write refused: ceiling can't be met or payload larger than the ceiling
    CapacityError = 21,

    /// Reading the payload in or writing it out failed
    IoError = 22,
}

impl ExitCode {
    /// Convert to i32 for process exit.
    pub fn as_i32(self) -> i32 {
        self as i32
    }
}

impl From<&StorageError> for ExitCode {
    fn from(err: &StorageError) -> Self {
        match err {
            StorageError::InvalidConfig(_) => ExitCode::ArgsError,
            StorageError::CapacityExceeded { .. } | StorageError::PayloadTooLarge { .. } => {
                ExitCode::CapacityError
            }
            _ => ExitCode::StorageError,
        }
    }
}

impl std::fmt::Display for ExitCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            ExitCode::Clean => "clean",
            ExitCode::NothingAvailable => "nothing_available",
            ExitCode::ArgsError => "args_error",
            ExitCode::StorageError => "storage_error",
            ExitCode::CapacityError => "capacity_error",
            ExitCode::IoError => "io_error",
        };
        write!(f, "{}", name)
    }
}
