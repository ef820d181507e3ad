//! Error types and process exit-code encoding.
//!
//! The engine distinguishes fatal conditions (which abort a run) from
//! repairable on-disk anomalies (which are never represented as `Err`
//! values — see [`crate::walker::Anomaly`]). Keeping the two apart means
//! a caller can never accidentally let a fatal `?` swallow a condition
//! that was meant to be shown to the user and repaired.

use std::fmt;

/// Fatal conditions that abort a check pass immediately.
#[derive(Debug, thiserror::Error)]
pub enum CheckError {
    /// A read/write against the backing device failed outside of a
    /// read-test probe, or the device vanished mid-mmap.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// An internal invariant the engine relies on did not hold (e.g. a
    /// cross-link's reported owner could not be found while relinking,
    /// or auto-rename exhausted its attempt budget).
    #[error("internal error: {0}")]
    Internal(String),

    /// The on-disk structure is damaged beyond what a repair pass can
    /// recover from (both FAT copies corrupt, FAT32 root cluster out of
    /// range, bad boot-sector signature, ...).
    #[error("filesystem is unreadable: {0}")]
    Corrupt(String),

    /// The user declined to commit pending repairs.
    #[error("cancelled by user")]
    Cancelled,
}

bitflags::bitflags! {
    /// Process exit status, encoded as an additive bit field exactly as
    /// the original `dosfsck` exit codes are: callers can check
    /// `status.contains(ExitStatus::UNCORRECTED)` without decoding a
    /// plain integer.
    #[repr(transparent)]
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct ExitStatus: i32 {
        /// No errors found, nothing written.
        const CLEAN = 0;
        /// Filesystem errors were corrected.
        const CORRECTED = 1;
        /// The requested operation is not supported on this filesystem.
        const UNSUPPORTED = 2;
        /// Filesystem errors remain uncorrected.
        const UNCORRECTED = 4;
        /// An operational error occurred (I/O, allocation, ...).
        const OPERATIONAL = 8;
        /// Usage/syntax error.
        const SYNTAX = 16;
        /// The user cancelled the run.
        const USER_CANCEL = 32;
        /// A system call failed unexpectedly.
        const SYSCALL = 64;
    }
}

impl Default for ExitStatus {
    fn default() -> Self {
        ExitStatus::CLEAN
    }
}

impl From<ExitStatus> for i32 {
    fn from(value: ExitStatus) -> Self {
        value.bits()
    }
}

impl fmt::Display for ExitStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.bits())
    }
}

impl From<&CheckError> for ExitStatus {
    fn from(value: &CheckError) -> Self {
        match value {
            CheckError::Io(_) => ExitStatus::SYSCALL,
            CheckError::Internal(_) => ExitStatus::OPERATIONAL,
            CheckError::Corrupt(_) => ExitStatus::OPERATIONAL,
            CheckError::Cancelled => ExitStatus::USER_CANCEL,
        }
    }
}
