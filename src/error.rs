//! Typed error definitions.
//!
//! Per-file failures (`MoveError`) are rendered into a `FileOperation` and never
//! abort a run. Everything else is run-level and propagates to the caller.

use std::path::PathBuf;
use thiserror::Error;
use uuid::Uuid;

use crate::model::OperationStatus;

/// Failure to pick a destination name.
#[derive(Debug, Error)]
pub enum ResolveError {
    #[error("too many duplicates of '{name}' in {}: gave up after {limit} attempts", folder.display())]
    TooManyDuplicates {
        name: String,
        folder: PathBuf,
        limit: u32,
    },

    #[error("invalid file name: {0:?}")]
    InvalidFilename(String),
}

/// Violation of the `FileOperation` state machine or its invariants.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum LedgerError {
    #[error("invalid transition from '{from}' to '{to}'")]
    InvalidTransition {
        from: OperationStatus,
        to: OperationStatus,
    },

    #[error("completed operation requires both checksums")]
    MissingChecksum,

    #[error("checksums differ: source={source_hash}, dest={dest_hash}")]
    ChecksumMismatch {
        source_hash: String,
        dest_hash: String,
    },

    #[error("failed operation requires an error message")]
    MissingErrorMessage,

    #[error("invalid destination path: {0:?}")]
    InvalidDestination(PathBuf),
}

/// Why a single verified move did not complete.
#[derive(Debug, Error)]
pub enum MoveError {
    #[error("failed to {action} {}: {source}", path.display())]
    Io {
        action: &'static str,
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("checksum mismatch after copy: source={source_hash}, dest={dest_hash}")]
    ChecksumMismatch {
        source_hash: String,
        dest_hash: String,
    },

    #[error("source no longer exists: {}", .0.display())]
    SourceMissing(PathBuf),

    #[error("destination already exists: {}", .0.display())]
    DestinationOccupied(PathBuf),

    #[error("source and destination are the same file: {}", .0.display())]
    SameFile(PathBuf),

    #[error("interrupted before the copy was confirmed")]
    Interrupted,
}

impl MoveError {
    pub(crate) fn io(action: &'static str, path: impl Into<PathBuf>) -> impl FnOnce(std::io::Error) -> Self {
        let path = path.into();
        move |source| MoveError::Io {
            action,
            path,
            source,
        }
    }
}

/// Resume store failures. Any of these makes progress tracking untrustworthy.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("resume store I/O error on {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to serialize resume point {id}: {source}")]
    Serialize {
        id: Uuid,
        #[source]
        source: serde_json::Error,
    },

    #[error("unreadable resume record {}: {source}", path.display())]
    Corrupt {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("no resumable operation with id {0}")]
    NotFound(String),

    #[error("operation id prefix '{0}' matches more than one resumable operation")]
    Ambiguous(String),
}

/// Configuration loading and validation failures.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("configuration file not found: {}", .0.display())]
    NotFound(PathBuf),

    #[error("cannot access configuration {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid configuration {}: {source}", path.display())]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },

    #[error("invalid configuration snapshot: {0}")]
    Snapshot(#[source] serde_json::Error),

    #[error("invalid configuration value for '{field}': {reason}")]
    Invalid { field: &'static str, reason: String },

    #[error("configuration already exists at {} (use --force to replace it)", .0.display())]
    AlreadyExists(PathBuf),

    #[error("cannot determine the home directory; set an explicit path")]
    NoHome,
}

/// Conditions that abort a whole organize or resume run.
#[derive(Debug, Error)]
pub enum RunError {
    #[error("operation ledger violated: {0}")]
    Ledger(#[from] LedgerError),

    #[error("progress could not be persisted: {0}")]
    Persistence(#[from] StoreError),
}
