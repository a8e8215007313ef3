use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::error::LedgerError;

/// Checksum recorded on both sides when verification is disabled.
pub const UNVERIFIED_CHECKSUM: &str = "unverified";

/// A discovered source file. Read-only once scanned.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct MediaFile {
    /// Absolute path of the file.
    pub path: PathBuf,
    /// File name component of `path`.
    pub filename: String,
    /// Size in bytes.
    pub size: u64,
    /// Best-known timestamp (oldest of the available dates).
    pub timestamp: DateTime<Utc>,
    /// Lowercase extension including the leading dot, or empty.
    pub file_type: String,
    /// Whether the extension is one of the configured media types.
    pub is_media: bool,
    /// Why the file could not be inspected. A file with an error is never moved.
    #[serde(default)]
    pub error: Option<String>,
}

impl MediaFile {
    /// Whether the move engine may touch this file.
    pub fn is_eligible(&self) -> bool {
        self.error.is_none()
    }
}

/// Status of a single file move.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, JsonSchema, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum OperationStatus {
    Pending,
    Copying,
    Verifying,
    Completed,
    Failed,
    Skipped,
}

impl OperationStatus {
    /// No transition is permitted out of a terminal status.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Skipped)
    }

    pub fn can_transition_to(self, next: Self) -> bool {
        use OperationStatus::*;
        matches!(
            (self, next),
            (Pending, Copying | Skipped | Failed)
                | (Copying, Verifying | Failed)
                | (Verifying, Completed | Failed)
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Copying => "copying",
            Self::Verifying => "verifying",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Skipped => "skipped",
        }
    }
}

impl fmt::Display for OperationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One planned or executed move.
///
/// The operation shares its `MediaFile` with the plan and never mutates it.
/// Status changes go through the transition methods, which enforce the state
/// machine and the terminal invariants.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FileOperation {
    source: Arc<MediaFile>,
    destination: PathBuf,
    status: OperationStatus,
    #[serde(default)]
    error_message: Option<String>,
    #[serde(default)]
    checksum_source: Option<String>,
    #[serde(default)]
    checksum_dest: Option<String>,
    started_at: DateTime<Utc>,
    #[serde(default)]
    duration_ms: u64,
}

impl FileOperation {
    /// Create a `pending` operation.
    pub fn new(source: Arc<MediaFile>, destination: PathBuf) -> Result<Self, LedgerError> {
        check_destination(&destination)?;
        Ok(Self {
            source,
            destination,
            status: OperationStatus::Pending,
            error_message: None,
            checksum_source: None,
            checksum_dest: None,
            started_at: Utc::now(),
            duration_ms: 0,
        })
    }

    pub fn source(&self) -> &MediaFile {
        &self.source
    }

    pub fn source_handle(&self) -> &Arc<MediaFile> {
        &self.source
    }

    pub fn destination(&self) -> &Path {
        &self.destination
    }

    pub fn status(&self) -> OperationStatus {
        self.status
    }

    /// Failure detail, or the reason for a skip.
    pub fn error_message(&self) -> Option<&str> {
        self.error_message.as_deref()
    }

    pub fn checksum_source(&self) -> Option<&str> {
        self.checksum_source.as_deref()
    }

    pub fn checksum_dest(&self) -> Option<&str> {
        self.checksum_dest.as_deref()
    }

    pub fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }

    pub fn duration_ms(&self) -> u64 {
        self.duration_ms
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    pub fn is_successful(&self) -> bool {
        self.status == OperationStatus::Completed
    }

    /// `pending -> copying`. Restarts the clock.
    pub fn begin_copy(&mut self) -> Result<(), LedgerError> {
        self.transition(OperationStatus::Copying)?;
        self.started_at = Utc::now();
        Ok(())
    }

    /// `copying -> verifying`.
    pub fn begin_verify(&mut self) -> Result<(), LedgerError> {
        self.transition(OperationStatus::Verifying)
    }

    /// `verifying -> completed`. Both checksums must be present and equal.
    pub fn complete(
        &mut self,
        checksum_source: String,
        checksum_dest: String,
    ) -> Result<(), LedgerError> {
        check_checksums(Some(&checksum_source), Some(&checksum_dest))?;
        self.transition(OperationStatus::Completed)?;
        self.checksum_source = Some(checksum_source);
        self.checksum_dest = Some(checksum_dest);
        self.stop_clock();
        Ok(())
    }

    /// Any non-terminal status `-> failed`.
    pub fn fail(&mut self, message: impl Into<String>) -> Result<(), LedgerError> {
        let message = message.into();
        if message.trim().is_empty() {
            return Err(LedgerError::MissingErrorMessage);
        }
        self.transition(OperationStatus::Failed)?;
        self.error_message = Some(message);
        self.stop_clock();
        Ok(())
    }

    /// `pending -> skipped`, optionally recording why.
    pub fn skip(&mut self, reason: Option<String>) -> Result<(), LedgerError> {
        self.transition(OperationStatus::Skipped)?;
        self.error_message = reason;
        Ok(())
    }

    /// A fresh `pending` operation for the same source and destination.
    pub fn requeue(&self) -> Self {
        Self {
            source: Arc::clone(&self.source),
            destination: self.destination.clone(),
            status: OperationStatus::Pending,
            error_message: None,
            checksum_source: None,
            checksum_dest: None,
            started_at: Utc::now(),
            duration_ms: 0,
        }
    }

    /// Re-check the invariants of a record that did not come through the
    /// transition methods, e.g. one read back from disk.
    pub fn validate(&self) -> Result<(), LedgerError> {
        check_destination(&self.destination)?;
        match self.status {
            OperationStatus::Completed => check_checksums(
                self.checksum_source.as_deref(),
                self.checksum_dest.as_deref(),
            ),
            OperationStatus::Failed => match self.error_message.as_deref() {
                Some(msg) if !msg.trim().is_empty() => Ok(()),
                _ => Err(LedgerError::MissingErrorMessage),
            },
            _ => Ok(()),
        }
    }

    fn transition(&mut self, next: OperationStatus) -> Result<(), LedgerError> {
        if !self.status.can_transition_to(next) {
            return Err(LedgerError::InvalidTransition {
                from: self.status,
                to: next,
            });
        }
        tracing::trace!(
            src = %self.source.path.display(),
            from = %self.status,
            to = %next,
            "operation transition"
        );
        self.status = next;
        Ok(())
    }

    fn stop_clock(&mut self) {
        let elapsed = Utc::now() - self.started_at;
        self.duration_ms = elapsed.num_milliseconds().max(0) as u64;
    }
}

fn check_destination(path: &Path) -> Result<(), LedgerError> {
    let bytes = path.as_os_str().as_encoded_bytes();
    if bytes.is_empty() || bytes.contains(&0) || path.file_name().is_none() {
        return Err(LedgerError::InvalidDestination(path.to_path_buf()));
    }
    Ok(())
}

fn check_checksums(source: Option<&str>, dest: Option<&str>) -> Result<(), LedgerError> {
    match (source, dest) {
        (Some(s), Some(d)) if !s.is_empty() && !d.is_empty() => {
            if s == d {
                Ok(())
            } else {
                Err(LedgerError::ChecksumMismatch {
                    source_hash: s.to_string(),
                    dest_hash: d.to_string(),
                })
            }
        }
        _ => Err(LedgerError::MissingChecksum),
    }
}

/// What to do when the destination name is already taken.
#[derive(
    Debug, Clone, Copy, Default, Serialize, Deserialize, JsonSchema, PartialEq, Eq, clap::ValueEnum,
)]
#[serde(rename_all = "lowercase")]
pub enum DuplicatePolicy {
    /// Try `name_1.ext`, `name_2.ext`, ... until a free name is found.
    #[default]
    Increment,
    /// Leave the source in place and record the file as skipped.
    Skip,
    /// Replace the existing destination file.
    Overwrite,
}

impl fmt::Display for DuplicatePolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Increment => "increment",
            Self::Skip => "skip",
            Self::Overwrite => "overwrite",
        })
    }
}

/// Files destined for one target folder, in move order.
#[derive(Debug, Clone)]
pub struct FolderGroup {
    pub folder: PathBuf,
    pub files: Vec<Arc<MediaFile>>,
}

/// Ordered `target folder -> files` grouping handed to the orchestrator.
#[derive(Debug, Clone)]
pub struct Plan {
    /// Directory the files were collected from; recorded in the resume point.
    pub source_root: PathBuf,
    pub groups: Vec<FolderGroup>,
}

impl Plan {
    /// Build a plan from a `folder name -> files` grouping. Folder names are
    /// joined onto `target_root`; groups are ordered by folder name.
    pub fn from_grouping(
        source_root: impl Into<PathBuf>,
        target_root: &Path,
        grouping: BTreeMap<String, Vec<MediaFile>>,
    ) -> Self {
        let groups = grouping
            .into_iter()
            .map(|(name, files)| FolderGroup {
                folder: target_root.join(name),
                files: files.into_iter().map(Arc::new).collect(),
            })
            .collect();
        Self {
            source_root: source_root.into(),
            groups,
        }
    }

    pub fn len(&self) -> usize {
        self.groups.iter().map(|g| g.files.len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Externally produced grouping accepted by `picsort apply`.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct PlanManifest {
    /// Absolute directory the date folders are created in.
    pub target_root: PathBuf,
    /// Directory recorded as the operation source; defaults to `target_root`.
    #[serde(default)]
    pub source_root: Option<PathBuf>,
    /// Folder name (relative to `target_root`) to the absolute paths of the
    /// files that belong in it, in move order.
    pub folders: BTreeMap<String, Vec<PathBuf>>,
}

/// Generate JSON Schema for the plan manifest.
pub fn generate_schema() -> String {
    let schema = schemars::schema_for!(PlanManifest);
    serde_json::to_string_pretty(&schema).expect("failed to serialize schema")
}

/// Load a plan manifest from a JSON file.
pub fn load_manifest(path: &Path) -> Result<PlanManifest> {
    let file = std::fs::File::open(path)
        .with_context(|| format!("cannot open plan manifest {}", path.display()))?;
    let reader = std::io::BufReader::new(file);
    let manifest = serde_json::from_reader(reader)
        .with_context(|| format!("invalid plan manifest {}", path.display()))?;
    Ok(manifest)
}

/// Parse a plan manifest from a JSON string.
pub fn manifest_from_json(json: &str) -> Result<PlanManifest> {
    let manifest = serde_json::from_str(json)?;
    Ok(manifest)
}

#[cfg(test)]
pub(crate) fn media_file(path: &Path) -> MediaFile {
    MediaFile {
        path: path.to_path_buf(),
        filename: path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default(),
        size: 1,
        timestamp: Utc::now(),
        file_type: path
            .extension()
            .map(|e| format!(".{}", e.to_string_lossy().to_lowercase()))
            .unwrap_or_default(),
        is_media: true,
        error: None,
    }
}
