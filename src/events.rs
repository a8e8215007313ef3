use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::model::{FileOperation, OperationStatus};

/// Structured event emitted during a run.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Event {
    RunStarted {
        operation_id: Option<uuid::Uuid>,
        total: usize,
        pending: usize,
        dry_run: bool,
        resumed: bool,
    },
    OpPlanned {
        src: PathBuf,
        dst: PathBuf,
    },
    OpStarted {
        src: PathBuf,
        dst: PathBuf,
    },
    OpCompleted {
        src: PathBuf,
        dst: PathBuf,
        bytes: u64,
        checksum: String,
        duration_ms: u64,
    },
    OpFailed {
        src: PathBuf,
        dst: PathBuf,
        error: String,
    },
    OpSkipped {
        src: PathBuf,
        dst: PathBuf,
        reason: Option<String>,
    },
    RunCancelled {
        operation_id: Option<uuid::Uuid>,
        pending: usize,
    },
    RunFinished {
        operation_id: Option<uuid::Uuid>,
        completed: usize,
        failed: usize,
        skipped: usize,
        bytes_moved: u64,
    },
}

impl Event {
    /// The event describing a terminal operation, or `None` if it is not terminal.
    pub fn for_outcome(op: &FileOperation) -> Option<Self> {
        let src = op.source().path.clone();
        let dst = op.destination().to_path_buf();
        match op.status() {
            OperationStatus::Completed => Some(Event::OpCompleted {
                src,
                dst,
                bytes: op.source().size,
                checksum: op.checksum_dest().unwrap_or_default().to_string(),
                duration_ms: op.duration_ms(),
            }),
            OperationStatus::Failed => Some(Event::OpFailed {
                src,
                dst,
                error: op.error_message().unwrap_or_default().to_string(),
            }),
            OperationStatus::Skipped => Some(Event::OpSkipped {
                src,
                dst,
                reason: op.error_message().map(str::to_string),
            }),
            _ => None,
        }
    }
}
