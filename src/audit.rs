//! JSON-lines audit log of runs that move files.
//!
//! One record per line: timestamp, level, operation id, message, the file
//! concerned and free-form context. Records are flushed as they are written so
//! an interrupted run still leaves a complete log of what happened.

use anyhow::{Context, Result};
use chrono::{DateTime, Local, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fs::{self, File, OpenOptions};
use std::io::{self, BufRead, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};
use uuid::Uuid;

use crate::events::Event;
use crate::reporter::ProgressSink;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "UPPERCASE")]
pub enum LogLevel {
    Debug,
    Info,
    Warning,
    Error,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LogEntry {
    pub timestamp: DateTime<Utc>,
    pub level: LogLevel,
    pub operation_id: String,
    pub message: String,
    #[serde(default)]
    pub file_path: Option<PathBuf>,
    #[serde(default)]
    pub error_type: Option<String>,
    #[serde(default)]
    pub context: Map<String, Value>,
}

impl LogEntry {
    fn new(level: LogLevel, operation_id: &str, message: &str) -> Self {
        Self {
            timestamp: Utc::now(),
            level,
            operation_id: operation_id.to_string(),
            message: message.to_string(),
            file_path: None,
            error_type: None,
            context: Map::new(),
        }
    }

    fn file(mut self, path: &Path) -> Self {
        self.file_path = Some(path.to_path_buf());
        self
    }

    fn with(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.context.insert(key.to_string(), value.into());
        self
    }

    /// The record for `event`, or `None` for events that are not logged.
    pub fn from_event(operation_id: &str, event: &Event) -> Option<Self> {
        let entry = match event {
            Event::RunStarted {
                total,
                pending,
                resumed,
                ..
            } => {
                let message = if *resumed {
                    "operation resumed"
                } else {
                    "operation started"
                };
                LogEntry::new(LogLevel::Info, operation_id, message)
                    .with("total", *total)
                    .with("pending", *pending)
            }
            Event::OpPlanned { .. } | Event::OpStarted { .. } => return None,
            Event::OpCompleted {
                src,
                dst,
                bytes,
                checksum,
                duration_ms,
            } => LogEntry::new(LogLevel::Info, operation_id, "moved file")
                .file(src)
                .with("destination", dst.display().to_string())
                .with("bytes", *bytes)
                .with("checksum", checksum.as_str())
                .with("duration_ms", *duration_ms),
            Event::OpFailed { src, dst, error } => {
                let mut entry = LogEntry::new(LogLevel::Error, operation_id, "move failed")
                    .file(src)
                    .with("destination", dst.display().to_string())
                    .with("error", error.as_str());
                entry.error_type = Some("move_failed".to_string());
                entry
            }
            Event::OpSkipped { src, dst, reason } => {
                let entry = LogEntry::new(LogLevel::Warning, operation_id, "skipped file")
                    .file(src)
                    .with("destination", dst.display().to_string());
                match reason {
                    Some(reason) => entry.with("reason", reason.as_str()),
                    None => entry,
                }
            }
            Event::RunCancelled { pending, .. } => {
                LogEntry::new(LogLevel::Warning, operation_id, "operation interrupted")
                    .with("pending", *pending)
            }
            Event::RunFinished {
                completed,
                failed,
                skipped,
                bytes_moved,
                ..
            } => LogEntry::new(LogLevel::Info, operation_id, "operation finished")
                .with("completed", *completed)
                .with("failed", *failed)
                .with("skipped", *skipped)
                .with("bytes_moved", *bytes_moved),
        };
        Some(entry)
    }
}

/// Read back every record of a log file.
pub fn read_log(path: &Path) -> Result<Vec<LogEntry>> {
    let file =
        File::open(path).with_context(|| format!("cannot open log {}", path.display()))?;
    let mut entries = Vec::new();
    for (idx, line) in BufReader::new(file).lines().enumerate() {
        let line = line.with_context(|| format!("cannot read log {}", path.display()))?;
        if line.trim().is_empty() {
            continue;
        }
        let entry = serde_json::from_str(&line)
            .with_context(|| format!("{}:{}: invalid log record", path.display(), idx + 1))?;
        entries.push(entry);
    }
    Ok(entries)
}

#[derive(Debug)]
enum Target {
    /// Append to exactly this file.
    File(PathBuf),
    /// Create one file per run in this directory.
    Dir(PathBuf),
}

/// Audit log sink. The file is opened when the run starts.
///
/// Write failures are reported once with `warn!` and then ignored; the log
/// never aborts a move.
#[derive(Debug)]
pub struct AuditLog {
    target: Target,
    operation_id: Option<String>,
    path: Option<PathBuf>,
    writer: Option<BufWriter<File>>,
    broken: bool,
}

impl AuditLog {
    pub fn to_file(path: impl Into<PathBuf>) -> Self {
        Self::with_target(Target::File(path.into()))
    }

    /// One `<timestamp>-<id prefix>.jsonl` file per run inside `dir`.
    pub fn in_dir(dir: impl Into<PathBuf>) -> Self {
        Self::with_target(Target::Dir(dir.into()))
    }

    fn with_target(target: Target) -> Self {
        Self {
            target,
            operation_id: None,
            path: None,
            writer: None,
            broken: false,
        }
    }

    /// Where records are written, once the run has started.
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    fn open(&mut self, operation_id: &str) -> io::Result<()> {
        let path = match &self.target {
            Target::File(path) => path.clone(),
            Target::Dir(dir) => {
                let prefix = operation_id.get(..8).unwrap_or(operation_id);
                let stamp = Local::now().format("%Y%m%d-%H%M%S");
                dir.join(format!("{stamp}-{prefix}.jsonl"))
            }
        };
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }
        let file = OpenOptions::new().create(true).append(true).open(&path)?;
        debug!(path = %path.display(), "writing audit log");
        self.writer = Some(BufWriter::new(file));
        self.path = Some(path);
        Ok(())
    }

    fn write(&mut self, entry: &LogEntry) -> io::Result<()> {
        let Some(writer) = self.writer.as_mut() else {
            return Ok(());
        };
        serde_json::to_writer(&mut *writer, entry)?;
        writer.write_all(b"\n")?;
        writer.flush()
    }

    fn give_up(&mut self, error: io::Error) {
        warn!(error = %error, "audit log disabled");
        self.broken = true;
        self.writer = None;
    }
}

impl ProgressSink for AuditLog {
    fn record(&mut self, event: Event) {
        if self.broken {
            return;
        }
        if let Event::RunStarted { operation_id, .. } = &event
            && self.writer.is_none()
        {
            let id = operation_id.unwrap_or_else(Uuid::new_v4).to_string();
            if let Err(e) = self.open(&id) {
                self.give_up(e);
                return;
            }
            self.operation_id = Some(id);
        }
        let Some(entry) = self
            .operation_id
            .as_deref()
            .and_then(|id| LogEntry::from_event(id, &event))
        else {
            return;
        };
        if let Err(e) = self.write(&entry) {
            self.give_up(e);
        }
    }
}
