//! Durable resume records.
//!
//! One JSON document per operation id, `<dir>/<uuid>.json`, rewritten as a
//! whole after every step. Writes go to a temporary file in the same directory
//! which is synced and then renamed over the previous record, so a crash leaves
//! either the old or the new snapshot and never a torn one.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::config::Config;
use crate::error::{ConfigError, StoreError};
use crate::fsops;
use crate::model::FileOperation;

const RECORD_EXTENSION: &str = "json";

/// Kind of run a resume point belongs to.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum OperationType {
    Organize,
    Apply,
}

impl std::fmt::Display for OperationType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Self::Organize => "organize",
            Self::Apply => "apply",
        })
    }
}

/// Snapshot of one in-flight run.
///
/// `completed` holds every operation that reached a terminal status, in the
/// order it got there; `pending` holds the rest in plan order. Together they
/// always make up the full original plan.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResumePoint {
    pub operation_id: Uuid,
    pub operation_type: OperationType,
    pub source_path: PathBuf,
    /// The exact settings the run started with.
    pub config_snapshot: serde_json::Value,
    pub completed: Vec<FileOperation>,
    pub pending: Vec<FileOperation>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl ResumePoint {
    /// Split `planned` into terminal and pending operations under a new id.
    pub fn new(
        operation_type: OperationType,
        source_path: PathBuf,
        config: &Config,
        planned: Vec<FileOperation>,
    ) -> Result<Self, StoreError> {
        let operation_id = Uuid::new_v4();
        let config_snapshot = serde_json::to_value(config).map_err(|source| StoreError::Serialize {
            id: operation_id,
            source,
        })?;
        let (completed, pending) = planned.into_iter().partition(FileOperation::is_terminal);
        let now = Utc::now();
        Ok(Self {
            operation_id,
            operation_type,
            source_path,
            config_snapshot,
            completed,
            pending,
            created_at: now,
            updated_at: now,
        })
    }

    /// Parse the configuration snapshot back into settings.
    pub fn config(&self) -> Result<Config, ConfigError> {
        let config: Config =
            serde_json::from_value(self.config_snapshot.clone()).map_err(ConfigError::Snapshot)?;
        config.validate()?;
        Ok(config)
    }

    /// Append a finished operation and replace the pending list.
    pub fn advance(&mut self, completed: Option<FileOperation>, remaining: Vec<FileOperation>) {
        if let Some(op) = completed {
            self.completed.push(op);
        }
        self.pending = remaining;
        self.updated_at = Utc::now();
    }

    pub fn total(&self) -> usize {
        self.completed.len() + self.pending.len()
    }

    /// First 12 characters of the id, for display.
    pub fn short_id(&self) -> String {
        self.operation_id.simple().to_string()[..12].to_string()
    }
}

/// Directory of resume records.
#[derive(Debug, Clone)]
pub struct ResumeStore {
    dir: PathBuf,
}

impl ResumeStore {
    /// Open (and create if needed) the store directory.
    pub fn open(dir: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let dir = dir.into();
        fs::create_dir_all(&dir).map_err(|source| StoreError::Io {
            path: dir.clone(),
            source,
        })?;
        Ok(Self { dir })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn record_path(&self, id: Uuid) -> PathBuf {
        self.dir.join(format!("{}.{RECORD_EXTENSION}", id))
    }

    /// Create and persist a new resume point for `planned`.
    pub fn create(
        &self,
        operation_type: OperationType,
        source_path: PathBuf,
        config: &Config,
        planned: Vec<FileOperation>,
    ) -> Result<ResumePoint, StoreError> {
        let point = ResumePoint::new(operation_type, source_path, config, planned)?;
        self.save(&point)?;
        debug!(id = %point.operation_id, pending = point.pending.len(), "created resume point");
        Ok(point)
    }

    /// Record one finished operation and the remaining work, then persist.
    pub fn update(
        &self,
        point: &mut ResumePoint,
        completed: Option<FileOperation>,
        remaining: Vec<FileOperation>,
    ) -> Result<(), StoreError> {
        point.advance(completed, remaining);
        self.save(point)
    }

    /// Atomically replace the stored record with `point`.
    pub fn save(&self, point: &ResumePoint) -> Result<(), StoreError> {
        let path = self.record_path(point.operation_id);
        let io_err = |source: std::io::Error| StoreError::Io {
            path: path.clone(),
            source,
        };
        let json = serde_json::to_vec_pretty(point).map_err(|source| StoreError::Serialize {
            id: point.operation_id,
            source,
        })?;

        let mut tmp = tempfile::Builder::new()
            .prefix(".resume.")
            .suffix(".tmp")
            .tempfile_in(&self.dir)
            .map_err(io_err)?;
        tmp.write_all(&json).map_err(io_err)?;
        tmp.as_file().sync_all().map_err(io_err)?;
        tmp.persist(&path).map_err(|e| io_err(e.error))?;
        if let Err(e) = fsops::sync_dir(&self.dir) {
            debug!(error = %e, "resume directory sync failed");
        }
        Ok(())
    }

    pub fn load(&self, id: Uuid) -> Result<Option<ResumePoint>, StoreError> {
        let path = self.record_path(id);
        if !path.exists() {
            return Ok(None);
        }
        read_record(&path).map(Some)
    }

    /// Load by full id or by an unambiguous prefix of at least 8 hex digits.
    pub fn find(&self, id_or_prefix: &str) -> Result<ResumePoint, StoreError> {
        if let Ok(id) = Uuid::parse_str(id_or_prefix) {
            return self
                .load(id)?
                .ok_or_else(|| StoreError::NotFound(id_or_prefix.to_string()));
        }
        let prefix = id_or_prefix.replace('-', "").to_lowercase();
        if prefix.len() < 8 {
            return Err(StoreError::NotFound(id_or_prefix.to_string()));
        }
        let mut matches: Vec<ResumePoint> = self
            .list()?
            .into_iter()
            .filter(|p| p.operation_id.simple().to_string().starts_with(&prefix))
            .collect();
        match matches.len() {
            0 => Err(StoreError::NotFound(id_or_prefix.to_string())),
            1 => Ok(matches.remove(0)),
            _ => Err(StoreError::Ambiguous(id_or_prefix.to_string())),
        }
    }

    /// All readable records, oldest first. Unreadable records are logged and skipped.
    pub fn list(&self) -> Result<Vec<ResumePoint>, StoreError> {
        let entries = fs::read_dir(&self.dir).map_err(|source| StoreError::Io {
            path: self.dir.clone(),
            source,
        })?;
        let mut points: Vec<ResumePoint> = entries
            .filter_map(Result::ok)
            .map(|e| e.path())
            .filter(|p| is_record(p))
            .filter_map(|p| match read_record(&p) {
                Ok(point) => Some(point),
                Err(e) => {
                    warn!(error = %e, "ignoring unreadable resume record");
                    None
                }
            })
            .collect();
        points.sort_by_key(|p| p.created_at);
        Ok(points)
    }

    /// Records that still have work left.
    pub fn interrupted(&self) -> Result<Vec<ResumePoint>, StoreError> {
        Ok(self
            .list()?
            .into_iter()
            .filter(|p| !p.pending.is_empty())
            .collect())
    }

    pub fn delete(&self, id: Uuid) -> Result<(), StoreError> {
        let path = self.record_path(id);
        match fs::remove_file(&path) {
            Ok(()) => {
                debug!(%id, "deleted resume point");
                Ok(())
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(source) => Err(StoreError::Io { path, source }),
        }
    }

    /// Delete records not updated within `max_age`. Returns how many were removed.
    pub fn cleanup_older_than(&self, max_age: Duration) -> Result<usize, StoreError> {
        let Some(cutoff) = chrono::Duration::from_std(max_age)
            .ok()
            .and_then(|age| Utc::now().checked_sub_signed(age))
        else {
            return Ok(0);
        };
        let mut removed = 0;
        for point in self.list()? {
            if point.updated_at < cutoff {
                self.delete(point.operation_id)?;
                removed += 1;
            }
        }
        Ok(removed)
    }
}

fn is_record(path: &Path) -> bool {
    path.extension().and_then(|e| e.to_str()) == Some(RECORD_EXTENSION)
        && path
            .file_stem()
            .and_then(|s| s.to_str())
            .is_some_and(|s| Uuid::parse_str(s).is_ok())
}

fn read_record(path: &Path) -> Result<ResumePoint, StoreError> {
    let bytes = fs::read(path).map_err(|source| StoreError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    serde_json::from_slice(&bytes).map_err(|source| StoreError::Corrupt {
        path: path.to_path_buf(),
        source,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::media_file;
    use std::sync::Arc;
    use tempfile::tempdir;

    fn planned(root: &Path, names: &[&str]) -> Vec<FileOperation> {
        names
            .iter()
            .map(|n| {
                let src = Arc::new(media_file(&root.join(n)));
                FileOperation::new(src, root.join("out").join(n)).unwrap()
            })
            .collect()
    }

    #[test]
    fn create_then_load_round_trips() {
        let dir = tempdir().unwrap();
        let store = ResumeStore::open(dir.path().join("resume")).unwrap();
        let point = store
            .create(
                OperationType::Organize,
                dir.path().to_path_buf(),
                &Config::default(),
                planned(dir.path(), &["a.jpg", "b.jpg"]),
            )
            .unwrap();

        let loaded = store.load(point.operation_id).unwrap().unwrap();
        assert_eq!(loaded.pending.len(), 2);
        assert!(loaded.completed.is_empty());
        assert_eq!(loaded.pending, point.pending);
        assert_eq!(loaded.config().unwrap(), Config::default());
    }

    #[test]
    fn update_moves_work_from_pending_to_completed() {
        let dir = tempdir().unwrap();
        let store = ResumeStore::open(dir.path()).unwrap();
        let mut point = store
            .create(
                OperationType::Organize,
                dir.path().to_path_buf(),
                &Config::default(),
                planned(dir.path(), &["a.jpg", "b.jpg", "c.jpg"]),
            )
            .unwrap();

        let mut first = point.pending[0].clone();
        first.skip(Some("test".into())).unwrap();
        let remaining = point.pending[1..].to_vec();
        store.update(&mut point, Some(first), remaining).unwrap();

        let loaded = store.load(point.operation_id).unwrap().unwrap();
        assert_eq!(loaded.completed.len(), 1);
        assert_eq!(loaded.pending.len(), 2);
        assert_eq!(loaded.total(), 3);
    }

    #[test]
    fn save_leaves_no_temporary_files() {
        let dir = tempdir().unwrap();
        let store = ResumeStore::open(dir.path()).unwrap();
        let point = store
            .create(
                OperationType::Organize,
                dir.path().to_path_buf(),
                &Config::default(),
                planned(dir.path(), &["a.jpg"]),
            )
            .unwrap();
        store.save(&point).unwrap();

        let names: Vec<String> = fs::read_dir(dir.path())
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        assert_eq!(names, vec![format!("{}.json", point.operation_id)]);
    }

    #[test]
    fn list_skips_corrupt_records_and_delete_removes() {
        let dir = tempdir().unwrap();
        let store = ResumeStore::open(dir.path()).unwrap();
        let point = store
            .create(
                OperationType::Organize,
                dir.path().to_path_buf(),
                &Config::default(),
                planned(dir.path(), &["a.jpg"]),
            )
            .unwrap();
        fs::write(dir.path().join(format!("{}.json", Uuid::new_v4())), "{ torn").unwrap();

        let listed = store.list().unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(store.interrupted().unwrap().len(), 1);

        store.delete(point.operation_id).unwrap();
        assert!(store.load(point.operation_id).unwrap().is_none());
        store.delete(point.operation_id).unwrap();
    }

    #[test]
    fn find_accepts_unambiguous_prefix() {
        let dir = tempdir().unwrap();
        let store = ResumeStore::open(dir.path()).unwrap();
        let point = store
            .create(
                OperationType::Organize,
                dir.path().to_path_buf(),
                &Config::default(),
                planned(dir.path(), &["a.jpg"]),
            )
            .unwrap();

        let found = store.find(&point.short_id()).unwrap();
        assert_eq!(found.operation_id, point.operation_id);
        assert!(matches!(store.find("abc"), Err(StoreError::NotFound(_))));
    }

    #[test]
    fn cleanup_removes_stale_records() {
        let dir = tempdir().unwrap();
        let store = ResumeStore::open(dir.path()).unwrap();
        let mut point = store
            .create(
                OperationType::Organize,
                dir.path().to_path_buf(),
                &Config::default(),
                planned(dir.path(), &["a.jpg"]),
            )
            .unwrap();
        point.updated_at = Utc::now() - chrono::Duration::days(10);
        store.save(&point).unwrap();

        assert_eq!(store.cleanup_older_than(Duration::from_secs(7 * 86_400)).unwrap(), 1);
        assert!(store.list().unwrap().is_empty());
    }

    #[test]
    fn tampered_snapshot_fails_to_parse() {
        let dir = tempdir().unwrap();
        let store = ResumeStore::open(dir.path()).unwrap();
        let mut point = store
            .create(
                OperationType::Organize,
                dir.path().to_path_buf(),
                &Config::default(),
                planned(dir.path(), &["a.jpg"]),
            )
            .unwrap();
        point.config_snapshot["duplicate_handling"] = serde_json::json!("explode");
        assert!(point.config().is_err());
    }
}
