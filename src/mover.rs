//! Verified copy-then-delete move of a single file.
//!
//! `pending -> copying -> verifying -> completed`, or `failed` from any
//! non-terminal step. The source is removed only after the staged copy has
//! passed verification (or verification is disabled) and has been renamed
//! into place.

use std::fs;
use std::io;
use std::path::Path;

use tempfile::NamedTempFile;
use tracing::{debug, info, warn};

use crate::error::{LedgerError, MoveError};
use crate::fsops;
use crate::model::{FileOperation, UNVERIFIED_CHECKSUM};
use crate::shutdown::CancelFlag;

type Hasher = fn(&Path) -> io::Result<String>;

/// Executes one `FileOperation` at a time.
#[derive(Debug, Clone)]
pub struct Mover {
    verify: bool,
    overwrite: bool,
    cancel: CancelFlag,
    hasher: Hasher,
}

impl Mover {
    pub fn new(verify: bool, cancel: CancelFlag) -> Self {
        Self {
            verify,
            overwrite: false,
            cancel,
            hasher: fsops::sha256_file,
        }
    }

    #[cfg(test)]
    fn with_hasher(mut self, hasher: Hasher) -> Self {
        self.hasher = hasher;
        self
    }

    /// Allow the final rename to replace an existing destination file.
    pub fn with_overwrite(mut self, overwrite: bool) -> Self {
        self.overwrite = overwrite;
        self
    }

    /// Drive a `pending` operation to a terminal status.
    ///
    /// I/O problems end in `failed` with the detail recorded on the operation;
    /// only a state-machine violation is returned as an error.
    pub fn execute(&self, op: &mut FileOperation) -> Result<(), LedgerError> {
        op.begin_copy()?;
        let staged = match self.stage(op) {
            Ok(staged) => staged,
            Err(err) => return self.record_failure(op, err),
        };

        op.begin_verify()?;
        match self.verify_and_commit(op, staged) {
            Ok((checksum_source, checksum_dest)) => {
                op.complete(checksum_source, checksum_dest)?;
                info!(
                    src = %op.source().path.display(),
                    dest = %op.destination().display(),
                    "moved file"
                );
                Ok(())
            }
            Err(err) => self.record_failure(op, err),
        }
    }

    fn stage(&self, op: &FileOperation) -> Result<NamedTempFile, MoveError> {
        let src = &op.source().path;
        let dest = op.destination();
        if fs::symlink_metadata(src).is_err() {
            return Err(MoveError::SourceMissing(src.clone()));
        }
        if fsops::same_file(src, dest) {
            return Err(MoveError::SameFile(dest.to_path_buf()));
        }
        let dest_dir = dest.parent().unwrap_or_else(|| Path::new("."));
        fs::create_dir_all(dest_dir).map_err(MoveError::io("create directory", dest_dir))?;

        let (staged, bytes) = fsops::stage_copy(src, dest_dir, &self.cancel)?;
        debug!(src = %src.display(), staged = %staged.path().display(), bytes, "copied to staging file");
        Ok(staged)
    }

    fn verify_and_commit(
        &self,
        op: &FileOperation,
        staged: NamedTempFile,
    ) -> Result<(String, String), MoveError> {
        let src = op.source().path.as_path();
        let dest = op.destination();

        let checksums = if self.verify {
            let source_hash = (self.hasher)(src).map_err(MoveError::io("hash", src))?;
            let dest_hash =
                (self.hasher)(staged.path()).map_err(MoveError::io("hash", staged.path()))?;
            if source_hash != dest_hash {
                return Err(MoveError::ChecksumMismatch {
                    source_hash,
                    dest_hash,
                });
            }
            (source_hash, dest_hash)
        } else {
            (UNVERIFIED_CHECKSUM.to_string(), UNVERIFIED_CHECKSUM.to_string())
        };

        if self.cancel.is_requested() {
            return Err(MoveError::Interrupted);
        }

        let src_meta = fs::metadata(src).map_err(MoveError::io("stat", src))?;
        if let Err(e) = fsops::copy_times(&src_meta, staged.path()) {
            debug!(error = %e, dest = %dest.display(), "could not carry over timestamps");
        }

        let persisted = if self.overwrite {
            staged.persist(dest)
        } else {
            staged.persist_noclobber(dest)
        };
        if let Err(e) = persisted {
            return Err(if e.error.kind() == std::io::ErrorKind::AlreadyExists {
                MoveError::DestinationOccupied(dest.to_path_buf())
            } else {
                MoveError::io("rename into", dest)(e.error)
            });
        }
        if let Some(dir) = dest.parent()
            && let Err(e) = fsops::sync_dir(dir)
        {
            debug!(error = %e, dir = %dir.display(), "directory sync failed");
        }

        fs::remove_file(src).map_err(MoveError::io("remove source", src))?;
        Ok(checksums)
    }

    fn record_failure(&self, op: &mut FileOperation, err: MoveError) -> Result<(), LedgerError> {
        warn!(
            src = %op.source().path.display(),
            dest = %op.destination().display(),
            error = %err,
            "move failed"
        );
        op.fail(err.to_string())
    }
}
