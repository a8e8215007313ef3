use std::fs::{File, Metadata};
use std::io::{self, BufReader, Read, Write};
use std::path::Path;

use filetime::FileTime;
use sha2::{Digest, Sha256};
use tempfile::NamedTempFile;

use crate::error::MoveError;
use crate::shutdown::CancelFlag;

/// Hidden staging files are named `.picsort.<random>.part`.
pub const STAGING_PREFIX: &str = ".picsort.";
pub const STAGING_SUFFIX: &str = ".part";

const CHUNK_SIZE: usize = 256 * 1024;

/// Whether `name` looks like one of our staging files.
pub fn is_staging_name(name: &str) -> bool {
    name.starts_with(STAGING_PREFIX) && name.ends_with(STAGING_SUFFIX)
}

/// Copy `src` into a fresh staging file inside `dest_dir`.
///
/// The staging file is flushed and synced before it is returned. It is removed
/// automatically if dropped without being persisted, so an aborted copy leaves
/// nothing behind under a real name.
pub fn stage_copy(
    src: &Path,
    dest_dir: &Path,
    cancel: &CancelFlag,
) -> Result<(NamedTempFile, u64), MoveError> {
    let mut reader = File::open(src).map_err(MoveError::io("open source", src))?;
    let mut staged = tempfile::Builder::new()
        .prefix(STAGING_PREFIX)
        .suffix(STAGING_SUFFIX)
        .tempfile_in(dest_dir)
        .map_err(MoveError::io("create staging file in", dest_dir))?;

    let mut buf = vec![0u8; CHUNK_SIZE];
    let mut copied = 0u64;
    loop {
        if cancel.is_requested() {
            return Err(MoveError::Interrupted);
        }
        let n = match reader.read(&mut buf) {
            Ok(0) => break,
            Ok(n) => n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(MoveError::io("read", src)(e)),
        };
        staged
            .as_file_mut()
            .write_all(&buf[..n])
            .map_err(MoveError::io("write", staged.path()))?;
        copied += n as u64;
    }

    staged
        .as_file()
        .sync_all()
        .map_err(MoveError::io("sync", staged.path()))?;
    Ok((staged, copied))
}

/// Hex-encoded SHA-256 of a file's contents.
pub fn sha256_file(path: &Path) -> io::Result<String> {
    let mut reader = BufReader::with_capacity(CHUNK_SIZE, File::open(path)?);
    let mut hasher = Sha256::new();
    io::copy(&mut reader, &mut hasher)?;
    Ok(hex::encode(hasher.finalize()))
}

/// Whether `a` and `b` name the same file on disk.
pub fn same_file(a: &Path, b: &Path) -> bool {
    if a == b {
        return true;
    }
    match (a.canonicalize(), b.canonicalize()) {
        (Ok(a), Ok(b)) => a == b,
        _ => false,
    }
}

/// Carry access and modification times from `src_meta` over to `dst`.
pub fn copy_times(src_meta: &Metadata, dst: &Path) -> io::Result<()> {
    let atime = FileTime::from_last_access_time(src_meta);
    let mtime = FileTime::from_last_modification_time(src_meta);
    filetime::set_file_times(dst, atime, mtime)
}

/// Flush a directory entry change (rename, create) to disk. No-op off Unix.
#[cfg(unix)]
pub fn sync_dir(dir: &Path) -> io::Result<()> {
    File::open(dir)?.sync_all()
}

#[cfg(not(unix))]
pub fn sync_dir(_dir: &Path) -> io::Result<()> {
    Ok(())
}
