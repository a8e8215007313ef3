//! Destination resolution.
//!
//! Picks the final path for a file inside its target folder according to the
//! duplicate policy. Existence is observed by probing the filesystem, so the
//! increment search is a bounded iterator over candidate names.

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use crate::error::ResolveError;
use crate::model::DuplicatePolicy;

/// Default cap on `name_N.ext` attempts before giving up.
pub const MAX_DUPLICATE_ATTEMPTS: u32 = 1000;

/// Why a requested name was not free.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Collision {
    /// Something is already on disk under that name.
    Existing,
    /// Another file of this run already claimed the name.
    Planned,
}

/// Outcome of resolving one file name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Resolution {
    /// Where the file should go.
    pub path: PathBuf,
    /// Set when the requested name was already taken.
    pub collision: Option<Collision>,
}

impl Resolution {
    pub fn collided(&self) -> bool {
        self.collision.is_some()
    }
}

/// Resolves destinations for one run.
///
/// Names handed out earlier in the same run are remembered, so two files with
/// the same name never share a destination even before either has been moved.
/// Paths passed to [`reserve`](Self::reserve) are treated the same way; the
/// orchestrator reserves every planned source so no policy can pick a file
/// that is still waiting to be moved.
#[derive(Debug)]
pub struct DestinationResolver {
    policy: DuplicatePolicy,
    attempt_limit: u32,
    reserved: HashSet<PathBuf>,
}

impl DestinationResolver {
    pub fn new(policy: DuplicatePolicy) -> Self {
        Self {
            policy,
            attempt_limit: MAX_DUPLICATE_ATTEMPTS,
            reserved: HashSet::new(),
        }
    }

    pub fn with_attempt_limit(mut self, limit: u32) -> Self {
        self.attempt_limit = limit;
        self
    }

    pub fn policy(&self) -> DuplicatePolicy {
        self.policy
    }

    /// Mark `path` as taken for the rest of the run.
    pub fn reserve(&mut self, path: impl Into<PathBuf>) {
        self.reserved.insert(path.into());
    }

    /// Resolve `filename` inside `folder`.
    ///
    /// In dry-run mode the requested name is returned unchanged and nothing is
    /// reserved. With `overwrite` the requested name is returned unless another
    /// file of this run already claimed it, in which case the name is incremented.
    pub fn resolve(
        &mut self,
        filename: &str,
        folder: &Path,
        dry_run: bool,
    ) -> Result<Resolution, ResolveError> {
        check_filename(filename)?;
        let requested = folder.join(filename);
        let on_disk = occupied(&requested);
        let claimed = self.reserved.contains(&requested);
        let collision = if on_disk {
            Some(Collision::Existing)
        } else if claimed {
            Some(Collision::Planned)
        } else {
            None
        };

        if dry_run {
            return Ok(Resolution {
                path: requested,
                collision,
            });
        }

        let path = match self.policy {
            DuplicatePolicy::Skip => requested.clone(),
            DuplicatePolicy::Overwrite if !claimed => requested.clone(),
            DuplicatePolicy::Overwrite | DuplicatePolicy::Increment => {
                if !on_disk && !claimed {
                    requested.clone()
                } else {
                    self.first_free(filename, folder)?
                }
            }
        };

        let skipped = self.policy == DuplicatePolicy::Skip && collision.is_some();
        if !skipped {
            self.reserved.insert(path.clone());
        }
        Ok(Resolution { path, collision })
    }

    fn first_free(&self, filename: &str, folder: &Path) -> Result<PathBuf, ResolveError> {
        let (stem, ext) = split_filename(filename);
        Candidates::new(stem, ext, self.attempt_limit)
            .map(|name| folder.join(name))
            .find(|candidate| !occupied(candidate) && !self.reserved.contains(candidate))
            .ok_or_else(|| ResolveError::TooManyDuplicates {
                name: filename.to_string(),
                folder: folder.to_path_buf(),
                limit: self.attempt_limit,
            })
    }
}

/// Resolve a single name without any run state.
pub fn resolve_destination(
    filename: &str,
    folder: &Path,
    policy: DuplicatePolicy,
    dry_run: bool,
) -> Result<PathBuf, ResolveError> {
    DestinationResolver::new(policy)
        .resolve(filename, folder, dry_run)
        .map(|r| r.path)
}

/// Split at the last dot. A leading dot alone does not start an extension.
pub fn split_filename(name: &str) -> (&str, Option<&str>) {
    match name.rfind('.') {
        Some(idx) if idx > 0 => (&name[..idx], Some(&name[idx + 1..])),
        _ => (name, None),
    }
}

/// `stem_n.ext`, or `stem_n` when there is no extension.
pub fn numbered_name(stem: &str, ext: Option<&str>, n: u32) -> String {
    match ext {
        Some(ext) => format!("{stem}_{n}.{ext}"),
        None => format!("{stem}_{n}"),
    }
}

/// `stem_1.ext` .. `stem_limit.ext`.
struct Candidates<'a> {
    stem: &'a str,
    ext: Option<&'a str>,
    next: u32,
    limit: u32,
}

impl<'a> Candidates<'a> {
    fn new(stem: &'a str, ext: Option<&'a str>, limit: u32) -> Self {
        Self {
            stem,
            ext,
            next: 1,
            limit,
        }
    }
}

impl Iterator for Candidates<'_> {
    type Item = String;

    fn next(&mut self) -> Option<String> {
        if self.next > self.limit {
            return None;
        }
        let name = numbered_name(self.stem, self.ext, self.next);
        self.next += 1;
        Some(name)
    }
}

/// Dangling symlinks count as occupied.
fn occupied(path: &Path) -> bool {
    std::fs::symlink_metadata(path).is_ok()
}

fn check_filename(name: &str) -> Result<(), ResolveError> {
    let valid = !name.is_empty()
        && name != "."
        && name != ".."
        && !name.contains(['/', '\0'])
        && !(cfg!(windows) && name.contains('\\'));
    if valid {
        Ok(())
    } else {
        Err(ResolveError::InvalidFilename(name.to_string()))
    }
}
