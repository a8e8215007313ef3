//! Directory scanning and date grouping.
//!
//! Read-only: builds `MediaFile`s from filesystem and EXIF metadata and groups
//! them into date folders. The best-known date is the oldest of the EXIF
//! capture date (images only), the creation time and the modification time.

use anyhow::{Result, bail};
use chrono::{DateTime, Local, NaiveDate, NaiveDateTime, TimeZone, Utc};
use exif::{In, Tag, Value};
use std::collections::BTreeMap;
use std::fs::{self, File};
use std::io::BufReader;
use std::path::{Path, PathBuf};
use std::time::SystemTime;
use tracing::{debug, warn};
use walkdir::{DirEntry, WalkDir};

use crate::config::Config;
use crate::fsops::is_staging_name;
use crate::model::{MediaFile, Plan, PlanManifest};

/// Image types whose EXIF block is consulted for a capture date.
const EXIF_TYPES: &[&str] = &[
    ".jpg", ".jpeg", ".png", ".gif", ".bmp", ".tiff", ".tif", ".webp", ".heic",
];

const EXIF_DATETIME_FORMATS: &[&str] = &[
    "%Y:%m:%d %H:%M:%S",
    "%Y-%m-%d %H:%M:%S",
    "%Y/%m/%d %H:%M:%S",
];
const EXIF_DATE_FORMATS: &[&str] = &["%Y:%m:%d", "%Y-%m-%d", "%Y/%m/%d"];

/// Inspect one file. Problems are recorded on the result, never returned.
pub fn inspect(path: &Path, config: &Config) -> MediaFile {
    let filename = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let file_type = path
        .extension()
        .map(|e| format!(".{}", e.to_string_lossy().to_lowercase()))
        .unwrap_or_default();
    let is_media = config.is_media_type(&file_type);

    let mut file = MediaFile {
        path: path.to_path_buf(),
        filename,
        size: 0,
        timestamp: DateTime::<Utc>::from(SystemTime::UNIX_EPOCH),
        file_type,
        is_media,
        error: None,
    };
    if file.filename.is_empty() {
        file.error = Some("path has no file name".into());
        return file;
    }

    match fs::metadata(path) {
        Ok(meta) if !meta.is_file() => file.error = Some("not a regular file".into()),
        Ok(meta) => {
            file.size = meta.len();
            let taken = if file.is_media && EXIF_TYPES.contains(&file.file_type.as_str()) {
                exif_timestamp(path)
            } else {
                None
            };
            file.timestamp = best_timestamp(
                taken,
                meta.created().ok().map(Into::into),
                meta.modified().ok().map(Into::into),
            );
            if file.size == 0 {
                file.error = Some("file is empty".into());
            }
        }
        Err(e) => file.error = Some(format!("cannot read metadata: {e}")),
    }
    file
}

fn best_timestamp(
    taken: Option<DateTime<Utc>>,
    created: Option<DateTime<Utc>>,
    modified: Option<DateTime<Utc>>,
) -> DateTime<Utc> {
    [taken, created, modified]
        .into_iter()
        .flatten()
        .min()
        .unwrap_or_else(Utc::now)
}

/// Capture date from EXIF: `DateTimeOriginal`, then `DateTimeDigitized`, then
/// `DateTime`. Unreadable or missing metadata yields `None`.
pub fn exif_timestamp(path: &Path) -> Option<DateTime<Utc>> {
    let file = File::open(path).ok()?;
    let exif = match exif::Reader::new().read_from_container(&mut BufReader::new(file)) {
        Ok(exif) => exif,
        Err(e) => {
            debug!(path = %path.display(), error = %e, "no EXIF data");
            return None;
        }
    };
    [Tag::DateTimeOriginal, Tag::DateTimeDigitized, Tag::DateTime]
        .into_iter()
        .filter_map(|tag| exif.get_field(tag, In::PRIMARY))
        .find_map(|field| match &field.value {
            Value::Ascii(values) => values.first().and_then(|raw| parse_exif_datetime(raw)),
            _ => None,
        })
}

/// EXIF dates are local wall-clock time, usually `YYYY:MM:DD HH:MM:SS`.
fn parse_exif_datetime(raw: &[u8]) -> Option<DateTime<Utc>> {
    let text = std::str::from_utf8(raw).ok()?.trim_end_matches('\0').trim();
    let naive = EXIF_DATETIME_FORMATS
        .iter()
        .find_map(|f| NaiveDateTime::parse_from_str(text, f).ok())
        .or_else(|| {
            EXIF_DATE_FORMATS
                .iter()
                .find_map(|f| NaiveDate::parse_from_str(text, f).ok())
                .and_then(|d| d.and_hms_opt(0, 0, 0))
        })?;
    Local
        .from_local_datetime(&naive)
        .earliest()
        .map(|t| t.with_timezone(&Utc))
}

fn is_hidden(entry: &DirEntry) -> bool {
    entry
        .file_name()
        .to_str()
        .is_some_and(|s| s.starts_with('.'))
}

/// Collect the candidate files under `root`, in file-name order.
pub fn collect_paths(root: &Path, recursive: bool) -> Result<Vec<PathBuf>> {
    if !root.is_dir() {
        bail!("not a directory: {}", root.display());
    }
    let max_depth = if recursive { usize::MAX } else { 1 };
    let mut paths = Vec::new();
    let walker = WalkDir::new(root)
        .min_depth(1)
        .max_depth(max_depth)
        .sort_by_file_name()
        .into_iter()
        .filter_entry(|e| e.depth() == 0 || !is_hidden(e));
    for entry in walker {
        match entry {
            Ok(entry) if entry.file_type().is_file() => {
                let name = entry.file_name().to_string_lossy();
                if is_staging_name(&name) {
                    continue;
                }
                paths.push(entry.into_path());
            }
            Ok(_) => {}
            Err(err) => warn!(error = %err, "directory traversal error"),
        }
    }
    Ok(paths)
}

/// Inspect every file under `root`.
pub fn scan(root: &Path, config: &Config) -> Result<Vec<MediaFile>> {
    let paths = collect_paths(root, config.recursive)?;
    debug!(root = %root.display(), files = paths.len(), "scanned directory");
    Ok(inspect_all(&paths, config))
}

#[cfg(feature = "parallel")]
fn inspect_all(paths: &[PathBuf], config: &Config) -> Vec<MediaFile> {
    use rayon::prelude::*;
    if config.parallel_scan {
        paths.par_iter().map(|p| inspect(p, config)).collect()
    } else {
        paths.iter().map(|p| inspect(p, config)).collect()
    }
}

#[cfg(not(feature = "parallel"))]
fn inspect_all(paths: &[PathBuf], config: &Config) -> Vec<MediaFile> {
    paths.iter().map(|p| inspect(p, config)).collect()
}

/// Group files into `folder name -> files`, oldest first within a folder.
///
/// Non-media files are dropped unless `process_all_files`. Files that already
/// sit in their target folder under `target_root` are left out.
pub fn group_by_date(
    files: Vec<MediaFile>,
    target_root: &Path,
    config: &Config,
) -> BTreeMap<String, Vec<MediaFile>> {
    let mut grouping: BTreeMap<String, Vec<MediaFile>> = BTreeMap::new();
    for file in files {
        if !file.is_media && !config.process_all_files {
            continue;
        }
        let folder = config.render_folder_name(&file.timestamp.with_timezone(&Local));
        if file.path.parent() == Some(target_root.join(&folder).as_path()) {
            debug!(src = %file.path.display(), "already organized");
            continue;
        }
        grouping.entry(folder).or_default().push(file);
    }
    for files in grouping.values_mut() {
        files.sort_by(|a, b| a.timestamp.cmp(&b.timestamp).then_with(|| a.path.cmp(&b.path)));
    }
    grouping
}

/// Scan `root` and plan moving its files into date folders inside it.
pub fn build_plan(root: &Path, config: &Config) -> Result<Plan> {
    let files = scan(root, config)?;
    let grouping = group_by_date(files, root, config);
    Ok(Plan::from_grouping(root, root, grouping))
}

/// Inspect every file listed in a manifest, keeping the manifest's grouping.
pub fn plan_from_manifest(manifest: &PlanManifest, config: &Config) -> Result<Plan> {
    let mut grouping = BTreeMap::new();
    for (folder, paths) in &manifest.folders {
        let files = paths.iter().map(|p| inspect(p, config)).collect();
        grouping.insert(folder.clone(), files);
    }
    let source_root = manifest
        .source_root
        .clone()
        .unwrap_or_else(|| manifest.target_root.clone());
    if !source_root.is_dir() {
        bail!("manifest source directory does not exist: {}", source_root.display());
    }
    Ok(Plan::from_grouping(source_root, &manifest.target_root, grouping))
}
