//! `picsort scan`: what `organize` would do, without touching anything.

use anyhow::Result;
use chrono::{Local, NaiveDate};
use serde::Serialize;
use std::fmt::Write as _;
use std::io;
use std::path::{Path, PathBuf};

use crate::model::{FileOperation, MediaFile, OperationStatus, Plan};

/// Output format of the scan preview.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, clap::ValueEnum)]
pub enum PreviewFormat {
    #[default]
    Table,
    Json,
    Csv,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Rename {
    pub original: String,
    pub renamed: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SkippedFile {
    pub file: String,
    pub reason: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct FolderPreview {
    /// Folder path relative to the scanned directory.
    pub folder: String,
    pub file_count: usize,
    /// Final names inside the folder, in move order.
    pub files: Vec<String>,
    /// Files that get a numbered name because theirs is taken.
    pub renamed: Vec<Rename>,
    pub skipped: Vec<SkippedFile>,
}

#[derive(Debug, Clone, Serialize)]
pub struct DateRange {
    pub oldest: NaiveDate,
    pub newest: NaiveDate,
}

#[derive(Debug, Clone, Serialize)]
pub struct ScanPreview {
    pub scan_path: PathBuf,
    /// Every regular file found.
    pub total_files: usize,
    /// Files that would be organized.
    pub media_files: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub date_range: Option<DateRange>,
    pub folders: Vec<FolderPreview>,
    /// Files that could not be inspected.
    pub problems: Vec<SkippedFile>,
}

impl ScanPreview {
    /// Summarize `ops`, the resolved operations of `plan` in plan order.
    pub fn new(
        scan_path: &Path,
        total_files: usize,
        problems: &[MediaFile],
        plan: &Plan,
        ops: &[FileOperation],
    ) -> Self {
        let mut folders = Vec::with_capacity(plan.groups.len());
        let mut ops = ops.iter();
        for group in &plan.groups {
            let folder = group
                .folder
                .strip_prefix(scan_path)
                .unwrap_or(&group.folder)
                .display()
                .to_string();
            let mut preview = FolderPreview {
                folder,
                file_count: group.files.len(),
                files: Vec::new(),
                renamed: Vec::new(),
                skipped: Vec::new(),
            };
            for op in ops.by_ref().take(group.files.len()) {
                let original = op.source().filename.clone();
                let target = op
                    .destination()
                    .file_name()
                    .map(|n| n.to_string_lossy().into_owned())
                    .unwrap_or_default();
                if op.status() == OperationStatus::Pending {
                    if target != original {
                        preview.renamed.push(Rename {
                            original,
                            renamed: target.clone(),
                        });
                    }
                    preview.files.push(target);
                } else {
                    preview.skipped.push(SkippedFile {
                        file: original,
                        reason: op.error_message().unwrap_or("skipped").to_string(),
                    });
                }
            }
            folders.push(preview);
        }

        let dates = plan
            .groups
            .iter()
            .flat_map(|g| &g.files)
            .filter(|f| f.is_eligible())
            .map(|f| f.timestamp.with_timezone(&Local).date_naive());
        let date_range = dates.clone().min().zip(dates.max()).map(|(oldest, newest)| DateRange {
            oldest,
            newest,
        });

        Self {
            scan_path: scan_path.to_path_buf(),
            total_files,
            media_files: plan.len(),
            date_range,
            folders,
            problems: problems
                .iter()
                .map(|f| SkippedFile {
                    file: f.filename.clone(),
                    reason: f.error.clone().unwrap_or_default(),
                })
                .collect(),
        }
    }

    /// Human-readable report. `verbose` lists every file per folder.
    pub fn render_table(&self, verbose: bool) -> String {
        let mut out = String::new();
        let _ = writeln!(out, "Scan results for: {}", self.scan_path.display());
        let _ = writeln!(out, "Total files: {}", self.total_files);
        let _ = writeln!(out, "Media files: {}", self.media_files);
        if let Some(range) = &self.date_range {
            let _ = writeln!(out, "Date range: {} to {}", range.oldest, range.newest);
        }
        if !self.folders.is_empty() {
            let _ = writeln!(out, "\nFiles by folder:");
        }
        for folder in &self.folders {
            let _ = writeln!(out, "  {}: {} files", folder.folder, folder.file_count);
            if verbose {
                for name in &folder.files {
                    let _ = writeln!(out, "    - {name}");
                }
            }
            for rename in &folder.renamed {
                let _ = writeln!(out, "    {} -> {} (renamed)", rename.original, rename.renamed);
            }
            for skipped in &folder.skipped {
                let _ = writeln!(out, "    {} skipped: {}", skipped.file, skipped.reason);
            }
        }
        if !self.problems.is_empty() {
            let _ = writeln!(out, "\nFiles with issues:");
            for problem in &self.problems {
                let _ = writeln!(out, "  {}: {}", problem.file, problem.reason);
            }
        }
        if self.media_files > 0 {
            let _ = writeln!(out, "\nTo perform this organization, run:");
            let _ = write!(out, "  picsort organize {}", self.scan_path.display());
        }
        out
    }

    /// `folder,file_count,files,renamed` with `;`-separated lists.
    pub fn write_csv(&self, writer: impl io::Write) -> Result<()> {
        let mut csv = csv::Writer::from_writer(writer);
        csv.write_record(["folder", "file_count", "files", "renamed"])?;
        for folder in &self.folders {
            let renamed: Vec<String> = folder
                .renamed
                .iter()
                .map(|r| format!("{}->{}", r.original, r.renamed))
                .collect();
            csv.write_record([
                folder.folder.clone(),
                folder.file_count.to_string(),
                folder.files.join(";"),
                renamed.join(";"),
            ])?;
        }
        csv.flush()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::media_file;
    use std::collections::BTreeMap;
    use std::sync::Arc;

    fn preview() -> ScanPreview {
        let root = Path::new("/photos");
        let mut grouping = BTreeMap::new();
        grouping.insert(
            "08.2024".to_string(),
            vec![
                media_file(Path::new("/photos/a.jpg")),
                media_file(Path::new("/photos/sub/a.jpg")),
                media_file(Path::new("/photos/b.jpg")),
            ],
        );
        let plan = Plan::from_grouping(root, root, grouping);
        let files = &plan.groups[0].files;
        let folder = &plan.groups[0].folder;
        let first = FileOperation::new(Arc::clone(&files[0]), folder.join("a.jpg")).unwrap();
        let second = FileOperation::new(Arc::clone(&files[1]), folder.join("a_1.jpg")).unwrap();
        let mut third = FileOperation::new(Arc::clone(&files[2]), folder.join("b.jpg")).unwrap();
        third.skip(Some("destination exists".into())).unwrap();

        let mut broken = media_file(Path::new("/photos/empty.jpg"));
        broken.error = Some("file is empty".into());
        ScanPreview::new(root, 5, &[broken], &plan, &[first, second, third])
    }

    #[test]
    fn lists_renamed_and_skipped_files_per_folder() {
        let preview = preview();
        assert_eq!(preview.media_files, 3);
        let folder = &preview.folders[0];
        assert_eq!(folder.folder, "08.2024");
        assert_eq!(folder.files, vec!["a.jpg", "a_1.jpg"]);
        assert_eq!(
            folder.renamed,
            vec![Rename {
                original: "a.jpg".into(),
                renamed: "a_1.jpg".into()
            }]
        );
        assert_eq!(folder.skipped[0].reason, "destination exists");
        assert_eq!(preview.problems[0].file, "empty.jpg");
        assert!(preview.date_range.is_some());
    }

    #[test]
    fn table_mentions_counts_and_renames() {
        let table = preview().render_table(false);
        assert!(table.contains("Total files: 5"));
        assert!(table.contains("08.2024: 3 files"));
        assert!(table.contains("a.jpg -> a_1.jpg (renamed)"));
        assert!(table.contains("empty.jpg: file is empty"));
        assert!(table.ends_with("picsort organize /photos"));
    }

    #[test]
    fn csv_has_one_row_per_folder() {
        let mut out = Vec::new();
        preview().write_csv(&mut out).unwrap();
        let text = String::from_utf8(out).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines[0], "folder,file_count,files,renamed");
        assert_eq!(lines[1], "08.2024,3,a.jpg;a_1.jpg,a.jpg->a_1.jpg");
    }

    #[test]
    fn json_shape() {
        let value = serde_json::to_value(preview()).unwrap();
        assert_eq!(value["total_files"], 5);
        assert_eq!(value["folders"][0]["renamed"][0]["renamed"], "a_1.jpg");
        assert!(value["date_range"]["oldest"].is_string());
    }
}
