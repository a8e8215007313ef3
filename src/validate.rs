use anyhow::{Result, bail};
use std::collections::HashSet;
use std::path::{Component, Path};

use crate::model::{OperationStatus, PlanManifest};
use crate::store::ResumePoint;

/// Pre-flight checks on a plan manifest before any file is inspected.
pub fn preflight_manifest(manifest: &PlanManifest) -> Result<()> {
    if !manifest.target_root.is_absolute() {
        bail!(
            "target_root must be absolute: {}",
            manifest.target_root.display()
        );
    }
    if let Some(source_root) = &manifest.source_root
        && !source_root.is_dir()
    {
        bail!("source_root is not a directory: {}", source_root.display());
    }

    let mut seen = HashSet::new();
    for (folder, files) in &manifest.folders {
        check_folder_name(folder)?;
        for path in files {
            if !path.is_absolute() {
                bail!("file paths must be absolute: {}", path.display());
            }
            if !seen.insert(path) {
                bail!("file listed more than once: {}", path.display());
            }
        }
    }
    Ok(())
}

/// A folder name must be a relative path made of plain components.
pub fn check_folder_name(folder: &str) -> Result<()> {
    let path = Path::new(folder);
    if folder.is_empty()
        || path
            .components()
            .any(|c| !matches!(c, Component::Normal(_)))
    {
        bail!("invalid folder name: {folder:?}");
    }
    Ok(())
}

/// Outcome of checking a stored resume point.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ValidationReport {
    /// Problems that make the record unusable.
    pub errors: Vec<String>,
    /// Things the resumed run will report as per-file failures.
    pub warnings: Vec<String>,
}

impl ValidationReport {
    pub fn is_valid(&self) -> bool {
        self.errors.is_empty()
    }

    /// Fail with every error joined into one message.
    pub fn into_result(self) -> Result<Vec<String>> {
        if self.errors.is_empty() {
            Ok(self.warnings)
        } else {
            bail!("resume point is not usable:\n  {}", self.errors.join("\n  "))
        }
    }
}

/// Check that a loaded resume point can be replayed as recorded.
pub fn validate_resume_point(point: &ResumePoint) -> ValidationReport {
    let mut report = ValidationReport::default();

    if !point.source_path.exists() {
        report.errors.push(format!(
            "source path no longer exists: {}",
            point.source_path.display()
        ));
    } else if !point.source_path.is_dir() {
        report.errors.push(format!(
            "source path is not a directory: {}",
            point.source_path.display()
        ));
    }

    if let Err(e) = point.config() {
        report.errors.push(e.to_string());
    }

    for op in point.completed.iter().chain(&point.pending) {
        if let Err(e) = op.validate() {
            report
                .errors
                .push(format!("{}: {}", op.source().path.display(), e));
        }
    }
    for op in &point.completed {
        if !op.is_terminal() {
            report.errors.push(format!(
                "{}: recorded as done but status is '{}'",
                op.source().path.display(),
                op.status()
            ));
        }
    }

    let mut destinations = HashSet::new();
    for op in &point.pending {
        if op.status() != OperationStatus::Pending {
            report.errors.push(format!(
                "{}: pending entry has status '{}'",
                op.source().path.display(),
                op.status()
            ));
        }
        if !destinations.insert(op.destination()) {
            report.errors.push(format!(
                "destination planned twice: {}",
                op.destination().display()
            ));
        }
        if !op.source().path.exists() {
            report.warnings.push(format!(
                "pending source is missing: {}",
                op.source().path.display()
            ));
        }
    }
    report
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::model::{FileOperation, manifest_from_json, media_file};
    use crate::store::OperationType;
    use std::sync::Arc;

    fn point_in(dir: &Path, names: &[&str]) -> ResumePoint {
        let ops = names
            .iter()
            .map(|n| {
                let src = dir.join(n);
                std::fs::write(&src, b"x").unwrap();
                FileOperation::new(Arc::new(media_file(&src)), dir.join("out").join(n)).unwrap()
            })
            .collect();
        ResumePoint::new(
            OperationType::Organize,
            dir.to_path_buf(),
            &Config::default(),
            ops,
        )
        .unwrap()
    }

    #[test]
    fn fresh_point_is_valid() {
        let dir = tempfile::tempdir().unwrap();
        let report = validate_resume_point(&point_in(dir.path(), &["a.jpg", "b.jpg"]));
        assert!(report.is_valid(), "{report:?}");
        assert!(report.warnings.is_empty());
    }

    #[test]
    fn missing_source_dir_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let mut point = point_in(dir.path(), &["a.jpg"]);
        point.source_path = dir.path().join("gone");
        assert!(!validate_resume_point(&point).is_valid());
    }

    #[test]
    fn missing_pending_source_is_a_warning() {
        let dir = tempfile::tempdir().unwrap();
        let point = point_in(dir.path(), &["a.jpg"]);
        std::fs::remove_file(dir.path().join("a.jpg")).unwrap();
        let report = validate_resume_point(&point);
        assert!(report.is_valid());
        assert_eq!(report.warnings.len(), 1);
    }

    #[test]
    fn bad_snapshot_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let mut point = point_in(dir.path(), &["a.jpg"]);
        point.config_snapshot = serde_json::json!({"date_format": "nothing"});
        let report = validate_resume_point(&point);
        assert!(!report.is_valid());
        assert!(report.into_result().is_err());
    }

    #[test]
    fn manifest_preflight() {
        let ok = manifest_from_json(
            r#"{"target_root": "/photos", "folders": {"08.2024": ["/photos/a.jpg"]}}"#,
        )
        .unwrap();
        assert!(preflight_manifest(&ok).is_ok());

        let relative = manifest_from_json(
            r#"{"target_root": "/photos", "folders": {"08.2024": ["a.jpg"]}}"#,
        )
        .unwrap();
        assert!(preflight_manifest(&relative).is_err());

        let escape = manifest_from_json(
            r#"{"target_root": "/photos", "folders": {"../x": ["/photos/a.jpg"]}}"#,
        )
        .unwrap();
        assert!(preflight_manifest(&escape).is_err());

        let twice = manifest_from_json(
            r#"{"target_root": "/photos", "folders": {"a": ["/p/a.jpg"], "b": ["/p/a.jpg"]}}"#,
        )
        .unwrap();
        assert!(preflight_manifest(&twice).is_err());
    }
}
