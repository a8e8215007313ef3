use anyhow::Result;
use filetime::FileTime;
use pretty_assertions::assert_eq;
use serde_json::json;
use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::path::{Path, PathBuf};
use tempfile::tempdir;

use picsort::audit::{LogLevel, read_log};
use picsort::cli::{GlobalArgs, MoveArgs, OrganizeArgs, SelectArgs};
use picsort::config::Config;
use picsort::events::Event;
use picsort::model::{DuplicatePolicy, OperationStatus, Plan};
use picsort::orchestrator::{Orchestrator, RunOutcome};
use picsort::reporter::ProgressSink;
use picsort::shutdown::CancelFlag;
use picsort::store::ResumeStore;

/// 2020-08-03 12:00 UTC; lands in `08.2020` in every time zone.
const AUG_2020: i64 = 1_596_456_000;

fn write_dated(path: &Path, content: &str) {
    fs::create_dir_all(path.parent().unwrap()).unwrap();
    fs::write(path, content).unwrap();
    filetime::set_file_mtime(path, FileTime::from_unix_time(AUG_2020, 0)).unwrap();
}

fn names_in(dir: &Path) -> BTreeSet<String> {
    fs::read_dir(dir)
        .unwrap()
        .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
        .collect()
}

fn snapshot(root: &Path) -> BTreeMap<PathBuf, Vec<u8>> {
    walkdir::WalkDir::new(root)
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_file())
        .map(|e| (e.path().to_path_buf(), fs::read(e.path()).unwrap()))
        .collect()
}

/// Quiet output; resume records and the audit log stay next to `resume_dir`.
fn global(resume_dir: &Path) -> GlobalArgs {
    GlobalArgs {
        quiet: true,
        resume_dir: Some(resume_dir.to_path_buf()),
        log_file: Some(resume_dir.with_file_name("audit.jsonl")),
        ..GlobalArgs::default()
    }
}

fn organize_args(path: &Path) -> OrganizeArgs {
    OrganizeArgs {
        path: Some(path.to_path_buf()),
        moves: MoveArgs::default(),
        select: SelectArgs::default(),
    }
}

fn picsort_cmd(home: &Path) -> assert_cmd::Command {
    let mut cmd = assert_cmd::Command::new(env!("CARGO_BIN_EXE_picsort"));
    cmd.env("HOME", home);
    cmd
}

/// Three source files with the same name but different content.
fn three_same_named(root: &Path) -> Result<(Plan, Vec<String>)> {
    let config = Config::default();
    let mut files = Vec::new();
    let mut hashes = Vec::new();
    for i in 0..3 {
        let src = root.join(format!("card{i}")).join("a.jpg");
        write_dated(&src, &format!("frame {i}"));
        hashes.push(picsort::fsops::sha256_file(&src)?);
        files.push(picsort::scan::inspect(&src, &config));
    }
    let mut grouping = BTreeMap::new();
    grouping.insert("08.2020".to_string(), files);
    let target = root.join("library");
    Ok((Plan::from_grouping(root, &target, grouping), hashes))
}

#[test]
fn test_same_name_files_get_distinct_destinations() -> Result<()> {
    let dir = tempdir()?;
    let (plan, hashes) = three_same_named(dir.path())?;
    let store = ResumeStore::open(dir.path().join("resume"))?;

    let report = Orchestrator::new(Config::default(), CancelFlag::new())
        .with_store(&store)
        .run(&plan, false, &mut Vec::new())?;

    assert_eq!(report.outcome, RunOutcome::Success);
    assert_eq!(report.counts().completed, 3);
    let target = dir.path().join("library").join("08.2020");
    assert_eq!(
        names_in(&target),
        ["a.jpg", "a_1.jpg", "a_2.jpg"]
            .iter()
            .map(|s| s.to_string())
            .collect()
    );
    for (op, hash) in report.operations.iter().zip(&hashes) {
        assert_eq!(op.checksum_source(), Some(hash.as_str()));
        assert_eq!(op.checksum_dest(), Some(hash.as_str()));
        assert_eq!(&picsort::fsops::sha256_file(op.destination())?, hash);
        assert!(!op.source().path.exists());
    }
    assert!(store.list()?.is_empty());
    Ok(())
}

#[test]
fn test_organize_moves_into_date_folder() -> Result<()> {
    let dir = tempdir()?;
    let photos = dir.path().join("photos");
    write_dated(&photos.join("a.jpg"), "a");
    write_dated(&photos.join("notes.txt"), "n");

    let code = picsort::engine::organize(
        organize_args(&photos),
        &global(&dir.path().join("resume")),
        CancelFlag::new(),
    )?;
    assert_eq!(code, 0);
    assert!(photos.join("08.2020").join("a.jpg").exists());
    assert!(!photos.join("a.jpg").exists());
    assert!(photos.join("notes.txt").exists());

    let log = read_log(&dir.path().join("audit.jsonl"))?;
    assert_eq!(log.first().unwrap().message, "operation started");
    let moved = log.iter().find(|e| e.message == "moved file").unwrap();
    assert_eq!(moved.level, LogLevel::Info);
    assert_eq!(moved.file_path.as_deref(), Some(photos.join("a.jpg").as_path()));
    assert_eq!(log.last().unwrap().context["completed"], 1);
    Ok(())
}

#[test]
fn test_organize_without_directory_uses_default_source() -> Result<()> {
    let dir = tempdir()?;
    let photos = dir.path().join("photos");
    write_dated(&photos.join("a.jpg"), "a");
    let config_path = dir.path().join("config.yaml");
    fs::write(
        &config_path,
        format!("default_source: {}\n", photos.display()),
    )?;

    let mut global = global(&dir.path().join("resume"));
    global.config = Some(config_path);
    let args = OrganizeArgs {
        path: None,
        ..organize_args(&photos)
    };
    let code = picsort::engine::organize(args, &global, CancelFlag::new())?;

    assert_eq!(code, 0);
    assert!(photos.join("08.2020").join("a.jpg").exists());
    Ok(())
}

#[test]
fn test_overwrite_never_destroys_organized_sources() -> Result<()> {
    let dir = tempdir()?;
    let root = dir.path().to_path_buf();
    let organized = root.join("08.2020").join("a.jpg");
    write_dated(&organized, "keep me");

    let manifest_path = root.join("plan.json");
    let manifest = json!({
        "target_root": root.to_str().unwrap(),
        "folders": { "08.2020": [organized.to_str().unwrap()] }
    });
    fs::write(&manifest_path, manifest.to_string())?;

    let args = picsort::cli::ApplyArgs {
        plan: manifest_path,
        moves: MoveArgs {
            duplicates: Some(DuplicatePolicy::Overwrite),
            ..MoveArgs::default()
        },
        validate_only: false,
    };
    let code = picsort::engine::apply(args, &global(&root.join("resume")), CancelFlag::new())?;

    assert_eq!(code, 0);
    assert_eq!(fs::read_to_string(&organized)?, "keep me");
    assert_eq!(names_in(&root.join("08.2020")).len(), 1);
    let log = read_log(&root.join("audit.jsonl"))?;
    let skipped = log.iter().find(|e| e.message == "skipped file").unwrap();
    assert_eq!(skipped.context["reason"], "already in place");
    Ok(())
}

#[test]
fn test_dry_run_leaves_filesystem_unchanged() -> Result<()> {
    let dir = tempdir()?;
    let photos = dir.path().join("photos");
    write_dated(&photos.join("a.jpg"), "a");
    write_dated(&photos.join("b.mov"), "b");
    fs::create_dir_all(photos.join("08.2020"))?;
    write_dated(&photos.join("08.2020").join("a.jpg"), "existing");
    let before = snapshot(dir.path());

    let mut args = organize_args(&photos);
    args.moves.dry_run = true;
    let resume_dir = dir.path().join("resume");
    let code = picsort::engine::organize(args, &global(&resume_dir), CancelFlag::new())?;

    assert_eq!(code, 0);
    assert_eq!(snapshot(dir.path()), before);
    assert!(!resume_dir.exists());
    Ok(())
}

#[test]
fn test_dry_run_reports_only_skips() -> Result<()> {
    let dir = tempdir()?;
    let (plan, _) = three_same_named(dir.path())?;

    let mut events = Vec::new();
    let report =
        Orchestrator::new(Config::default(), CancelFlag::new()).run(&plan, true, &mut events)?;

    assert!(report
        .operations
        .iter()
        .all(|op| op.status() == OperationStatus::Skipped));
    // Previews show the un-incremented name.
    assert!(report
        .operations
        .iter()
        .all(|op| op.destination().ends_with("08.2020/a.jpg")));
    assert!(!events.iter().any(|e| matches!(e, Event::OpStarted { .. })));
    Ok(())
}

#[test]
fn test_overwrite_policy_replaces_existing_file() -> Result<()> {
    let dir = tempdir()?;
    let root = dir.path().to_path_buf();
    let src = root.join("incoming").join("a.jpg");
    write_dated(&src, "fresh");
    let existing = root.join("08.2020").join("a.jpg");
    write_dated(&existing, "stale");

    let manifest_path = root.join("plan.json");
    let manifest = json!({
        "target_root": root.to_str().unwrap(),
        "folders": { "08.2020": [src.to_str().unwrap()] }
    });
    fs::write(&manifest_path, manifest.to_string())?;

    let args = picsort::cli::ApplyArgs {
        plan: manifest_path,
        moves: MoveArgs {
            duplicates: Some(DuplicatePolicy::Overwrite),
            ..MoveArgs::default()
        },
        validate_only: false,
    };
    let code = picsort::engine::apply(args, &global(&root.join("resume")), CancelFlag::new())?;

    assert_eq!(code, 0);
    assert_eq!(fs::read_to_string(&existing)?, "fresh");
    assert!(!src.exists());
    assert_eq!(names_in(&root.join("08.2020")).len(), 1);
    Ok(())
}

#[test]
fn test_skip_policy_leaves_source_in_place() -> Result<()> {
    let dir = tempdir()?;
    let photos = dir.path().join("photos");
    write_dated(&photos.join("a.jpg"), "new");
    write_dated(&photos.join("b.jpg"), "b");
    write_dated(&photos.join("08.2020").join("a.jpg"), "old");

    let config = Config {
        duplicate_handling: DuplicatePolicy::Skip,
        ..Config::default()
    };
    let plan = picsort::scan::build_plan(&photos, &config)?;
    let report = Orchestrator::new(config, CancelFlag::new()).run(&plan, false, &mut Vec::new())?;

    let counts = report.counts();
    assert_eq!((counts.completed, counts.skipped, counts.failed), (1, 1, 0));
    assert_eq!(fs::read_to_string(photos.join("a.jpg"))?, "new");
    assert_eq!(fs::read_to_string(photos.join("08.2020").join("a.jpg"))?, "old");
    assert!(photos.join("08.2020").join("b.jpg").exists());
    Ok(())
}

struct CancelAfter {
    flag: CancelFlag,
    after: usize,
    seen: usize,
}

impl ProgressSink for CancelAfter {
    fn record(&mut self, event: Event) {
        if matches!(event, Event::OpCompleted { .. }) {
            self.seen += 1;
            if self.seen == self.after {
                self.flag.request();
            }
        }
    }
}

#[test]
fn test_interrupted_run_resumes_without_redoing_work() -> Result<()> {
    let dir = tempdir()?;
    let (plan, hashes) = three_same_named(dir.path())?;
    let store = ResumeStore::open(dir.path().join("resume"))?;
    let cancel = CancelFlag::new();

    let mut sink = CancelAfter {
        flag: cancel.clone(),
        after: 1,
        seen: 0,
    };
    let first = Orchestrator::new(Config::default(), cancel)
        .with_store(&store)
        .run(&plan, false, &mut sink)?;
    assert_eq!(first.outcome, RunOutcome::Cancelled);
    assert_eq!(first.exit_code(), 130);

    // Every file not yet completed is still at its source.
    let point = store.find(&first.operation_id.unwrap().to_string())?;
    assert_eq!(point.completed.len(), 1);
    for op in &point.pending {
        assert!(op.source().path.exists());
    }
    let pending_destinations: Vec<PathBuf> = point
        .pending
        .iter()
        .map(|op| op.destination().to_path_buf())
        .collect();

    let report = picsort::validate::validate_resume_point(&point);
    assert!(report.is_valid(), "{report:?}");

    let second = Orchestrator::new(point.config()?, CancelFlag::new())
        .with_store(&store)
        .resume(point, &mut Vec::new())?;
    assert_eq!(second.outcome, RunOutcome::Success);
    assert_eq!(second.counts().completed, 2);
    let resumed_destinations: Vec<PathBuf> = second
        .operations
        .iter()
        .map(|op| op.destination().to_path_buf())
        .collect();
    assert_eq!(resumed_destinations, pending_destinations);

    let target = dir.path().join("library").join("08.2020");
    let moved: BTreeSet<String> = names_in(&target)
        .into_iter()
        .map(|n| picsort::fsops::sha256_file(&target.join(n)).unwrap())
        .collect();
    assert_eq!(moved, hashes.into_iter().collect());
    assert!(store.list()?.is_empty());
    Ok(())
}

#[test]
fn test_cli_json_events() -> Result<()> {
    let dir = tempdir()?;
    let photos = dir.path().join("photos");
    write_dated(&photos.join("a.jpg"), "a");
    write_dated(&photos.join("b.jpg"), "b");

    let output = std::process::Command::new(env!("CARGO_BIN_EXE_picsort"))
        .env("HOME", dir.path())
        .arg("organize")
        .arg(&photos)
        .arg("--json")
        .arg("--resume-dir")
        .arg(dir.path().join("resume"))
        .output()?;
    assert!(output.status.success());

    let stdout = String::from_utf8(output.stdout)?;
    let events: Vec<serde_json::Value> = stdout
        .lines()
        .filter(|l| !l.is_empty())
        .map(|l| serde_json::from_str(l).unwrap())
        .collect();

    assert_eq!(events.first().unwrap()["type"], "run_started");
    assert_eq!(
        events.iter().filter(|e| e["type"] == "op_completed").count(),
        2
    );
    let last = events.last().unwrap();
    assert_eq!(last["type"], "run_finished");
    assert_eq!(last["completed"], 2);
    assert_eq!(last["failed"], 0);
    Ok(())
}

#[test]
fn test_cli_resume_picks_up_interrupted_run() -> Result<()> {
    let dir = tempdir()?;
    let (plan, _) = three_same_named(dir.path())?;
    let resume_dir = dir.path().join("resume");
    let store = ResumeStore::open(&resume_dir)?;
    let cancel = CancelFlag::new();
    let mut sink = CancelAfter {
        flag: cancel.clone(),
        after: 2,
        seen: 0,
    };
    Orchestrator::new(Config::default(), cancel)
        .with_store(&store)
        .run(&plan, false, &mut sink)?;

    assert_cmd::Command::new(env!("CARGO_BIN_EXE_picsort"))
        .args(["resume", "--list", "--resume-dir"])
        .arg(&resume_dir)
        .assert()
        .success()
        .stdout(predicates::str::contains("PENDING"));

    picsort_cmd(dir.path())
        .args(["resume", "--quiet", "--resume-dir"])
        .arg(&resume_dir)
        .assert()
        .success();

    assert_eq!(names_in(&dir.path().join("library").join("08.2020")).len(), 3);
    assert!(store.list()?.is_empty());
    Ok(())
}

#[test]
fn test_cli_resume_without_work_exits_nonzero() {
    let dir = tempdir().unwrap();
    assert_cmd::Command::new(env!("CARGO_BIN_EXE_picsort"))
        .args(["resume", "--resume-dir"])
        .arg(dir.path())
        .assert()
        .code(1)
        .stderr(predicates::str::contains("No interrupted operations"));
}

#[test]
fn test_cli_missing_directory_is_run_failure() {
    let dir = tempdir().unwrap();
    assert_cmd::Command::new(env!("CARGO_BIN_EXE_picsort"))
        .arg("organize")
        .arg(dir.path().join("nope"))
        .arg("--resume-dir")
        .arg(dir.path().join("resume"))
        .assert()
        .code(2)
        .stderr(predicates::str::contains("error:"));
}

#[test]
fn test_cli_config_init_and_show() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("config.yaml");

    assert_cmd::Command::new(env!("CARGO_BIN_EXE_picsort"))
        .args(["config", "--init", "--config"])
        .arg(&path)
        .assert()
        .success();
    assert!(path.exists());

    assert_cmd::Command::new(env!("CARGO_BIN_EXE_picsort"))
        .args(["config", "--init", "--config"])
        .arg(&path)
        .assert()
        .code(2);

    assert_cmd::Command::new(env!("CARGO_BIN_EXE_picsort"))
        .args(["config", "--config"])
        .arg(&path)
        .assert()
        .success()
        .stdout(predicates::str::contains("duplicate_handling: increment"));
}

#[test]
fn test_cli_schema() {
    assert_cmd::Command::new(env!("CARGO_BIN_EXE_picsort"))
        .arg("schema")
        .assert()
        .success()
        .stdout(predicates::str::contains("target_root"));
}

#[test]
fn test_cli_scan_previews_without_moving() -> Result<()> {
    let dir = tempdir()?;
    let photos = dir.path().join("photos");
    write_dated(&photos.join("a.jpg"), "a");
    write_dated(&photos.join("b.jpg"), "b");
    write_dated(&photos.join("08.2020").join("a.jpg"), "existing");
    let before = snapshot(dir.path());

    picsort_cmd(dir.path())
        .args(["scan", "--format", "csv"])
        .arg(&photos)
        .assert()
        .success()
        .stdout(predicates::str::contains("folder,file_count,files,renamed"))
        .stdout(predicates::str::contains(
            "08.2020,2,a_1.jpg;b.jpg,a.jpg->a_1.jpg",
        ));

    let output = picsort_cmd(dir.path())
        .args(["scan", "--json"])
        .arg(&photos)
        .output()?;
    assert!(output.status.success());
    let preview: serde_json::Value = serde_json::from_slice(&output.stdout)?;
    assert_eq!(preview["total_files"], 2);
    assert_eq!(preview["media_files"], 2);
    assert_eq!(preview["folders"][0]["folder"], "08.2020");
    assert_eq!(preview["date_range"]["oldest"], preview["date_range"]["newest"]);

    picsort_cmd(dir.path())
        .arg("scan")
        .arg(&photos)
        .assert()
        .success()
        .stdout(predicates::str::contains("08.2020: 2 files"))
        .stdout(predicates::str::contains("picsort organize"));

    assert_eq!(snapshot(dir.path()), before);
    Ok(())
}

#[test]
fn test_cli_without_directory_or_default_source_fails() {
    let dir = tempdir().unwrap();
    picsort_cmd(dir.path())
        .arg("organize")
        .assert()
        .code(2)
        .stderr(predicates::str::contains("default_source"));
}
