use anyhow::{Context, Result, bail};
use chrono::{DateTime, Local, Utc};
use path_absolutize::Absolutize;
use serde::Serialize;
use std::io::{self, BufRead, IsTerminal, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};
use uuid::Uuid;

use crate::audit::AuditLog;
use crate::cli::{
    ApplyArgs, ConfigArgs, GlobalArgs, MoveArgs, OrganizeArgs, ResumeArgs, ScanArgs, SelectArgs,
};
use crate::config::{Config, LARGE_OPERATION_FILES};
use crate::exit_codes::exit;
use crate::model::{self, Plan};
use crate::orchestrator::Orchestrator;
use crate::preview::{PreviewFormat, ScanPreview};
use crate::reporter::Reporter;
use crate::scan;
use crate::shutdown::CancelFlag;
use crate::store::{OperationType, ResumePoint, ResumeStore};
use crate::validate;

pub fn organize(args: OrganizeArgs, global: &GlobalArgs, cancel: CancelFlag) -> Result<i32> {
    let mut config = load_config(global)?;
    apply_select_args(&args.select, &mut config);
    let dry_run = apply_move_args(&args.moves, &mut config);
    config.validate().context("invalid settings")?;

    let root = source_dir(args.path.as_deref(), &config)?;
    let plan = scan::build_plan(&root, &config)
        .with_context(|| format!("failed to scan {}", root.display()))?;

    run_plan(
        &plan,
        config,
        dry_run,
        OperationType::Organize,
        &args.moves,
        global,
        cancel,
    )
}

/// Resolve every destination the way `organize` would and print the result.
pub fn scan(args: ScanArgs, global: &GlobalArgs) -> Result<i32> {
    let mut config = load_config(global)?;
    apply_select_args(&args.select, &mut config);
    if let Some(policy) = args.duplicates {
        config.duplicate_handling = policy;
    }
    config.validate().context("invalid settings")?;

    let root = source_dir(args.path.as_deref(), &config)?;
    let files = scan::scan(&root, &config)
        .with_context(|| format!("failed to scan {}", root.display()))?;
    let total = files.len();
    let problems: Vec<_> = files.iter().filter(|f| !f.is_eligible()).cloned().collect();
    let grouping = scan::group_by_date(files, &root, &config);
    let plan = Plan::from_grouping(&root, &root, grouping);
    let ops = Orchestrator::new(config, CancelFlag::new())
        .plan(&plan, false)
        .context("failed to plan destinations")?;
    let preview = ScanPreview::new(&root, total, &problems, &plan, &ops);

    let format = if global.json {
        PreviewFormat::Json
    } else {
        args.format
    };
    match format {
        PreviewFormat::Json => println!("{}", serde_json::to_string_pretty(&preview)?),
        PreviewFormat::Csv => preview.write_csv(io::stdout().lock())?,
        PreviewFormat::Table if !global.quiet => {
            println!("{}", preview.render_table(global.verbose > 0))
        }
        PreviewFormat::Table => {}
    }
    Ok(exit::SUCCESS)
}

pub fn apply(args: ApplyArgs, global: &GlobalArgs, cancel: CancelFlag) -> Result<i32> {
    let mut config = load_config(global)?;
    let dry_run = apply_move_args(&args.moves, &mut config);
    config.validate().context("invalid settings")?;

    let manifest = model::load_manifest(&args.plan).context("failed to load plan")?;
    validate::preflight_manifest(&manifest).context("plan failed validation")?;
    if args.validate_only {
        if !global.quiet && !global.json {
            println!("Plan is valid: {} folder(s).", manifest.folders.len());
        }
        return Ok(exit::SUCCESS);
    }
    let plan = scan::plan_from_manifest(&manifest, &config)?;

    run_plan(
        &plan,
        config,
        dry_run,
        OperationType::Apply,
        &args.moves,
        global,
        cancel,
    )
}

pub fn resume(args: ResumeArgs, global: &GlobalArgs, cancel: CancelFlag) -> Result<i32> {
    let config = load_config(global)?;
    let store = open_store(global, &config)?;

    if args.list {
        print_points(&store.list()?, global.json)?;
        return Ok(exit::SUCCESS);
    }
    if args.cleanup {
        let removed = store
            .cleanup_older_than(args.max_age.into())
            .context("cleanup failed")?;
        if !global.quiet {
            println!("Removed {removed} resume record(s) older than {}.", args.max_age);
        }
        return Ok(exit::SUCCESS);
    }

    let point = match &args.id {
        Some(id) => store.find(id)?,
        None => {
            let mut interrupted = store.interrupted()?;
            if interrupted.len() != 1 {
                if interrupted.is_empty() {
                    eprintln!("No interrupted operations to resume.");
                } else {
                    print_points(&interrupted, global.json)?;
                    eprintln!("Several interrupted operations; pass the id of the one to resume.");
                }
                return Ok(exit::PARTIAL_FAILURE);
            }
            interrupted.remove(0)
        }
    };

    let report = validate::validate_resume_point(&point);
    if args.validate {
        if global.json {
            println!(
                "{}",
                serde_json::json!({
                    "operation_id": point.operation_id,
                    "valid": report.is_valid(),
                    "errors": report.errors,
                    "warnings": report.warnings,
                })
            );
        } else {
            println!(
                "Operation {}: {}",
                point.short_id(),
                if report.is_valid() { "valid" } else { "invalid" }
            );
            for e in &report.errors {
                println!("  error: {e}");
            }
            for w in &report.warnings {
                println!("  warning: {w}");
            }
        }
        return Ok(if report.is_valid() {
            exit::SUCCESS
        } else {
            exit::RUN_FAILURE
        });
    }
    for warning in report.into_result()? {
        warn!(id = %point.operation_id, "{warning}");
    }

    let snapshot = point.config().context("resume point configuration")?;
    let operation_type = point.operation_type;
    let mut reporter = reporter_for(global, &snapshot, false);
    let outcome = Orchestrator::new(snapshot, cancel)
        .with_store(&store)
        .with_operation_type(operation_type)
        .resume(point, &mut reporter)
        .context("resume failed")?;
    reporter.print_summary();
    Ok(outcome.exit_code())
}

pub fn config(args: ConfigArgs, global: &GlobalArgs) -> Result<i32> {
    if args.path {
        println!("{}", Config::default_path()?.display());
        return Ok(exit::SUCCESS);
    }
    let path = match &global.config {
        Some(path) => path.clone(),
        None => Config::default_path()?,
    };
    if args.init {
        Config::default().save(&path, args.force)?;
        if !global.quiet {
            println!("Wrote default configuration to {}", path.display());
        }
        return Ok(exit::SUCCESS);
    }
    let config = load_config(global)?;
    if global.json {
        println!("{}", serde_json::to_string_pretty(&config)?);
    } else {
        print!("{}", config.to_yaml(&path)?);
    }
    Ok(exit::SUCCESS)
}

fn load_config(global: &GlobalArgs) -> Result<Config> {
    Config::load_or_default(global.config.as_deref()).context("failed to load configuration")
}

fn apply_select_args(args: &SelectArgs, config: &mut Config) {
    if args.recursive {
        config.recursive = true;
    }
    if args.all_files {
        config.process_all_files = true;
    }
    if !args.file_types.is_empty() {
        config.file_types = args.file_types.clone();
    }
    if let Some(date_format) = &args.date_format {
        config.date_format = date_format.clone();
    }
}

/// The directory to work on: `path`, else the configured `default_source`.
fn source_dir(path: Option<&Path>, config: &Config) -> Result<PathBuf> {
    let path = match path {
        Some(path) => path.to_path_buf(),
        None => match config.default_source()? {
            Some(path) => path,
            None => bail!("no directory given and no default_source configured"),
        },
    };
    Ok(path
        .absolutize()
        .with_context(|| format!("cannot resolve {}", path.display()))?
        .into_owned())
}

/// Merge the shared move flags into `config`; returns the effective dry-run setting.
fn apply_move_args(args: &MoveArgs, config: &mut Config) -> bool {
    if args.dry_run {
        config.dry_run = true;
    }
    if args.no_dry_run {
        config.dry_run = false;
    }
    if args.no_verify {
        config.verify_checksum = false;
    }
    if let Some(policy) = args.duplicates {
        config.duplicate_handling = policy;
    }
    config.dry_run
}

fn open_store(global: &GlobalArgs, config: &Config) -> Result<ResumeStore> {
    let dir: PathBuf = match &global.resume_dir {
        Some(dir) => dir.clone(),
        None => config.resume_dir()?,
    };
    ResumeStore::open(&dir)
        .with_context(|| format!("cannot open resume store {}", dir.display()))
}

fn run_plan(
    plan: &Plan,
    config: Config,
    dry_run: bool,
    operation_type: OperationType,
    moves: &MoveArgs,
    global: &GlobalArgs,
    cancel: CancelFlag,
) -> Result<i32> {
    if !dry_run
        && !global.json
        && needs_confirmation(plan.len(), &config, moves.yes)
        && !confirm(&format!("Proceed to organize {} files?", plan.len()))?
    {
        eprintln!("Operation cancelled.");
        return Ok(exit::PARTIAL_FAILURE);
    }

    let store = if dry_run {
        None
    } else {
        Some(open_store(global, &config)?)
    };
    let mut reporter = reporter_for(global, &config, dry_run);
    let mut orchestrator = Orchestrator::new(config, cancel).with_operation_type(operation_type);
    if let Some(store) = &store {
        orchestrator = orchestrator.with_store(store);
    }

    let report = orchestrator
        .run(plan, dry_run, &mut reporter)
        .context("run aborted")?;
    reporter.print_summary();
    Ok(report.exit_code())
}

/// Dry runs write no audit log.
fn reporter_for(global: &GlobalArgs, config: &Config, dry_run: bool) -> Reporter {
    let reporter = Reporter::new(global.json, global.quiet);
    if dry_run {
        return reporter;
    }
    let audit = match &global.log_file {
        Some(path) => Some(AuditLog::to_file(path)),
        None if config.create_log => match config.log_dir() {
            Ok(dir) => Some(AuditLog::in_dir(dir)),
            Err(e) => {
                warn!(error = %e, "no audit log directory");
                None
            }
        },
        None => None,
    };
    match audit {
        Some(audit) => reporter.with_audit(audit),
        None => reporter,
    }
}

fn needs_confirmation(files: usize, config: &Config, yes: bool) -> bool {
    !yes && config.confirm_large_operations && files > LARGE_OPERATION_FILES
}

/// Ask on stderr and read the answer from a terminal. Without a terminal
/// there is nobody to ask, so the run proceeds.
fn confirm(question: &str) -> Result<bool> {
    let stdin = io::stdin();
    if !stdin.is_terminal() {
        debug!("stdin is not a terminal; not asking for confirmation");
        return Ok(true);
    }
    eprint!("{question} [y/N] ");
    io::stderr().flush()?;
    let mut answer = String::new();
    stdin.lock().read_line(&mut answer)?;
    Ok(is_yes(&answer))
}

fn is_yes(answer: &str) -> bool {
    matches!(answer.trim().to_ascii_lowercase().as_str(), "y" | "yes")
}

#[derive(Serialize)]
struct PointSummary<'a> {
    operation_id: Uuid,
    operation_type: String,
    source_path: &'a Path,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
    completed: usize,
    pending: usize,
}

fn print_points(points: &[ResumePoint], json: bool) -> Result<()> {
    if json {
        let summaries: Vec<PointSummary> = points
            .iter()
            .map(|p| PointSummary {
                operation_id: p.operation_id,
                operation_type: p.operation_type.to_string(),
                source_path: &p.source_path,
                created_at: p.created_at,
                updated_at: p.updated_at,
                completed: p.completed.len(),
                pending: p.pending.len(),
            })
            .collect();
        println!("{}", serde_json::to_string_pretty(&summaries)?);
        return Ok(());
    }
    if points.is_empty() {
        println!("No resumable operations.");
        return Ok(());
    }
    println!(
        "{:<12}  {:<8}  {:<19}  {:>9}  {:>7}  SOURCE",
        "ID", "TYPE", "STARTED", "COMPLETED", "PENDING"
    );
    for p in points {
        println!(
            "{:<12}  {:<8}  {:<19}  {:>9}  {:>7}  {}",
            p.short_id(),
            p.operation_type.to_string(),
            p.created_at
                .with_timezone(&Local)
                .format("%Y-%m-%d %H:%M:%S")
                .to_string(),
            p.completed.len(),
            p.pending.len(),
            p.source_path.display()
        );
    }
    Ok(())
}
