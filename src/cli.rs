use clap::{ArgAction, Args, Parser, Subcommand};
use std::path::PathBuf;

use crate::model::DuplicatePolicy;
use crate::preview::PreviewFormat;

/// Safe, resumable date-folder organizer for photos and videos.
#[derive(Parser)]
#[command(name = "picsort", version, about, long_about = None)]
pub struct Cli {
    #[command(flatten)]
    pub global: GlobalArgs,

    #[command(subcommand)]
    pub command: Command,
}

/// Options shared by every subcommand.
#[derive(Args, Debug, Clone, Default)]
pub struct GlobalArgs {
    /// More log output on stderr (-v info, -vv debug, -vvv trace).
    #[arg(short, long, action = ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Only report errors.
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Output structured JSON events to stdout.
    #[arg(long, global = true)]
    pub json: bool,

    /// Configuration file (default: ~/.picsort/config.yaml).
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Directory holding resume records (default: ~/.picsort/resume).
    #[arg(long, global = true)]
    pub resume_dir: Option<PathBuf>,

    /// Write the audit log to this file instead of ~/.picsort/logs.
    #[arg(short = 'l', long, global = true)]
    pub log_file: Option<PathBuf>,
}

#[derive(Subcommand)]
pub enum Command {
    /// Move the files of a directory into date folders inside it.
    Organize(OrganizeArgs),
    /// Preview how a directory would be organized without changing anything.
    Scan(ScanArgs),
    /// Execute an externally produced plan manifest.
    Apply(ApplyArgs),
    /// List, validate, clean up or continue interrupted operations.
    Resume(ResumeArgs),
    /// Show or create the configuration file.
    Config(ConfigArgs),
    /// Print JSON Schema for plan manifests.
    Schema,
}

/// Settings shared by `organize` and `apply` that override the configuration.
#[derive(Args, Debug, Clone, Default)]
pub struct MoveArgs {
    /// Show what would be done without changing anything.
    #[arg(short, long, conflicts_with = "no_dry_run")]
    pub dry_run: bool,

    /// Move files even if the configuration defaults to dry runs.
    #[arg(long)]
    pub no_dry_run: bool,

    /// Skip checksum verification for faster moves.
    #[arg(long)]
    pub no_verify: bool,

    /// What to do when a destination name is taken.
    #[arg(long, value_enum)]
    pub duplicates: Option<DuplicatePolicy>,

    /// Do not ask before large operations.
    #[arg(short, long)]
    pub yes: bool,
}

/// Which files are picked up and how their folders are named.
#[derive(Args, Debug, Clone, Default)]
pub struct SelectArgs {
    /// Include subdirectories.
    #[arg(short, long)]
    pub recursive: bool,

    /// Process all files, not just media files.
    #[arg(short, long)]
    pub all_files: bool,

    /// Media extensions to process (e.g. -t .jpg,.png).
    #[arg(short = 't', long, value_delimiter = ',')]
    pub file_types: Vec<String>,

    /// Date folder format (e.g. MM.YYYY, YYYY-MM).
    #[arg(short = 'f', long)]
    pub date_format: Option<String>,
}

#[derive(Args, Debug, Clone)]
pub struct OrganizeArgs {
    /// Directory to organize (default: `default_source` from the configuration).
    pub path: Option<PathBuf>,

    #[command(flatten)]
    pub moves: MoveArgs,

    #[command(flatten)]
    pub select: SelectArgs,
}

#[derive(Args, Debug, Clone)]
pub struct ScanArgs {
    /// Directory to scan (default: `default_source` from the configuration).
    pub path: Option<PathBuf>,

    #[command(flatten)]
    pub select: SelectArgs,

    /// Duplicate policy to preview with.
    #[arg(long, value_enum)]
    pub duplicates: Option<DuplicatePolicy>,

    /// Output format; --json implies json.
    #[arg(long, value_enum, default_value_t = PreviewFormat::Table)]
    pub format: PreviewFormat,
}

#[derive(Args, Debug, Clone)]
pub struct ApplyArgs {
    /// Path to plan manifest JSON file.
    #[arg(long, required = true)]
    pub plan: PathBuf,

    #[command(flatten)]
    pub moves: MoveArgs,

    /// Only validate the manifest, do not execute.
    #[arg(long)]
    pub validate_only: bool,
}

#[derive(Args, Debug, Clone)]
pub struct ResumeArgs {
    /// Operation id or unambiguous prefix (at least 8 characters).
    pub id: Option<String>,

    /// List resumable operations.
    #[arg(long, conflicts_with_all = ["cleanup", "validate"])]
    pub list: bool,

    /// Check the operation without moving anything.
    #[arg(long)]
    pub validate: bool,

    /// Delete records older than --max-age.
    #[arg(long, conflicts_with = "validate")]
    pub cleanup: bool,

    /// Age limit for --cleanup (e.g. 7days, 12h).
    #[arg(long, default_value = "7days")]
    pub max_age: humantime::Duration,
}

#[derive(Args, Debug, Clone)]
pub struct ConfigArgs {
    /// Write a configuration file with default values.
    #[arg(long)]
    pub init: bool,

    /// Replace an existing file with --init.
    #[arg(long, requires = "init")]
    pub force: bool,

    /// Print the default configuration path.
    #[arg(long, conflicts_with = "init")]
    pub path: bool,
}
