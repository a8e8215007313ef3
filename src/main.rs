//! `picsort` - safe, resumable date-folder organizer.
//!
//! See `DESIGN.md` for architecture.

use anyhow::Result;
use clap::Parser;

use picsort::cli::{Cli, Command};
use picsort::exit_codes::exit;
use picsort::shutdown::CancelFlag;

fn main() {
    let cli = Cli::parse();
    picsort::logging::init_tracing(cli.global.verbose, cli.global.quiet);
    let exit_code = match run(cli) {
        Ok(code) => code,
        Err(e) => {
            tracing::error!("{e:#}");
            eprintln!("error: {e:#}");
            exit::RUN_FAILURE
        }
    };
    std::process::exit(exit_code);
}

fn run(cli: Cli) -> Result<i32> {
    let global = cli.global;
    let cancel = CancelFlag::new();
    let code = match cli.command {
        Command::Schema => {
            let schema = picsort::model::generate_schema();
            println!("{}", schema);
            exit::SUCCESS
        }
        Command::Config(args) => picsort::engine::config(args, &global)?,
        Command::Scan(args) => picsort::engine::scan(args, &global)?,
        Command::Organize(args) => {
            cancel.install_signal_handler()?;
            picsort::engine::organize(args, &global, cancel)?
        }
        Command::Apply(args) => {
            cancel.install_signal_handler()?;
            picsort::engine::apply(args, &global, cancel)?
        }
        Command::Resume(args) => {
            cancel.install_signal_handler()?;
            picsort::engine::resume(args, &global, cancel)?
        }
    };
    Ok(code)
}
