//! Operator entry point for a tribes database.
//!
//! # Responsibility
//! - Open (and migrate) a database file.
//! - Run the digest job once with the log-only notifier.
//! - Print deterministic health lines for quick sanity checks.

use clap::{Parser, Subcommand};
use log::error;
use std::path::PathBuf;
use std::process::ExitCode;
use tribes_core::db::migrations::{current_user_version, latest_version};
use tribes_core::{
    core_version, init_logging_from_config, open_db, ping, DigestService, EngineConfig,
    LogNotifier, ServiceContext, SystemClock,
};

#[derive(Parser)]
#[command(name = "tribes", about = "Tribes core operator tool")]
struct Cli {
    /// SQLite database file
    #[arg(long, value_name = "PATH", default_value = "tribes.sqlite3")]
    db: PathBuf,

    /// JSON engine config; `TRIBES_*` variables override it
    #[arg(long, value_name = "PATH")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    cmd: Cmd,
}

#[derive(Subcommand)]
enum Cmd {
    /// Apply pending migrations and print the schema version
    Migrate,
    /// Run one digest pass
    Digest,
    /// Print crate and schema versions
    Health,
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(message) => {
            eprintln!("error: {message}");
            ExitCode::FAILURE
        }
    }
}

fn run(cli: Cli) -> Result<(), String> {
    let config = load_config(cli.config.as_ref())?;
    init_logging_from_config(&config.logging).map_err(|err| err.to_string())?;

    let conn = open_db(&cli.db).map_err(|err| {
        error!("event=cli_open module=cli status=error error={err}");
        err.to_string()
    })?;

    match cli.cmd {
        Cmd::Migrate => {
            let version = current_user_version(&conn).map_err(|err| err.to_string())?;
            println!("schema_version={version}");
        }
        Cmd::Digest => {
            let clock = SystemClock;
            let notifier = LogNotifier;
            let ctx = ServiceContext::new(&clock, &config, &notifier);
            let run = DigestService::new(&conn, ctx)
                .run_digest()
                .map_err(|err| err.to_string())?;
            println!(
                "digest skipped_locked={} sent={} skipped={} failed={}",
                run.skipped_locked, run.sent, run.skipped, run.failed
            );
        }
        Cmd::Health => {
            let version = current_user_version(&conn).map_err(|err| err.to_string())?;
            println!("tribes_core ping={}", ping());
            println!("tribes_core version={}", core_version());
            println!("schema_version={version} latest={}", latest_version());
        }
    }
    Ok(())
}

fn load_config(path: Option<&PathBuf>) -> Result<EngineConfig, String> {
    let mut config = match path {
        Some(path) => EngineConfig::load(path).map_err(|err| err.to_string())?,
        None => EngineConfig::default(),
    };
    config
        .apply_overrides(|key| std::env::var(key).ok())
        .map_err(|err| err.to_string())?;
    Ok(config)
}
