//! `migrate` - operator command for the game database schema
//!
//! ```text
//! migrate up [--to VERSION]
//! migrate down --to VERSION
//! migrate status [--json]
//! migrate schema
//! migrate resolve VERSION --applied|--reverted
//! migrate unlock
//! ```
//!
//! Exit codes: 0 success, 1 transformation/database/config error,
//! 2 ledger inconsistency, 3 lock contention, 4 registry error.

use std::process::ExitCode;

use anyhow::Context;
use clap::{ArgGroup, Parser, Subcommand};
use serde::Serialize;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use stellar_schema::storage;
use stellar_schema::{
    Direction, MigrateConfig, MigrationError, Resolution, RunReport, StartupError, Target, Version,
};

#[derive(Debug, Parser)]
#[command(name = "migrate")]
#[command(about = "Apply, revert and inspect versioned schema migrations")]
struct Cli {
    /// Database URL (sqlite://path or postgres://...)
    #[arg(long, env = "DATABASE_URL", global = true)]
    database_url: Option<String>,

    /// Attempts at the migration lock before giving up
    #[arg(long, global = true)]
    lock_attempts: Option<u32>,

    /// Initial wait (ms) between lock attempts; doubles each retry
    #[arg(long, global = true)]
    lock_backoff_ms: Option<u64>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Apply pending migrations
    Up {
        /// Stop after this version (default: latest)
        #[arg(long)]
        to: Option<Version>,
    },
    /// Revert applied migrations above a version (0 reverts everything)
    Down {
        #[arg(long)]
        to: Version,
    },
    /// Show applied and pending migrations
    Status {
        #[arg(long)]
        json: bool,
    },
    /// Print the live schema as JSON
    Schema,
    /// Settle a dirty or missing ledger row by hand
    #[command(group(ArgGroup::new("resolution").required(true).args(["applied", "reverted"])))]
    Resolve {
        version: Version,
        /// The unit's changes are in place
        #[arg(long)]
        applied: bool,
        /// The unit's changes are not in place
        #[arg(long)]
        reverted: bool,
    },
    /// Clear a lock left behind by a killed runner
    Unlock,
}

#[tokio::main]
async fn main() -> ExitCode {
    // Logs go to stderr so `status --json` and `schema` stay parseable
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .with_target(false)
        .with_level(true)
        .init();

    let cli = Cli::parse();

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            let code = exit_code(&err);
            if let Some(version) = err.downcast_ref::<MigrationError>().and_then(MigrationError::failing_version) {
                error!("Failed at version {}", version);
            }
            error!("{:#}", err);
            ExitCode::from(code)
        }
    }
}

fn exit_code(err: &anyhow::Error) -> u8 {
    if let Some(err) = err.downcast_ref::<MigrationError>() {
        err.exit_code()
    } else if let Some(err) = err.downcast_ref::<StartupError>() {
        err.exit_code()
    } else {
        1
    }
}

fn load_config(cli: &Cli) -> Result<MigrateConfig, StartupError> {
    apply_overrides(cli, MigrateConfig::from_env()?)
}

/// Flags win over the environment; the URL scheme is checked last.
fn apply_overrides(cli: &Cli, mut config: MigrateConfig) -> Result<MigrateConfig, StartupError> {
    if let Some(url) = &cli.database_url {
        config.database_url = url.clone();
    }
    if let Some(attempts) = cli.lock_attempts {
        config.lock_attempts = attempts;
    }
    if let Some(backoff) = cli.lock_backoff_ms {
        config.lock_backoff_ms = backoff;
    }
    config.backend_kind()?;
    Ok(config)
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    let config = load_config(&cli)?;
    let runner = storage::init_runner(&config).await?;

    match cli.command {
        Command::Up { to } => {
            let target = to.map(Target::Version).unwrap_or(Target::Latest);
            let report = runner.up_to(target).await?;
            print_report(&report);
        }
        Command::Down { to } => {
            let report = runner.down_to(to).await?;
            print_report(&report);
        }
        Command::Status { json } => {
            let status = runner.status().await?;
            if json {
                print_json(&status)?;
            } else {
                print!("{}", status);
            }
            if !status.is_consistent() {
                return Err(MigrationError::LedgerInconsistency {
                    detail: "see status output".into(),
                }
                .into());
            }
        }
        Command::Schema => {
            let schema = runner.schema().await?;
            print_json(&schema)?;
        }
        Command::Resolve {
            version, applied, ..
        } => {
            let resolution = if applied {
                Resolution::Applied
            } else {
                Resolution::Reverted
            };
            runner.resolve(version, resolution).await?;
            println!("v{} marked {:?}", version, resolution);
        }
        Command::Unlock => {
            if runner.unlock().await? {
                println!("Stale lock cleared");
            } else {
                println!("No stale lock on {}", runner.backend_kind());
            }
        }
    }
    Ok(())
}

fn print_report(report: &RunReport) {
    let verb = match report.direction {
        Direction::Up => "Applied",
        Direction::Down => "Reverted",
    };
    if report.is_noop() {
        info!("Nothing to do");
        println!("{} 0 migrations", verb);
        return;
    }
    for unit in &report.executed {
        println!("{} v{} {} ({} ms)", verb, unit.version, unit.name, unit.elapsed_ms);
    }
}

fn print_json<T: Serialize>(value: &T) -> anyhow::Result<()> {
    let text = serde_json::to_string_pretty(value).context("serializing output")?;
    println!("{}", text);
    Ok(())
}
