//! Maintenance CLI over the Lullaby event store.
//!
//! # Responsibility
//! - Expose health, drift analysis, repair, contamination cleanup and
//!   cascade delete as subcommands.
//! - Print machine-readable JSON on stdout; diagnostics go to the log file.
//!
//! Exit codes: 0 ok/healthy, 1 warning or residual drift, 2 critical or error.

use chrono::Local;
use clap::{Parser, Subcommand, ValueEnum};
use log::info;
use lullaby_core::service::sleep_resolver::resolve;
use lullaby_core::{
    default_log_level, init_logging, open_db, CascadeDelete, CleanMode, ConsistencyAnalyzer,
    ContaminationScanner, DbError, EventRecordStore, HealthCheck, HealthStatus, IntegrityConfig,
    IntegrityError, LoggingError, RepairEngine, RepairStrategy, RepoError,
    SqliteChildDirectory, SqliteChildDocumentStore, SqliteEventStore,
};
use serde::Serialize;
use std::error::Error;
use std::fmt::{Display, Formatter};
use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;
use uuid::Uuid;

#[derive(Parser, Debug)]
#[command(name = "lullaby")]
#[command(about = "Integrity maintenance for the Lullaby sleep and event log")]
#[command(version)]
struct Args {
    /// SQLite database file.
    #[arg(long, env = "LULLABY_DB")]
    db: PathBuf,

    /// Absolute directory for rotated log files. Logging is off when unset.
    #[arg(long, env = "LULLABY_LOG_DIR")]
    log_dir: Option<String>,

    /// Log level (trace, debug, info, warn, error).
    #[arg(long, env = "LULLABY_LOG_LEVEL")]
    log_level: Option<String>,

    /// Pause between children in system-wide sweeps, in milliseconds.
    #[arg(long, default_value = "100")]
    sweep_delay_ms: u64,

    /// Compare event keys even when counts already agree.
    #[arg(long)]
    verify_keys: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Summarize connectivity, contamination and drift.
    Health,
    /// Report drift for one child, or for every child.
    Analyze {
        #[arg(long)]
        child: Option<Uuid>,
    },
    /// Reconcile the two event representations.
    Repair {
        #[arg(long, value_enum)]
        strategy: StrategyArg,
        #[arg(long)]
        child: Option<Uuid>,
    },
    /// List indexed events whose child no longer exists.
    Scan,
    /// Delete orphaned indexed events. Dry run unless --apply is given.
    Clean {
        #[arg(long)]
        apply: bool,
    },
    /// Delete a child and every record that references it.
    DeleteChild { child: Uuid },
    /// Show the persisted sleep status and next action for a child.
    Status { child: Uuid },
}

#[derive(ValueEnum, Clone, Copy, Debug)]
enum StrategyArg {
    EmbeddedAuthoritative,
    IndexedAuthoritative,
    Merge,
}

impl From<StrategyArg> for RepairStrategy {
    fn from(value: StrategyArg) -> Self {
        match value {
            StrategyArg::EmbeddedAuthoritative => Self::EmbeddedAuthoritative,
            StrategyArg::IndexedAuthoritative => Self::IndexedAuthoritative,
            StrategyArg::Merge => Self::Merge,
        }
    }
}

#[derive(Debug)]
enum CliError {
    Logging(LoggingError),
    Db(DbError),
    Repo(RepoError),
    Integrity(IntegrityError),
    Output(serde_json::Error),
}

impl Display for CliError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Logging(err) => write!(f, "logging: {err}"),
            Self::Db(err) => write!(f, "database: {err}"),
            Self::Repo(err) => write!(f, "store: {err}"),
            Self::Integrity(err) => write!(f, "{err}"),
            Self::Output(err) => write!(f, "output: {err}"),
        }
    }
}

impl Error for CliError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Logging(err) => Some(err),
            Self::Db(err) => Some(err),
            Self::Repo(err) => Some(err),
            Self::Integrity(err) => Some(err),
            Self::Output(err) => Some(err),
        }
    }
}

impl From<LoggingError> for CliError {
    fn from(value: LoggingError) -> Self {
        Self::Logging(value)
    }
}

impl From<DbError> for CliError {
    fn from(value: DbError) -> Self {
        Self::Db(value)
    }
}

impl From<RepoError> for CliError {
    fn from(value: RepoError) -> Self {
        Self::Repo(value)
    }
}

impl From<IntegrityError> for CliError {
    fn from(value: IntegrityError) -> Self {
        Self::Integrity(value)
    }
}

impl From<serde_json::Error> for CliError {
    fn from(value: serde_json::Error) -> Self {
        Self::Output(value)
    }
}

const EXIT_WARNING: u8 = 1;
const EXIT_FAILURE: u8 = 2;

fn main() -> ExitCode {
    let args = Args::parse();
    match run(args) {
        Ok(code) => code,
        Err(err) => {
            eprintln!("lullaby: {err}");
            ExitCode::from(EXIT_FAILURE)
        }
    }
}

fn run(args: Args) -> Result<ExitCode, CliError> {
    if let Some(log_dir) = args.log_dir.as_deref() {
        let level = args.log_level.as_deref().unwrap_or(default_log_level());
        init_logging(level, log_dir)?;
    }

    let config = IntegrityConfig::default()
        .with_sweep_delay(Duration::from_millis(args.sweep_delay_ms))
        .with_verify_keys(args.verify_keys);

    let conn = open_db(&args.db)?;
    let store = SqliteEventStore::try_new(&conn)?;
    let directory = SqliteChildDirectory::try_new(&conn)?;
    info!(
        "event=cli_command module=cli status=start command={:?}",
        args.command
    );

    match args.command {
        Command::Health => {
            let report = HealthCheck::new(store, directory, config).check();
            print_json(&report)?;
            Ok(match report.status {
                HealthStatus::Healthy => ExitCode::SUCCESS,
                HealthStatus::Warning => ExitCode::from(EXIT_WARNING),
                HealthStatus::Critical => ExitCode::from(EXIT_FAILURE),
            })
        }
        Command::Analyze { child } => {
            let analyzer = ConsistencyAnalyzer::new(store, directory, config);
            match child {
                Some(child_id) => {
                    let report = analyzer.analyze_child(child_id)?;
                    print_json(&report)?;
                    Ok(drift_exit(report.synced))
                }
                None => {
                    let report = analyzer.analyze_system()?;
                    print_json(&report)?;
                    Ok(drift_exit(
                        report.unsynced_children == 0 && report.failures.is_empty(),
                    ))
                }
            }
        }
        Command::Repair { strategy, child } => {
            let engine = RepairEngine::new(store, directory, config);
            match child {
                Some(child_id) => {
                    let outcome = engine.repair_child(child_id, strategy.into())?;
                    print_json(&outcome)?;
                    Ok(drift_exit(outcome.success))
                }
                None => {
                    let summary = engine.repair_system(strategy.into())?;
                    print_json(&summary)?;
                    Ok(drift_exit(summary.failed == 0))
                }
            }
        }
        Command::Scan => {
            let report = ContaminationScanner::new(store, directory, config).scan()?;
            print_json(&report)?;
            Ok(ExitCode::SUCCESS)
        }
        Command::Clean { apply } => {
            let mode = if apply {
                CleanMode::Apply
            } else {
                CleanMode::DryRun
            };
            let outcome = ContaminationScanner::new(store, directory, config).clean(mode)?;
            print_json(&outcome)?;
            Ok(ExitCode::SUCCESS)
        }
        Command::DeleteChild { child } => {
            let documents = SqliteChildDocumentStore::try_new(&conn)?;
            let outcome = CascadeDelete::new(store, directory, documents).delete_child(child)?;
            print_json(&outcome)?;
            Ok(ExitCode::SUCCESS)
        }
        Command::Status { child } => {
            let records = store.list_indexed(child)?;
            // Existence check; the indexed set alone cannot tell "no events"
            // from "no child".
            store.get(child)?;
            let resolution = resolve(&records, Local::now().fixed_offset());
            print_json(&StatusView {
                child_id: child,
                status: resolution.profile.status.as_str(),
                since: resolution.profile.since,
                open_event_id: resolution.profile.open_event_id,
                next_action: resolution.next_action.as_str(),
                label: resolution.next_action.label(),
            })?;
            Ok(ExitCode::SUCCESS)
        }
    }
}

#[derive(Serialize)]
struct StatusView {
    child_id: Uuid,
    status: &'static str,
    since: Option<i64>,
    open_event_id: Option<Uuid>,
    next_action: &'static str,
    label: &'static str,
}

fn drift_exit(clean: bool) -> ExitCode {
    if clean {
        ExitCode::SUCCESS
    } else {
        ExitCode::from(EXIT_WARNING)
    }
}

fn print_json<T: Serialize>(value: &T) -> Result<(), CliError> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
