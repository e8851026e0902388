//! Command-line front end for the journal migration engine.
//!
//! # Responsibility
//! - Open the journal database and trigger migration use-cases.
//! - Print reports in a stable, line-oriented format.

use bujo_core::db::open_db;
use bujo_core::{
    init_logging, CoreConfig, DailyOutcome, Entry, EntryKind, EntryRepository, MigrationService,
    SqliteCheckpointStore, SqliteCollectionRepository, SqliteEntryRepository,
};
use chrono::{Local, NaiveDate, NaiveDateTime, NaiveTime};
use clap::{Parser, Subcommand, ValueEnum};
use log::info;
use std::error::Error;
use std::path::PathBuf;
use std::process::ExitCode;
use uuid::Uuid;

#[derive(Debug, Parser)]
#[command(name = "bujo", version, about = "Bullet journal migration engine")]
struct Cli {
    /// Journal database file (overrides the config file).
    #[arg(long, global = true)]
    db: Option<PathBuf>,
    /// JSON config file.
    #[arg(long, global = true)]
    config: Option<PathBuf>,
    /// Absolute directory for log files.
    #[arg(long, global = true)]
    log_dir: Option<PathBuf>,
    #[arg(long, global = true)]
    log_level: Option<String>,
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Run the daily migration (forwarding, promotion, archival).
    Migrate {
        /// Pretend the current time is this value.
        #[arg(long)]
        at: Option<String>,
    },
    /// List tasks idle long enough to need review.
    OldTasks {
        #[arg(long)]
        at: Option<String>,
    },
    /// Park tasks in the Future Log without a date.
    Defer {
        #[arg(required = true)]
        ids: Vec<Uuid>,
    },
    /// Move a task to another day.
    Reschedule { id: Uuid, date: String },
    /// Add an entry to the daily log, or to the Future Log with `--due`.
    Add {
        content: String,
        #[arg(long, value_enum, default_value_t = KindArg::Task)]
        kind: KindArg,
        #[arg(long)]
        date: Option<String>,
        #[arg(long)]
        due: Option<String>,
    },
}

impl Command {
    fn name(&self) -> &'static str {
        match self {
            Self::Migrate { .. } => "migrate",
            Self::OldTasks { .. } => "old_tasks",
            Self::Defer { .. } => "defer",
            Self::Reschedule { .. } => "reschedule",
            Self::Add { .. } => "add",
        }
    }
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum KindArg {
    Task,
    Event,
    Note,
}

impl From<KindArg> for EntryKind {
    fn from(value: KindArg) -> Self {
        match value {
            KindArg::Task => EntryKind::Task,
            KindArg::Event => EntryKind::Event,
            KindArg::Note => EntryKind::Note,
        }
    }
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("error: {err}");
            ExitCode::FAILURE
        }
    }
}

fn run(cli: Cli) -> Result<(), Box<dyn Error>> {
    let mut config = match cli.config.as_ref() {
        Some(path) => CoreConfig::load(path)?,
        None => CoreConfig::default(),
    };
    if let Some(db) = cli.db {
        config.db_path = db;
    }
    if let Some(log_dir) = cli.log_dir {
        config.log_dir = Some(log_dir);
    }
    if let Some(level) = cli.log_level {
        config.log_level = level;
    }
    config.validate()?;

    if let Some(log_dir) = config.log_dir.as_ref() {
        init_logging(&config.log_level, log_dir)?;
    }

    let conn = open_db(&config.db_path)?;
    let entries = SqliteEntryRepository::try_new(&conn)?;
    let service = MigrationService::with_settings(
        SqliteEntryRepository::try_new(&conn)?,
        SqliteCollectionRepository::try_new(&conn)?,
        SqliteCheckpointStore::try_new(&conn)?,
        config.migration.clone(),
    );

    info!(
        "event=cli_command module=cli status=start command={}",
        cli.command.name()
    );
    match cli.command {
        Command::Migrate { at } => {
            let now = resolve_now(at.as_deref())?;
            let report = service.run_daily_migration(now)?;
            if report.outcome == DailyOutcome::AlreadyRan {
                println!("day={} status=already_migrated", report.day);
                return Ok(());
            }
            println!(
                "day={} forwarded={} promoted={} skipped={}",
                report.day, report.forwarded, report.promoted, report.skipped
            );
            if let Some(archival) = report.archival.as_ref() {
                println!(
                    "archive month_key={} outcome={:?} copied={} already_present={}",
                    archival.month_key, archival.outcome, archival.copied, archival.already_present
                );
            }
            print_entries("old_task", &report.old_tasks);
        }
        Command::OldTasks { at } => {
            let now = resolve_now(at.as_deref())?;
            let old_tasks = service.list_old_tasks(now)?;
            println!(
                "threshold_days={} count={}",
                service.settings().old_task_threshold_days,
                old_tasks.len()
            );
            print_entries("old_task", &old_tasks);
        }
        Command::Defer { ids } => {
            print_entries("deferred", &service.move_to_future_log(&ids)?);
        }
        Command::Reschedule { id, date } => {
            let now = Local::now().naive_local();
            let rescheduled = service.reschedule(id, parse_moment(&date)?, now)?;
            print_entries("rescheduled", std::slice::from_ref(&rescheduled));
        }
        Command::Add {
            content,
            kind,
            date,
            due,
        } => {
            let date = match date {
                Some(value) => parse_moment(&value)?,
                None => Local::now().naive_local(),
            };
            let entry = match due {
                Some(value) => {
                    Entry::future(kind.into(), content, date, Some(parse_moment(&value)?))
                }
                None => Entry::new(kind.into(), content, date),
            };
            entries.create_entry(&entry)?;
            print_entries("added", std::slice::from_ref(&entry));
        }
    }
    Ok(())
}

fn resolve_now(at: Option<&str>) -> Result<NaiveDateTime, Box<dyn Error>> {
    match at {
        Some(value) => parse_moment(value),
        None => Ok(Local::now().naive_local()),
    }
}

/// Accepts `YYYY-MM-DD`, `YYYY-MM-DD HH:MM[:SS]` or the `T`-separated form.
fn parse_moment(value: &str) -> Result<NaiveDateTime, Box<dyn Error>> {
    let value = value.trim();
    for format in [
        "%Y-%m-%d %H:%M:%S",
        "%Y-%m-%dT%H:%M:%S",
        "%Y-%m-%d %H:%M",
        "%Y-%m-%dT%H:%M",
    ] {
        if let Ok(parsed) = NaiveDateTime::parse_from_str(value, format) {
            return Ok(parsed);
        }
    }
    let day = NaiveDate::parse_from_str(value, "%Y-%m-%d")
        .map_err(|err| format!("invalid date `{value}`: {err}"))?;
    Ok(day.and_time(NaiveTime::MIN))
}

fn print_entries(label: &str, entries: &[Entry]) {
    for entry in entries {
        println!(
            "{label} id={} kind={} date={} since={} content={}",
            entry.id,
            entry.kind.as_str(),
            entry.date.date(),
            entry.age_anchor().date(),
            entry.content
        );
    }
}
