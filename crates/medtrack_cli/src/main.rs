//! Operator CLI over the tracker facade.
//!
//! # Responsibility
//! - Run read-only smoke checks against a real database file.
//! - Print results as JSON so scripts can consume them.

use chrono::{Local, NaiveDate, NaiveTime};
use clap::{Parser, Subcommand};
use log::error;
use medtrack_core::model::schedule::format_clock;
use medtrack_core::{
    core_version, init_from_config, AdherenceQuery, MedicineId, MedicineQuery, MedicineTracker,
    TrackerConfig, TrackerError,
};
use serde_json::json;
use std::error::Error;
use std::fmt::{Display, Formatter};
use std::path::PathBuf;
use std::process::ExitCode;

#[derive(Parser)]
#[command(name = "medtrack")]
#[command(about = "Household medicine tracking diagnostics", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Override the database path
    #[arg(long, global = true)]
    db: Option<PathBuf>,

    /// Write rolling logs to this absolute directory
    #[arg(long, global = true)]
    log_dir: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Print core version and current store version
    Version,

    /// List doses that are due or missed
    Pending {
        /// Day to evaluate (YYYY-MM-DD), defaults to today
        #[arg(long)]
        date: Option<NaiveDate>,

        /// Wall-clock time (HH:MM), defaults to now
        #[arg(long, value_parser = parse_time)]
        time: Option<NaiveTime>,
    },

    /// Dose counts for one day
    Summary {
        #[arg(long)]
        date: Option<NaiveDate>,

        #[arg(long, value_parser = parse_time)]
        time: Option<NaiveTime>,
    },

    /// Adherence report over a date range
    Stats {
        #[arg(long)]
        start: Option<NaiveDate>,

        #[arg(long)]
        end: Option<NaiveDate>,

        #[arg(long)]
        medicine: Option<MedicineId>,
    },

    /// Medicines at or below their low-stock threshold
    LowStock,

    /// List medicines by name
    Medicines {
        #[arg(long)]
        include_inactive: bool,

        #[arg(long, default_value_t = 1)]
        page: u32,

        #[arg(long, default_value_t = 20)]
        per_page: u32,
    },
}

/// Failure of one CLI run.
#[derive(Debug)]
enum CliError {
    Tracker(TrackerError),
    /// Result could not be rendered as JSON.
    Render(serde_json::Error),
}

impl CliError {
    fn code(&self) -> &'static str {
        match self {
            Self::Tracker(err) => err.code(),
            Self::Render(_) => "OUTPUT_ERROR",
        }
    }
}

impl Display for CliError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Tracker(err) => write!(f, "{err}"),
            Self::Render(err) => write!(f, "failed to render output: {err}"),
        }
    }
}

impl Error for CliError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Tracker(err) => Some(err),
            Self::Render(err) => Some(err),
        }
    }
}

impl From<TrackerError> for CliError {
    fn from(value: TrackerError) -> Self {
        Self::Tracker(value)
    }
}

impl From<serde_json::Error> for CliError {
    fn from(value: serde_json::Error) -> Self {
        Self::Render(value)
    }
}

fn parse_time(value: &str) -> Result<NaiveTime, String> {
    NaiveTime::parse_from_str(value, "%H:%M")
        .map_err(|err| format!("expected HH:MM, got `{value}`: {err}"))
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    match run(cli) {
        Ok(output) => {
            println!("{output}");
            ExitCode::SUCCESS
        }
        Err(err) => {
            error!(
                "event=cli_run module=cli status=error error_code={}",
                err.code()
            );
            let body = json!({ "error": err.code(), "message": err.to_string() });
            eprintln!("{body}");
            ExitCode::FAILURE
        }
    }
}

fn run(cli: Cli) -> Result<String, CliError> {
    let mut config = TrackerConfig::load().map_err(TrackerError::from)?;
    if let Some(db) = cli.db {
        config.storage.db_path = db;
    }
    if let Some(dir) = cli.log_dir {
        config.logging.dir = Some(dir);
    }
    if config.logging.dir.is_some() {
        init_from_config(&config.logging).map_err(TrackerError::Config)?;
    }

    let tracker = MedicineTracker::from_config(&config)?;
    let now = Local::now().naive_local();

    let value = match cli.command {
        Commands::Version => {
            let windows: serde_json::Map<String, serde_json::Value> = tracker
                .time_windows()?
                .iter()
                .map(|(window, bounds)| {
                    let range = format!(
                        "{}-{}",
                        format_clock(bounds.start_minute),
                        format_clock(bounds.end_minute)
                    );
                    (window.code().to_string(), serde_json::Value::String(range))
                })
                .collect();
            json!({
                "core_version": core_version(),
                "store_version": tracker.current_version()?,
                "db_path": config.storage.db_path,
                "windows": windows,
            })
        }
        Commands::Pending { date, time } => {
            let doses = tracker.get_pending_doses(
                date.unwrap_or(now.date()),
                time.unwrap_or(now.time()),
            )?;
            to_json(&doses)?
        }
        Commands::Summary { date, time } => {
            let summary = tracker.get_today_summary(
                date.unwrap_or(now.date()),
                time.unwrap_or(now.time()),
            )?;
            to_json(&summary)?
        }
        Commands::Stats {
            start,
            end,
            medicine,
        } => {
            let report = tracker.get_adherence_stats(&AdherenceQuery {
                start_date: start,
                end_date: end,
                medicine_id: medicine,
            })?;
            to_json(&report)?
        }
        Commands::LowStock => to_json(&tracker.list_low_stock()?)?,
        Commands::Medicines {
            include_inactive,
            page,
            per_page,
        } => {
            let page = tracker.list_medicines(&MedicineQuery {
                include_inactive,
                page,
                per_page,
                ..MedicineQuery::default()
            })?;
            to_json(&page)?
        }
    };

    Ok(serde_json::to_string_pretty(&value)?)
}

fn to_json<T: serde::Serialize>(value: &T) -> Result<serde_json::Value, CliError> {
    Ok(serde_json::to_value(value)?)
}
