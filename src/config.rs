//! Configuration for the mentord server binary.
//!
//! CLI arguments take precedence over environment variables, which take
//! precedence over the built-in defaults.

use std::path::PathBuf;

use clap::Parser;

use crate::policy::{DEFAULT_REMINDER_AT, DEFAULT_SUSPENSION_AT, DEFAULT_SUSPEND_DURATION_DAYS};

pub const DEFAULT_BIND: &str = "127.0.0.1:3000";
pub const DEFAULT_DB: &str = "mentord.db";

/// Background-processing core for the tutoring platform.
///
/// Runs the nightly policy sweeps, the realtime push hub, and the guarded
/// API endpoints in one process.
#[derive(Parser, Debug, Default)]
#[command(name = "mentord", version, about)]
pub struct Cli {
    /// HTTP server bind address [env: MENTORD_BIND] [default: 127.0.0.1:3000]
    #[arg(long, short = 'b')]
    pub bind: Option<String>,

    /// SQLite database path [env: MENTORD_DB] [default: mentord.db]
    #[arg(long, short = 'd')]
    pub db: Option<PathBuf>,

    /// Reminder sweep time of day (HH:MM) [default: 23:00]
    #[arg(long)]
    pub reminder_at: Option<String>,

    /// Suspension sweep time of day (HH:MM) [default: 02:00]
    #[arg(long)]
    pub suspension_at: Option<String>,
}

pub struct Config {
    pub bind_addr: String,
    pub db_path: PathBuf,
    pub reminder_at: String,
    pub suspension_at: String,
    pub suspend_duration_days: i64,
}

impl Config {
    pub fn from_cli_and_env(cli: Cli) -> Self {
        let bind_addr = cli
            .bind
            .or_else(|| std::env::var("MENTORD_BIND").ok())
            .unwrap_or_else(|| DEFAULT_BIND.to_string());

        let db_path = cli
            .db
            .or_else(|| std::env::var("MENTORD_DB").ok().map(PathBuf::from))
            .unwrap_or_else(|| PathBuf::from(DEFAULT_DB));

        let suspend_duration_days =
            parse_suspend_duration(std::env::var("SUSPEND_DURATION_DAYS").ok().as_deref());

        Self {
            bind_addr,
            db_path,
            reminder_at: cli
                .reminder_at
                .unwrap_or_else(|| DEFAULT_REMINDER_AT.to_string()),
            suspension_at: cli
                .suspension_at
                .unwrap_or_else(|| DEFAULT_SUSPENSION_AT.to_string()),
            suspend_duration_days,
        }
    }
}

/// Parse `SUSPEND_DURATION_DAYS`; unset, empty, or non-numeric values fall
/// back to the default.
pub fn parse_suspend_duration(raw: Option<&str>) -> i64 {
    raw.and_then(|v| v.trim().parse::<i64>().ok())
        .filter(|days| *days > 0)
        .unwrap_or(DEFAULT_SUSPEND_DURATION_DAYS)
}
