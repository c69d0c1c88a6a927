pub mod commands;

use chrono::{DateTime, Utc};
use clap::{Parser, Subcommand};
use std::process::ExitCode;

#[derive(Debug, Parser)]
#[command(
    name = "leadrelay",
    about = "Lead cascade operator CLI",
    long_about = "Operate the lead cascade: migrations, demo seeding, manual escalation sweeps, reporting, config inspection, and readiness checks.",
    after_help = "Examples:\n  leadrelay doctor --json\n  leadrelay sweep\n  leadrelay report --start 2026-01-01T00:00:00Z --end 2026-01-31T23:59:59Z"
)]
pub struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    #[command(about = "Apply pending database migrations and return structured status output")]
    Migrate,
    #[command(about = "Load the deterministic demo cascade ledger (idempotent)")]
    Seed,
    #[command(about = "Run one escalation sweep over overdue cascade entries")]
    Sweep,
    #[command(about = "Show cascade metrics, active assignments, ranking and stuck leads")]
    Report {
        #[arg(long, help = "Emit machine-readable JSON output")]
        json: bool,
        #[arg(long, help = "Period start (RFC 3339); defaults to 30 days before --end")]
        start: Option<DateTime<Utc>>,
        #[arg(long, help = "Period end (RFC 3339); defaults to now")]
        end: Option<DateTime<Utc>>,
    },
    #[command(
        about = "Inspect effective configuration values with source attribution and redaction"
    )]
    Config,
    #[command(about = "Validate config, DB connectivity, schema state and cascade configuration")]
    Doctor {
        #[arg(long, help = "Emit machine-readable JSON output")]
        json: bool,
    },
}

pub fn run() -> ExitCode {
    let cli = Cli::parse();

    let result = match cli.command {
        Command::Migrate => commands::migrate::run(),
        Command::Seed => commands::seed::run(),
        Command::Sweep => commands::sweep::run(),
        Command::Report { json, start, end } => commands::report::run(json, start, end),
        Command::Config => {
            commands::CommandResult { exit_code: 0, output: commands::config::run() }
        }
        Command::Doctor { json } => {
            commands::CommandResult { exit_code: 0, output: commands::doctor::run(json) }
        }
    };

    println!("{}", result.output);
    ExitCode::from(result.exit_code)
}
