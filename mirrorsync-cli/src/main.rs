//! mirrorsync: scheduled one-way sync through an external transfer engine.
//!
//! # Usage
//!
//! ```text
//! mirrorsync config init|show|validate
//! mirrorsync daemon start|stop|status|logs
//! mirrorsync schedule start|stop|pause
//! mirrorsync run [--wait]
//! mirrorsync cancel
//! mirrorsync runs [--limit N] [--offset N] [--json]
//! mirrorsync events <run-id> [--json]
//! mirrorsync tree [path] [--runs N] [--json]
//! mirrorsync history <path> [--json]
//! mirrorsync logs <run-id> [--since N] [--limit N]
//! mirrorsync info
//! mirrorsync cleanup --older-than-days N
//! mirrorsync reset
//! ```

mod commands;

use anyhow::Result;
use clap::{Parser, Subcommand};

use commands::{
    config::ConfigCommand,
    daemon::DaemonCommand,
    runs::{CleanupArgs, EventsArgs, HistoryArgs, LogsArgs, RunsArgs},
    schedule::ScheduleCommand,
    trigger::RunArgs,
    tree::TreeArgs,
};

// ---------------------------------------------------------------------------
// CLI entry point
// ---------------------------------------------------------------------------

#[derive(Parser, Debug)]
#[command(
    name = "mirrorsync",
    version,
    about = "Scheduled one-way sync with per-file history",
    long_about = None,
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Create, show or validate ~/.mirrorsync/config.yaml.
    Config {
        #[command(subcommand)]
        command: ConfigCommand,
    },

    /// Run and control the background daemon.
    Daemon {
        #[command(subcommand)]
        command: DaemonCommand,
    },

    /// Start, stop or pause the recurring schedule.
    Schedule {
        #[command(subcommand)]
        command: ScheduleCommand,
    },

    /// Start a sync run now.
    Run(RunArgs),

    /// Terminate the run in progress.
    Cancel,

    /// List recent runs, newest first.
    Runs(RunsArgs),

    /// Show the file events of one run.
    Events(EventsArgs),

    /// Show the sync status tree, optionally below a path.
    Tree(TreeArgs),

    /// Show the recorded events of one file across runs.
    History(HistoryArgs),

    /// Print the engine log of one run.
    Logs(LogsArgs),

    /// Show run and event counts of the history database.
    Info,

    /// Delete finished runs older than a number of days.
    Cleanup(CleanupArgs),

    /// Forget every recorded run and event.
    Reset,
}

// ---------------------------------------------------------------------------
// Main
// ---------------------------------------------------------------------------

fn main() -> Result<()> {
    let cli = Cli::parse();
    match cli.command {
        Commands::Config { command } => commands::config::run(command),
        Commands::Daemon { command } => commands::daemon::run(command),
        Commands::Schedule { command } => commands::schedule::run(command),
        Commands::Run(args) => args.run(),
        Commands::Cancel => commands::trigger::cancel(),
        Commands::Runs(args) => args.run(),
        Commands::Events(args) => args.run(),
        Commands::Tree(args) => args.run(),
        Commands::History(args) => args.run(),
        Commands::Logs(args) => args.run(),
        Commands::Info => commands::runs::info(),
        Commands::Cleanup(args) => args.run(),
        Commands::Reset => commands::runs::reset(),
    }
}
