//! Run history: `runs`, `events`, `history`, `logs`, `info`, `cleanup`, `reset`.

use anyhow::Result;
use clap::Args;
use colored::Colorize;
use tabled::{settings::Style, Table, Tabled};

use mirrorsync_core::{EventKind, FileEvent};
use mirrorsync_daemon::{DaemonRequest, RunLog, RunSummary};

#[derive(Args, Debug)]
pub struct RunsArgs {
    #[arg(long, default_value_t = 20)]
    pub limit: u32,

    #[arg(long, default_value_t = 0)]
    pub offset: u32,

    /// Emit machine-readable JSON.
    #[arg(long)]
    pub json: bool,
}

#[derive(Args, Debug)]
pub struct EventsArgs {
    pub run_id: i64,

    /// Emit machine-readable JSON.
    #[arg(long)]
    pub json: bool,
}

#[derive(Args, Debug)]
pub struct HistoryArgs {
    /// Source-relative file path.
    pub path: String,

    #[arg(long, default_value_t = 50)]
    pub limit: u32,

    /// Emit machine-readable JSON.
    #[arg(long)]
    pub json: bool,
}

#[derive(Args, Debug)]
pub struct CleanupArgs {
    /// Delete finished runs that started more than this many days ago.
    #[arg(long)]
    pub older_than_days: u32,
}

#[derive(Args, Debug)]
pub struct LogsArgs {
    pub run_id: i64,

    /// First line to print (0-based).
    #[arg(long, default_value_t = 0)]
    pub since: usize,

    /// Maximum number of lines.
    #[arg(long)]
    pub limit: Option<u32>,
}

#[derive(serde::Deserialize)]
struct CleanupReport {
    runs_deleted: u64,
    events_deleted: u64,
}

#[derive(Tabled)]
struct RunRow {
    #[tabled(rename = "run")]
    id: String,
    #[tabled(rename = "trigger")]
    trigger: String,
    #[tabled(rename = "status")]
    status: String,
    #[tabled(rename = "started")]
    started: String,
    #[tabled(rename = "duration")]
    duration: String,
    #[tabled(rename = "transferred")]
    transferred: String,
    #[tabled(rename = "skipped")]
    skipped: u64,
    #[tabled(rename = "errors")]
    errors: u64,
    #[tabled(rename = "conflicts")]
    conflicts: u64,
    #[tabled(rename = "category")]
    category: String,
}

#[derive(Tabled)]
struct EventRow {
    #[tabled(rename = "path")]
    path: String,
    #[tabled(rename = "kind")]
    kind: String,
    #[tabled(rename = "size")]
    size: String,
    #[tabled(rename = "detail")]
    detail: String,
}

impl RunsArgs {
    pub fn run(self) -> Result<()> {
        let runs: Vec<RunSummary> = super::call(DaemonRequest {
            limit: Some(self.limit),
            offset: Some(self.offset),
            ..DaemonRequest::command("runs")
        })?;
        if self.json {
            return super::print_json(&runs);
        }
        if runs.is_empty() {
            println!("No runs recorded.");
            return Ok(());
        }

        let rows: Vec<RunRow> = runs
            .iter()
            .map(|run| RunRow {
                id: run.id.to_string(),
                trigger: run.trigger.to_string(),
                status: super::status_label(run.status),
                started: super::local_time(run.started_at),
                duration: run
                    .duration_secs
                    .map(|s| format!("{s}s"))
                    .unwrap_or_else(|| "-".to_string()),
                transferred: format!(
                    "{} ({})",
                    run.counters.files_transferred,
                    super::format_bytes(run.counters.bytes_transferred)
                ),
                skipped: run.counters.files_skipped,
                errors: run.counters.errors,
                conflicts: run.counters.conflicts,
                category: run
                    .error_category
                    .map(|c| c.to_string())
                    .unwrap_or_default(),
            })
            .collect();
        let mut table = Table::new(rows);
        table.with(Style::rounded());
        println!("{table}");
        Ok(())
    }
}

impl EventsArgs {
    pub fn run(self) -> Result<()> {
        let events: Vec<FileEvent> = super::call(DaemonRequest {
            run_id: Some(self.run_id),
            ..DaemonRequest::command("events")
        })?;
        if self.json {
            return super::print_json(&events);
        }
        if events.is_empty() {
            println!("No file events recorded for run {}.", self.run_id);
            return Ok(());
        }
        print_events(&events, |e| e.path.clone());
        Ok(())
    }
}

impl HistoryArgs {
    pub fn run(self) -> Result<()> {
        let events: Vec<FileEvent> = super::call(DaemonRequest {
            path: Some(self.path.clone()),
            limit: Some(self.limit),
            ..DaemonRequest::command("history")
        })?;
        if self.json {
            return super::print_json(&events);
        }
        if events.is_empty() {
            println!("No history for {}.", self.path);
            return Ok(());
        }
        print_events(&events, |e| {
            format!("run {} @ {}", e.run_id, super::local_time(e.observed_at))
        });
        Ok(())
    }
}

impl CleanupArgs {
    pub fn run(self) -> Result<()> {
        let report: CleanupReport = super::call(DaemonRequest {
            older_than_days: Some(self.older_than_days),
            ..DaemonRequest::command("cleanup")
        })?;
        println!(
            "deleted {} run(s) and {} event(s) older than {} day(s)",
            report.runs_deleted, report.events_deleted, self.older_than_days
        );
        Ok(())
    }
}

impl LogsArgs {
    pub fn run(self) -> Result<()> {
        let log: RunLog = super::call(DaemonRequest {
            run_id: Some(self.run_id),
            since: Some(self.since),
            limit: self.limit,
            ..DaemonRequest::command("logs")
        })?;
        for line in &log.lines {
            println!("{line}");
        }
        if !log.complete {
            eprintln!(
                "(run {} still running; continue with --since {})",
                log.run_id, log.next_line
            );
        }
        Ok(())
    }
}

pub fn reset() -> Result<()> {
    let report: CleanupReport = super::call(DaemonRequest::command("reset"))?;
    println!(
        "deleted {} run(s) and {} event(s)",
        report.runs_deleted, report.events_deleted
    );
    Ok(())
}

pub fn info() -> Result<()> {
    #[derive(serde::Deserialize)]
    struct Info {
        location: String,
        runs: u64,
        events: u64,
        oldest_run_at: Option<chrono::DateTime<chrono::Utc>>,
    }

    let info: Info = super::call(DaemonRequest::command("info"))?;
    println!("database: {}", info.location);
    println!("runs:     {}", info.runs);
    println!("events:   {}", info.events);
    if let Some(at) = info.oldest_run_at {
        println!("oldest:   {}", super::local_time(at));
    }
    Ok(())
}

fn print_events(events: &[FileEvent], first_column: impl Fn(&FileEvent) -> String) {
    let rows: Vec<EventRow> = events
        .iter()
        .map(|event| EventRow {
            path: first_column(event),
            kind: kind_label(event.kind),
            size: event
                .size
                .map(super::format_bytes)
                .unwrap_or_else(|| "-".to_string()),
            detail: match (&event.conflict_name, &event.detail) {
                (Some(name), _) => format!("review as {name}"),
                (None, Some(detail)) => detail.clone(),
                (None, None) => String::new(),
            },
        })
        .collect();
    let mut table = Table::new(rows);
    table.with(Style::rounded());
    println!("{table}");
}

fn kind_label(kind: EventKind) -> String {
    let label = kind.to_string();
    match kind {
        EventKind::Created | EventKind::Updated => label.green().to_string(),
        EventKind::Deleted => label.bright_black().to_string(),
        EventKind::Skipped => label.normal().to_string(),
        EventKind::Error => label.red().bold().to_string(),
        EventKind::Conflict => label.magenta().bold().to_string(),
    }
}
