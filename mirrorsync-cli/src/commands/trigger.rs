//! `mirrorsync run [--wait]` and `mirrorsync cancel`.

use anyhow::Result;
use clap::Args;
use serde::Deserialize;

use mirrorsync_core::{RunId, RunStatus};
use mirrorsync_daemon::{DaemonRequest, RunSummary};

#[derive(Args, Debug)]
pub struct RunArgs {
    /// Wait for the run to finish and print its outcome.
    #[arg(long)]
    pub wait: bool,
}

#[derive(Deserialize)]
struct Started {
    run_id: RunId,
}

#[derive(Deserialize)]
struct Cancelled {
    cancelled_run_id: Option<RunId>,
}

impl RunArgs {
    pub fn run(self) -> Result<()> {
        let request = DaemonRequest {
            wait: self.wait,
            ..DaemonRequest::command("trigger")
        };
        if !self.wait {
            let started: Started = super::call(request)?;
            println!("run {} started", started.run_id);
            return Ok(());
        }

        let run: RunSummary = super::call(request)?;
        let c = &run.counters;
        println!(
            "run {} {} | {} transferred ({}) | {} skipped | {} deleted | {} errors | {} conflicts",
            run.id,
            super::status_label(run.status),
            c.files_transferred,
            super::format_bytes(c.bytes_transferred),
            c.files_skipped,
            c.files_deleted,
            c.errors,
            c.conflicts,
        );
        if let Some(message) = &run.error_message {
            let category = run.error_category.map(|c| c.to_string()).unwrap_or_default();
            println!("  {category}: {message}");
        }
        if run.status == RunStatus::Failed {
            anyhow::bail!("run {} failed", run.id);
        }
        Ok(())
    }
}

pub fn cancel() -> Result<()> {
    let reply: Cancelled = super::call(DaemonRequest::command("cancel"))?;
    match reply.cancelled_run_id {
        Some(id) => println!("cancellation requested for run {id}"),
        None => println!("no run in progress"),
    }
    Ok(())
}
