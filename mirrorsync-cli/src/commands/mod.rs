pub mod config;
pub mod daemon;
pub mod runs;
pub mod schedule;
pub mod trigger;
pub mod tree;

use std::path::PathBuf;

use anyhow::{Context, Result};
use chrono::{DateTime, Local, Utc};
use colored::Colorize;
use serde::de::DeserializeOwned;

use mirrorsync_core::RunStatus;
use mirrorsync_daemon::{DaemonError, DaemonRequest};

pub(crate) fn home() -> Result<PathBuf> {
    dirs::home_dir().context("could not determine home directory")
}

/// Send `request` to the daemon and decode its payload.
pub(crate) fn call<T: DeserializeOwned>(request: DaemonRequest) -> Result<T> {
    let home = home()?;
    let cmd = request.cmd.clone();
    let data = mirrorsync_daemon::request(&home, &request).map_err(|err| match err {
        DaemonError::DaemonNotRunning { .. } => {
            anyhow::anyhow!("daemon is not running; start it with `mirrorsync daemon start`")
        }
        other => anyhow::Error::new(other),
    });
    let data = data.with_context(|| format!("daemon request '{cmd}' failed"))?;
    serde_json::from_value(data).with_context(|| format!("unexpected '{cmd}' response"))
}

pub(crate) fn print_json<T: serde::Serialize>(value: &T) -> Result<()> {
    println!(
        "{}",
        serde_json::to_string_pretty(value).context("failed to render JSON")?
    );
    Ok(())
}

pub(crate) fn local_time(at: DateTime<Utc>) -> String {
    at.with_timezone(&Local).format("%Y-%m-%d %H:%M:%S").to_string()
}

pub(crate) fn status_label(status: RunStatus) -> String {
    match status {
        RunStatus::Running => "RUNNING".cyan().bold().to_string(),
        RunStatus::Success => "SUCCESS".green().bold().to_string(),
        RunStatus::Partial => "PARTIAL".yellow().bold().to_string(),
        RunStatus::Failed => "FAILED".red().bold().to_string(),
    }
}

pub(crate) fn format_bytes(bytes: u64) -> String {
    const UNITS: [&str; 5] = ["B", "KiB", "MiB", "GiB", "TiB"];
    let mut value = bytes as f64;
    let mut unit = 0;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }
    if unit == 0 {
        format!("{bytes} B")
    } else {
        format!("{value:.1} {}", UNITS[unit])
    }
}
