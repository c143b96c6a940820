//! `mirrorsync daemon`: foreground daemon and its lifecycle over the socket.

use std::collections::VecDeque;
use std::fs::File;
use std::io::{BufRead, BufReader};

use anyhow::{Context, Result};
use clap::{Args, Subcommand};

use mirrorsync_daemon::paths::{daemon_log_path, socket_path};
use mirrorsync_daemon::{request_shutdown, request_status, start_blocking, DaemonError, DaemonOptions};

#[derive(Subcommand, Debug)]
pub enum DaemonCommand {
    /// Run the daemon in the foreground (scheduler + socket server).
    Start(StartArgs),
    /// Request graceful daemon shutdown over the Unix socket.
    Stop,
    /// Query daemon status over the Unix socket.
    Status,
    /// Print recent daemon log lines.
    Logs(DaemonLogsArgs),
}

#[derive(Args, Debug)]
pub struct StartArgs {
    /// Log to stderr instead of ~/.mirrorsync/logs/daemon.log.
    #[arg(long)]
    pub foreground_logs: bool,

    /// Emit log records as JSON objects.
    #[arg(long)]
    pub json_logs: bool,
}

#[derive(Args, Debug)]
pub struct DaemonLogsArgs {
    /// Number of trailing lines to show.
    #[arg(long, default_value_t = 100)]
    pub lines: usize,
}

pub fn run(command: DaemonCommand) -> Result<()> {
    let home = super::home()?;

    match command {
        DaemonCommand::Start(args) => {
            let options = DaemonOptions {
                foreground_logs: args.foreground_logs,
                json_logs: args.json_logs,
            };
            start_blocking(&home, options).context("daemon exited with error")?;
        }
        DaemonCommand::Stop => match request_shutdown(&home) {
            Ok(()) => println!("daemon stop requested"),
            Err(DaemonError::DaemonNotRunning { .. }) => {
                println!("daemon is not running");
            }
            Err(err) => return Err(err).context("failed to stop daemon"),
        },
        DaemonCommand::Status => match request_status(&home) {
            Ok(mut status) => {
                if let Some(object) = status.as_object_mut() {
                    object.insert("running".to_string(), serde_json::Value::Bool(true));
                }
                super::print_json(&status)?;
            }
            Err(DaemonError::DaemonNotRunning { .. }) => {
                super::print_json(&serde_json::json!({
                    "running": false,
                    "socket": socket_path(&home).display().to_string(),
                }))?;
            }
            Err(err) => return Err(err).context("failed to query daemon status"),
        },
        DaemonCommand::Logs(args) => {
            print_tail(&daemon_log_path(&home), args.lines)
                .context("failed to read daemon log")?;
        }
    }

    Ok(())
}

fn print_tail(path: &std::path::Path, lines: usize) -> Result<()> {
    if !path.exists() {
        println!("log file not found: {}", path.display());
        return Ok(());
    }

    let file = File::open(path).with_context(|| format!("open {}", path.display()))?;
    let reader = BufReader::new(file);

    let mut tail = VecDeque::<String>::new();
    for line in reader.lines() {
        let line = line.with_context(|| format!("read {}", path.display()))?;
        if tail.len() == lines {
            tail.pop_front();
        }
        tail.push_back(line);
    }

    println!("==> {} <==", path.display());
    for line in tail {
        println!("{line}");
    }
    Ok(())
}
