//! `mirrorsync schedule start|stop|pause`

use anyhow::Result;
use clap::Subcommand;
use serde::Deserialize;

use mirrorsync_daemon::{DaemonRequest, SchedulerState};

#[derive(Subcommand, Debug)]
pub enum ScheduleCommand {
    /// Start (or resume) recurring runs using the configured interval.
    Start,
    /// Stop recurring runs. A run in progress is not interrupted.
    Stop,
    /// Pause recurring runs until the next `schedule start`.
    Pause,
}

#[derive(Deserialize)]
struct StateReply {
    scheduler_state: SchedulerState,
}

pub fn run(command: ScheduleCommand) -> Result<()> {
    let cmd = match command {
        ScheduleCommand::Start => "start",
        ScheduleCommand::Stop => "stop",
        ScheduleCommand::Pause => "pause",
    };
    let reply: StateReply = super::call(DaemonRequest::command(cmd))?;
    let label = match reply.scheduler_state {
        SchedulerState::Running => "running",
        SchedulerState::Paused => "paused",
        SchedulerState::Stopped => "stopped",
    };
    println!("scheduler {label}");
    Ok(())
}
