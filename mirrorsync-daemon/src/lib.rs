//! mirrorsync daemon: scheduler, sync service and the Unix socket server.
//!
//! The daemon owns one [`SyncService`]; the socket server translates
//! newline-delimited JSON requests into service calls.

mod error;
pub mod log_rotation;
pub mod paths;
pub mod protocol;
mod runtime;
pub mod scheduler;
pub mod service;

pub use error::DaemonError;
pub use protocol::{
    request, request_shutdown, request_status, request_trigger, send_request, DaemonRequest,
    DaemonResponse,
};
pub use runtime::{run, start_blocking, DaemonOptions};
pub use scheduler::{jittered_delay, Launcher, ScheduleParams, Scheduler, SchedulerState};
pub use service::{RunLog, RunSummary, ServiceStatus, SyncService};
