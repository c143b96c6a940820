//! mirrorsync core library: domain types, configuration, errors.
//!
//! - [`types`]: runs, file events, counters, statuses
//! - [`config`]: `SyncConfiguration` load / save / init and the provider seam
//! - [`error`]: [`ConfigError`]

pub mod config;
pub mod error;
pub mod types;

pub use config::{
    ConfigProvider, ConflictScope, FileConfigProvider, ScheduleConfig, StaticConfig,
    SyncConfiguration,
};
pub use error::ConfigError;
pub use types::{
    normalize_relative_path, ErrorCategory, EventKind, FileEvent, NewFileEvent, Run, RunCounters,
    RunId, RunStatus, TriggerKind,
};
