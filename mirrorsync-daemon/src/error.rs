use std::path::PathBuf;

use thiserror::Error;

use mirrorsync_core::{ConfigError, RunId};
use mirrorsync_store::StoreError;
use mirrorsync_sync::SyncError;

/// Error surface for the daemon runtime, the sync service and the socket protocol.
#[derive(Debug, Error)]
pub enum DaemonError {
    #[error("I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("store error: {0}")]
    Store(#[from] StoreError),

    #[error("sync error: {0}")]
    Sync(#[from] SyncError),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("run {0} not found")]
    RunNotFound(RunId),

    /// A trigger was rejected because another run holds the single-flight lock.
    #[error("a sync run is already in progress")]
    Busy { active_run_id: Option<RunId> },

    #[error("daemon protocol error: {0}")]
    Protocol(String),

    #[error("daemon is not running (socket missing: {socket})")]
    DaemonNotRunning { socket: PathBuf },
}

pub(crate) fn io_err(path: impl Into<PathBuf>, source: std::io::Error) -> DaemonError {
    DaemonError::Io {
        path: path.into(),
        source,
    }
}
