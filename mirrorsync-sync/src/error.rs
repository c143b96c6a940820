//! Error types for mirrorsync-sync.

use std::path::PathBuf;

use thiserror::Error;

use mirrorsync_core::{ConfigError, RunId};
use mirrorsync_store::StoreError;

/// All errors that can arise from running or inspecting syncs.
#[derive(Debug, Error)]
pub enum SyncError {
    /// Another run holds the single-flight lock.
    #[error("a sync run is already in progress")]
    Busy,

    /// The durable store failed; the run cannot continue safely.
    #[error("store error: {0}")]
    Store(#[from] StoreError),

    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    /// A secret reference in `engine_env` could not be resolved.
    #[error("cannot resolve secret for {name}: {reason}")]
    Secret { name: String, reason: String },

    /// An I/O error, with annotated path for context.
    #[error("I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The engine's listing output was not valid JSON.
    #[error("listing JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// The engine listing did not finish in time or exited nonzero.
    #[error("destination listing failed: {0}")]
    Listing(String),

    #[error("run {0} not found")]
    RunNotFound(RunId),
}

/// Convenience constructor for [`SyncError::Io`].
pub(crate) fn io_err(path: impl Into<PathBuf>, source: std::io::Error) -> SyncError {
    SyncError::Io {
        path: path.into(),
        source,
    }
}
