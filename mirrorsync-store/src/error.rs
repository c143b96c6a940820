//! Error types for mirrorsync-store.

use thiserror::Error;

use mirrorsync_core::RunId;

/// All errors that can arise from the durable run store.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The database could not be reached or a statement failed.
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    /// A row held a value this build cannot interpret.
    #[error("corrupt {column} value '{value}' in runs store")]
    Corrupt { column: &'static str, value: String },

    /// Another run is already in the `running` state.
    #[error("a run is already active")]
    RunAlreadyActive,

    #[error("run {0} not found")]
    RunNotFound(RunId),

    /// The run already has an end time and can no longer change.
    #[error("run {0} is already finished")]
    RunFinished(RunId),
}

impl StoreError {
    pub(crate) fn corrupt(column: &'static str, value: impl Into<String>) -> Self {
        StoreError::Corrupt {
            column,
            value: value.into(),
        }
    }
}
