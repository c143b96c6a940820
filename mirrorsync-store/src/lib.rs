//! Durable storage for sync runs and file events (SQLite via sqlx).

pub mod error;
pub mod store;

pub use error::StoreError;
pub use store::{CleanupReport, RunCompletion, Store, StoreInfo};
