//! # mirrorsync-sync
//!
//! Drives the external transfer engine and makes sense of its output.
//!
//! [`RunExecutor`] runs one engine invocation under the single-flight lock,
//! feeding every output line through [`parser::parse_line`], naming
//! conflicts with [`conflict::resolve`] and persisting the results.
//! [`tree::load_tree`] folds persisted events back into a path tree.

pub mod classify;
pub mod command;
pub mod conflict;
pub mod error;
pub mod executor;
pub mod flight;
pub mod listing;
pub mod parser;
pub mod secrets;
pub mod tree;

pub use error::SyncError;
pub use executor::{ActiveRun, RunExecutor};
pub use flight::SingleFlight;
pub use secrets::{EnvSecretStore, SecretStore};
pub use tree::{load_tree, NodeKind, NodeStatus, TreeNode, TreeStats, TreeView, TreeWindow};
