//! Domain types for sync runs and file events.
//!
//! All path fields on the wire are `/`-separated strings relative to the
//! source root; on-disk locations (log files) use `PathBuf`.
//! All types are serializable via serde so the daemon can ship them as JSON.

use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Newtypes
// ---------------------------------------------------------------------------

/// A strongly-typed identifier for a sync run (row id in the runs table).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RunId(pub i64);

impl fmt::Display for RunId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl From<i64> for RunId {
    fn from(id: i64) -> Self {
        Self(id)
    }
}

/// Returned when a string does not name a known enum variant.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnknownVariant {
    pub kind: &'static str,
    pub value: String,
}

impl fmt::Display for UnknownVariant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "unknown {} '{}'", self.kind, self.value)
    }
}

impl std::error::Error for UnknownVariant {}

// Implements Display + FromStr over a fixed set of lowercase names so the
// store can persist enums as TEXT columns.
macro_rules! string_enum {
    ($ty:ident, $kind:literal, { $($variant:ident => $name:literal),+ $(,)? }) => {
        impl $ty {
            pub fn as_str(&self) -> &'static str {
                match self {
                    $($ty::$variant => $name),+
                }
            }
        }

        impl fmt::Display for $ty {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl FromStr for $ty {
            type Err = UnknownVariant;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                match s {
                    $($name => Ok($ty::$variant),)+
                    other => Err(UnknownVariant { kind: $kind, value: other.to_string() }),
                }
            }
        }
    };
}

// ---------------------------------------------------------------------------
// Enums
// ---------------------------------------------------------------------------

/// What started a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TriggerKind {
    Scheduled,
    Manual,
}

string_enum!(TriggerKind, "trigger kind", {
    Scheduled => "scheduled",
    Manual => "manual",
});

/// Lifecycle / terminal status of a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunStatus {
    Running,
    Success,
    Partial,
    Failed,
}

string_enum!(RunStatus, "run status", {
    Running => "running",
    Success => "success",
    Partial => "partial",
    Failed => "failed",
});

impl RunStatus {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, RunStatus::Running)
    }
}

/// Best-effort classification of why a run did not fully succeed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ErrorCategory {
    Authentication,
    Network,
    PathNotFound,
    RateLimited,
    LaunchError,
    Cancelled,
    /// Nonzero exit with no recognisable signature.
    Engine,
    /// The run never recorded a final status (daemon stop or lost write).
    Interrupted,
}

string_enum!(ErrorCategory, "error category", {
    Authentication => "authentication",
    Network => "network",
    PathNotFound => "path-not-found",
    RateLimited => "rate-limited",
    LaunchError => "launch-error",
    Cancelled => "cancelled",
    Engine => "engine",
    Interrupted => "interrupted",
});

/// Per-file outcome reported by the transfer engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventKind {
    Created,
    Updated,
    Deleted,
    Skipped,
    Error,
    Conflict,
}

string_enum!(EventKind, "event kind", {
    Created => "created",
    Updated => "updated",
    Deleted => "deleted",
    Skipped => "skipped",
    Error => "error",
    Conflict => "conflict",
});

impl EventKind {
    /// True for outcomes that moved bytes to the destination.
    pub fn is_transfer(&self) -> bool {
        matches!(self, EventKind::Created | EventKind::Updated)
    }
}

// ---------------------------------------------------------------------------
// Counters
// ---------------------------------------------------------------------------

/// Aggregate counters maintained for every run, including lightweight ones.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunCounters {
    pub files_transferred: u64,
    pub bytes_transferred: u64,
    pub files_skipped: u64,
    pub files_deleted: u64,
    pub errors: u64,
    pub conflicts: u64,
    pub parse_warnings: u64,
}

impl RunCounters {
    /// Fold one event into the counters.
    pub fn record(&mut self, kind: EventKind, size: Option<u64>) {
        match kind {
            EventKind::Created | EventKind::Updated => {
                self.files_transferred += 1;
                self.bytes_transferred += size.unwrap_or(0);
            }
            EventKind::Skipped => self.files_skipped += 1,
            EventKind::Deleted => self.files_deleted += 1,
            EventKind::Error => self.errors += 1,
            EventKind::Conflict => self.conflicts += 1,
        }
    }

    /// Number of events that ended well (transferred, skipped or deleted).
    pub fn successful(&self) -> u64 {
        self.files_transferred + self.files_skipped + self.files_deleted
    }

    /// Total number of engine-reported actions.
    pub fn actions(&self) -> u64 {
        self.successful() + self.errors + self.conflicts
    }
}

// ---------------------------------------------------------------------------
// Domain structs
// ---------------------------------------------------------------------------

/// One attempt to synchronise the whole tree.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Run {
    pub id: RunId,
    pub trigger: TriggerKind,
    pub status: RunStatus,
    pub started_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ended_at: Option<DateTime<Utc>>,
    pub counters: RunCounters,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub exit_code: Option<i32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_category: Option<ErrorCategory>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    /// Per-file events were not persisted for this run.
    pub lightweight: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub log_path: Option<PathBuf>,
}

impl Run {
    pub fn is_active(&self) -> bool {
        self.status == RunStatus::Running
    }
}

/// One file-level outcome observed during a run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileEvent {
    pub id: i64,
    pub run_id: RunId,
    pub path: String,
    pub kind: EventKind,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub size: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
    /// Pending-review name chosen by the conflict resolver.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub conflict_name: Option<String>,
    pub observed_at: DateTime<Utc>,
}

/// A file event that has not been persisted yet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewFileEvent {
    pub path: String,
    pub kind: EventKind,
    pub size: Option<u64>,
    pub detail: Option<String>,
    pub conflict_name: Option<String>,
    pub observed_at: DateTime<Utc>,
}

/// Normalise an engine-reported object path into the canonical
/// source-rooted form: `/` separators, no empty or `.` segments, no leading
/// `..` segments. Returns `None` when nothing is left.
pub fn normalize_relative_path(raw: &str) -> Option<String> {
    let replaced = raw.replace('\\', "/");
    let mut segments: Vec<&str> = Vec::new();
    for segment in replaced.split('/') {
        match segment {
            "" | "." => continue,
            ".." if segments.is_empty() => continue,
            ".." => {
                segments.pop();
            }
            other => segments.push(other),
        }
    }
    if segments.is_empty() {
        None
    } else {
        Some(segments.join("/"))
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
