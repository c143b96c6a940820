//! Engine log parser.
//!
//! The engine runs with `--use-json-log`, so every line on its standard
//! output is one JSON object. A line maps to at most one [`ParsedLine`];
//! nothing in here returns an error, a bad line is reported as
//! [`ParsedLine::Malformed`] and the caller counts it.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use mirrorsync_core::{normalize_relative_path, EventKind};

// ---------------------------------------------------------------------------
// Wire record
// ---------------------------------------------------------------------------

/// The subset of an engine log record we read. Unknown fields are ignored.
#[derive(Debug, Deserialize)]
struct LogRecord {
    #[serde(default)]
    level: String,
    #[serde(default)]
    msg: String,
    #[serde(default)]
    object: Option<String>,
    #[serde(default)]
    size: Option<i64>,
    #[serde(default)]
    time: Option<String>,
    #[serde(default)]
    stats: Option<EngineStats>,
}

/// Periodic transfer statistics emitted by the engine.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct EngineStats {
    pub bytes: u64,
    pub total_bytes: u64,
    pub checks: u64,
    pub transfers: u64,
    pub deletes: u64,
    pub errors: u64,
    pub elapsed_time: f64,
}

// ---------------------------------------------------------------------------
// Parsed output
// ---------------------------------------------------------------------------

/// What the engine did to one object.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    Copy,
    Update,
    Delete,
    Skip,
    Error,
    Conflict,
}

impl Action {
    pub fn event_kind(self) -> EventKind {
        match self {
            Action::Copy => EventKind::Created,
            Action::Update => EventKind::Updated,
            Action::Delete => EventKind::Deleted,
            Action::Skip => EventKind::Skipped,
            Action::Error => EventKind::Error,
            Action::Conflict => EventKind::Conflict,
        }
    }
}

/// One file-level action, path already normalised.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedEvent {
    pub path: String,
    pub action: Action,
    /// `None` when absent or negative (directories report -1).
    pub size: Option<u64>,
    pub message: String,
    pub time: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ParsedLine {
    Event(ParsedEvent),
    Stats(EngineStats),
    /// A record without an object, e.g. a fatal engine error.
    Message { level: String, msg: String },
    /// Blank line or a record with no recognisable action.
    Ignored,
    /// Not a JSON object; counted as a parse warning.
    Malformed(String),
}

// ---------------------------------------------------------------------------
// Parsing
// ---------------------------------------------------------------------------

pub fn parse_line(line: &str) -> ParsedLine {
    let trimmed = line.trim();
    if trimmed.is_empty() {
        return ParsedLine::Ignored;
    }

    let record: LogRecord = match serde_json::from_str(trimmed) {
        Ok(r) => r,
        Err(e) => return ParsedLine::Malformed(e.to_string()),
    };

    let object = record
        .object
        .as_deref()
        .and_then(normalize_relative_path);

    let Some(path) = object else {
        if let Some(stats) = record.stats {
            return ParsedLine::Stats(stats);
        }
        if record.msg.is_empty() {
            return ParsedLine::Ignored;
        }
        return ParsedLine::Message {
            level: record.level.to_ascii_lowercase(),
            msg: record.msg,
        };
    };

    let Some(action) = classify_action(&record.level, &record.msg) else {
        return ParsedLine::Ignored;
    };

    ParsedLine::Event(ParsedEvent {
        path,
        action,
        size: record.size.and_then(|s| u64::try_from(s).ok()),
        time: record.time.as_deref().and_then(parse_time),
        message: record.msg,
    })
}

/// Map a record's level and message to an action.
fn classify_action(level: &str, msg: &str) -> Option<Action> {
    let lower = msg.to_ascii_lowercase();
    if lower.contains("already exists") || lower.contains("conflict") {
        return Some(Action::Conflict);
    }
    if level.eq_ignore_ascii_case("error") {
        return Some(Action::Error);
    }

    // Order matters: "Copied (replaced existing)" also starts with "Copied".
    if msg.starts_with("Copied (replaced")
        || msg.starts_with("Transferred (replaced")
        || msg.starts_with("Updated modification time")
        || lower.contains("replaced")
    {
        Some(Action::Update)
    } else if msg.starts_with("Copied") || msg.starts_with("Transferred") {
        Some(Action::Copy)
    } else if msg.starts_with("Deleted") {
        Some(Action::Delete)
    } else if msg.starts_with("Skipped")
        || msg.starts_with("Skipping")
        || msg.starts_with("Unchanged skipping")
        || msg.starts_with("Not copying")
        || msg.starts_with("Excluded")
    {
        Some(Action::Skip)
    } else {
        None
    }
}

fn parse_time(raw: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .ok()
        .map(|t| t.with_timezone(&Utc))
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
