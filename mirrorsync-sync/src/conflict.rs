//! Conflict naming.
//!
//! When the destination already holds a different object under the name a
//! transfer wants, the file is reviewed under `stem-conflict(n).ext` instead.
//! [`resolve`] is a pure function of the candidate, the source identity and
//! the sibling listing, so re-running it against the same listing always
//! yields the same answer.

use std::collections::HashMap;

use chrono::{DateTime, Utc};

/// One entry of a destination directory listing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ListingEntry {
    pub name: String,
    pub size: Option<u64>,
    pub modified: Option<DateTime<Utc>>,
    pub is_dir: bool,
}

/// Size and modification time of the source object.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SourceIdentity {
    pub size: Option<u64>,
    pub modified: Option<DateTime<Utc>>,
}

impl SourceIdentity {
    /// Both sides agree on every attribute they both know, and at least one
    /// attribute was compared. Times are compared to the second.
    pub fn matches(&self, entry: &ListingEntry) -> bool {
        if entry.is_dir {
            return false;
        }
        let mut compared = false;
        if let (Some(a), Some(b)) = (self.size, entry.size) {
            if a != b {
                return false;
            }
            compared = true;
        }
        if let (Some(a), Some(b)) = (self.modified, entry.modified) {
            if a.timestamp() != b.timestamp() {
                return false;
            }
            compared = true;
        }
        compared
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resolution {
    /// Nothing at the candidate name.
    Available(String),
    /// The candidate already holds the source object.
    UpToDate,
    /// An earlier `-conflict(n)` copy already holds the source object.
    AlreadyResolved(String),
    /// Review under this new name.
    Renamed(String),
    /// Directories are never renamed.
    NotApplicable,
}

/// `report.pdf` → `report-conflict(2).pdf`, `Makefile` → `Makefile-conflict(2)`.
/// A leading dot does not start an extension (`.env` → `.env-conflict(1)`).
pub fn conflict_name(name: &str, n: u32) -> String {
    match name.rfind('.') {
        Some(dot) if dot > 0 => {
            let (stem, ext) = name.split_at(dot);
            format!("{stem}-conflict({n}){ext}")
        }
        _ => format!("{name}-conflict({n})"),
    }
}

/// Decide the pending-review name for `candidate` among `siblings`.
pub fn resolve(
    candidate: &str,
    source: &SourceIdentity,
    candidate_is_dir: bool,
    siblings: &[ListingEntry],
) -> Resolution {
    if candidate_is_dir {
        return Resolution::NotApplicable;
    }

    let by_name: HashMap<&str, &ListingEntry> =
        siblings.iter().map(|e| (e.name.as_str(), e)).collect();

    let existing = match by_name.get(candidate) {
        None => return Resolution::Available(candidate.to_string()),
        Some(entry) => entry,
    };
    if existing.is_dir {
        return Resolution::NotApplicable;
    }
    if source.matches(existing) {
        return Resolution::UpToDate;
    }
    next_conflict_name(candidate, source, siblings)
}

/// Skip the candidate itself and return the first `-conflict(n)` name that is
/// free or already holds the source object.
pub fn next_conflict_name(
    candidate: &str,
    source: &SourceIdentity,
    siblings: &[ListingEntry],
) -> Resolution {
    let by_name: HashMap<&str, &ListingEntry> =
        siblings.iter().map(|e| (e.name.as_str(), e)).collect();

    // At most `siblings.len()` names can be taken, so this always ends.
    let limit = u32::try_from(siblings.len()).unwrap_or(u32::MAX).saturating_add(1);
    for n in 1..=limit {
        let name = conflict_name(candidate, n);
        match by_name.get(name.as_str()) {
            None => return Resolution::Renamed(name),
            Some(entry) if source.matches(entry) => return Resolution::AlreadyResolved(name),
            Some(_) => continue,
        }
    }
    Resolution::Renamed(conflict_name(candidate, limit.saturating_add(1)))
}
