//! Tree aggregation.
//!
//! Folds the file events of a window of runs into a path tree. The tree is
//! rebuilt on every call and never stored. A sub-tree is produced by
//! filtering events to the prefix in the store before folding, so callers
//! never pay for the whole tree when they ask for one directory.

use std::collections::{BTreeMap, HashMap};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use mirrorsync_core::{normalize_relative_path, EventKind, FileEvent, Run, RunCounters, RunId};
use mirrorsync_store::Store;

use crate::error::SyncError;

// ---------------------------------------------------------------------------
// Types
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeKind {
    File,
    Directory,
}

/// Displayed status. Declaration order is reduction precedence, lowest first:
/// a directory is `unknown` only when nothing below it is known.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeStatus {
    Unknown,
    Synced,
    Pending,
    Conflict,
    Error,
}

impl NodeStatus {
    /// Leaf status for an event kind; `None` means the path was removed.
    pub fn from_event(kind: EventKind) -> Option<Self> {
        match kind {
            EventKind::Created | EventKind::Updated => Some(NodeStatus::Synced),
            EventKind::Skipped => Some(NodeStatus::Pending),
            EventKind::Error => Some(NodeStatus::Error),
            EventKind::Conflict => Some(NodeStatus::Conflict),
            EventKind::Deleted => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TreeNode {
    pub name: String,
    /// Source-rooted path; empty for the root.
    pub path: String,
    pub kind: NodeKind,
    pub status: NodeStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub size: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub children: BTreeMap<String, TreeNode>,
}

impl TreeNode {
    fn directory(name: &str, path: &str) -> Self {
        Self {
            name: name.to_string(),
            path: path.to_string(),
            kind: NodeKind::Directory,
            status: NodeStatus::Unknown,
            size: None,
            updated_at: None,
            children: BTreeMap::new(),
        }
    }

    /// Descendant at a `/`-separated path relative to this node.
    pub fn find(&self, relative: &str) -> Option<&TreeNode> {
        relative
            .split('/')
            .filter(|s| !s.is_empty())
            .try_fold(self, |node, seg| node.children.get(seg))
    }
}

/// Which runs contribute to a tree.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TreeWindow {
    /// The most recent run with file activity.
    #[default]
    Latest,
    /// The last `n` runs, newer events winning per path.
    LastRuns(u32),
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TreeStats {
    pub files: u64,
    pub directories: u64,
    pub total_size: u64,
}

/// Counters of a lightweight run, reported instead of per-file status.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunAggregate {
    pub run_id: RunId,
    pub started_at: DateTime<Utc>,
    pub counters: RunCounters,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TreeView {
    pub root: TreeNode,
    pub stats: TreeStats,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub aggregates: Vec<RunAggregate>,
}

// ---------------------------------------------------------------------------
// Loading
// ---------------------------------------------------------------------------

/// Build the tree for `prefix` (whole tree when `None`) over `window`.
pub async fn load_tree(
    store: &Store,
    window: TreeWindow,
    prefix: Option<&str>,
) -> Result<TreeView, SyncError> {
    let runs = match window {
        TreeWindow::Latest => store
            .latest_run_with_file_activity()
            .await?
            .into_iter()
            .collect(),
        TreeWindow::LastRuns(n) => store.list_runs(n.max(1), 0).await?,
    };
    let prefix = prefix.and_then(normalize_relative_path);

    let detailed: Vec<RunId> = runs.iter().filter(|r| !r.lightweight).map(|r| r.id).collect();
    let events = store.events_for_runs(&detailed, prefix.as_deref()).await?;
    Ok(build_tree(&runs, &events, prefix.as_deref()))
}

// ---------------------------------------------------------------------------
// Folding
// ---------------------------------------------------------------------------

/// Fold `events` from `runs` (any order) into a tree rooted at `prefix`.
pub fn build_tree(runs: &[Run], events: &[FileEvent], prefix: Option<&str>) -> TreeView {
    // Oldest run first, so a later position means a newer run.
    let mut ordered: Vec<&Run> = runs.iter().collect();
    ordered.sort_by_key(|r| (r.started_at, r.id));
    let position: HashMap<RunId, usize> =
        ordered.iter().enumerate().map(|(i, r)| (r.id, i)).collect();
    let newest_lightweight = ordered.iter().rposition(|r| r.lightweight);

    // Latest event per path: newer run wins, then later emission.
    let mut latest: BTreeMap<&str, (usize, i64, &FileEvent)> = BTreeMap::new();
    for event in events {
        let Some(&pos) = position.get(&event.run_id) else {
            continue;
        };
        let key = (pos, event.id);
        match latest.get(event.path.as_str()) {
            Some(&(p, id, _)) if (p, id) >= key => {}
            _ => {
                latest.insert(event.path.as_str(), (pos, event.id, event));
            }
        }
    }

    let prefix = prefix.filter(|p| !p.is_empty());
    let root_name = prefix
        .and_then(|p| p.rsplit('/').next())
        .unwrap_or_default();
    let mut root = TreeNode::directory(root_name, prefix.unwrap_or_default());

    for (path, (pos, _, event)) in latest {
        let Some(mut status) = NodeStatus::from_event(event.kind) else {
            continue;
        };
        // A lightweight run after this event may have changed the path.
        if newest_lightweight.is_some_and(|lw| lw > pos) {
            status = NodeStatus::Unknown;
        }

        let relative = match prefix {
            None => path,
            Some(p) if path == p => "",
            Some(p) => match path.strip_prefix(p).and_then(|r| r.strip_prefix('/')) {
                Some(rest) => rest,
                None => continue,
            },
        };
        insert_leaf(&mut root, relative, status, event);
    }

    let mut stats = TreeStats::default();
    reduce(&mut root, &mut stats);
    if root.kind == NodeKind::Directory && stats.directories > 0 {
        // The root itself is not counted.
        stats.directories -= 1;
    }

    let aggregates = ordered
        .iter()
        .rev()
        .filter(|r| r.lightweight)
        .map(|r| RunAggregate {
            run_id: r.id,
            started_at: r.started_at,
            counters: r.counters,
        })
        .collect();

    TreeView {
        root,
        stats,
        aggregates,
    }
}

fn insert_leaf(root: &mut TreeNode, relative: &str, status: NodeStatus, event: &FileEvent) {
    let segments: Vec<&str> = relative.split('/').filter(|s| !s.is_empty()).collect();
    let Some((leaf, dirs)) = segments.split_last() else {
        // The prefix itself names a file.
        if root.children.is_empty() {
            set_file(root, status, event);
        }
        return;
    };

    let mut node = root;
    for dir in dirs {
        let child_path = join(&node.path, dir);
        node = node
            .children
            .entry(dir.to_string())
            .or_insert_with(|| TreeNode::directory(dir, &child_path));
        if node.kind == NodeKind::File {
            // A path seen as a file earlier now has children.
            *node = TreeNode::directory(dir, &child_path);
        }
    }

    let leaf_path = join(&node.path, leaf);
    let entry = node
        .children
        .entry(leaf.to_string())
        .or_insert_with(|| TreeNode::directory(leaf, &leaf_path));
    if entry.children.is_empty() {
        set_file(entry, status, event);
    }
}

fn set_file(node: &mut TreeNode, status: NodeStatus, event: &FileEvent) {
    node.kind = NodeKind::File;
    node.status = status;
    node.size = event.size;
    node.updated_at = Some(event.observed_at);
}

/// Fold children into directory status, size and timestamp, bottom-up.
fn reduce(node: &mut TreeNode, stats: &mut TreeStats) {
    if node.kind == NodeKind::File {
        stats.files += 1;
        stats.total_size += node.size.unwrap_or(0);
        return;
    }
    stats.directories += 1;

    let mut status: Option<NodeStatus> = None;
    let mut size = 0u64;
    let mut updated_at: Option<DateTime<Utc>> = None;
    for child in node.children.values_mut() {
        reduce(child, stats);
        status = Some(status.map_or(child.status, |s| s.max(child.status)));
        size += child.size.unwrap_or(0);
        updated_at = updated_at.max(child.updated_at);
    }

    node.status = status.unwrap_or(NodeStatus::Unknown);
    node.size = Some(size);
    node.updated_at = updated_at;
}

fn join(parent: &str, name: &str) -> String {
    if parent.is_empty() {
        name.to_string()
    } else {
        format!("{parent}/{name}")
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
