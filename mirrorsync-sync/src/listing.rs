//! Destination listings for conflict resolution.
//!
//! A local destination is read with `tokio::fs`; a remote one (`name:path`)
//! is listed through the engine's `lsjson` subcommand. Either way the result
//! is snapshotted once per directory per run in a [`ListingCache`].

use std::collections::{BTreeMap, HashMap};
use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Deserialize;
use tokio::process::Command;
use tracing::{debug, warn};

use mirrorsync_core::SyncConfiguration;

use crate::conflict::ListingEntry;
use crate::error::{io_err, SyncError};

/// Upper bound on one `lsjson` call.
pub const ENGINE_LIST_TIMEOUT: Duration = Duration::from_secs(30);

/// True when `destination` uses the engine's `remote:path` syntax.
pub fn is_remote(destination: &str) -> bool {
    match destination.find(':') {
        Some(colon) => !destination[..colon].contains('/'),
        None => false,
    }
}

#[derive(Debug, Clone)]
pub enum DestinationLister {
    Local {
        root: PathBuf,
    },
    Engine {
        binary: PathBuf,
        remote: String,
        config: Option<PathBuf>,
        env: BTreeMap<String, String>,
        timeout: Duration,
    },
}

impl DestinationLister {
    /// Pick the lister for a configuration's destination. `env` is the
    /// already-resolved engine environment.
    pub fn for_config(config: &SyncConfiguration, env: &BTreeMap<String, String>) -> Self {
        if is_remote(&config.destination) {
            DestinationLister::Engine {
                binary: config.engine_binary.clone(),
                remote: config.destination.clone(),
                config: config.engine_config.clone(),
                env: env.clone(),
                timeout: ENGINE_LIST_TIMEOUT,
            }
        } else {
            DestinationLister::Local {
                root: PathBuf::from(&config.destination),
            }
        }
    }

    /// List the entries of `dir` (relative, `/`-separated, `""` for the root).
    /// A missing directory lists as empty.
    pub async fn list(&self, dir: &str) -> Result<Vec<ListingEntry>, SyncError> {
        match self {
            DestinationLister::Local { root } => list_local(root, dir).await,
            DestinationLister::Engine {
                binary,
                remote,
                config,
                env,
                timeout,
            } => list_engine(binary, &join_remote(remote, dir), config.as_ref(), env, *timeout).await,
        }
    }
}

async fn list_local(root: &std::path::Path, dir: &str) -> Result<Vec<ListingEntry>, SyncError> {
    let path = dir
        .split('/')
        .filter(|s| !s.is_empty())
        .fold(root.to_path_buf(), |acc, seg| acc.join(seg));

    let mut read_dir = match tokio::fs::read_dir(&path).await {
        Ok(rd) => rd,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(io_err(&path, e)),
    };

    let mut entries = Vec::new();
    while let Some(entry) = read_dir.next_entry().await.map_err(|e| io_err(&path, e))? {
        let meta = entry
            .metadata()
            .await
            .map_err(|e| io_err(entry.path(), e))?;
        entries.push(ListingEntry {
            name: entry.file_name().to_string_lossy().into_owned(),
            size: (!meta.is_dir()).then_some(meta.len()),
            modified: meta.modified().ok().map(DateTime::<Utc>::from),
            is_dir: meta.is_dir(),
        });
    }
    Ok(entries)
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct LsJsonEntry {
    name: String,
    #[serde(default)]
    size: Option<i64>,
    #[serde(default)]
    mod_time: Option<String>,
    #[serde(default)]
    is_dir: bool,
}

async fn list_engine(
    binary: &std::path::Path,
    target: &str,
    config: Option<&PathBuf>,
    env: &BTreeMap<String, String>,
    timeout: Duration,
) -> Result<Vec<ListingEntry>, SyncError> {
    let mut cmd = Command::new(binary);
    cmd.arg("lsjson").arg(target);
    if let Some(config) = config {
        cmd.arg(format!("--config={}", config.display()));
    }
    cmd.envs(env)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    let output = match tokio::time::timeout(timeout, cmd.output()).await {
        Ok(result) => result.map_err(|e| io_err(binary, e))?,
        Err(_) => {
            return Err(SyncError::Listing(format!(
                "lsjson {target} timed out after {}s",
                timeout.as_secs()
            )))
        }
    };

    if !output.status.success() {
        // Exit 3 is "directory not found": nothing there yet.
        if output.status.code() == Some(3) {
            return Ok(Vec::new());
        }
        return Err(SyncError::Listing(format!(
            "lsjson {target} exited with {}: {}",
            output.status,
            String::from_utf8_lossy(&output.stderr).trim()
        )));
    }

    let raw: Vec<LsJsonEntry> = serde_json::from_slice(&output.stdout)?;
    Ok(raw
        .into_iter()
        .map(|e| ListingEntry {
            name: e.name,
            size: e.size.and_then(|s| u64::try_from(s).ok()),
            modified: e
                .mod_time
                .as_deref()
                .and_then(|t| DateTime::parse_from_rfc3339(t).ok())
                .map(|t| t.with_timezone(&Utc)),
            is_dir: e.is_dir,
        })
        .collect())
}

fn join_remote(remote: &str, dir: &str) -> String {
    if dir.is_empty() {
        remote.to_string()
    } else if remote.ends_with(':') || remote.ends_with('/') {
        format!("{remote}{dir}")
    } else {
        format!("{remote}/{dir}")
    }
}

// ---------------------------------------------------------------------------
// Per-run snapshot
// ---------------------------------------------------------------------------

/// Directory listings taken at most once per run.
///
/// Names handed out during the run are added to the snapshot, so two
/// conflicts in one directory never receive the same name.
#[derive(Debug, Default)]
pub struct ListingCache {
    dirs: HashMap<String, Vec<ListingEntry>>,
}

impl ListingCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Siblings in `dir`, listing it on first use. A failed listing is
    /// logged and treated as empty.
    pub async fn siblings(&mut self, lister: &DestinationLister, dir: &str) -> &[ListingEntry] {
        if !self.dirs.contains_key(dir) {
            let entries = match lister.list(dir).await {
                Ok(entries) => {
                    debug!("listed {} destination entries under '{}'", entries.len(), dir);
                    entries
                }
                Err(e) => {
                    warn!("destination listing of '{}' failed, assuming empty: {}", dir, e);
                    Vec::new()
                }
            };
            self.dirs.insert(dir.to_string(), entries);
        }
        self.dirs.get(dir).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Record that `entry` now occupies a name in `dir`.
    pub fn claim(&mut self, dir: &str, entry: ListingEntry) {
        self.dirs.entry(dir.to_string()).or_default().push(entry);
    }
}
