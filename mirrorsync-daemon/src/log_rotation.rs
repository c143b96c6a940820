//! Size-based rotation of `daemon.log`.
//!
//! The daemon never holds the log file open: [`AppendLog`] opens it in append
//! mode for every record, so renaming the live file away is all rotation has
//! to do. Rotated copies follow `daemon.log` → `daemon.log.1` → … →
//! `daemon.log.5`, the oldest being dropped.

use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tracing_subscriber::fmt::MakeWriter;

/// When to rotate and how many rotated copies survive.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RotationPolicy {
    pub max_bytes: u64,
    pub keep: usize,
}

impl Default for RotationPolicy {
    /// 10 MiB, five rotated copies.
    fn default() -> Self {
        Self {
            max_bytes: 10 * 1024 * 1024,
            keep: 5,
        }
    }
}

/// Rotate `log_path` once it has reached `policy.max_bytes`.
///
/// Returns `true` if the file was rotated. A missing file is not an error.
pub fn rotate_if_needed(log_path: &Path, policy: &RotationPolicy) -> io::Result<bool> {
    let size = match fs::metadata(log_path) {
        Ok(meta) => meta.len(),
        Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(false),
        Err(err) => return Err(err),
    };
    if size < policy.max_bytes {
        return Ok(false);
    }

    if policy.keep == 0 {
        fs::remove_file(log_path)?;
        return Ok(true);
    }

    remove_if_exists(&numbered_path(log_path, policy.keep))?;
    for n in (1..policy.keep).rev() {
        let from = numbered_path(log_path, n);
        if from.exists() {
            fs::rename(&from, numbered_path(log_path, n + 1))?;
        }
    }
    fs::rename(log_path, numbered_path(log_path, 1))?;
    Ok(true)
}

/// Rotate the daemon log under `home`; failures are logged, never returned.
pub fn rotate_daemon_log(home: &Path) {
    let path = crate::paths::daemon_log_path(home);
    match rotate_if_needed(&path, &RotationPolicy::default()) {
        Ok(true) => tracing::info!(path = %path.display(), "daemon log rotated"),
        Ok(false) => {}
        Err(err) => {
            tracing::warn!(path = %path.display(), error = %err, "daemon log rotation failed")
        }
    }
}

/// `daemon.log` + 2 → `daemon.log.2`.
pub fn numbered_path(base: &Path, n: usize) -> PathBuf {
    let mut name = base
        .file_name()
        .map(|s| s.to_os_string())
        .unwrap_or_else(|| crate::paths::DAEMON_LOG.into());
    name.push(format!(".{n}"));
    base.with_file_name(name)
}

fn remove_if_exists(path: &Path) -> io::Result<()> {
    match fs::remove_file(path) {
        Err(err) if err.kind() != io::ErrorKind::NotFound => Err(err),
        _ => Ok(()),
    }
}

// ---------------------------------------------------------------------------
// Writer
// ---------------------------------------------------------------------------

/// `tracing-subscriber` writer that appends each record to a file path.
#[derive(Debug, Clone)]
pub struct AppendLog {
    path: Arc<PathBuf>,
}

impl AppendLog {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: Arc::new(path.into()),
        }
    }
}

impl<'a> MakeWriter<'a> for AppendLog {
    type Writer = AppendLogWriter;

    fn make_writer(&'a self) -> Self::Writer {
        AppendLogWriter {
            file: OpenOptions::new()
                .create(true)
                .append(true)
                .open(self.path.as_path())
                .ok(),
        }
    }
}

/// One open handle per record. Records are dropped if the file cannot be opened.
pub struct AppendLogWriter {
    file: Option<File>,
}

impl Write for AppendLogWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        match self.file.as_mut() {
            Some(file) => file.write(buf),
            None => Ok(buf.len()),
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        match self.file.as_mut() {
            Some(file) => file.flush(),
            None => Ok(()),
        }
    }
}

// ─── Tests ────────────────────────────────────────────────────────────────────
