use std::path::{Path, PathBuf};

pub const DAEMON_LOG: &str = "daemon.log";
pub const DAEMON_SOCKET: &str = "daemon.sock";
pub const DATABASE_FILE: &str = "runs.db";

pub fn mirrorsync_root(home: &Path) -> PathBuf {
    home.join(".mirrorsync")
}

pub fn socket_path(home: &Path) -> PathBuf {
    mirrorsync_root(home).join(DAEMON_SOCKET)
}

pub fn database_path(home: &Path) -> PathBuf {
    mirrorsync_root(home).join(DATABASE_FILE)
}

pub fn logs_dir(home: &Path) -> PathBuf {
    mirrorsync_root(home).join("logs")
}

pub fn daemon_log_path(home: &Path) -> PathBuf {
    logs_dir(home).join(DAEMON_LOG)
}

/// Per-run engine output, one `run-<id>.log` per run.
pub fn run_logs_dir(home: &Path) -> PathBuf {
    logs_dir(home).join("runs")
}
