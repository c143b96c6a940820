//! YAML sync configuration.
//!
//! # Storage layout
//!
//! ```text
//! ~/.mirrorsync/
//!   config.yaml   (mode 0600, written atomically)
//! ```
//!
//! # API pattern
//!
//! Every function touching the filesystem has two forms:
//! - `fn_at(home: &Path, …)`: explicit home; used in tests with `TempDir`
//! - `fn(…)`: derives home from `dirs::home_dir()`, delegates to `_at`
//!
//! Tests must NEVER call the no-arg wrappers; always use `_at`.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

// ---------------------------------------------------------------------------
// 1. Types
// ---------------------------------------------------------------------------

/// Which engine-reported outcomes go through the conflict resolver.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ConflictScope {
    /// Only records the engine itself flags as a conflict.
    #[default]
    Flagged,
    /// Also treat replacements of an existing destination file as conflicts.
    Replacements,
}

/// Recurring schedule parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScheduleConfig {
    pub interval_secs: u64,
    /// Maximum jitter as a fraction of the interval, clamped to `[0, 1]`.
    pub jitter_fraction: f64,
    /// Start the scheduler when the daemon boots.
    pub autostart: bool,
}

impl Default for ScheduleConfig {
    fn default() -> Self {
        Self {
            interval_secs: 300,
            jitter_fraction: 0.067,
            autostart: true,
        }
    }
}

/// Everything a run needs to know, read fresh at the start of each run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncConfiguration {
    /// Source root in engine syntax (`remote:path` or a local path).
    #[serde(default)]
    pub source: String,
    /// Destination root in engine syntax.
    #[serde(default)]
    pub destination: String,
    #[serde(default = "default_engine_binary")]
    pub engine_binary: PathBuf,
    /// The engine's own config file (remote definitions), if not the engine default.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub engine_config: Option<PathBuf>,
    #[serde(default = "default_transfers")]
    pub transfers: u32,
    #[serde(default = "default_checkers")]
    pub checkers: u32,
    /// Bandwidth cap in engine syntax; `"0"` is unlimited.
    #[serde(default = "default_bandwidth_limit")]
    pub bandwidth_limit: String,
    /// API transactions per second.
    #[serde(default = "default_tps_limit")]
    pub tps_limit: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tps_limit_burst: Option<u32>,
    #[serde(default)]
    pub dry_run: bool,
    /// Skip symlinks and cloud shortcuts rather than following them.
    #[serde(default = "default_true")]
    pub skip_indirections: bool,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub extra_args: Vec<String>,
    /// Keep aggregate counters only; do not persist per-file events.
    #[serde(default)]
    pub lightweight_events: bool,
    #[serde(default)]
    pub conflict_scope: ConflictScope,
    /// Extra environment for the engine. Values may be secret references
    /// (`env:NAME`, `file:/path`).
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub engine_env: BTreeMap<String, String>,
    /// Seconds between SIGTERM and SIGKILL when cancelling a run.
    #[serde(default = "default_cancel_grace_secs")]
    pub cancel_grace_secs: u64,
    #[serde(default)]
    pub schedule: ScheduleConfig,
}

fn default_engine_binary() -> PathBuf {
    PathBuf::from("rclone")
}
fn default_transfers() -> u32 {
    4
}
fn default_checkers() -> u32 {
    8
}
fn default_bandwidth_limit() -> String {
    "0".to_string()
}
fn default_tps_limit() -> u32 {
    10
}
fn default_true() -> bool {
    true
}
fn default_cancel_grace_secs() -> u64 {
    10
}

impl Default for SyncConfiguration {
    fn default() -> Self {
        Self {
            source: String::new(),
            destination: String::new(),
            engine_binary: default_engine_binary(),
            engine_config: None,
            transfers: default_transfers(),
            checkers: default_checkers(),
            bandwidth_limit: default_bandwidth_limit(),
            tps_limit: default_tps_limit(),
            tps_limit_burst: None,
            dry_run: false,
            skip_indirections: true,
            extra_args: Vec::new(),
            lightweight_events: false,
            conflict_scope: ConflictScope::default(),
            engine_env: BTreeMap::new(),
            cancel_grace_secs: default_cancel_grace_secs(),
            schedule: ScheduleConfig::default(),
        }
    }
}

impl SyncConfiguration {
    /// Report every problem at once rather than stopping at the first.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let mut problems = Vec::new();
        if self.source.trim().is_empty() {
            problems.push("missing required field: source".to_string());
        }
        if self.destination.trim().is_empty() {
            problems.push("missing required field: destination".to_string());
        }
        if self.transfers == 0 {
            problems.push("transfers must be at least 1".to_string());
        }
        if self.checkers == 0 {
            problems.push("checkers must be at least 1".to_string());
        }
        if self.schedule.interval_secs == 0 {
            problems.push("schedule.interval_secs must be at least 1".to_string());
        }
        if !(0.0..=1.0).contains(&self.schedule.jitter_fraction) {
            problems.push(format!(
                "schedule.jitter_fraction must be within [0, 1], got {}",
                self.schedule.jitter_fraction
            ));
        }
        if problems.is_empty() {
            Ok(())
        } else {
            Err(ConfigError::Invalid { problems })
        }
    }
}

// ---------------------------------------------------------------------------
// 2. Provider
// ---------------------------------------------------------------------------

/// Source of the configuration consumed at the start of every run.
pub trait ConfigProvider: Send + Sync {
    fn load(&self) -> Result<SyncConfiguration, ConfigError>;
}

/// Re-reads `<home>/.mirrorsync/config.yaml` on every call.
#[derive(Debug, Clone)]
pub struct FileConfigProvider {
    home: PathBuf,
}

impl FileConfigProvider {
    pub fn new(home: impl Into<PathBuf>) -> Self {
        Self { home: home.into() }
    }
}

impl ConfigProvider for FileConfigProvider {
    fn load(&self) -> Result<SyncConfiguration, ConfigError> {
        load_at(&self.home)
    }
}

/// A fixed configuration, mostly for tests and one-shot tools.
#[derive(Debug, Clone)]
pub struct StaticConfig(pub SyncConfiguration);

impl ConfigProvider for StaticConfig {
    fn load(&self) -> Result<SyncConfiguration, ConfigError> {
        Ok(self.0.clone())
    }
}

// ---------------------------------------------------------------------------
// 3. Load / save
// ---------------------------------------------------------------------------

/// `<home>/.mirrorsync/config.yaml`; pure, no I/O.
pub fn config_path_at(home: &Path) -> PathBuf {
    home.join(".mirrorsync").join("config.yaml")
}

/// Load the configuration. Returns `ConfigError::ConfigNotFound` if absent,
/// `ConfigError::Parse` (with path + line context) if malformed YAML.
pub fn load_at(home: &Path) -> Result<SyncConfiguration, ConfigError> {
    let path = config_path_at(home);
    if !path.exists() {
        return Err(ConfigError::ConfigNotFound { path });
    }
    let contents = std::fs::read_to_string(&path)?;
    serde_yaml::from_str(&contents).map_err(|e| ConfigError::Parse { path, source: e })
}

/// `load_at` convenience wrapper.
pub fn load() -> Result<SyncConfiguration, ConfigError> {
    load_at(&home()?)
}

/// Atomically save the configuration.
///
/// Write flow: serialize → `.yaml.tmp` sibling → `chmod 0600` → `rename`.
pub fn save_at(home: &Path, config: &SyncConfiguration) -> Result<(), ConfigError> {
    let path = config_path_at(home);
    if let Some(dir) = path.parent() {
        if !dir.exists() {
            std::fs::create_dir_all(dir)?;
            set_dir_permissions(dir)?;
        }
    }
    let tmp_path = path.with_file_name("config.yaml.tmp");
    let yaml = serde_yaml::to_string(config)?;
    std::fs::write(&tmp_path, yaml)?;
    set_file_permissions(&tmp_path)?;
    std::fs::rename(&tmp_path, &path)?;
    Ok(())
}

/// `save_at` convenience wrapper.
pub fn save(config: &SyncConfiguration) -> Result<(), ConfigError> {
    save_at(&home()?, config)
}

/// Write a default config if none exists. Idempotent: an existing file is
/// loaded and returned unchanged.
pub fn init_at(
    home: &Path,
    source: Option<String>,
    destination: Option<String>,
) -> Result<SyncConfiguration, ConfigError> {
    if config_path_at(home).exists() {
        return load_at(home);
    }
    let config = SyncConfiguration {
        source: source.unwrap_or_default(),
        destination: destination.unwrap_or_default(),
        ..SyncConfiguration::default()
    };
    save_at(home, &config)?;
    Ok(config)
}

// ---------------------------------------------------------------------------
// Private helpers
// ---------------------------------------------------------------------------

fn home() -> Result<PathBuf, ConfigError> {
    dirs::home_dir().ok_or(ConfigError::HomeNotFound)
}

#[cfg(unix)]
fn set_dir_permissions(path: &Path) -> Result<(), ConfigError> {
    use std::os::unix::fs::PermissionsExt;
    std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o700))?;
    Ok(())
}
#[cfg(not(unix))]
fn set_dir_permissions(_path: &Path) -> Result<(), ConfigError> {
    Ok(())
}

#[cfg(unix)]
fn set_file_permissions(path: &Path) -> Result<(), ConfigError> {
    use std::os::unix::fs::PermissionsExt;
    std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o600))?;
    Ok(())
}
#[cfg(not(unix))]
fn set_file_permissions(_path: &Path) -> Result<(), ConfigError> {
    Ok(())
}

// ---------------------------------------------------------------------------
// Unit tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn make_home() -> TempDir {
        TempDir::new().expect("tempdir")
    }

    #[test]
    fn config_path_is_correct() {
        let home = make_home();
        assert!(config_path_at(home.path()).ends_with(".mirrorsync/config.yaml"));
    }

    #[test]
    fn save_and_load_roundtrip() {
        let home = make_home();
        let mut cfg = SyncConfiguration {
            source: "gdrive:Shared".to_string(),
            destination: "nc:Backup".to_string(),
            ..SyncConfiguration::default()
        };
        cfg.engine_env
            .insert("RCLONE_CONFIG_PASS".to_string(), "env:MS_PASS".to_string());
        save_at(home.path(), &cfg).expect("save");
        let loaded = load_at(home.path()).expect("load");
        assert_eq!(loaded, cfg);
    }

    #[test]
    fn atomic_write_cleans_up_tmp() {
        let home = make_home();
        save_at(home.path(), &SyncConfiguration::default()).expect("save");
        let tmp = config_path_at(home.path()).with_file_name("config.yaml.tmp");
        assert!(!tmp.exists(), ".tmp must be gone after successful save");
    }

    #[test]
    fn config_file_has_owner_only_permissions() {
        let home = make_home();
        save_at(home.path(), &SyncConfiguration::default()).expect("save");
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let mode = std::fs::metadata(config_path_at(home.path()))
                .unwrap()
                .permissions()
                .mode()
                & 0o777;
            assert_eq!(mode, 0o600);
        }
    }

    #[test]
    fn load_missing_returns_not_found() {
        let home = make_home();
        let err = load_at(home.path()).unwrap_err();
        assert!(matches!(err, ConfigError::ConfigNotFound { .. }));
    }

    #[test]
    fn minimal_yaml_fills_defaults() {
        let cfg: SyncConfiguration =
            serde_yaml::from_str("source: a:src\ndestination: b:dst\n").expect("parse");
        assert_eq!(cfg.engine_binary, PathBuf::from("rclone"));
        assert_eq!(cfg.transfers, 4);
        assert!(cfg.skip_indirections);
        assert_eq!(cfg.schedule.interval_secs, 300);
        assert_eq!(cfg.conflict_scope, ConflictScope::Flagged);
    }

    #[test]
    fn validate_reports_every_problem() {
        let cfg = SyncConfiguration {
            transfers: 0,
            ..SyncConfiguration::default()
        };
        match cfg.validate().unwrap_err() {
            ConfigError::Invalid { problems } => {
                assert_eq!(problems.len(), 3, "{problems:?}");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn init_is_idempotent() {
        let home = make_home();
        let first = init_at(home.path(), Some("a:x".into()), Some("b:y".into())).expect("init");
        let second = init_at(home.path(), None, None).expect("init again");
        assert_eq!(first, second);
    }

    #[test]
    fn home_not_found_error_message() {
        assert!(ConfigError::HomeNotFound.to_string().contains("home directory"));
    }
}
