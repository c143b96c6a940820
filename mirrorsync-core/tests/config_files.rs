//! Config file parsing and validation against realistic YAML documents.
//!
//! Each `#[case]` is isolated; no shared state.

use std::fs;

use mirrorsync_core::config::{self, ConflictScope, SyncConfiguration};
use mirrorsync_core::{ConfigError, ConfigProvider, FileConfigProvider};
use rstest::rstest;
use tempfile::TempDir;

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn write_config(home: &TempDir, yaml: &str) {
    let path = config::config_path_at(home.path());
    fs::create_dir_all(path.parent().expect("config dir")).expect("mkdir");
    fs::write(&path, yaml).expect("write config");
}

// ---------------------------------------------------------------------------
// Parsing
// ---------------------------------------------------------------------------

#[rstest]
#[case("minimal", "source: gdrive:Team\ndestination: nc:Backup\n", ConflictScope::Flagged, false)]
#[case(
    "replacements",
    "source: gdrive:Team\ndestination: nc:Backup\nconflict_scope: replacements\n",
    ConflictScope::Replacements,
    false
)]
#[case(
    "lightweight",
    "source: /srv/a\ndestination: /srv/b\nlightweight_events: true\nunknown_future_key: 1\n",
    ConflictScope::Flagged,
    true
)]
fn parses_valid_documents(
    #[case] label: &str,
    #[case] yaml: &str,
    #[case] scope: ConflictScope,
    #[case] lightweight: bool,
) {
    let home = TempDir::new().expect("home");
    write_config(&home, yaml);
    let cfg = config::load_at(home.path()).unwrap_or_else(|e| panic!("[{label}] load: {e}"));
    assert_eq!(cfg.conflict_scope, scope, "[{label}] scope");
    assert_eq!(cfg.lightweight_events, lightweight, "[{label}] lightweight");
    cfg.validate()
        .unwrap_or_else(|e| panic!("[{label}] validate: {e}"));
}

#[rstest]
#[case("missing_destination", "source: a:b\n", "destination")]
#[case(
    "jitter_out_of_range",
    "source: a:b\ndestination: c:d\nschedule:\n  jitter_fraction: 1.5\n",
    "jitter_fraction"
)]
#[case(
    "zero_interval",
    "source: a:b\ndestination: c:d\nschedule:\n  interval_secs: 0\n",
    "interval_secs"
)]
fn rejects_invalid_documents(#[case] label: &str, #[case] yaml: &str, #[case] needle: &str) {
    let cfg: SyncConfiguration =
        serde_yaml::from_str(yaml).unwrap_or_else(|e| panic!("[{label}] parse: {e}"));
    let err = cfg.validate().expect_err("should be invalid");
    assert!(
        err.to_string().contains(needle),
        "[{label}] expected '{needle}' in '{err}'"
    );
}

#[test]
fn malformed_yaml_reports_path() {
    let home = TempDir::new().expect("home");
    write_config(&home, "source: [unclosed\n");
    let err = config::load_at(home.path()).expect_err("parse error");
    match err {
        ConfigError::Parse { path, .. } => assert!(path.ends_with("config.yaml")),
        other => panic!("unexpected error: {other}"),
    }
}

// ---------------------------------------------------------------------------
// Provider
// ---------------------------------------------------------------------------

#[test]
fn file_provider_sees_changes_between_loads() {
    let home = TempDir::new().expect("home");
    write_config(&home, "source: a:one\ndestination: b:dst\n");
    let provider = FileConfigProvider::new(home.path());
    assert_eq!(provider.load().expect("first load").source, "a:one");

    write_config(&home, "source: a:two\ndestination: b:dst\n");
    assert_eq!(provider.load().expect("second load").source, "a:two");
}
