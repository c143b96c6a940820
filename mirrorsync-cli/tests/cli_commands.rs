use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::process::{Child, Command, Stdio};
use std::thread::sleep;
use std::time::{Duration, Instant};

use assert_cmd::prelude::*;
use predicates::str::contains;
use tempfile::TempDir;

use mirrorsync_core::config::{config_path_at, save_at};
use mirrorsync_core::{ScheduleConfig, SyncConfiguration};

fn mirrorsync_cmd(home: &Path) -> Command {
    let mut cmd = Command::new(assert_cmd::cargo::cargo_bin!("mirrorsync"));
    cmd.env("HOME", home)
        .env("USERPROFILE", home)
        .env("NO_COLOR", "1");
    cmd
}

struct DaemonProcess {
    child: Child,
    home: PathBuf,
}

impl DaemonProcess {
    fn start(home: &Path) -> Self {
        let child = mirrorsync_cmd(home)
            .args(["daemon", "start"])
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn()
            .expect("spawn daemon");
        let daemon = Self {
            child,
            home: home.to_path_buf(),
        };

        let socket = home.join(".mirrorsync").join("daemon.sock");
        let deadline = Instant::now() + Duration::from_secs(10);
        while !socket.exists() {
            assert!(Instant::now() < deadline, "daemon socket never appeared");
            sleep(Duration::from_millis(50));
        }
        daemon
    }

    fn stop(&mut self) {
        let _ = mirrorsync_cmd(&self.home).args(["daemon", "stop"]).status();

        let deadline = Instant::now() + Duration::from_secs(5);
        while Instant::now() < deadline {
            if let Ok(Some(_)) = self.child.try_wait() {
                return;
            }
            sleep(Duration::from_millis(50));
        }

        let _ = self.child.kill();
        let _ = self.child.wait();
    }
}

impl Drop for DaemonProcess {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Home with a config whose engine is a shell script printing one copy record.
fn configured_home() -> TempDir {
    let home = TempDir::new().expect("home");
    let root = home.path();
    fs::create_dir_all(root.join("src")).expect("src");
    fs::create_dir_all(root.join("dest")).expect("dest");

    let engine = root.join("engine.sh");
    fs::write(
        &engine,
        "#!/bin/sh\ncat <<'RECORDS'\n\
         {\"level\":\"info\",\"msg\":\"Copied (new)\",\"object\":\"docs/notes.txt\",\"size\":100}\n\
         RECORDS\nexit 0\n",
    )
    .expect("engine");
    fs::set_permissions(&engine, fs::Permissions::from_mode(0o755)).expect("chmod");

    let config = SyncConfiguration {
        source: root.join("src").display().to_string(),
        destination: root.join("dest").display().to_string(),
        engine_binary: engine,
        schedule: ScheduleConfig {
            autostart: false,
            ..ScheduleConfig::default()
        },
        ..SyncConfiguration::default()
    };
    save_at(root, &config).expect("save config");
    home
}

#[test]
fn config_init_then_validate() {
    let home = TempDir::new().expect("home");

    mirrorsync_cmd(home.path())
        .args(["config", "show"])
        .assert()
        .failure()
        .stderr(contains("mirrorsync config init"));

    mirrorsync_cmd(home.path())
        .args(["config", "init"])
        .assert()
        .success()
        .stdout(contains("Wrote"));
    assert!(config_path_at(home.path()).exists());

    mirrorsync_cmd(home.path())
        .args(["config", "validate"])
        .assert()
        .failure()
        .stdout(contains("missing required field: source"))
        .stdout(contains("missing required field: destination"));

    mirrorsync_cmd(home.path())
        .args(["config", "init"])
        .assert()
        .success()
        .stdout(contains("already exists"));
}

#[test]
fn config_init_with_roots_is_valid() {
    let home = TempDir::new().expect("home");
    mirrorsync_cmd(home.path())
        .args(["config", "init", "--source", "drive:Shared", "--destination", "/srv/mirror"])
        .assert()
        .success();
    mirrorsync_cmd(home.path())
        .args(["config", "validate"])
        .assert()
        .success();
    mirrorsync_cmd(home.path())
        .args(["config", "show"])
        .assert()
        .success()
        .stdout(contains("drive:Shared"));
}

#[test]
fn commands_report_a_stopped_daemon() {
    let home = TempDir::new().expect("home");

    mirrorsync_cmd(home.path())
        .args(["runs"])
        .assert()
        .failure()
        .stderr(contains("daemon is not running"));

    let output = mirrorsync_cmd(home.path())
        .args(["daemon", "status"])
        .output()
        .expect("status");
    assert!(output.status.success());
    let status: serde_json::Value = serde_json::from_slice(&output.stdout).expect("status json");
    assert_eq!(status["running"], serde_json::json!(false));

    mirrorsync_cmd(home.path())
        .args(["daemon", "stop"])
        .assert()
        .success()
        .stdout(contains("daemon is not running"));
}

#[test]
fn run_and_inspect_through_the_daemon() {
    let home = configured_home();
    let mut daemon = DaemonProcess::start(home.path());

    mirrorsync_cmd(home.path())
        .args(["run", "--wait"])
        .assert()
        .success()
        .stdout(contains("SUCCESS"))
        .stdout(contains("1 transferred"));

    let output = mirrorsync_cmd(home.path())
        .args(["runs", "--json"])
        .output()
        .expect("runs");
    assert!(output.status.success());
    let runs: serde_json::Value = serde_json::from_slice(&output.stdout).expect("runs json");
    assert_eq!(runs[0]["status"], serde_json::json!("success"));
    let run_id = runs[0]["id"].as_i64().expect("run id").to_string();

    mirrorsync_cmd(home.path())
        .args(["events", &run_id])
        .assert()
        .success()
        .stdout(contains("docs/notes.txt"))
        .stdout(contains("created"));

    mirrorsync_cmd(home.path())
        .args(["tree", "docs"])
        .assert()
        .success()
        .stdout(contains("notes.txt"))
        .stdout(contains("1 files"));

    mirrorsync_cmd(home.path())
        .args(["history", "docs/notes.txt"])
        .assert()
        .success()
        .stdout(contains(format!("run {run_id}")));

    mirrorsync_cmd(home.path())
        .args(["logs", &run_id])
        .assert()
        .success()
        .stdout(contains("Copied (new)"));

    mirrorsync_cmd(home.path())
        .args(["info"])
        .assert()
        .success()
        .stdout(contains("runs:     1"));

    mirrorsync_cmd(home.path())
        .args(["schedule", "start"])
        .assert()
        .success()
        .stdout(contains("scheduler running"));
    mirrorsync_cmd(home.path())
        .args(["schedule", "pause"])
        .assert()
        .success()
        .stdout(contains("scheduler paused"));

    mirrorsync_cmd(home.path())
        .args(["cancel"])
        .assert()
        .success()
        .stdout(contains("no run in progress"));

    mirrorsync_cmd(home.path())
        .args(["cleanup", "--older-than-days", "0"])
        .assert()
        .success()
        .stdout(contains("deleted 1 run(s)"));

    daemon.stop();
    assert!(!home.path().join(".mirrorsync").join("daemon.sock").exists());
}
