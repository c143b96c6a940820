//! End-to-end runs against a fake engine: a shell script that prints canned
//! JSON log records and exits with a chosen code.

use std::fs;
use std::io::Write;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::Utc;
use sqlx::sqlite::SqliteConnectOptions;
use sqlx::{Connection, SqliteConnection};
use tempfile::TempDir;

use mirrorsync_core::{
    ConflictScope, ErrorCategory, EventKind, RunStatus, StaticConfig, SyncConfiguration,
    TriggerKind,
};
use mirrorsync_store::Store;
use mirrorsync_sync::{EnvSecretStore, RunExecutor, SyncError};

struct Fixture {
    dir: TempDir,
    dest: PathBuf,
}

impl Fixture {
    fn new() -> Self {
        let _ = env_logger::builder().is_test(true).try_init();
        let dir = TempDir::new().unwrap();
        let dest = dir.path().join("dest");
        fs::create_dir_all(dir.path().join("src")).unwrap();
        fs::create_dir_all(&dest).unwrap();
        Self { dir, dest }
    }

    /// Write an engine script printing `lines` then exiting with `exit`.
    fn engine(&self, lines: &[&str], exit: i32) -> PathBuf {
        self.script(&format!(
            "cat <<'RECORDS'\n{}\nRECORDS\nexit {exit}\n",
            lines.join("\n")
        ))
    }

    fn script(&self, body: &str) -> PathBuf {
        let path = self.dir.path().join(format!("engine-{}.sh", rand_suffix()));
        {
            let mut file = fs::File::create(&path).unwrap();
            write!(file, "#!/bin/sh\n{body}").unwrap();
            file.sync_all().unwrap();
        }
        fs::set_permissions(&path, fs::Permissions::from_mode(0o755)).unwrap();
        path
    }

    fn config(&self, engine: &Path) -> SyncConfiguration {
        SyncConfiguration {
            source: self.dir.path().join("src").display().to_string(),
            destination: self.dest.display().to_string(),
            engine_binary: engine.to_path_buf(),
            cancel_grace_secs: 2,
            ..SyncConfiguration::default()
        }
    }

    async fn executor(&self, config: SyncConfiguration) -> RunExecutor {
        let store = Store::in_memory().await.unwrap();
        RunExecutor::new(store, Arc::new(StaticConfig(config)), Arc::new(EnvSecretStore))
            .with_run_log_dir(self.dir.path().join("logs"))
    }

    fn database(&self) -> PathBuf {
        self.dir.path().join("runs.db")
    }

    /// Executor over a database file, so a second connection can lock it.
    async fn file_executor(&self, config: SyncConfiguration) -> RunExecutor {
        let store = Store::open(&self.database()).await.unwrap();
        RunExecutor::new(store, Arc::new(StaticConfig(config)), Arc::new(EnvSecretStore))
    }
}

fn rand_suffix() -> u64 {
    use std::sync::atomic::{AtomicU64, Ordering};
    static NEXT: AtomicU64 = AtomicU64::new(0);
    NEXT.fetch_add(1, Ordering::Relaxed)
}

const NOTES_COPIED: &str = r#"{"level":"info","msg":"Copied (new)","object":"notes.txt","objectType":"*local.Object","size":100,"source":"operations/copy.go:360","time":"2024-01-05T12:45:54.986126-05:00"}"#;

#[tokio::test]
async fn new_file_is_recorded_as_created() {
    let fx = Fixture::new();
    let engine = fx.engine(&[NOTES_COPIED], 0);
    let executor = fx.executor(fx.config(&engine)).await;

    let run = executor.run(TriggerKind::Manual).await.unwrap();
    assert_eq!(run.status, RunStatus::Success);
    assert_eq!(run.counters.files_transferred, 1);
    assert_eq!(run.counters.bytes_transferred, 100);
    assert!(run.ended_at.is_some());

    let events = executor.store().get_run_events(run.id).await.unwrap();
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].path, "notes.txt");
    assert_eq!(events[0].kind, EventKind::Created);
    assert_eq!(events[0].size, Some(100));

    let log = fs::read_to_string(run.log_path.unwrap()).unwrap();
    assert!(log.contains("Copied (new)"));
    assert!(!executor.is_busy());
}

#[tokio::test]
async fn garbage_line_counts_a_warning_without_aborting() {
    let fx = Fixture::new();
    let engine = fx.engine(&[NOTES_COPIED, r#"{"level":"info","msg":"Cop"#], 0);
    let executor = fx.executor(fx.config(&engine)).await;

    let run = executor.run(TriggerKind::Scheduled).await.unwrap();
    assert_eq!(run.status, RunStatus::Success);
    assert_eq!(run.counters.parse_warnings, 1);
    assert_eq!(executor.store().get_run_events(run.id).await.unwrap().len(), 1);
}

#[tokio::test]
async fn events_keep_engine_order() {
    let fx = Fixture::new();
    let lines: Vec<String> = (0..25)
        .map(|i| format!(r#"{{"level":"info","msg":"Copied (new)","object":"f{i:02}.txt","size":{i}}}"#))
        .collect();
    let refs: Vec<&str> = lines.iter().map(String::as_str).collect();
    let engine = fx.engine(&refs, 0);
    let executor = fx.executor(fx.config(&engine)).await;

    let run = executor.run(TriggerKind::Manual).await.unwrap();
    let paths: Vec<String> = executor
        .store()
        .get_run_events(run.id)
        .await
        .unwrap()
        .into_iter()
        .map(|e| e.path)
        .collect();
    let expected: Vec<String> = (0..25).map(|i| format!("f{i:02}.txt")).collect();
    assert_eq!(paths, expected);
}

#[tokio::test]
async fn lightweight_mode_keeps_counters_only() {
    let fx = Fixture::new();
    let engine = fx.engine(
        &[
            NOTES_COPIED,
            r#"{"level":"info","msg":"Copied (replaced existing)","object":"b.txt","size":5}"#,
            r#"{"level":"debug","msg":"Unchanged skipping","object":"c.txt","size":7}"#,
        ],
        0,
    );
    let config = SyncConfiguration {
        lightweight_events: true,
        ..fx.config(&engine)
    };
    let executor = fx.executor(config).await;

    let run = executor.run(TriggerKind::Manual).await.unwrap();
    assert!(run.lightweight);
    assert_eq!(run.counters.files_transferred, 2);
    assert_eq!(run.counters.files_skipped, 1);
    assert_eq!(run.counters.actions(), 3);
    assert!(executor.store().get_run_events(run.id).await.unwrap().is_empty());
}

#[tokio::test]
async fn missing_engine_is_a_launch_error() {
    let fx = Fixture::new();
    let executor = fx
        .executor(fx.config(Path::new("/nonexistent/mirrorsync-engine")))
        .await;

    let run = executor.run(TriggerKind::Manual).await.unwrap();
    assert_eq!(run.status, RunStatus::Failed);
    assert_eq!(run.error_category, Some(ErrorCategory::LaunchError));
    assert!(executor.store().get_run_events(run.id).await.unwrap().is_empty());

    // The lock was released.
    let again = executor.run(TriggerKind::Manual).await.unwrap();
    assert_eq!(again.error_category, Some(ErrorCategory::LaunchError));
}

#[tokio::test]
async fn invalid_configuration_is_a_launch_error() {
    let fx = Fixture::new();
    let engine = fx.engine(&[], 0);
    let config = SyncConfiguration {
        source: String::new(),
        ..fx.config(&engine)
    };
    let executor = fx.executor(config).await;

    let run = executor.run(TriggerKind::Manual).await.unwrap();
    assert_eq!(run.status, RunStatus::Failed);
    assert_eq!(run.error_category, Some(ErrorCategory::LaunchError));
    assert!(run.error_message.unwrap().contains("source"));
}

#[tokio::test]
async fn second_trigger_while_running_is_busy() {
    let fx = Fixture::new();
    let engine = fx.engine(&[NOTES_COPIED], 0);
    let executor = fx.executor(fx.config(&engine)).await;

    let active = executor.start(TriggerKind::Scheduled).await.unwrap();
    assert!(executor.is_busy());
    assert_eq!(executor.current_run(), Some(active.id()));
    assert!(matches!(
        executor.start(TriggerKind::Manual).await,
        Err(SyncError::Busy)
    ));

    let run = active.execute().await.unwrap();
    assert_eq!(run.status, RunStatus::Success);
    assert_eq!(executor.current_run(), None);
    assert!(executor.run(TriggerKind::Manual).await.is_ok());
}

#[tokio::test]
async fn partial_run_carries_detected_category() {
    let fx = Fixture::new();
    let engine = fx.engine(
        &[
            NOTES_COPIED,
            r#"{"level":"error","msg":"Failed to copy: googleapi: Error 429: Too Many Requests","object":"big.iso"}"#,
        ],
        1,
    );
    let executor = fx.executor(fx.config(&engine)).await;

    let run = executor.run(TriggerKind::Manual).await.unwrap();
    assert_eq!(run.status, RunStatus::Partial);
    assert_eq!(run.error_category, Some(ErrorCategory::RateLimited));
    assert_eq!(run.exit_code, Some(1));

    let events = executor.store().get_run_events(run.id).await.unwrap();
    assert_eq!(events[1].kind, EventKind::Error);
    assert!(events[1].detail.as_deref().unwrap().contains("429"));
}

#[tokio::test]
async fn auth_failure_without_events_fails_with_category() {
    let fx = Fixture::new();
    let engine = fx.script(
        r#"cat <<'RECORDS'
{"level":"error","msg":"Failed to create file system: cannot fetch token: invalid_grant"}
RECORDS
echo 'oauth2: token expired' >&2
exit 1
"#,
    );
    let executor = fx.executor(fx.config(&engine)).await;

    let run = executor.run(TriggerKind::Scheduled).await.unwrap();
    assert_eq!(run.status, RunStatus::Failed);
    assert_eq!(run.error_category, Some(ErrorCategory::Authentication));
    assert!(run.error_message.is_some());
}

#[tokio::test]
async fn only_skips_with_nonzero_exit_is_success() {
    let fx = Fixture::new();
    let engine = fx.engine(
        &[r#"{"level":"debug","msg":"Unchanged skipping","object":"a.txt","size":1}"#],
        9,
    );
    let executor = fx.executor(fx.config(&engine)).await;

    let run = executor.run(TriggerKind::Scheduled).await.unwrap();
    assert_eq!(run.status, RunStatus::Success);
    assert_eq!(run.exit_code, Some(9));
}

#[tokio::test]
async fn flagged_conflict_gets_next_free_name() {
    let fx = Fixture::new();
    fs::write(fx.dest.join("report.pdf"), b"12345").unwrap();
    fs::write(fx.dest.join("report-conflict(1).pdf"), b"1234567").unwrap();
    let engine = fx.engine(
        &[r#"{"level":"notice","msg":"Destination already exists with different content","object":"report.pdf","size":10}"#],
        0,
    );
    let executor = fx.executor(fx.config(&engine)).await;

    let run = executor.run(TriggerKind::Manual).await.unwrap();
    assert_eq!(run.counters.conflicts, 1);
    let events = executor.store().get_run_events(run.id).await.unwrap();
    assert_eq!(events[0].kind, EventKind::Conflict);
    assert_eq!(
        events[0].conflict_name.as_deref(),
        Some("report-conflict(2).pdf")
    );
}

#[tokio::test]
async fn replacements_scope_names_overwrites() {
    let fx = Fixture::new();
    fs::create_dir_all(fx.dest.join("docs")).unwrap();
    fs::write(fx.dest.join("docs/plan.txt"), b"old").unwrap();
    let engine = fx.engine(
        &[
            r#"{"level":"info","msg":"Copied (replaced existing)","object":"docs/plan.txt","size":4}"#,
            r#"{"level":"info","msg":"Copied (replaced existing)","object":"docs/plan.txt","size":4}"#,
        ],
        0,
    );
    let config = SyncConfiguration {
        conflict_scope: ConflictScope::Replacements,
        ..fx.config(&engine)
    };
    let executor = fx.executor(config).await;

    let run = executor.run(TriggerKind::Manual).await.unwrap();
    let events = executor.store().get_run_events(run.id).await.unwrap();
    assert_eq!(events[0].kind, EventKind::Conflict);
    assert_eq!(
        events[0].conflict_name.as_deref(),
        Some("docs/plan-conflict(1).txt")
    );
    // The name chosen earlier in the run already holds this object.
    assert_eq!(events[1].kind, EventKind::Skipped);
    assert_eq!(
        events[1].conflict_name.as_deref(),
        Some("docs/plan-conflict(1).txt")
    );
}

#[tokio::test]
async fn cancel_terminates_the_engine() {
    let fx = Fixture::new();
    let engine = fx.script(&format!("echo '{NOTES_COPIED}'\nexec sleep 30\n"));
    let executor = fx.executor(fx.config(&engine)).await;

    let active = executor.start(TriggerKind::Manual).await.unwrap();
    let id = active.id();
    let handle = tokio::spawn(active.execute());
    tokio::time::sleep(std::time::Duration::from_millis(200)).await;
    assert_eq!(executor.cancel_current(), Some(id));

    let run = tokio::time::timeout(std::time::Duration::from_secs(10), handle)
        .await
        .unwrap()
        .unwrap()
        .unwrap();
    assert_eq!(run.status, RunStatus::Failed);
    assert_eq!(run.error_category, Some(ErrorCategory::Cancelled));
    assert!(executor.cancel_current().is_none());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_triggers_admit_exactly_one_run() {
    let fx = Fixture::new();
    let engine = fx.engine(&[NOTES_COPIED], 0);
    let executor = fx.executor(fx.config(&engine)).await;

    let attempts: Vec<_> = (0..8)
        .map(|i| {
            let executor = executor.clone();
            let trigger = if i % 2 == 0 {
                TriggerKind::Scheduled
            } else {
                TriggerKind::Manual
            };
            tokio::spawn(async move { executor.start(trigger).await })
        })
        .collect();

    let mut started = Vec::new();
    let mut busy = 0;
    for attempt in attempts {
        match attempt.await.unwrap() {
            Ok(active) => started.push(active),
            Err(SyncError::Busy) => busy += 1,
            Err(other) => panic!("unexpected start failure: {other}"),
        }
    }
    assert_eq!(started.len(), 1);
    assert_eq!(busy, 7);

    let run = started.pop().unwrap().execute().await.unwrap();
    assert_eq!(run.status, RunStatus::Success);
    assert_eq!(executor.store().list_runs(10, 0).await.unwrap().len(), 1);
}

#[tokio::test]
async fn orphaned_running_row_does_not_block_new_runs() {
    let fx = Fixture::new();
    let engine = fx.engine(&[NOTES_COPIED], 0);
    let executor = fx.executor(fx.config(&engine)).await;

    // A run whose final status never reached the store.
    let orphan = executor
        .store()
        .create_run(TriggerKind::Scheduled, Utc::now(), false)
        .await
        .unwrap();

    let run = executor.run(TriggerKind::Manual).await.unwrap();
    assert_eq!(run.status, RunStatus::Success);

    let orphan = executor.store().get_run(orphan.id).await.unwrap().unwrap();
    assert_eq!(orphan.status, RunStatus::Failed);
    assert_eq!(orphan.error_category, Some(ErrorCategory::Interrupted));
    assert!(executor.store().active_run().await.unwrap().is_none());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn final_status_survives_a_locked_database() {
    let fx = Fixture::new();
    let engine = fx.script("sleep 1\nexit 0\n");
    let executor = fx.file_executor(fx.config(&engine)).await;

    let active = executor.start(TriggerKind::Scheduled).await.unwrap();
    let id = active.id();

    // Hold the write lock past the store's busy timeout so the first attempt
    // at writing the final status fails.
    let mut blocker = SqliteConnection::connect_with(
        &SqliteConnectOptions::new().filename(fx.database()),
    )
    .await
    .unwrap();
    sqlx::query("BEGIN EXCLUSIVE")
        .execute(&mut blocker)
        .await
        .unwrap();
    let handle = tokio::spawn(active.execute());
    tokio::time::sleep(std::time::Duration::from_secs(7)).await;
    sqlx::query("COMMIT").execute(&mut blocker).await.unwrap();
    blocker.close().await.unwrap();

    let run = tokio::time::timeout(std::time::Duration::from_secs(30), handle)
        .await
        .unwrap()
        .unwrap()
        .unwrap();
    assert_eq!(run.id, id);
    assert_eq!(run.status, RunStatus::Success);
    assert!(executor.store().active_run().await.unwrap().is_none());
    assert!(!executor.is_busy());

    let next = executor.run(TriggerKind::Manual).await.unwrap();
    assert_eq!(next.status, RunStatus::Success);
}
