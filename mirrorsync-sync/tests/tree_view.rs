//! `load_tree` over a real store: windows, prefixes, lightweight runs.

use chrono::{DateTime, TimeZone, Utc};

use mirrorsync_core::{
    ErrorCategory, EventKind, NewFileEvent, RunCounters, RunStatus, TriggerKind,
};
use mirrorsync_store::{RunCompletion, Store};
use mirrorsync_sync::{load_tree, NodeKind, NodeStatus, TreeWindow};

fn at(secs: i64) -> DateTime<Utc> {
    Utc.timestamp_opt(1_700_000_000 + secs, 0).unwrap()
}

async fn record_run(store: &Store, started: i64, lightweight: bool, events: &[(&str, EventKind)]) {
    let run = store
        .create_run(TriggerKind::Scheduled, at(started), lightweight)
        .await
        .unwrap();
    let mut counters = RunCounters::default();
    for (i, (path, kind)) in events.iter().enumerate() {
        counters.record(*kind, Some(10));
        if lightweight {
            store.update_counters(run.id, &counters).await.unwrap();
        } else {
            let event = NewFileEvent {
                path: path.to_string(),
                kind: *kind,
                size: Some(10),
                detail: None,
                conflict_name: None,
                observed_at: at(started + i as i64),
            };
            store.record_event(run.id, &event, &counters).await.unwrap();
        }
    }
    store
        .finish_run(
            run.id,
            &RunCompletion {
                status: RunStatus::Success,
                counters,
                exit_code: Some(0),
                error_category: None,
                error_message: None,
                ended_at: at(started + 30),
            },
        )
        .await
        .unwrap();
}

#[tokio::test]
async fn subtree_fold_reports_error_up_the_chain() {
    let store = Store::in_memory().await.unwrap();
    record_run(
        &store,
        0,
        false,
        &[
            ("a/b/c.txt", EventKind::Error),
            ("a/b/d.txt", EventKind::Created),
            ("z/other.txt", EventKind::Created),
        ],
    )
    .await;

    let view = load_tree(&store, TreeWindow::Latest, Some("a")).await.unwrap();
    assert_eq!(view.root.path, "a");
    assert_eq!(view.root.status, NodeStatus::Error);
    assert_eq!(view.root.find("b").unwrap().status, NodeStatus::Error);
    assert_eq!(view.root.find("b/c.txt").unwrap().status, NodeStatus::Error);
    assert_eq!(view.root.find("b/d.txt").unwrap().status, NodeStatus::Synced);
    assert!(view.root.find("z").is_none());
    assert_eq!(view.stats.files, 2);
}

#[tokio::test]
async fn latest_window_only_sees_newest_run() {
    let store = Store::in_memory().await.unwrap();
    record_run(&store, 0, false, &[("old.txt", EventKind::Error)]).await;
    record_run(&store, 60, false, &[("new.txt", EventKind::Created)]).await;

    let latest = load_tree(&store, TreeWindow::Latest, None).await.unwrap();
    assert!(latest.root.find("old.txt").is_none());
    assert_eq!(latest.root.status, NodeStatus::Synced);

    let merged = load_tree(&store, TreeWindow::LastRuns(2), None).await.unwrap();
    assert_eq!(merged.root.find("old.txt").unwrap().status, NodeStatus::Error);
    assert_eq!(merged.root.status, NodeStatus::Error);
    assert_eq!(merged.root.find("new.txt").unwrap().kind, NodeKind::File);
}

#[tokio::test]
async fn lightweight_run_reports_aggregates_and_unknown_paths() {
    let store = Store::in_memory().await.unwrap();
    record_run(&store, 0, false, &[("docs/a.txt", EventKind::Created)]).await;
    record_run(
        &store,
        60,
        true,
        &[("docs/a.txt", EventKind::Updated), ("docs/b.txt", EventKind::Created)],
    )
    .await;

    let latest = load_tree(&store, TreeWindow::Latest, None).await.unwrap();
    assert!(latest.root.children.is_empty());
    assert_eq!(latest.aggregates.len(), 1);
    assert_eq!(latest.aggregates[0].counters.files_transferred, 2);

    let merged = load_tree(&store, TreeWindow::LastRuns(5), None).await.unwrap();
    assert_eq!(
        merged.root.find("docs/a.txt").unwrap().status,
        NodeStatus::Unknown
    );
    assert_eq!(merged.root.status, NodeStatus::Unknown);
}

#[tokio::test]
async fn runs_without_file_activity_do_not_blank_the_latest_tree() {
    let store = Store::in_memory().await.unwrap();
    record_run(
        &store,
        0,
        false,
        &[("docs/a.txt", EventKind::Created), ("docs/b.txt", EventKind::Skipped)],
    )
    .await;
    // An idle tick that found nothing to do.
    record_run(&store, 60, false, &[]).await;
    // A lightweight run that did nothing.
    record_run(&store, 90, true, &[]).await;

    let failed = store
        .create_run(TriggerKind::Manual, at(120), false)
        .await
        .unwrap();
    store
        .finish_run(
            failed.id,
            &RunCompletion {
                status: RunStatus::Failed,
                counters: RunCounters::default(),
                exit_code: None,
                error_category: Some(ErrorCategory::LaunchError),
                error_message: Some("failed to launch rclone".to_string()),
                ended_at: at(121),
            },
        )
        .await
        .unwrap();
    // A run still in progress with no events yet.
    store
        .create_run(TriggerKind::Scheduled, at(180), false)
        .await
        .unwrap();

    let view = load_tree(&store, TreeWindow::Latest, None).await.unwrap();
    assert_eq!(view.root.find("docs/a.txt").unwrap().status, NodeStatus::Synced);
    assert_eq!(view.root.find("docs/b.txt").unwrap().status, NodeStatus::Pending);
    assert_eq!(view.root.status, NodeStatus::Pending);
    assert!(view.aggregates.is_empty());
    assert_eq!(view.stats.files, 2);
}

#[tokio::test]
async fn newer_synced_file_keeps_directory_synced_past_a_lightweight_run() {
    let store = Store::in_memory().await.unwrap();
    record_run(&store, 0, false, &[("d/old.txt", EventKind::Created)]).await;
    record_run(&store, 60, true, &[("d/old.txt", EventKind::Updated)]).await;
    record_run(&store, 120, false, &[("d/new.txt", EventKind::Created)]).await;

    let view = load_tree(&store, TreeWindow::LastRuns(3), None).await.unwrap();
    let d = view.root.find("d").unwrap();
    assert_eq!(d.find("old.txt").unwrap().status, NodeStatus::Unknown);
    assert_eq!(d.find("new.txt").unwrap().status, NodeStatus::Synced);
    assert_eq!(d.status, NodeStatus::Synced);
    assert_eq!(view.aggregates.len(), 1);
}
