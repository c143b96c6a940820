//! The sync service: one owned object wiring the store, the run executor and
//! the scheduler together. The socket server and tests talk to this type
//! only; nothing here knows about the wire protocol.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use mirrorsync_core::{
    normalize_relative_path, ConfigProvider, ErrorCategory, FileConfigProvider, FileEvent, Run,
    RunCounters, RunId, RunStatus, TriggerKind,
};
use mirrorsync_store::{CleanupReport, Store, StoreError, StoreInfo};
use mirrorsync_sync::{load_tree, EnvSecretStore, RunExecutor, SecretStore, SyncError};
use mirrorsync_sync::{TreeView, TreeWindow};

use crate::error::DaemonError;
use crate::paths::{database_path, run_logs_dir};
use crate::scheduler::{ScheduleParams, Scheduler, SchedulerState};

/// How long `shutdown` waits for a cancelled run to write its final status.
const SHUTDOWN_WAIT: Duration = Duration::from_secs(30);

// ---------------------------------------------------------------------------
// Views
// ---------------------------------------------------------------------------

/// A run as listed to users.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunSummary {
    pub id: RunId,
    pub trigger: TriggerKind,
    pub status: RunStatus,
    pub started_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ended_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub duration_secs: Option<i64>,
    pub counters: RunCounters,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_category: Option<ErrorCategory>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    pub lightweight: bool,
}

impl From<&Run> for RunSummary {
    fn from(run: &Run) -> Self {
        Self {
            id: run.id,
            trigger: run.trigger,
            status: run.status,
            started_at: run.started_at,
            ended_at: run.ended_at,
            duration_secs: run.ended_at.map(|end| (end - run.started_at).num_seconds()),
            counters: run.counters,
            error_category: run.error_category,
            error_message: run.error_message.clone(),
            lightweight: run.lightweight,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceStatus {
    pub scheduler_state: SchedulerState,
    pub active_run_id: Option<RunId>,
    pub last_run_summary: Option<RunSummary>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub next_tick_at: Option<DateTime<Utc>>,
    pub store: StoreInfo,
}

/// A slice of a run's engine log, for incremental tailing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunLog {
    pub run_id: RunId,
    pub lines: Vec<String>,
    /// Pass back as `since` to continue after the last returned line.
    pub next_line: usize,
    /// The run has ended and every line has been returned.
    pub complete: bool,
}

// ---------------------------------------------------------------------------
// Service
// ---------------------------------------------------------------------------

#[derive(Clone)]
pub struct SyncService {
    scheduler: Scheduler<RunExecutor>,
    config: Arc<dyn ConfigProvider>,
    store: Store,
}

impl SyncService {
    pub fn new(
        store: Store,
        config: Arc<dyn ConfigProvider>,
        secrets: Arc<dyn SecretStore>,
        run_log_dir: Option<PathBuf>,
    ) -> Self {
        let mut executor = RunExecutor::new(store.clone(), Arc::clone(&config), secrets);
        if let Some(dir) = run_log_dir {
            executor = executor.with_run_log_dir(dir);
        }
        Self {
            scheduler: Scheduler::new(executor),
            config,
            store,
        }
    }

    /// Open the store under `home`, finalise runs interrupted by a previous
    /// daemon, and read configuration from `<home>/.mirrorsync/config.yaml`.
    pub async fn open_at(home: &Path) -> Result<Self, DaemonError> {
        let store = Store::open(&database_path(home)).await?;
        let interrupted = store.recover_interrupted_runs(Utc::now()).await?;
        for run_id in &interrupted {
            tracing::warn!(run_id = %run_id, "run was interrupted by a daemon restart");
        }
        Ok(Self::new(
            store,
            Arc::new(FileConfigProvider::new(home)),
            Arc::new(EnvSecretStore),
            Some(run_logs_dir(home)),
        ))
    }

    fn executor(&self) -> &RunExecutor {
        self.scheduler.launcher()
    }

    // -- scheduler ----------------------------------------------------------

    /// Schedule parameters are read from configuration on every start.
    pub fn start_scheduler(&self) -> Result<SchedulerState, DaemonError> {
        let config = self.config.load()?;
        Ok(self.scheduler.start(ScheduleParams::from(&config.schedule)))
    }

    /// Start the scheduler if configuration asks for it. `None` when disabled.
    pub fn autostart(&self) -> Result<Option<SchedulerState>, DaemonError> {
        let config = self.config.load()?;
        if !config.schedule.autostart {
            return Ok(None);
        }
        let params = ScheduleParams::from(&config.schedule);
        Ok(Some(self.scheduler.start(params)))
    }

    pub fn stop_scheduler(&self) -> SchedulerState {
        self.scheduler.stop()
    }

    pub fn pause_scheduler(&self) -> SchedulerState {
        self.scheduler.pause()
    }

    pub fn scheduler_state(&self) -> SchedulerState {
        self.scheduler.state()
    }

    // -- runs ---------------------------------------------------------------

    /// Start a manual run and return its id without waiting for it.
    pub async fn trigger_now(&self) -> Result<RunId, DaemonError> {
        match self.scheduler.trigger_now().await {
            Ok(run_id) => Ok(run_id),
            Err(SyncError::Busy) => Err(self.busy()),
            Err(err) => Err(err.into()),
        }
    }

    /// Start a manual run and wait for its terminal status.
    pub async fn trigger_and_wait(&self) -> Result<Run, DaemonError> {
        let active = match self.executor().start(TriggerKind::Manual).await {
            Ok(active) => active,
            Err(SyncError::Busy) => return Err(self.busy()),
            Err(err) => return Err(err.into()),
        };
        Ok(active.execute().await?)
    }

    /// Ask the active run to terminate. `None` when nothing is running.
    pub fn cancel_current_run(&self) -> Option<RunId> {
        self.executor().cancel_current()
    }

    fn busy(&self) -> DaemonError {
        DaemonError::Busy {
            active_run_id: self.executor().current_run(),
        }
    }

    // -- queries ------------------------------------------------------------

    pub async fn get_current_status(&self) -> Result<ServiceStatus, DaemonError> {
        let active_run_id = self.executor().current_run();
        let last_run_summary = self
            .store
            .latest_finished_run()
            .await?
            .as_ref()
            .map(RunSummary::from);
        Ok(ServiceStatus {
            scheduler_state: self.scheduler.state(),
            active_run_id,
            last_run_summary,
            next_tick_at: self.scheduler.next_tick_at(),
            store: self.store.info().await?,
        })
    }

    /// Newest first.
    pub async fn list_runs(&self, limit: u32, offset: u32) -> Result<Vec<RunSummary>, DaemonError> {
        let runs = self.store.list_runs(limit, offset).await?;
        Ok(runs.iter().map(RunSummary::from).collect())
    }

    pub async fn get_run(&self, run_id: RunId) -> Result<Run, DaemonError> {
        self.store
            .get_run(run_id)
            .await?
            .ok_or(DaemonError::RunNotFound(run_id))
    }

    /// Events of one run in emission order.
    pub async fn get_run_events(&self, run_id: RunId) -> Result<Vec<FileEvent>, DaemonError> {
        self.get_run(run_id).await?;
        Ok(self.store.get_run_events(run_id).await?)
    }

    pub async fn get_tree(
        &self,
        prefix: Option<&str>,
        window: TreeWindow,
    ) -> Result<TreeView, DaemonError> {
        Ok(load_tree(&self.store, window, prefix).await?)
    }

    /// Events recorded for one file, newest first.
    pub async fn get_path_history(
        &self,
        path: &str,
        limit: u32,
    ) -> Result<Vec<FileEvent>, DaemonError> {
        match normalize_relative_path(path) {
            Some(path) => Ok(self.store.path_history(&path, limit).await?),
            None => Ok(Vec::new()),
        }
    }

    pub async fn list_recent_events(&self, limit: u32) -> Result<Vec<FileEvent>, DaemonError> {
        Ok(self.store.recent_events(limit).await?)
    }

    pub async fn store_info(&self) -> Result<StoreInfo, DaemonError> {
        Ok(self.store.info().await?)
    }

    /// Up to `limit` lines of the run's engine log, starting at line `since`.
    pub async fn read_run_log(
        &self,
        run_id: RunId,
        since: usize,
        limit: usize,
    ) -> Result<RunLog, DaemonError> {
        let run = self.get_run(run_id).await?;
        let contents = match &run.log_path {
            Some(path) => match tokio::fs::read_to_string(path).await {
                Ok(contents) => contents,
                Err(err) if err.kind() == std::io::ErrorKind::NotFound => String::new(),
                Err(err) => return Err(crate::error::io_err(path, err)),
            },
            None => String::new(),
        };

        let total = contents.lines().count();
        let lines: Vec<String> = contents
            .lines()
            .skip(since)
            .take(limit)
            .map(str::to_string)
            .collect();
        let next_line = since.min(total) + lines.len();
        Ok(RunLog {
            run_id,
            lines,
            next_line,
            complete: !run.is_active() && next_line >= total,
        })
    }

    // -- maintenance --------------------------------------------------------

    /// Delete finished runs older than `older_than`, their events and logs.
    pub async fn cleanup_old_runs(
        &self,
        older_than: chrono::Duration,
    ) -> Result<CleanupReport, DaemonError> {
        // A window reaching past the earliest representable time deletes nothing.
        let cutoff = Utc::now()
            .checked_sub_signed(older_than)
            .unwrap_or(DateTime::<Utc>::MIN_UTC);
        let report = self.store.cleanup_old_runs(cutoff).await?;
        remove_run_logs(&report.log_paths).await;
        Ok(report)
    }

    /// Forget every run and event. Refused while a run is in progress.
    pub async fn reset_history(&self) -> Result<CleanupReport, DaemonError> {
        if self.executor().is_busy() {
            return Err(self.busy());
        }
        let report = match self.store.reset().await {
            Ok(report) => report,
            Err(StoreError::RunAlreadyActive) => return Err(self.busy()),
            Err(err) => return Err(err.into()),
        };
        remove_run_logs(&report.log_paths).await;
        Ok(report)
    }

    /// Stop the timer, cancel an in-flight run, wait for its final status
    /// and close the store.
    pub async fn shutdown(&self) {
        self.scheduler.stop();
        if let Some(run_id) = self.cancel_current_run() {
            tracing::info!(run_id = %run_id, "waiting for cancelled run to finish");
            if tokio::time::timeout(SHUTDOWN_WAIT, self.executor().wait_until_idle())
                .await
                .is_err()
            {
                tracing::warn!(run_id = %run_id, "cancelled run did not finish in time");
            }
        }
        self.store.close().await;
    }
}

async fn remove_run_logs(paths: &[PathBuf]) {
    for path in paths {
        match tokio::fs::remove_file(path).await {
            Ok(()) => {}
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {}
            Err(err) => {
                tracing::warn!(path = %path.display(), error = %err, "could not remove run log")
            }
        }
    }
}

// ─── Tests ────────────────────────────────────────────────────────────────────
