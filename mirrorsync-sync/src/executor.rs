//! Run executor.
//!
//! One [`RunExecutor`] is shared by the scheduler and manual triggers. A run
//! is split in two steps so callers can learn the run id before the engine
//! finishes:
//!
//! 1. [`RunExecutor::start`] takes the single-flight lock, reads the
//!    configuration, resolves secrets and creates the `running` row.
//! 2. [`ActiveRun::execute`] launches the engine, streams its output through
//!    the parser into the store, and writes the terminal status.
//!
//! The lock is released when the [`ActiveRun`] is dropped, after the terminal
//! status has been written. While the lock is held, no other `running` row
//! can belong to a live run, so `start` finalises any it finds.

use std::collections::{BTreeMap, VecDeque};
use std::path::PathBuf;
use std::process::ExitStatus;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use nix::sys::signal::{kill, Signal};
use nix::unistd::Pid;
use tokio::fs::File;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, BufWriter};
use tokio::process::{Child, ChildStderr};
use tokio::sync::{watch, Notify};
use tracing::{debug, error, info, warn};

use mirrorsync_core::{
    ConfigProvider, ConflictScope, ErrorCategory, EventKind, NewFileEvent, Run, RunCounters,
    RunId, RunStatus, SyncConfiguration, TriggerKind,
};
use mirrorsync_store::{RunCompletion, Store, StoreError};

use crate::classify::classify;
use crate::command::engine_command;
use crate::conflict::{next_conflict_name, resolve, ListingEntry, Resolution, SourceIdentity};
use crate::error::SyncError;
use crate::flight::{FlightGuard, SingleFlight};
use crate::listing::{DestinationLister, ListingCache};
use crate::parser::{parse_line, ParsedEvent, ParsedLine};
use crate::secrets::{resolve_env, SecretStore};

/// Engine stderr lines kept for exit classification.
const STDERR_TAIL: usize = 50;

/// How long to wait for the stderr reader once the engine has exited.
const STDERR_DRAIN_TIMEOUT: Duration = Duration::from_secs(5);

/// Attempts at writing a terminal status before giving up.
const FINISH_ATTEMPTS: u32 = 6;

/// First delay between finish attempts; doubles after each failure.
const FINISH_BACKOFF: Duration = Duration::from_millis(250);

// ---------------------------------------------------------------------------
// Executor
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
struct CancelHandle {
    run_id: RunId,
    notify: Arc<Notify>,
}

/// Owns the single-flight lock and everything a run needs.
#[derive(Clone)]
pub struct RunExecutor {
    store: Store,
    config: Arc<dyn ConfigProvider>,
    secrets: Arc<dyn SecretStore>,
    flight: SingleFlight,
    run_log_dir: Option<PathBuf>,
    current: Arc<watch::Sender<Option<CancelHandle>>>,
}

impl RunExecutor {
    pub fn new(
        store: Store,
        config: Arc<dyn ConfigProvider>,
        secrets: Arc<dyn SecretStore>,
    ) -> Self {
        Self {
            store,
            config,
            secrets,
            flight: SingleFlight::new(),
            run_log_dir: None,
            current: Arc::new(watch::channel(None).0),
        }
    }

    /// Tee engine output into `<dir>/run-<id>.log`.
    pub fn with_run_log_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.run_log_dir = Some(dir.into());
        self
    }

    pub fn store(&self) -> &Store {
        &self.store
    }

    pub fn is_busy(&self) -> bool {
        self.flight.is_busy()
    }

    /// Id of the run currently executing, if any.
    pub fn current_run(&self) -> Option<RunId> {
        Option::as_ref(&self.current.borrow()).map(|h| h.run_id)
    }

    /// Resolves once no run is executing.
    pub async fn wait_until_idle(&self) {
        let mut rx = self.current.subscribe();
        // The sender lives in `self`, so this only returns once idle.
        let _ = rx.wait_for(Option::is_none).await;
    }

    /// Start and drive a run to completion.
    pub async fn run(&self, trigger: TriggerKind) -> Result<Run, SyncError> {
        self.start(trigger).await?.execute().await
    }

    /// Take the lock and create the `running` row. Fails fast with
    /// [`SyncError::Busy`] when another run holds the lock.
    pub async fn start(&self, trigger: TriggerKind) -> Result<ActiveRun, SyncError> {
        let guard = self.flight.try_acquire()?;

        for orphan in self.store.recover_interrupted_runs(Utc::now()).await? {
            warn!("run {} never recorded a final status; marked interrupted", orphan);
        }

        // Configuration is read fresh for every run.
        let plan = self
            .config
            .load()
            .map_err(|e| e.to_string())
            .and_then(|config| {
                config.validate().map_err(|e| e.to_string())?;
                let env = resolve_env(&config.engine_env, self.secrets.as_ref())
                    .map_err(|e| e.to_string())?;
                Ok(RunPlan { config, env })
            });
        let lightweight = plan
            .as_ref()
            .map(|p| p.config.lightweight_events)
            .unwrap_or(false);

        let run = self
            .store
            .create_run(trigger, Utc::now(), lightweight)
            .await
            .map_err(|e| match e {
                StoreError::RunAlreadyActive => SyncError::Busy,
                other => SyncError::Store(other),
            })?;

        let log_path = self
            .run_log_dir
            .as_ref()
            .map(|dir| dir.join(format!("run-{}.log", run.id)));
        if let Some(path) = &log_path {
            if let Err(e) = self.store.set_log_path(run.id, path).await {
                let completion = RunCompletion {
                    status: RunStatus::Failed,
                    counters: RunCounters::default(),
                    exit_code: None,
                    error_category: None,
                    error_message: Some(format!("run aborted: {e}")),
                    ended_at: Utc::now(),
                };
                if let Err(finish) = finish_with_retry(&self.store, run.id, &completion).await {
                    error!("run {}: could not record abort: {}", run.id, finish);
                }
                return Err(e.into());
            }
        }

        let notify = Arc::new(Notify::new());
        self.current.send_replace(Some(CancelHandle {
            run_id: run.id,
            notify: Arc::clone(&notify),
        }));
        info!("run {} started ({} trigger)", run.id, trigger);

        Ok(ActiveRun {
            run,
            plan,
            log_path,
            store: self.store.clone(),
            current: Arc::clone(&self.current),
            cancel: notify,
            _guard: guard,
        })
    }

    /// Ask the active run to terminate. Returns its id, or `None` when idle.
    pub fn cancel_current(&self) -> Option<RunId> {
        let handle = Option::clone(&self.current.borrow())?;
        info!("cancellation requested for run {}", handle.run_id);
        handle.notify.notify_one();
        Some(handle.run_id)
    }
}

struct RunPlan {
    config: SyncConfiguration,
    env: BTreeMap<String, String>,
}

// ---------------------------------------------------------------------------
// Active run
// ---------------------------------------------------------------------------

/// A created run that holds the single-flight lock until dropped.
pub struct ActiveRun {
    run: Run,
    /// `Err` carries a launch-time problem (bad config or secret).
    plan: Result<RunPlan, String>,
    log_path: Option<PathBuf>,
    store: Store,
    current: Arc<watch::Sender<Option<CancelHandle>>>,
    cancel: Arc<Notify>,
    _guard: FlightGuard,
}

/// Mutable state threaded through one run.
struct RunState {
    counters: RunCounters,
    diagnostics: Vec<String>,
    listings: ListingCache,
    lister: DestinationLister,
    scope: ConflictScope,
    lightweight: bool,
}

impl ActiveRun {
    pub fn id(&self) -> RunId {
        self.run.id
    }

    pub fn run(&self) -> &Run {
        &self.run
    }

    /// Drive the engine to completion and return the finished run.
    pub async fn execute(self) -> Result<Run, SyncError> {
        self.drive().await
    }

    async fn drive(&self) -> Result<Run, SyncError> {
        let plan = match &self.plan {
            Ok(plan) => plan,
            Err(problem) => return self.finish_launch_error(problem.clone()).await,
        };

        let mut child = match engine_command(&plan.config, &plan.env).spawn() {
            Ok(child) => child,
            Err(e) => {
                let message = format!(
                    "failed to launch {}: {}",
                    plan.config.engine_binary.display(),
                    e
                );
                return self.finish_launch_error(message).await;
            }
        };
        debug!("run {}: engine pid {:?}", self.run.id, child.id());

        let (Some(stdout), Some(stderr)) = (child.stdout.take(), child.stderr.take()) else {
            let _ = child.kill().await;
            return self
                .finish_launch_error("engine output streams were not captured".to_string())
                .await;
        };
        let stderr_task = tokio::spawn(drain_stderr(self.run.id, stderr));

        let mut log = self.open_run_log().await;
        let mut state = RunState {
            counters: RunCounters::default(),
            diagnostics: Vec::new(),
            listings: ListingCache::new(),
            lister: DestinationLister::for_config(&plan.config, &plan.env),
            scope: plan.config.conflict_scope,
            lightweight: plan.config.lightweight_events,
        };

        let mut lines = BufReader::new(stdout).lines();
        let mut cancelled = false;
        loop {
            tokio::select! {
                _ = self.cancel.notified() => {
                    cancelled = true;
                    break;
                }
                next = lines.next_line() => match next {
                    Ok(Some(line)) => {
                        write_log_line(&mut log, &line).await;
                        if let Err(e) = self.handle_line(&line, &mut state).await {
                            return Err(self.abort(&mut child, &state, e).await);
                        }
                    }
                    Ok(None) => break,
                    Err(e) => {
                        warn!("run {}: reading engine output failed: {}", self.run.id, e);
                        break;
                    }
                },
            }
        }

        let exit = if cancelled {
            None
        } else {
            tokio::select! {
                _ = self.cancel.notified() => {
                    cancelled = true;
                    None
                }
                status = child.wait() => Some(status),
            }
        };
        let exit_status = match exit {
            Some(Ok(status)) => Some(status),
            Some(Err(e)) => {
                warn!("run {}: waiting for engine failed: {}", self.run.id, e);
                None
            }
            None => terminate(&mut child, plan.config.cancel_grace_secs).await,
        };

        if let Some(mut writer) = log.take() {
            if let Err(e) = writer.flush().await {
                warn!("run {}: flushing run log failed: {}", self.run.id, e);
            }
        }

        let stderr_tail = match tokio::time::timeout(STDERR_DRAIN_TIMEOUT, stderr_task).await {
            Ok(Ok(tail)) => tail,
            _ => Vec::new(),
        };

        let exit_code = exit_status.and_then(|s| s.code());
        let completion = if cancelled {
            RunCompletion {
                status: RunStatus::Failed,
                counters: state.counters,
                exit_code,
                error_category: Some(ErrorCategory::Cancelled),
                error_message: Some("run cancelled by request".to_string()),
                ended_at: Utc::now(),
            }
        } else {
            let mut diagnostics = state.diagnostics;
            diagnostics.extend(stderr_tail);
            let verdict = classify(exit_code, &state.counters, &diagnostics);
            RunCompletion {
                status: verdict.status,
                counters: state.counters,
                exit_code,
                error_category: verdict.category,
                error_message: verdict.message,
                ended_at: Utc::now(),
            }
        };

        let run = finish_with_retry(&self.store, self.run.id, &completion).await?;
        info!(
            "run {} finished: {} ({} transferred, {} skipped, {} errors, {} conflicts)",
            run.id,
            run.status,
            run.counters.files_transferred,
            run.counters.files_skipped,
            run.counters.errors,
            run.counters.conflicts
        );
        Ok(run)
    }

    async fn handle_line(&self, line: &str, state: &mut RunState) -> Result<(), SyncError> {
        match parse_line(line) {
            ParsedLine::Event(event) => self.record_event(event, state).await,
            ParsedLine::Stats(stats) => {
                debug!(
                    "run {}: engine stats {} transfers, {} bytes, {} errors",
                    self.run.id, stats.transfers, stats.bytes, stats.errors
                );
                Ok(())
            }
            ParsedLine::Message { level, msg } => {
                if matches!(level.as_str(), "error" | "critical" | "emergency" | "alert") {
                    warn!("run {}: engine error: {}", self.run.id, msg);
                    state.diagnostics.push(msg);
                }
                Ok(())
            }
            ParsedLine::Ignored => Ok(()),
            ParsedLine::Malformed(reason) => {
                state.counters.parse_warnings += 1;
                warn!(
                    "run {}: skipping unparseable engine line ({}): {}",
                    self.run.id, reason, line
                );
                self.store
                    .update_counters(self.run.id, &state.counters)
                    .await?;
                Ok(())
            }
        }
    }

    async fn record_event(&self, event: ParsedEvent, state: &mut RunState) -> Result<(), SyncError> {
        let mut kind = event.action.event_kind();
        let mut detail = None;
        let mut conflict_name = None;

        if kind == EventKind::Error {
            state.diagnostics.push(event.message.clone());
            detail = Some(event.message.clone());
        }

        let wants_resolution = kind == EventKind::Conflict
            || (kind == EventKind::Updated && state.scope == ConflictScope::Replacements);
        if wants_resolution {
            let (resolved_kind, name, note) = resolve_conflict(&event, kind, state).await;
            kind = resolved_kind;
            conflict_name = name;
            detail = note.or(detail);
        }

        state.counters.record(kind, event.size);
        if state.lightweight {
            self.store
                .update_counters(self.run.id, &state.counters)
                .await?;
        } else {
            let new_event = NewFileEvent {
                path: event.path,
                kind,
                size: event.size,
                detail,
                conflict_name,
                observed_at: event.time.unwrap_or_else(Utc::now),
            };
            self.store
                .record_event(self.run.id, &new_event, &state.counters)
                .await?;
        }
        Ok(())
    }

    async fn finish_launch_error(&self, message: String) -> Result<Run, SyncError> {
        error!("run {} could not launch the engine: {}", self.run.id, message);
        let completion = RunCompletion {
            status: RunStatus::Failed,
            counters: RunCounters::default(),
            exit_code: None,
            error_category: Some(ErrorCategory::LaunchError),
            error_message: Some(message),
            ended_at: Utc::now(),
        };
        Ok(finish_with_retry(&self.store, self.run.id, &completion).await?)
    }

    /// Kill the engine after a store failure and try to close the run.
    async fn abort(&self, child: &mut Child, state: &RunState, cause: SyncError) -> SyncError {
        error!("run {} aborted: {}", self.run.id, cause);
        if let Err(e) = child.kill().await {
            warn!("run {}: killing engine failed: {}", self.run.id, e);
        }
        let completion = RunCompletion {
            status: RunStatus::Failed,
            counters: state.counters,
            exit_code: None,
            error_category: None,
            error_message: Some(format!("run aborted: {cause}")),
            ended_at: Utc::now(),
        };
        if let Err(e) = finish_with_retry(&self.store, self.run.id, &completion).await {
            error!("run {}: could not record abort: {}", self.run.id, e);
        }
        cause
    }

    async fn open_run_log(&self) -> Option<BufWriter<File>> {
        let path = self.log_path.as_ref()?;
        if let Some(parent) = path.parent() {
            if let Err(e) = tokio::fs::create_dir_all(parent).await {
                warn!("cannot create run log dir {}: {}", parent.display(), e);
                return None;
            }
        }
        match File::create(path).await {
            Ok(file) => Some(BufWriter::new(file)),
            Err(e) => {
                warn!("cannot create run log {}: {}", path.display(), e);
                None
            }
        }
    }
}

impl Drop for ActiveRun {
    fn drop(&mut self) {
        let id = self.run.id;
        self.current.send_if_modified(|slot| {
            if slot.as_ref().map(|h| h.run_id) == Some(id) {
                *slot = None;
                true
            } else {
                false
            }
        });
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

/// Write the terminal status, retrying transient database failures with a
/// doubling backoff. The caller still holds the single-flight lock.
async fn finish_with_retry(
    store: &Store,
    run_id: RunId,
    completion: &RunCompletion,
) -> Result<Run, StoreError> {
    let mut delay = FINISH_BACKOFF;
    let mut attempt = 1;
    loop {
        match store.finish_run(run_id, completion).await {
            Ok(run) => return Ok(run),
            // An earlier attempt committed but failed reading the row back.
            Err(StoreError::RunFinished(id)) if attempt > 1 => {
                return store.get_run(id).await?.ok_or(StoreError::RunNotFound(id));
            }
            Err(StoreError::Database(e)) if attempt < FINISH_ATTEMPTS => {
                warn!(
                    "run {}: recording final status failed (attempt {}/{}): {}",
                    run_id, attempt, FINISH_ATTEMPTS, e
                );
                tokio::time::sleep(delay).await;
                delay *= 2;
                attempt += 1;
            }
            Err(e) => return Err(e),
        }
    }
}

/// Apply the conflict resolver to one event. Returns the kind to record, the
/// pending-review path and a detail note.
async fn resolve_conflict(
    event: &ParsedEvent,
    kind: EventKind,
    state: &mut RunState,
) -> (EventKind, Option<String>, Option<String>) {
    let (dir, leaf) = match event.path.rsplit_once('/') {
        Some((dir, leaf)) => (dir, leaf),
        None => ("", event.path.as_str()),
    };
    // The log timestamp is when the engine acted, not the source mtime.
    let source = SourceIdentity {
        size: event.size,
        modified: None,
    };

    let siblings = state.listings.siblings(&state.lister, dir).await;
    let resolution = if kind == EventKind::Updated {
        // The engine overwrote the destination, so it existed and differed.
        next_conflict_name(leaf, &source, siblings)
    } else {
        resolve(leaf, &source, false, siblings)
    };

    let join = |name: &str| {
        if dir.is_empty() {
            name.to_string()
        } else {
            format!("{dir}/{name}")
        }
    };

    match resolution {
        Resolution::Renamed(name) => {
            let path = join(&name);
            state.listings.claim(
                dir,
                ListingEntry {
                    name,
                    size: event.size,
                    modified: None,
                    is_dir: false,
                },
            );
            (
                EventKind::Conflict,
                Some(path.clone()),
                Some(format!("pending review as {path}: {}", event.message)),
            )
        }
        Resolution::AlreadyResolved(name) => {
            let path = join(&name);
            (
                EventKind::Skipped,
                Some(path.clone()),
                Some(format!("already resolved as {path}")),
            )
        }
        Resolution::UpToDate if kind == EventKind::Conflict => (
            EventKind::Skipped,
            None,
            Some("destination already up to date".to_string()),
        ),
        Resolution::UpToDate | Resolution::Available(_) | Resolution::NotApplicable => {
            (kind, None, Some(event.message.clone()))
        }
    }
}

async fn drain_stderr(run_id: RunId, stderr: ChildStderr) -> Vec<String> {
    let mut tail = VecDeque::with_capacity(STDERR_TAIL);
    let mut lines = BufReader::new(stderr).lines();
    loop {
        match lines.next_line().await {
            Ok(Some(line)) => {
                if line.trim().is_empty() {
                    continue;
                }
                warn!(target: "engine", "run {}: {}", run_id, line);
                if tail.len() == STDERR_TAIL {
                    tail.pop_front();
                }
                tail.push_back(line);
            }
            Ok(None) => break,
            Err(e) => {
                warn!("run {}: reading engine stderr failed: {}", run_id, e);
                break;
            }
        }
    }
    tail.into()
}

async fn write_log_line(log: &mut Option<BufWriter<File>>, line: &str) {
    let Some(writer) = log.as_mut() else {
        return;
    };
    let result = async {
        writer.write_all(line.as_bytes()).await?;
        writer.write_all(b"\n").await
    }
    .await;
    if let Err(e) = result {
        warn!("run log write failed, disabling run log: {}", e);
        *log = None;
    }
}

/// SIGTERM, wait up to `grace_secs`, then SIGKILL.
async fn terminate(child: &mut Child, grace_secs: u64) -> Option<ExitStatus> {
    if let Some(raw) = child.id().and_then(|pid| i32::try_from(pid).ok()) {
        if let Err(e) = kill(Pid::from_raw(raw), Signal::SIGTERM) {
            warn!("sending SIGTERM to engine pid {} failed: {}", raw, e);
        }
    }

    match tokio::time::timeout(Duration::from_secs(grace_secs), child.wait()).await {
        Ok(Ok(status)) => Some(status),
        Ok(Err(e)) => {
            warn!("waiting for terminated engine failed: {}", e);
            None
        }
        Err(_) => {
            warn!("engine ignored SIGTERM for {}s, killing", grace_secs);
            if let Err(e) = child.kill().await {
                warn!("killing engine failed: {}", e);
            }
            child.wait().await.ok()
        }
    }
}
