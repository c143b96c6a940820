//! Recurring run scheduler.
//!
//! `stopped → running ⇄ paused`. While running, one timer task sleeps for a
//! jittered interval, hands the tick to a freshly spawned task and goes back
//! to sleep, so a slow run never delays the timer. Overlap is prevented by
//! the launcher: a tick that finds a run in progress gets [`SyncError::Busy`]
//! and is dropped.

use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use chrono::{DateTime, Utc};
use rand::Rng;
use serde::{Deserialize, Serialize};
use tokio::task::JoinHandle;

use mirrorsync_core::{RunId, ScheduleConfig, TriggerKind};
use mirrorsync_sync::{RunExecutor, SyncError};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SchedulerState {
    #[default]
    Stopped,
    Running,
    Paused,
}

/// Interval and jitter for one scheduler session.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScheduleParams {
    pub interval: Duration,
    pub jitter_fraction: f64,
}

impl From<&ScheduleConfig> for ScheduleParams {
    fn from(config: &ScheduleConfig) -> Self {
        Self {
            interval: Duration::from_secs(config.interval_secs.max(1)),
            jitter_fraction: config.jitter_fraction,
        }
    }
}

/// `base · (1 + u)` with `u` uniform in `[-f, f]` and `f` clamped to `[0, 1]`.
pub fn jittered_delay<R: Rng + ?Sized>(base: Duration, fraction: f64, rng: &mut R) -> Duration {
    let fraction = if fraction.is_finite() {
        fraction.clamp(0.0, 1.0)
    } else {
        0.0
    };
    if fraction == 0.0 {
        return base;
    }
    let offset: f64 = rng.gen_range(-fraction..=fraction);
    Duration::try_from_secs_f64(base.as_secs_f64() * (1.0 + offset)).unwrap_or(base)
}

// ---------------------------------------------------------------------------
// Launcher
// ---------------------------------------------------------------------------

/// Starts a run without waiting for it to finish.
pub trait Launcher: Clone + Send + Sync + 'static {
    fn launch(&self, trigger: TriggerKind)
        -> impl Future<Output = Result<RunId, SyncError>> + Send;
}

impl Launcher for RunExecutor {
    async fn launch(&self, trigger: TriggerKind) -> Result<RunId, SyncError> {
        let active = self.start(trigger).await?;
        let run_id = active.id();
        tokio::spawn(async move {
            match active.execute().await {
                Ok(run) => tracing::info!(
                    run_id = %run.id,
                    status = %run.status,
                    transferred = run.counters.files_transferred,
                    errors = run.counters.errors,
                    "run finished",
                ),
                Err(err) => tracing::error!(run_id = %run_id, error = %err, "run aborted"),
            }
        });
        Ok(run_id)
    }
}

// ---------------------------------------------------------------------------
// Scheduler
// ---------------------------------------------------------------------------

#[derive(Default)]
struct Core {
    state: SchedulerState,
    timer: Option<JoinHandle<()>>,
    next_tick_at: Option<DateTime<Utc>>,
}

/// Owned scheduler handle; clones share state.
#[derive(Clone)]
pub struct Scheduler<L: Launcher> {
    launcher: L,
    core: Arc<Mutex<Core>>,
}

impl<L: Launcher> Scheduler<L> {
    pub fn new(launcher: L) -> Self {
        Self {
            launcher,
            core: Arc::new(Mutex::new(Core::default())),
        }
    }

    pub fn launcher(&self) -> &L {
        &self.launcher
    }

    pub fn state(&self) -> SchedulerState {
        lock(&self.core).state
    }

    pub fn next_tick_at(&self) -> Option<DateTime<Utc>> {
        lock(&self.core).next_tick_at
    }

    /// From stopped or paused: schedule the first tick one jittered interval
    /// from now. Already running is a no-op. Must be called inside a tokio runtime.
    pub fn start(&self, params: ScheduleParams) -> SchedulerState {
        let mut core = lock(&self.core);
        if core.state == SchedulerState::Running {
            return core.state;
        }
        core.timer = Some(tokio::spawn(timer_loop(
            self.launcher.clone(),
            Arc::clone(&self.core),
            params,
        )));
        core.state = SchedulerState::Running;
        tracing::info!(
            interval_secs = params.interval.as_secs(),
            jitter_fraction = params.jitter_fraction,
            "scheduler started",
        );
        core.state
    }

    /// Running → paused. The pending tick is cancelled; an in-flight run is not.
    pub fn pause(&self) -> SchedulerState {
        let mut core = lock(&self.core);
        if core.state == SchedulerState::Running {
            cancel_timer(&mut core);
            core.state = SchedulerState::Paused;
            tracing::info!("scheduler paused");
        }
        core.state
    }

    /// Running or paused → stopped. An in-flight run is not terminated.
    pub fn stop(&self) -> SchedulerState {
        let mut core = lock(&self.core);
        if core.state != SchedulerState::Stopped {
            cancel_timer(&mut core);
            core.state = SchedulerState::Stopped;
            tracing::info!("scheduler stopped");
        }
        core.state
    }

    /// Start a manual run in any state. Fails fast with [`SyncError::Busy`].
    pub async fn trigger_now(&self) -> Result<RunId, SyncError> {
        self.launcher.launch(TriggerKind::Manual).await
    }
}

async fn timer_loop<L: Launcher>(launcher: L, core: Arc<Mutex<Core>>, params: ScheduleParams) {
    loop {
        let delay = jittered_delay(params.interval, params.jitter_fraction, &mut rand::thread_rng());
        let due = chrono::Duration::from_std(delay)
            .ok()
            .and_then(|d| Utc::now().checked_add_signed(d));
        lock(&core).next_tick_at = due;
        tracing::debug!(delay_secs = delay.as_secs_f64(), "next scheduled tick");

        tokio::time::sleep(delay).await;

        let launcher = launcher.clone();
        tokio::spawn(async move {
            match launcher.launch(TriggerKind::Scheduled).await {
                Ok(run_id) => tracing::info!(run_id = %run_id, "scheduled run started"),
                Err(SyncError::Busy) => {
                    tracing::info!("scheduled tick skipped: a run is still in progress")
                }
                Err(err) => tracing::error!(error = %err, "scheduled run could not start"),
            }
        });
    }
}

fn cancel_timer(core: &mut Core) {
    if let Some(timer) = core.timer.take() {
        timer.abort();
    }
    core.next_tick_at = None;
}

fn lock(core: &Mutex<Core>) -> MutexGuard<'_, Core> {
    core.lock().unwrap_or_else(|e| e.into_inner())
}

// ─── Tests ────────────────────────────────────────────────────────────────────
