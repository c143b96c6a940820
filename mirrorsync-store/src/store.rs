//! SQLite-backed persistence for runs and file events.
//!
//! Timestamps are stored as RFC 3339 TEXT with microsecond precision so
//! lexical order matches chronological order. Enums are stored as their
//! `as_str()` names. A partial unique index on `runs(status)` guarantees at
//! most one row is ever `running`.

use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use sqlx::sqlite::{
    SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions, SqliteRow,
};
use sqlx::{QueryBuilder, Row, Sqlite};
use tracing::{debug, info};

use mirrorsync_core::{
    ErrorCategory, EventKind, FileEvent, NewFileEvent, Run, RunCounters, RunId, RunStatus,
    TriggerKind,
};

use crate::error::StoreError;

const RUN_COLUMNS: &str = "id, trigger_kind, status, started_at, ended_at, \
     files_transferred, bytes_transferred, files_skipped, files_deleted, errors, conflicts, \
     parse_warnings, exit_code, error_category, error_message, lightweight, log_path";

const EVENT_COLUMNS: &str =
    "id, run_id, path, kind, size, detail, conflict_name, observed_at";

// ---------------------------------------------------------------------------
// Public value types
// ---------------------------------------------------------------------------

/// Terminal fields written once when a run ends.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunCompletion {
    pub status: RunStatus,
    pub counters: RunCounters,
    pub exit_code: Option<i32>,
    pub error_category: Option<ErrorCategory>,
    pub error_message: Option<String>,
    pub ended_at: DateTime<Utc>,
}

/// What `cleanup_old_runs` removed.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CleanupReport {
    pub runs_deleted: u64,
    pub events_deleted: u64,
    /// Per-run log files belonging to the deleted runs; the caller removes them.
    #[serde(default)]
    pub log_paths: Vec<PathBuf>,
}

/// Row counts and location of the database.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoreInfo {
    pub location: String,
    pub runs: u64,
    pub events: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub oldest_run_at: Option<DateTime<Utc>>,
}

// ---------------------------------------------------------------------------
// Store
// ---------------------------------------------------------------------------

/// Durable record of runs and their file events.
///
/// Cheap to clone; clones share one connection pool.
#[derive(Debug, Clone)]
pub struct Store {
    pool: SqlitePool,
    location: String,
}

impl Store {
    /// Open (creating if needed) the database file at `path`.
    pub async fn open(path: &Path) -> Result<Self, StoreError> {
        let options = SqliteConnectOptions::new()
            .filename(path)
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .foreign_keys(true)
            .busy_timeout(Duration::from_secs(5));
        let pool = SqlitePoolOptions::new()
            .max_connections(4)
            .connect_with(options)
            .await?;

        let store = Self {
            pool,
            location: path.display().to_string(),
        };
        store.initialize_tables().await?;
        info!(path = %path.display(), "opened run store");
        Ok(store)
    }

    /// Private in-memory database, used by tests and dry tooling.
    pub async fn in_memory() -> Result<Self, StoreError> {
        let options = SqliteConnectOptions::from_str("sqlite::memory:")?.foreign_keys(true);
        // One connection that never recycles, or the database vanishes.
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect_with(options)
            .await?;

        let store = Self {
            pool,
            location: ":memory:".to_string(),
        };
        store.initialize_tables().await?;
        Ok(store)
    }

    async fn initialize_tables(&self) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS runs (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                trigger_kind TEXT NOT NULL,
                status TEXT NOT NULL,
                started_at TEXT NOT NULL,
                ended_at TEXT,
                files_transferred INTEGER NOT NULL DEFAULT 0,
                bytes_transferred INTEGER NOT NULL DEFAULT 0,
                files_skipped INTEGER NOT NULL DEFAULT 0,
                files_deleted INTEGER NOT NULL DEFAULT 0,
                errors INTEGER NOT NULL DEFAULT 0,
                conflicts INTEGER NOT NULL DEFAULT 0,
                parse_warnings INTEGER NOT NULL DEFAULT 0,
                exit_code INTEGER,
                error_category TEXT,
                error_message TEXT,
                lightweight INTEGER NOT NULL DEFAULT 0,
                log_path TEXT
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE UNIQUE INDEX IF NOT EXISTS idx_runs_single_running
            ON runs(status) WHERE status = 'running'
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query("CREATE INDEX IF NOT EXISTS idx_runs_started ON runs(started_at)")
            .execute(&self.pool)
            .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS file_events (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                run_id INTEGER NOT NULL REFERENCES runs(id) ON DELETE CASCADE,
                path TEXT NOT NULL,
                kind TEXT NOT NULL,
                size INTEGER,
                detail TEXT,
                conflict_name TEXT,
                observed_at TEXT NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_file_events_run_path ON file_events(run_id, path)",
        )
        .execute(&self.pool)
        .await?;

        sqlx::query("CREATE INDEX IF NOT EXISTS idx_file_events_path ON file_events(path)")
            .execute(&self.pool)
            .await?;

        Ok(())
    }

    // -----------------------------------------------------------------------
    // Run lifecycle
    // -----------------------------------------------------------------------

    /// Insert a new `running` row. Fails with `RunAlreadyActive` when another
    /// run has not finished yet.
    pub async fn create_run(
        &self,
        trigger: TriggerKind,
        started_at: DateTime<Utc>,
        lightweight: bool,
    ) -> Result<Run, StoreError> {
        let result = sqlx::query(
            "INSERT INTO runs (trigger_kind, status, started_at, lightweight) VALUES (?, 'running', ?, ?)",
        )
        .bind(trigger.as_str())
        .bind(format_ts(started_at))
        .bind(lightweight)
        .execute(&self.pool)
        .await;

        let id = match result {
            Ok(done) => RunId(done.last_insert_rowid()),
            Err(sqlx::Error::Database(db)) if db.is_unique_violation() => {
                return Err(StoreError::RunAlreadyActive)
            }
            Err(e) => return Err(e.into()),
        };
        debug!(run_id = %id, trigger = %trigger, "created run");
        self.require_run(id).await
    }

    pub async fn set_log_path(&self, id: RunId, log_path: &Path) -> Result<(), StoreError> {
        sqlx::query("UPDATE runs SET log_path = ? WHERE id = ?")
            .bind(log_path.display().to_string())
            .bind(id.0)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// Persist one event together with the run's updated counters, atomically.
    pub async fn record_event(
        &self,
        run_id: RunId,
        event: &NewFileEvent,
        counters: &RunCounters,
    ) -> Result<i64, StoreError> {
        let mut tx = self.pool.begin().await?;

        let updated = bind_counters(
            sqlx::query(
                "UPDATE runs SET files_transferred = ?, bytes_transferred = ?, files_skipped = ?, \
                 files_deleted = ?, errors = ?, conflicts = ?, parse_warnings = ? \
                 WHERE id = ? AND ended_at IS NULL",
            ),
            counters,
        )
        .bind(run_id.0)
        .execute(&mut *tx)
        .await?;
        if updated.rows_affected() == 0 {
            tx.rollback().await?;
            return Err(self.finished_or_missing(run_id).await);
        }

        let inserted = sqlx::query(
            "INSERT INTO file_events (run_id, path, kind, size, detail, conflict_name, observed_at) \
             VALUES (?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(run_id.0)
        .bind(&event.path)
        .bind(event.kind.as_str())
        .bind(event.size.map(to_i64))
        .bind(event.detail.as_deref())
        .bind(event.conflict_name.as_deref())
        .bind(format_ts(event.observed_at))
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(inserted.last_insert_rowid())
    }

    /// Overwrite the run's counters without adding an event (lightweight runs,
    /// parse warnings).
    pub async fn update_counters(
        &self,
        run_id: RunId,
        counters: &RunCounters,
    ) -> Result<(), StoreError> {
        let updated = bind_counters(
            sqlx::query(
                "UPDATE runs SET files_transferred = ?, bytes_transferred = ?, files_skipped = ?, \
                 files_deleted = ?, errors = ?, conflicts = ?, parse_warnings = ? \
                 WHERE id = ? AND ended_at IS NULL",
            ),
            counters,
        )
        .bind(run_id.0)
        .execute(&self.pool)
        .await?;
        if updated.rows_affected() == 0 {
            return Err(self.finished_or_missing(run_id).await);
        }
        Ok(())
    }

    /// Write the terminal status. A run is finished exactly once.
    pub async fn finish_run(
        &self,
        run_id: RunId,
        completion: &RunCompletion,
    ) -> Result<Run, StoreError> {
        let updated = bind_counters(
            sqlx::query(
                "UPDATE runs SET files_transferred = ?, bytes_transferred = ?, files_skipped = ?, \
                 files_deleted = ?, errors = ?, conflicts = ?, parse_warnings = ?, \
                 status = ?, ended_at = ?, exit_code = ?, error_category = ?, error_message = ? \
                 WHERE id = ? AND ended_at IS NULL",
            ),
            &completion.counters,
        )
        .bind(completion.status.as_str())
        .bind(format_ts(completion.ended_at))
        .bind(completion.exit_code)
        .bind(completion.error_category.map(|c| c.as_str()))
        .bind(completion.error_message.as_deref())
        .bind(run_id.0)
        .execute(&self.pool)
        .await?;
        if updated.rows_affected() == 0 {
            return Err(self.finished_or_missing(run_id).await);
        }
        info!(
            run_id = %run_id,
            status = %completion.status,
            transferred = completion.counters.files_transferred,
            errors = completion.counters.errors,
            "run finished"
        );
        self.require_run(run_id).await
    }

    /// Mark every `running` row as failed/interrupted. Only safe while no run
    /// is executing: at daemon startup and under the single-flight lock.
    pub async fn recover_interrupted_runs(
        &self,
        now: DateTime<Utc>,
    ) -> Result<Vec<RunId>, StoreError> {
        let rows = sqlx::query("SELECT id FROM runs WHERE status = 'running'")
            .fetch_all(&self.pool)
            .await?;
        let ids: Vec<RunId> = rows
            .iter()
            .map(|row| row.try_get::<i64, _>("id").map(RunId))
            .collect::<Result<_, _>>()?;

        if !ids.is_empty() {
            sqlx::query(
                "UPDATE runs SET status = 'failed', ended_at = ?, error_category = ?, \
                 error_message = 'run ended without recording a final status' \
                 WHERE status = 'running'",
            )
            .bind(format_ts(now))
            .bind(ErrorCategory::Interrupted.as_str())
            .execute(&self.pool)
            .await?;
            info!(count = ids.len(), "marked interrupted runs as failed");
        }
        Ok(ids)
    }

    // -----------------------------------------------------------------------
    // Run queries
    // -----------------------------------------------------------------------

    pub async fn get_run(&self, id: RunId) -> Result<Option<Run>, StoreError> {
        let row = sqlx::query(&format!("SELECT {RUN_COLUMNS} FROM runs WHERE id = ?"))
            .bind(id.0)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(run_from_row).transpose()
    }

    /// The run currently in progress, if any.
    pub async fn active_run(&self) -> Result<Option<Run>, StoreError> {
        let row = sqlx::query(&format!(
            "SELECT {RUN_COLUMNS} FROM runs WHERE status = 'running' LIMIT 1"
        ))
        .fetch_optional(&self.pool)
        .await?;
        row.as_ref().map(run_from_row).transpose()
    }

    /// Most recently finished run.
    pub async fn latest_finished_run(&self) -> Result<Option<Run>, StoreError> {
        let row = sqlx::query(&format!(
            "SELECT {RUN_COLUMNS} FROM runs WHERE ended_at IS NOT NULL \
             ORDER BY started_at DESC, id DESC LIMIT 1"
        ))
        .fetch_optional(&self.pool)
        .await?;
        row.as_ref().map(run_from_row).transpose()
    }

    /// Newest run that says something about files: it recorded file events,
    /// or it is a lightweight run with nonzero counters. Idle ticks, failed
    /// launches and empty cancellations are passed over.
    pub async fn latest_run_with_file_activity(&self) -> Result<Option<Run>, StoreError> {
        let row = sqlx::query(&format!(
            "SELECT {RUN_COLUMNS} FROM runs \
             WHERE EXISTS (SELECT 1 FROM file_events e WHERE e.run_id = runs.id) \
                OR (lightweight = 1 AND files_transferred + files_skipped + files_deleted \
                    + errors + conflicts > 0) \
             ORDER BY started_at DESC, id DESC LIMIT 1"
        ))
        .fetch_optional(&self.pool)
        .await?;
        row.as_ref().map(run_from_row).transpose()
    }

    /// Runs ordered newest first.
    pub async fn list_runs(&self, limit: u32, offset: u32) -> Result<Vec<Run>, StoreError> {
        let rows = sqlx::query(&format!(
            "SELECT {RUN_COLUMNS} FROM runs ORDER BY started_at DESC, id DESC LIMIT ? OFFSET ?"
        ))
        .bind(i64::from(limit))
        .bind(i64::from(offset))
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(run_from_row).collect()
    }

    /// The `n` most recently started runs that have finished, newest first.
    pub async fn recent_finished_runs(&self, n: u32) -> Result<Vec<Run>, StoreError> {
        let rows = sqlx::query(&format!(
            "SELECT {RUN_COLUMNS} FROM runs WHERE ended_at IS NOT NULL \
             ORDER BY started_at DESC, id DESC LIMIT ?"
        ))
        .bind(i64::from(n))
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(run_from_row).collect()
    }

    // -----------------------------------------------------------------------
    // Event queries
    // -----------------------------------------------------------------------

    /// Events of one run in emission order.
    pub async fn get_run_events(&self, run_id: RunId) -> Result<Vec<FileEvent>, StoreError> {
        let rows = sqlx::query(&format!(
            "SELECT {EVENT_COLUMNS} FROM file_events WHERE run_id = ? ORDER BY id ASC"
        ))
        .bind(run_id.0)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(event_from_row).collect()
    }

    /// Events of the given runs, optionally restricted to `prefix` and its
    /// descendants. Ordered by run then emission order.
    pub async fn events_for_runs(
        &self,
        run_ids: &[RunId],
        prefix: Option<&str>,
    ) -> Result<Vec<FileEvent>, StoreError> {
        if run_ids.is_empty() {
            return Ok(Vec::new());
        }

        let mut qb: QueryBuilder<Sqlite> = QueryBuilder::new(format!(
            "SELECT {EVENT_COLUMNS} FROM file_events WHERE run_id IN ("
        ));
        let mut separated = qb.separated(", ");
        for id in run_ids {
            separated.push_bind(id.0);
        }
        separated.push_unseparated(")");

        if let Some(prefix) = prefix.filter(|p| !p.is_empty()) {
            qb.push(" AND (path = ");
            qb.push_bind(prefix.to_string());
            qb.push(" OR path LIKE ");
            qb.push_bind(format!("{}/%", escape_like(prefix)));
            qb.push(" ESCAPE '\\')");
        }
        qb.push(" ORDER BY run_id ASC, id ASC");

        let rows = qb.build().fetch_all(&self.pool).await?;
        rows.iter().map(event_from_row).collect()
    }

    /// All recorded events for one path, newest first.
    pub async fn path_history(
        &self,
        path: &str,
        limit: u32,
    ) -> Result<Vec<FileEvent>, StoreError> {
        let rows = sqlx::query(&format!(
            "SELECT {EVENT_COLUMNS} FROM file_events WHERE path = ? ORDER BY id DESC LIMIT ?"
        ))
        .bind(path)
        .bind(i64::from(limit))
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(event_from_row).collect()
    }

    /// Latest events across all runs, newest first.
    pub async fn recent_events(&self, limit: u32) -> Result<Vec<FileEvent>, StoreError> {
        let rows = sqlx::query(&format!(
            "SELECT {EVENT_COLUMNS} FROM file_events ORDER BY id DESC LIMIT ?"
        ))
        .bind(i64::from(limit))
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(event_from_row).collect()
    }

    // -----------------------------------------------------------------------
    // Maintenance
    // -----------------------------------------------------------------------

    /// Delete finished runs that started before `older_than`, with their events.
    /// The active run is never touched.
    pub async fn cleanup_old_runs(
        &self,
        older_than: DateTime<Utc>,
    ) -> Result<CleanupReport, StoreError> {
        let cutoff = format_ts(older_than);
        let mut tx = self.pool.begin().await?;

        let rows = sqlx::query(
            "SELECT log_path FROM runs WHERE started_at < ? AND ended_at IS NOT NULL \
             AND log_path IS NOT NULL",
        )
        .bind(&cutoff)
        .fetch_all(&mut *tx)
        .await?;
        let log_paths = rows
            .iter()
            .map(|row| row.try_get::<String, _>("log_path").map(PathBuf::from))
            .collect::<Result<Vec<_>, _>>()?;

        let events = sqlx::query(
            "DELETE FROM file_events WHERE run_id IN \
             (SELECT id FROM runs WHERE started_at < ? AND ended_at IS NOT NULL)",
        )
        .bind(&cutoff)
        .execute(&mut *tx)
        .await?;

        let runs = sqlx::query("DELETE FROM runs WHERE started_at < ? AND ended_at IS NOT NULL")
            .bind(&cutoff)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;

        let report = CleanupReport {
            runs_deleted: runs.rows_affected(),
            events_deleted: events.rows_affected(),
            log_paths,
        };
        info!(
            runs = report.runs_deleted,
            events = report.events_deleted,
            cutoff = %cutoff,
            "cleaned up old runs"
        );
        Ok(report)
    }

    /// Delete every finished run and event. Refused while a run is active.
    pub async fn reset(&self) -> Result<CleanupReport, StoreError> {
        if self.active_run().await?.is_some() {
            return Err(StoreError::RunAlreadyActive);
        }
        let mut tx = self.pool.begin().await?;

        let rows = sqlx::query("SELECT log_path FROM runs WHERE log_path IS NOT NULL")
            .fetch_all(&mut *tx)
            .await?;
        let log_paths = rows
            .iter()
            .map(|row| row.try_get::<String, _>("log_path").map(PathBuf::from))
            .collect::<Result<Vec<_>, _>>()?;

        let events = sqlx::query("DELETE FROM file_events")
            .execute(&mut *tx)
            .await?;
        let runs = sqlx::query("DELETE FROM runs").execute(&mut *tx).await?;
        tx.commit().await?;

        info!(runs = runs.rows_affected(), "reset run history");
        Ok(CleanupReport {
            runs_deleted: runs.rows_affected(),
            events_deleted: events.rows_affected(),
            log_paths,
        })
    }

    pub async fn info(&self) -> Result<StoreInfo, StoreError> {
        let row = sqlx::query(
            "SELECT (SELECT COUNT(*) FROM runs) AS runs, \
                    (SELECT COUNT(*) FROM file_events) AS events, \
                    (SELECT MIN(started_at) FROM runs) AS oldest",
        )
        .fetch_one(&self.pool)
        .await?;

        let oldest: Option<String> = row.try_get("oldest")?;
        Ok(StoreInfo {
            location: self.location.clone(),
            runs: to_u64(row.try_get("runs")?),
            events: to_u64(row.try_get("events")?),
            oldest_run_at: oldest.as_deref().map(parse_ts).transpose()?,
        })
    }

    /// Close the pool, flushing the WAL.
    pub async fn close(&self) {
        self.pool.close().await;
    }

    // -----------------------------------------------------------------------
    // Helpers
    // -----------------------------------------------------------------------

    async fn require_run(&self, id: RunId) -> Result<Run, StoreError> {
        self.get_run(id).await?.ok_or(StoreError::RunNotFound(id))
    }

    async fn finished_or_missing(&self, id: RunId) -> StoreError {
        match self.get_run(id).await {
            Ok(Some(_)) => StoreError::RunFinished(id),
            Ok(None) => StoreError::RunNotFound(id),
            Err(e) => e,
        }
    }
}

// ---------------------------------------------------------------------------
// Row mapping
// ---------------------------------------------------------------------------

type SqliteQuery<'q> = sqlx::query::Query<'q, Sqlite, sqlx::sqlite::SqliteArguments<'q>>;

fn bind_counters<'q>(query: SqliteQuery<'q>, counters: &RunCounters) -> SqliteQuery<'q> {
    query
        .bind(to_i64(counters.files_transferred))
        .bind(to_i64(counters.bytes_transferred))
        .bind(to_i64(counters.files_skipped))
        .bind(to_i64(counters.files_deleted))
        .bind(to_i64(counters.errors))
        .bind(to_i64(counters.conflicts))
        .bind(to_i64(counters.parse_warnings))
}

fn run_from_row(row: &SqliteRow) -> Result<Run, StoreError> {
    let trigger: String = row.try_get("trigger_kind")?;
    let status: String = row.try_get("status")?;
    let started_at: String = row.try_get("started_at")?;
    let ended_at: Option<String> = row.try_get("ended_at")?;
    let category: Option<String> = row.try_get("error_category")?;
    let log_path: Option<String> = row.try_get("log_path")?;

    Ok(Run {
        id: RunId(row.try_get("id")?),
        trigger: parse_enum("trigger_kind", &trigger)?,
        status: parse_enum("status", &status)?,
        started_at: parse_ts(&started_at)?,
        ended_at: ended_at.as_deref().map(parse_ts).transpose()?,
        counters: RunCounters {
            files_transferred: to_u64(row.try_get("files_transferred")?),
            bytes_transferred: to_u64(row.try_get("bytes_transferred")?),
            files_skipped: to_u64(row.try_get("files_skipped")?),
            files_deleted: to_u64(row.try_get("files_deleted")?),
            errors: to_u64(row.try_get("errors")?),
            conflicts: to_u64(row.try_get("conflicts")?),
            parse_warnings: to_u64(row.try_get("parse_warnings")?),
        },
        exit_code: row.try_get("exit_code")?,
        error_category: category
            .as_deref()
            .map(|c| parse_enum("error_category", c))
            .transpose()?,
        error_message: row.try_get("error_message")?,
        lightweight: row.try_get("lightweight")?,
        log_path: log_path.map(PathBuf::from),
    })
}

fn event_from_row(row: &SqliteRow) -> Result<FileEvent, StoreError> {
    let kind: String = row.try_get("kind")?;
    let size: Option<i64> = row.try_get("size")?;
    let observed_at: String = row.try_get("observed_at")?;

    Ok(FileEvent {
        id: row.try_get("id")?,
        run_id: RunId(row.try_get("run_id")?),
        path: row.try_get("path")?,
        kind: parse_enum::<EventKind>("kind", &kind)?,
        size: size.map(to_u64),
        detail: row.try_get("detail")?,
        conflict_name: row.try_get("conflict_name")?,
        observed_at: parse_ts(&observed_at)?,
    })
}

fn parse_enum<T: FromStr>(column: &'static str, value: &str) -> Result<T, StoreError> {
    value
        .parse()
        .map_err(|_| StoreError::corrupt(column, value))
}

pub(crate) fn format_ts(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn parse_ts(value: &str) -> Result<DateTime<Utc>, StoreError> {
    DateTime::parse_from_rfc3339(value)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|_| StoreError::corrupt("timestamp", value))
}

fn to_i64(value: u64) -> i64 {
    i64::try_from(value).unwrap_or(i64::MAX)
}

fn to_u64(value: i64) -> u64 {
    u64::try_from(value).unwrap_or(0)
}

fn escape_like(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for c in value.chars() {
        if matches!(c, '%' | '_' | '\\') {
            out.push('\\');
        }
        out.push(c);
    }
    out
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
