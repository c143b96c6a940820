use std::fs;
use std::io::ErrorKind;
use std::os::unix::net::UnixStream as StdUnixStream;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Serialize;
use serde_json::{json, Value};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::unix::OwnedWriteHalf;
use tokio::net::{UnixListener, UnixStream};
use tokio::signal::unix::{signal, SignalKind};
use tokio::sync::broadcast;

use mirrorsync_core::RunId;
use mirrorsync_sync::TreeWindow;

use crate::error::{io_err, DaemonError};
use crate::log_rotation::AppendLog;
use crate::paths::{daemon_log_path, logs_dir, mirrorsync_root, run_logs_dir, socket_path};
use crate::protocol::{DaemonRequest, DaemonResponse};
use crate::service::{RunSummary, SyncService};

const DEFAULT_RUNS_LIMIT: u32 = 20;
const DEFAULT_EVENTS_LIMIT: u32 = 100;
const DEFAULT_LOG_LINES: usize = 1000;

/// How the daemon reports its own logs.
#[derive(Debug, Clone, Copy, Default)]
pub struct DaemonOptions {
    /// Log to stderr instead of `daemon.log`.
    pub foreground_logs: bool,
    /// One JSON object per log record.
    pub json_logs: bool,
}

/// Start the daemon runtime and block the current thread until it exits.
pub fn start_blocking(home: &Path, options: DaemonOptions) -> Result<(), DaemonError> {
    ensure_runtime_dirs(home)?;
    init_tracing(home, options);
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .map_err(|e| io_err("tokio-runtime", e))?;
    runtime.block_on(run(home.to_path_buf()))
}

/// Run the daemon until `shutdown`, ctrl-c or SIGTERM.
pub async fn run(home: PathBuf) -> Result<(), DaemonError> {
    ensure_runtime_dirs(&home)?;

    let service = SyncService::open_at(&home).await?;
    match service.autostart() {
        Ok(Some(state)) => tracing::info!(state = ?state, "scheduler autostarted"),
        Ok(None) => tracing::info!("scheduler autostart disabled"),
        Err(err) => tracing::warn!(error = %err, "scheduler not started"),
    }

    let (shutdown_tx, _) = broadcast::channel::<()>(16);

    let socket_handle = {
        let shutdown = shutdown_tx.clone();
        let home = home.clone();
        let service = service.clone();
        tokio::spawn(async move {
            let result =
                socket_server_task(home, service, shutdown.clone(), shutdown.subscribe()).await;
            let _ = shutdown.send(());
            result
        })
    };

    let rotation_handle = {
        let shutdown = shutdown_tx.clone();
        let home = home.clone();
        tokio::spawn(async move {
            let result = log_rotation_task(home, shutdown.subscribe()).await;
            let _ = shutdown.send(());
            result
        })
    };

    let signal_handle = {
        let shutdown = shutdown_tx.clone();
        tokio::spawn(async move {
            let result = signal_task(shutdown.clone()).await;
            let _ = shutdown.send(());
            result
        })
    };

    let (socket_result, rotation_result, signal_result) =
        tokio::join!(socket_handle, rotation_handle, signal_handle);

    service.shutdown().await;
    tracing::info!("daemon stopped");

    handle_join("socket_server", socket_result)?;
    handle_join("log_rotation", rotation_result)?;
    handle_join("signal_handler", signal_result)?;
    Ok(())
}

async fn socket_server_task(
    home: PathBuf,
    service: SyncService,
    shutdown_tx: broadcast::Sender<()>,
    mut shutdown_rx: broadcast::Receiver<()>,
) -> Result<(), DaemonError> {
    let socket = socket_path(&home);
    prepare_socket_for_bind(&socket)?;

    let listener = UnixListener::bind(&socket).map_err(|e| io_err(&socket, e))?;
    set_socket_permissions(&socket)?;
    tracing::info!(socket = %socket.display(), "daemon listening");

    loop {
        tokio::select! {
            _ = shutdown_rx.recv() => break,
            accepted = listener.accept() => {
                let (stream, _) = accepted.map_err(|e| io_err(&socket, e))?;
                let service = service.clone();
                let shutdown_tx = shutdown_tx.clone();
                tokio::spawn(async move {
                    if let Err(err) = handle_socket_client(stream, service, shutdown_tx).await {
                        tracing::error!(error = %err, "socket client error");
                    }
                });
            }
        }
    }

    if socket.exists() {
        let _ = fs::remove_file(&socket);
    }
    Ok(())
}

async fn handle_socket_client(
    stream: UnixStream,
    service: SyncService,
    shutdown_tx: broadcast::Sender<()>,
) -> Result<(), DaemonError> {
    let (reader, mut writer) = stream.into_split();
    let mut lines = BufReader::new(reader).lines();

    while let Some(line) = lines
        .next_line()
        .await
        .map_err(|e| io_err("daemon socket read", e))?
    {
        if line.trim().is_empty() {
            continue;
        }

        let request = match serde_json::from_str::<DaemonRequest>(&line) {
            Ok(request) => request,
            Err(err) => {
                write_response(
                    &mut writer,
                    &DaemonResponse::error(format!("invalid request JSON: {err}")),
                )
                .await?;
                continue;
            }
        };

        let response = handle_request(&service, &request, &shutdown_tx).await;
        write_response(&mut writer, &response).await?;
        if request.cmd == "shutdown" {
            break;
        }
    }

    Ok(())
}

/// Answer one request. Errors become `ok: false` responses.
pub(crate) async fn handle_request(
    service: &SyncService,
    request: &DaemonRequest,
    shutdown_tx: &broadcast::Sender<()>,
) -> DaemonResponse {
    tracing::debug!(cmd = %request.cmd, "daemon request");
    match dispatch(service, request, shutdown_tx).await {
        Ok(data) => DaemonResponse::ok(data),
        Err(DaemonError::Busy { active_run_id }) => DaemonResponse::busy(active_run_id),
        Err(err) => DaemonResponse::error(err.to_string()),
    }
}

async fn dispatch(
    service: &SyncService,
    request: &DaemonRequest,
    shutdown_tx: &broadcast::Sender<()>,
) -> Result<Value, DaemonError> {
    let limit = request.limit;
    match request.cmd.as_str() {
        "status" => to_data(service.get_current_status().await?),
        "trigger" if request.wait => {
            let run = service.trigger_and_wait().await?;
            to_data(RunSummary::from(&run))
        }
        "trigger" => Ok(json!({ "run_id": service.trigger_now().await? })),
        "start" => Ok(json!({ "scheduler_state": service.start_scheduler()? })),
        "stop" => Ok(json!({ "scheduler_state": service.stop_scheduler() })),
        "pause" => Ok(json!({ "scheduler_state": service.pause_scheduler() })),
        "cancel" => Ok(json!({ "cancelled_run_id": service.cancel_current_run() })),
        "runs" => to_data(
            service
                .list_runs(
                    limit.unwrap_or(DEFAULT_RUNS_LIMIT),
                    request.offset.unwrap_or(0),
                )
                .await?,
        ),
        "events" => match request.run_id {
            Some(run_id) => to_data(service.get_run_events(RunId(run_id)).await?),
            None => to_data(
                service
                    .list_recent_events(limit.unwrap_or(DEFAULT_EVENTS_LIMIT))
                    .await?,
            ),
        },
        "history" => {
            let path = required(request.path.as_deref(), "path")?;
            to_data(
                service
                    .get_path_history(path, limit.unwrap_or(DEFAULT_EVENTS_LIMIT))
                    .await?,
            )
        }
        "tree" => {
            let window = request
                .window
                .map(TreeWindow::LastRuns)
                .unwrap_or_default();
            to_data(service.get_tree(request.path.as_deref(), window).await?)
        }
        "logs" => {
            let run_id = required(request.run_id, "run_id")?;
            let log = service
                .read_run_log(
                    RunId(run_id),
                    request.since.unwrap_or(0),
                    limit.map(|l| l as usize).unwrap_or(DEFAULT_LOG_LINES),
                )
                .await?;
            to_data(log)
        }
        "cleanup" => {
            let days = required(request.older_than_days, "older_than_days")?;
            let report = service
                .cleanup_old_runs(chrono::Duration::days(i64::from(days)))
                .await?;
            to_data(report)
        }
        "reset" => to_data(service.reset_history().await?),
        "info" => to_data(service.store_info().await?),
        "shutdown" => {
            let _ = shutdown_tx.send(());
            Ok(json!({ "stopping": true }))
        }
        other => Err(DaemonError::Protocol(format!("unknown command '{other}'"))),
    }
}

fn required<T>(value: Option<T>, field: &str) -> Result<T, DaemonError> {
    value.ok_or_else(|| DaemonError::Protocol(format!("missing '{field}'")))
}

fn to_data<T: Serialize>(value: T) -> Result<Value, DaemonError> {
    Ok(serde_json::to_value(value)?)
}

async fn log_rotation_task(
    home: PathBuf,
    mut shutdown_rx: broadcast::Receiver<()>,
) -> Result<(), DaemonError> {
    let mut interval = tokio::time::interval(Duration::from_secs(5));
    interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
    interval.tick().await;
    loop {
        tokio::select! {
            _ = shutdown_rx.recv() => break,
            _ = interval.tick() => {
                let home = home.clone();
                tokio::task::spawn_blocking(move || {
                    crate::log_rotation::rotate_daemon_log(&home);
                })
                .await
                .ok();
            }
        }
    }
    Ok(())
}

async fn signal_task(shutdown_tx: broadcast::Sender<()>) -> Result<(), DaemonError> {
    let mut shutdown_rx = shutdown_tx.subscribe();
    let mut terminate =
        signal(SignalKind::terminate()).map_err(|e| io_err("SIGTERM handler", e))?;
    tokio::select! {
        _ = shutdown_rx.recv() => {}
        _ = terminate.recv() => {
            tracing::info!("received SIGTERM, shutting down daemon");
        }
        signal = tokio::signal::ctrl_c() => {
            signal.map_err(|err| DaemonError::Protocol(format!("ctrl-c handler failed: {err}")))?;
            tracing::info!("received ctrl-c, shutting down daemon");
        }
    }
    Ok(())
}

fn prepare_socket_for_bind(socket: &Path) -> Result<(), DaemonError> {
    if !socket.exists() {
        return Ok(());
    }

    match StdUnixStream::connect(socket) {
        Ok(_) => {
            return Err(DaemonError::Protocol(format!(
                "daemon socket already in use: {}",
                socket.display()
            )));
        }
        Err(err) => {
            tracing::warn!(
                socket = %socket.display(),
                error = %err,
                "removing stale daemon socket before bind",
            );
        }
    }

    match fs::remove_file(socket) {
        Ok(()) => Ok(()),
        Err(err) if err.kind() == ErrorKind::NotFound => Ok(()),
        Err(err) => Err(io_err(socket, err)),
    }
}

fn ensure_runtime_dirs(home: &Path) -> Result<(), DaemonError> {
    for dir in [mirrorsync_root(home), logs_dir(home), run_logs_dir(home)] {
        if !dir.exists() {
            fs::create_dir_all(&dir).map_err(|e| io_err(&dir, e))?;
        }
    }
    Ok(())
}

async fn write_response(
    writer: &mut OwnedWriteHalf,
    response: &DaemonResponse,
) -> Result<(), DaemonError> {
    let payload = serde_json::to_string(response)?;
    writer
        .write_all(payload.as_bytes())
        .await
        .map_err(|e| io_err("daemon socket write", e))?;
    writer
        .write_all(b"\n")
        .await
        .map_err(|e| io_err("daemon socket write", e))?;
    writer
        .flush()
        .await
        .map_err(|e| io_err("daemon socket flush", e))?;
    Ok(())
}

fn handle_join(
    task: &str,
    result: Result<Result<(), DaemonError>, tokio::task::JoinError>,
) -> Result<(), DaemonError> {
    match result {
        Ok(inner) => inner,
        Err(err) => Err(DaemonError::Protocol(format!(
            "{task} task join failure: {err}"
        ))),
    }
}

fn init_tracing(home: &Path, options: DaemonOptions) {
    use tracing_subscriber::{fmt, EnvFilter};

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = fmt().with_env_filter(filter).with_target(false);
    let _ = match (options.foreground_logs, options.json_logs) {
        (true, false) => builder.with_writer(std::io::stderr).try_init(),
        (true, true) => builder.json().with_writer(std::io::stderr).try_init(),
        (false, false) => builder
            .with_ansi(false)
            .with_writer(AppendLog::new(daemon_log_path(home)))
            .try_init(),
        (false, true) => builder
            .json()
            .with_writer(AppendLog::new(daemon_log_path(home)))
            .try_init(),
    };
}

#[cfg(unix)]
fn set_socket_permissions(path: &Path) -> Result<(), DaemonError> {
    use std::os::unix::fs::PermissionsExt;
    fs::set_permissions(path, fs::Permissions::from_mode(0o600)).map_err(|e| io_err(path, e))
}

#[cfg(not(unix))]
fn set_socket_permissions(_path: &Path) -> Result<(), DaemonError> {
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use mirrorsync_core::{StaticConfig, SyncConfiguration};
    use mirrorsync_store::Store;
    use mirrorsync_sync::EnvSecretStore;
    use tempfile::TempDir;

    async fn service() -> SyncService {
        SyncService::new(
            Store::in_memory().await.expect("store"),
            Arc::new(StaticConfig(SyncConfiguration::default())),
            Arc::new(EnvSecretStore),
            None,
        )
    }

    async fn ask(service: &SyncService, request: DaemonRequest) -> DaemonResponse {
        let (shutdown_tx, _) = broadcast::channel(1);
        handle_request(service, &request, &shutdown_tx).await
    }

    #[tokio::test]
    async fn status_and_empty_listings() {
        let svc = service().await;

        let status = ask(&svc, DaemonRequest::command("status")).await;
        assert!(status.ok);
        let data = status.data.expect("status data");
        assert_eq!(data["scheduler_state"], json!("stopped"));
        assert_eq!(data["active_run_id"], Value::Null);

        let runs = ask(&svc, DaemonRequest::command("runs")).await;
        assert_eq!(runs.data, Some(json!([])));

        let tree = ask(&svc, DaemonRequest::command("tree")).await;
        assert_eq!(tree.data.expect("tree")["stats"]["files"], json!(0));
    }

    #[tokio::test]
    async fn scheduler_commands_report_state() {
        let svc = service().await;
        let started = ask(&svc, DaemonRequest::command("start")).await;
        assert_eq!(started.data, Some(json!({ "scheduler_state": "running" })));
        let paused = ask(&svc, DaemonRequest::command("pause")).await;
        assert_eq!(paused.data, Some(json!({ "scheduler_state": "paused" })));
        let stopped = ask(&svc, DaemonRequest::command("stop")).await;
        assert_eq!(stopped.data, Some(json!({ "scheduler_state": "stopped" })));
    }

    #[tokio::test]
    async fn bad_requests_are_errors_not_failures() {
        let svc = service().await;

        let unknown = ask(&svc, DaemonRequest::command("sync")).await;
        assert!(!unknown.ok);
        assert!(unknown.error.unwrap().contains("unknown command 'sync'"));

        let history = ask(&svc, DaemonRequest::command("history")).await;
        assert!(history.error.unwrap().contains("missing 'path'"));

        let events = ask(
            &svc,
            DaemonRequest {
                run_id: Some(99),
                ..DaemonRequest::command("events")
            },
        )
        .await;
        assert_eq!(events.error.as_deref(), Some("run 99 not found"));
    }

    #[tokio::test]
    async fn shutdown_broadcasts() {
        let svc = service().await;
        let (shutdown_tx, mut shutdown_rx) = broadcast::channel(1);
        let response =
            handle_request(&svc, &DaemonRequest::command("shutdown"), &shutdown_tx).await;
        assert_eq!(response.data, Some(json!({ "stopping": true })));
        assert!(shutdown_rx.recv().await.is_ok());
    }

    #[test]
    fn stale_socket_is_removed_and_live_one_refused() {
        let dir = TempDir::new().expect("dir");
        let socket = dir.path().join("daemon.sock");

        fs::write(&socket, b"").expect("stale file");
        prepare_socket_for_bind(&socket).expect("stale socket removed");
        assert!(!socket.exists());

        let _listener = std::os::unix::net::UnixListener::bind(&socket).expect("bind");
        assert!(matches!(
            prepare_socket_for_bind(&socket),
            Err(DaemonError::Protocol(_))
        ));
    }
}
