//! Engine command line materialisation.

use std::collections::BTreeMap;
use std::process::Stdio;

use tokio::process::Command;

use mirrorsync_core::SyncConfiguration;

/// The full argument list for one `copy` run, in a stable order.
pub fn engine_args(config: &SyncConfiguration) -> Vec<String> {
    let mut args = vec![
        "copy".to_string(),
        config.source.clone(),
        config.destination.clone(),
        "--use-json-log".to_string(),
        "--log-level=INFO".to_string(),
        "--log-file=/dev/stdout".to_string(),
        "--stats-log-level=NOTICE".to_string(),
        format!("--transfers={}", config.transfers),
        format!("--checkers={}", config.checkers),
        format!("--bwlimit={}", config.bandwidth_limit),
        format!("--tpslimit={}", config.tps_limit),
    ];
    if let Some(burst) = config.tps_limit_burst {
        args.push(format!("--tpslimit-burst={burst}"));
    }
    if config.dry_run {
        args.push("--dry-run".to_string());
    }
    if config.skip_indirections {
        args.push("--skip-links".to_string());
        args.push("--drive-skip-shortcuts".to_string());
    }
    if let Some(path) = &config.engine_config {
        args.push(format!("--config={}", path.display()));
    }
    args.extend(config.extra_args.iter().cloned());
    args
}

/// A ready-to-spawn engine process with piped output.
pub fn engine_command(config: &SyncConfiguration, env: &BTreeMap<String, String>) -> Command {
    let mut cmd = Command::new(&config.engine_binary);
    cmd.args(engine_args(config))
        .envs(env)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);
    cmd
}
