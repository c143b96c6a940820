//! Exit classification.
//!
//! Best effort: the engine's error vocabulary is not a stable interface, so
//! categories are guessed from substrings of its error output and fall back
//! to [`ErrorCategory::Engine`].

use mirrorsync_core::{ErrorCategory, RunCounters, RunStatus};

/// Terminal status decided for a finished engine process.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Classification {
    pub status: RunStatus,
    pub category: Option<ErrorCategory>,
    pub message: Option<String>,
}

const AUTH_SIGNATURES: &[&str] = &[
    "unauthorized",
    "unauthenticated",
    "invalid_grant",
    "invalid_client",
    "token expired",
    "couldn't fetch token",
    "failed to refresh token",
    "authentication",
    "401",
    "403 forbidden",
];

const RATE_SIGNATURES: &[&str] = &[
    "ratelimitexceeded",
    "rate limit",
    "too many requests",
    "429",
    "quota exceeded",
];

const NETWORK_SIGNATURES: &[&str] = &[
    "no such host",
    "connection refused",
    "connection reset",
    "network is unreachable",
    "i/o timeout",
    "tls handshake",
    "dial tcp",
    "temporary failure in name resolution",
];

const PATH_SIGNATURES: &[&str] = &[
    "directory not found",
    "object not found",
    "no such file or directory",
    "didn't find section in config file",
];

/// First matching category across `lines`, checked in priority order.
pub fn detect_category<S: AsRef<str>>(lines: &[S]) -> Option<ErrorCategory> {
    let haystack = lines
        .iter()
        .map(|l| l.as_ref().to_ascii_lowercase())
        .collect::<Vec<_>>()
        .join("\n");

    [
        (AUTH_SIGNATURES, ErrorCategory::Authentication),
        (RATE_SIGNATURES, ErrorCategory::RateLimited),
        (NETWORK_SIGNATURES, ErrorCategory::Network),
        (PATH_SIGNATURES, ErrorCategory::PathNotFound),
    ]
    .into_iter()
    .find(|(signatures, _)| signatures.iter().any(|s| haystack.contains(s)))
    .map(|(_, category)| category)
}

/// Classify a finished run from its exit code, counters and the error
/// diagnostics gathered from the engine (error records and stderr).
pub fn classify<S: AsRef<str>>(
    exit_code: Option<i32>,
    counters: &RunCounters,
    diagnostics: &[S],
) -> Classification {
    let message = diagnostics
        .iter()
        .rev()
        .map(|l| l.as_ref().trim())
        .find(|l| !l.is_empty())
        .map(truncate);

    if exit_code == Some(0) {
        return Classification {
            status: RunStatus::Success,
            category: None,
            message: None,
        };
    }

    let only_skips = counters.errors == 0
        && counters.conflicts == 0
        && counters.files_transferred == 0
        && counters.files_deleted == 0
        && counters.files_skipped > 0;
    if only_skips {
        return Classification {
            status: RunStatus::Success,
            category: None,
            message,
        };
    }

    let detected = detect_category(diagnostics);
    if counters.successful() > 0 {
        return Classification {
            status: RunStatus::Partial,
            category: detected,
            message,
        };
    }

    let category = detected.unwrap_or(match exit_code {
        Some(3) | Some(4) => ErrorCategory::PathNotFound,
        _ => ErrorCategory::Engine,
    });
    Classification {
        status: RunStatus::Failed,
        category: Some(category),
        message: message.or_else(|| {
            Some(match exit_code {
                Some(code) => format!("engine exited with code {code}"),
                None => "engine terminated by a signal".to_string(),
            })
        }),
    }
}

fn truncate(line: &str) -> String {
    const MAX: usize = 500;
    if line.len() <= MAX {
        return line.to_string();
    }
    let mut end = MAX;
    while !line.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}...", &line[..end])
}
