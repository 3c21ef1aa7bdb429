//! Logging setup.
//!
//! Console output goes to stderr with local timestamps. When a log directory
//! is given, a daily-rolling file is written as well and files older than
//! [`LOG_RETENTION_DAYS`] are removed at startup.

use std::path::Path;
use std::time::{Duration, SystemTime};

use chrono::Local;
use tracing::{debug, warn};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{
    EnvFilter, Layer,
    fmt::{self, format::Writer, time::FormatTime},
    layer::SubscriberExt,
    util::SubscriberInitExt,
};

use crate::utils::fs;
use crate::{Error, Result};

/// Default log filter directive.
pub const DEFAULT_LOG_FILTER: &str = "av_restore=info,process_utils=info";

/// Log retention period in days.
pub const LOG_RETENTION_DAYS: u64 = 7;

const LOG_FILE_PREFIX: &str = "av-restore.log";

/// Timer that formats timestamps in the local timezone via chrono.
#[derive(Debug, Clone, Copy)]
struct LocalTimer;

impl FormatTime for LocalTimer {
    fn format_time(&self, w: &mut Writer<'_>) -> std::fmt::Result {
        let now = Local::now();
        write!(w, "{}", now.format("%Y-%m-%dT%H:%M:%S%.3f%:z"))
    }
}

/// Filter directive for the given verbosity flags.
///
/// `-q` wins over `-v`; each `-v` lowers the level by one step.
pub fn verbosity_filter(verbose: u8, quiet: bool) -> String {
    let level = if quiet {
        "warn"
    } else {
        match verbose {
            0 => return DEFAULT_LOG_FILTER.to_string(),
            1 => "debug",
            _ => "trace",
        }
    };
    format!("av_restore={level},process_utils={level}")
}

/// Install the global subscriber.
///
/// `RUST_LOG` takes precedence over `directive`. The returned guard must be
/// held until exit so buffered file output is flushed.
pub fn init(directive: &str, log_dir: Option<&Path>) -> Result<Option<WorkerGuard>> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(directive))
        .map_err(|e| Error::config(format!("invalid log filter '{directive}': {e}")))?;

    let console = fmt::layer()
        .with_writer(std::io::stderr)
        .with_ansi(true)
        .with_timer(LocalTimer)
        .with_target(false);

    let (file_layer, guard) = match log_dir {
        Some(dir) => {
            fs::ensure_dir_all_sync(dir)?;
            cleanup_old_logs(dir, LOG_RETENTION_DAYS);
            let appender = tracing_appender::rolling::daily(dir, LOG_FILE_PREFIX);
            let (writer, guard) = tracing_appender::non_blocking(appender);
            let layer = fmt::layer()
                .with_writer(writer)
                .with_ansi(false)
                .with_timer(LocalTimer)
                .boxed();
            (Some(layer), Some(guard))
        }
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(console)
        .with(file_layer)
        .try_init()
        .map_err(|e| Error::Other(format!("Failed to set global default subscriber: {e}")))?;

    Ok(guard)
}

/// Remove rolled log files older than `retention_days`.
fn cleanup_old_logs(dir: &Path, retention_days: u64) {
    let Some(cutoff) =
        SystemTime::now().checked_sub(Duration::from_secs(retention_days * 24 * 60 * 60))
    else {
        return;
    };
    let Ok(entries) = std::fs::read_dir(dir) else {
        return;
    };

    for entry in entries.flatten() {
        let path = entry.path();
        let is_log = path
            .file_name()
            .and_then(|n| n.to_str())
            .is_some_and(|n| n.starts_with(LOG_FILE_PREFIX));
        if !is_log {
            continue;
        }
        let modified = entry.metadata().and_then(|m| m.modified());
        if matches!(modified, Ok(t) if t < cutoff) {
            match std::fs::remove_file(&path) {
                Ok(()) => debug!(path = %path.display(), "Removed old log file"),
                Err(e) => warn!(path = %path.display(), error = %e, "Failed to remove old log file"),
            }
        }
    }
}
