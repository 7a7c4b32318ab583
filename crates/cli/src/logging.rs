//! File-logging setup.
//!
//! Logs go to `.streetrace/logs/streetrace.log` in the working directory,
//! leaving stdout for the assistant's output. `RUST_LOG` overrides the
//! default filter; `--verbose` lowers it to DEBUG.

use std::path::Path;

use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::EnvFilter;

pub fn init(work_dir: &Path, verbose: bool) -> Option<WorkerGuard> {
    let log_dir = work_dir.join(".streetrace").join("logs");
    if std::fs::create_dir_all(&log_dir).is_err() {
        return None;
    }

    let default_filter = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_filter));

    let appender = tracing_appender::rolling::daily(log_dir, "streetrace.log");
    let (writer, guard) = tracing_appender::non_blocking(appender);

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(writer)
        .with_ansi(false)
        .init();

    Some(guard)
}
