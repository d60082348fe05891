//! Tracing initialization for the binary.
//!
//! The subscriber is assembled from the configured [`LogLevel`]: a stdout
//! layer (compact or JSON) plus an optional non-blocking file layer. File
//! logging is refused when an ancestor of the log path is a symlink.

use anyhow::Result;
use chrono::Local;
use std::fmt as stdfmt;
use std::fs::OpenOptions;
use std::path::Path;
use tracing_appender::non_blocking::{NonBlocking, WorkerGuard};
use tracing_subscriber::filter::EnvFilter;
use tracing_subscriber::fmt as tsfmt;
use tracing_subscriber::fmt::time::FormatTime;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::registry;
use tracing_subscriber::util::SubscriberInitExt;

use treemove::config::{LogLevel, path_has_symlink_ancestor};
use treemove::output as out;

/// Local-time timestamps without sub-second noise.
struct LocalTime;

impl FormatTime for LocalTime {
    fn format_time(&self, w: &mut tracing_subscriber::fmt::format::Writer<'_>) -> stdfmt::Result {
        write!(w, "{}", Local::now().format("%Y-%m-%d %H:%M:%S"))
    }
}

fn env_filter(lvl: &LogLevel) -> EnvFilter {
    // Verbosity is driven by the config/CLI level only; RUST_LOG is ignored.
    EnvFilter::new(match lvl {
        LogLevel::Quiet => "error",
        LogLevel::Normal => "info",
        LogLevel::Info => "debug",
        LogLevel::Debug => "trace",
    })
}

/// Open the log file for appending and wrap it in a non-blocking writer.
/// Returns `None` (after telling the user why) instead of failing the run.
fn open_log_writer(path: &Path) -> Option<(NonBlocking, WorkerGuard)> {
    match path_has_symlink_ancestor(path) {
        Ok(false) => {}
        Ok(true) => {
            out::print_warn(&format!(
                "Refusing file logging: an ancestor of {} is a symlink.",
                path.display()
            ));
            return None;
        }
        Err(e) => {
            out::print_warn(&format!(
                "Could not inspect log path {}: {}.",
                path.display(),
                e
            ));
            return None;
        }
    }

    if let Some(parent) = path.parent() {
        let _ = std::fs::create_dir_all(parent);
    }

    match OpenOptions::new().create(true).append(true).open(path) {
        Ok(file) => Some(tracing_appender::non_blocking(file)),
        Err(e) => {
            out::print_warn(&format!(
                "Failed to open log file {}: {}.",
                path.display(),
                e
            ));
            None
        }
    }
}

/// Build and install the global subscriber. The returned guard, when present,
/// must live until shutdown or buffered file output is lost.
pub fn init_tracing(
    lvl: &LogLevel,
    log_file: Option<&Path>,
    json: bool,
) -> Result<Option<WorkerGuard>> {
    let filter = env_filter(lvl);
    let file = log_file.and_then(open_log_writer);
    if file.is_none() {
        if let Some(path) = log_file {
            out::print_warn(&format!(
                "Logs will continue to stdout only (file target was '{}').",
                path.display()
            ));
        }
    }

    // Each format/file combination builds its own concretely typed layers.
    match (json, file) {
        (true, Some((writer, guard))) => {
            registry()
                .with(filter)
                .with(
                    tsfmt::layer()
                        .event_format(tsfmt::format().json())
                        .with_timer(LocalTime)
                        .with_thread_ids(true),
                )
                .with(
                    tsfmt::layer()
                        .event_format(tsfmt::format().json())
                        .with_timer(LocalTime)
                        .with_thread_ids(true)
                        .with_writer(writer),
                )
                .init();
            Ok(Some(guard))
        }
        (false, Some((writer, guard))) => {
            registry()
                .with(filter)
                .with(
                    tsfmt::layer()
                        .with_timer(LocalTime)
                        .with_thread_ids(true)
                        .compact(),
                )
                .with(
                    tsfmt::layer()
                        .with_timer(LocalTime)
                        .with_thread_ids(true)
                        .compact()
                        .with_writer(writer),
                )
                .init();
            Ok(Some(guard))
        }
        (true, None) => {
            registry()
                .with(filter)
                .with(
                    tsfmt::layer()
                        .event_format(tsfmt::format().json())
                        .with_timer(LocalTime)
                        .with_thread_ids(true),
                )
                .init();
            Ok(None)
        }
        (false, None) => {
            registry()
                .with(filter)
                .with(
                    tsfmt::layer()
                        .with_timer(LocalTime)
                        .with_thread_ids(true)
                        .compact(),
                )
                .init();
            Ok(None)
        }
    }
}
