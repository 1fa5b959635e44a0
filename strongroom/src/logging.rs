//! Logging infrastructure.
//!
//! Structured `tracing` output to a service log file and to stdout:
//! - appends to `<dir>/strongroom.log` (service log, not to be confused with
//!   per-job log files owned by the log manager)
//! - also prints to stdout for interactive use
//! - filter configurable via `RUST_LOG` (defaults to `info`)

use std::fs;
use std::io;
use std::path::Path;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

/// Service log file name.
pub const SERVICE_LOG_FILE: &str = "strongroom.log";

/// Guard that must be kept alive for the duration of logging.
///
/// Dropping this guard flushes and closes the log file writer.
pub struct LoggingGuard {
    _file_guard: WorkerGuard,
}

/// Initializes the logging system.
///
/// Creates the log directory if needed and sets up dual output to the
/// service log file and stdout. Returns a guard that must be kept alive.
///
/// # Errors
///
/// Returns an error if the log directory cannot be created.
pub fn init_logging(log_dir: &Path) -> Result<LoggingGuard, io::Error> {
    fs::create_dir_all(log_dir)?;

    let file_appender = tracing_appender::rolling::never(log_dir, SERVICE_LOG_FILE);
    let (non_blocking_file, file_guard) = tracing_appender::non_blocking(file_appender);

    let file_layer = tracing_subscriber::fmt::layer()
        .with_writer(non_blocking_file)
        .with_ansi(false)
        .with_target(true)
        .compact();

    let stdout_layer = tracing_subscriber::fmt::layer()
        .with_writer(io::stdout)
        .with_ansi(true)
        .compact();

    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(file_layer)
        .with(stdout_layer)
        .init();

    Ok(LoggingGuard {
        _file_guard: file_guard,
    })
}
