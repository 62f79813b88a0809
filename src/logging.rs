//! Tracing configuration and log routing.
//!
//! Logs go to stdout through a compact formatter and are mirrored into a file. Set
//! `RUSTY_DIGEST_LOG_FILE` to choose the file; otherwise `logs/rusty-digest.log` is used. Set
//! `RUSTY_DIGEST_LOG_FILE=off` to disable file logging entirely (the CLI does this by default).
use std::sync::OnceLock;

use tracing_appender::non_blocking::{NonBlocking, WorkerGuard};
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

const LOG_FILE_ENV: &str = "RUSTY_DIGEST_LOG_FILE";
const DEFAULT_LOG_DIR: &str = "logs";
const DEFAULT_LOG_FILE: &str = "rusty-digest.log";

static LOG_GUARD: OnceLock<WorkerGuard> = OnceLock::new();

/// Where log records are written besides stdout/stderr.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogTarget {
    /// Server mode: stdout plus the configured log file.
    Server,
    /// CLI mode: stderr only, so stdout stays reserved for the summary.
    Cli,
}

/// Configure tracing for the long-running server.
pub fn init_tracing() {
    init_tracing_for(LogTarget::Server);
}

/// Configure tracing subscribers for the given target.
///
/// - Respects `RUST_LOG` for filtering (defaults to `info`, `warn` for the CLI).
/// - Installs a compact console layer and, in server mode, a file layer when available.
pub fn init_tracing_for(target: LogTarget) {
    let default_level = match target {
        LogTarget::Server => "info",
        LogTarget::Cli => "warn",
    };
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    if target == LogTarget::Cli {
        let stderr_layer = fmt::layer()
            .with_writer(std::io::stderr)
            .with_target(false)
            .compact();
        let _ = tracing_subscriber::registry()
            .with(env_filter)
            .with(stderr_layer)
            .try_init();
        return;
    }

    let stdout_layer = fmt::layer().with_target(false).compact();
    let registry = tracing_subscriber::registry()
        .with(env_filter)
        .with(stdout_layer);

    match configure_file_writer() {
        Some(writer) => {
            let file_layer = fmt::layer()
                .with_writer(writer)
                .with_target(true)
                .with_ansi(false)
                .compact();
            let _ = registry.with(file_layer).try_init();
        }
        None => {
            let _ = registry.try_init();
        }
    }
}

/// Build a non-blocking writer for file logging.
///
/// Returns `None` when file logging is disabled or the target cannot be opened.
fn configure_file_writer() -> Option<NonBlocking> {
    match std::env::var(LOG_FILE_ENV) {
        Ok(path) if path.eq_ignore_ascii_case("off") => None,
        Ok(path) => match std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
        {
            Ok(file) => Some(install_writer(file)),
            Err(err) => {
                eprintln!("Failed to open log file {path}: {err}");
                None
            }
        },
        Err(_) => {
            if let Err(err) = std::fs::create_dir_all(DEFAULT_LOG_DIR) {
                eprintln!("Failed to create logs directory: {err}");
                return None;
            }
            let appender = tracing_appender::rolling::never(DEFAULT_LOG_DIR, DEFAULT_LOG_FILE);
            Some(install_writer(appender))
        }
    }
}

fn install_writer<W>(writer: W) -> NonBlocking
where
    W: std::io::Write + Send + 'static,
{
    let (non_blocking, guard) = tracing_appender::non_blocking(writer);
    let _ = LOG_GUARD.set(guard);
    non_blocking
}
