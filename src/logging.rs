//! # Logging
//!
//! Console logging plus an optional log file.

use std::path::Path;

use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter};

use crate::config::LoggingConfig;
use crate::error::{RelayError, Result};

/// Initialize structured logging with tracing-subscriber.
///
/// Uses the `RUST_LOG` env var if set, otherwise falls back to the configured
/// level. When `file` is set, the same events are also written (without ANSI
/// colors) to that file through a non-blocking writer; keep the returned guard
/// alive until exit so buffered lines are flushed.
pub fn init(config: &LoggingConfig) -> Result<Option<WorkerGuard>> {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.level));

    let (file_layer, guard) = match file_writer(&config.file)? {
        Some((writer, guard)) => (
            Some(fmt::layer().with_ansi(false).with_writer(writer)),
            Some(guard),
        ),
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt::layer())
        .with(file_layer)
        .try_init()
        .map_err(|e| RelayError::Io(std::io::Error::new(std::io::ErrorKind::Other, e)))?;

    Ok(guard)
}

fn file_writer(
    path: &str,
) -> Result<Option<(tracing_appender::non_blocking::NonBlocking, WorkerGuard)>> {
    if path.trim().is_empty() {
        return Ok(None);
    }

    let path = Path::new(path);
    let directory = match path.parent() {
        Some(dir) if !dir.as_os_str().is_empty() => dir,
        _ => Path::new("."),
    };
    let file_name = path.file_name().ok_or_else(|| {
        RelayError::Io(std::io::Error::new(
            std::io::ErrorKind::InvalidInput,
            format!("log file path has no file name: {}", path.display()),
        ))
    })?;

    std::fs::create_dir_all(directory)?;
    let appender = tracing_appender::rolling::never(directory, file_name);
    Ok(Some(tracing_appender::non_blocking(appender)))
}
