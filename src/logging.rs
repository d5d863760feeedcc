//! Tracing subscriber setup.
//!
//! Console output is human readable. When file logging is enabled, two JSON
//! files roll daily in the configured directory: `roadcast.log` with
//! everything and `errors.log` with errors only.

use tracing::level_filters::LevelFilter;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, prelude::*, EnvFilter, Layer};

use crate::config::LoggingSettings;
use crate::error::StartupError;

/// Keeps the non-blocking file writers flushing until dropped.
#[must_use = "dropping the guard stops file logging"]
#[derive(Default)]
pub struct LogGuard {
    _guards: Vec<WorkerGuard>,
}

impl std::fmt::Debug for LogGuard {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LogGuard").field("writers", &self._guards.len()).finish()
    }
}

/// Build the filter: `RUST_LOG` wins, then the configured level.
pub fn env_filter(default_level: &str) -> EnvFilter {
    EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(default_level))
        .unwrap_or_else(|_| EnvFilter::new("info"))
}

/// Initialize the global subscriber.
///
/// With `quiet` set only errors reach the console and no files are written.
pub fn init(settings: &LoggingSettings, quiet: bool) -> Result<LogGuard, StartupError> {
    let filter = if quiet {
        EnvFilter::new("error")
    } else {
        env_filter(&settings.level)
    };

    let console = fmt::layer()
        .with_target(false)
        .with_timer(fmt::time::UtcTime::rfc_3339())
        .with_filter(filter);

    let mut guards = Vec::new();
    let files = if settings.files && !quiet {
        std::fs::create_dir_all(&settings.directory).map_err(|e| {
            StartupError::Logging(format!(
                "cannot create log directory {}: {}",
                settings.directory.display(),
                e
            ))
        })?;

        let (all_writer, all_guard) = tracing_appender::non_blocking(
            tracing_appender::rolling::daily(&settings.directory, "roadcast.log"),
        );
        let (error_writer, error_guard) = tracing_appender::non_blocking(
            tracing_appender::rolling::daily(&settings.directory, "errors.log"),
        );
        guards.push(all_guard);
        guards.push(error_guard);

        let all = fmt::layer()
            .json()
            .with_writer(all_writer)
            .with_filter(env_filter(&settings.level));
        let errors = fmt::layer()
            .json()
            .with_writer(error_writer)
            .with_filter(LevelFilter::ERROR);

        Some(all.and_then(errors))
    } else {
        None
    };

    tracing_subscriber::registry()
        .with(console)
        .with(files)
        .try_init()
        .map_err(|e| StartupError::Logging(e.to_string()))?;

    Ok(LogGuard { _guards: guards })
}
