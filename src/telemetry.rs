//! Tracing initialization for embedders and tests.
//!
//! Mirrors the usual subscriber stack: an env-filtered fmt layer, optionally
//! writing through a non-blocking daily-rolling file appender. Init is
//! idempotent so library consumers and test binaries can both call it.

use once_cell::sync::OnceCell;
use tracing_appender::non_blocking::WorkerGuard;

use crate::config::LoggingConfig;

static INIT: OnceCell<Option<WorkerGuard>> = OnceCell::new();

/// Initializes the global tracing subscriber from logging settings.
///
/// Subsequent calls are no-ops. The worker guard for the file appender (if
/// any) is held for the lifetime of the process.
pub fn init(logging: &LoggingConfig) {
    INIT.get_or_init(|| {
        let filter = tracing_subscriber::EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(logging.level.clone()));

        if let Some(dir) = &logging.file {
            let appender = tracing_appender::rolling::RollingFileAppender::new(
                tracing_appender::rolling::Rotation::DAILY,
                dir,
                "modeldock",
            );
            let (non_blocking, guard) = tracing_appender::non_blocking(appender);
            let _ = tracing_subscriber::fmt()
                .with_env_filter(filter)
                .with_writer(non_blocking)
                .with_ansi(false)
                .with_target(false)
                .try_init();
            Some(guard)
        } else {
            let _ = tracing_subscriber::fmt()
                .with_env_filter(filter)
                .with_target(false)
                .try_init();
            None
        }
    });
}

/// Convenience init for tests: env-filtered console output only.
pub fn init_for_tests() {
    init(&LoggingConfig {
        level: "debug".to_string(),
        file: None,
    });
}
