//! Logging bootstrap
//!
//! Human-readable output always goes to stdout; a rolling file carries the
//! same stream for retention, formatted as text or as JSON when the log is
//! shipped somewhere structured. The returned guard flushes the file writer
//! on drop and must live as long as the process.

use crate::config::LogSettings;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling::RollingFileAppender;
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

pub fn init(config: &LogSettings) -> WorkerGuard {
    let (file_writer, guard) = tracing_appender::non_blocking(file_appender(config));

    // RUST_LOG wins over the configured level when set.
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.level));
    let stdout_layer = fmt::layer().with_target(false).with_ansi(true);
    let registry = tracing_subscriber::registry()
        .with(filter)
        .with(stdout_layer);

    let file_layer = fmt::layer().with_writer(file_writer).with_ansi(false);
    if config.json {
        registry.with(file_layer.json().with_target(true)).init();
    } else {
        registry.with(file_layer.with_target(false)).init();
    }

    guard
}

fn file_appender(config: &LogSettings) -> RollingFileAppender {
    use tracing_appender::rolling;

    match config.rotation.as_str() {
        "hourly" => rolling::hourly(&config.dir, &config.file),
        "never" => rolling::never(&config.dir, &config.file),
        _ => rolling::daily(&config.dir, &config.file),
    }
}
