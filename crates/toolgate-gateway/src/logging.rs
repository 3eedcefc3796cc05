//! Tracing/logging init (SPEC_FULL.md §2 component L, §6).
//!
//! Grounded on `mcpmux-gateway`'s subscriber setup: an `EnvFilter`-driven
//! registry with ANSI console output, plus an optional rolling file writer
//! gated by `LogConfig::file_enabled`. The run id is attached as a span
//! field on every event so log lines from one process run can be
//! correlated even when file and console output interleave.

use std::path::PathBuf;

use tracing_subscriber::fmt::format::FmtSpan;
use tracing_subscriber::{EnvFilter, Layer};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

use toolgate_core::config::LogConfig;

/// Guard returned by `init`; dropping it flushes the non-blocking file
/// writer. The caller must hold it for the process lifetime.
pub struct LoggingGuard {
    _file_guard: Option<tracing_appender::non_blocking::WorkerGuard>,
}

/// Installs a global tracing subscriber built from `config`, returning the
/// guard plus the run id callers should attach to a root span so every
/// subsequent event carries it as a field (SPEC_FULL.md §6 `TOOLGATE_RUN_ID`).
/// `RUST_LOG` takes precedence over `config.level` when set, matching
/// `EnvFilter`'s own precedence rules.
pub fn init(config: &LogConfig) -> (LoggingGuard, String) {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.level));

    let console_layer = tracing_subscriber::fmt::layer()
        .with_ansi(true)
        .with_span_events(FmtSpan::CLOSE)
        .with_target(true);

    let (file_layer, file_guard) = if config.file_enabled {
        let dir = log_dir();
        let _ = std::fs::create_dir_all(&dir);
        let appender = tracing_appender::rolling::daily(dir, "toolgate.log");
        let (non_blocking, guard) = tracing_appender::non_blocking(appender);
        let layer = tracing_subscriber::fmt::layer()
            .with_ansi(false)
            .with_writer(non_blocking)
            .boxed();
        (Some(layer), Some(guard))
    } else {
        (None, None)
    };

    let run_id = config.run_id.clone().unwrap_or_else(|| uuid::Uuid::new_v4().to_string());

    tracing_subscriber::registry()
        .with(env_filter)
        .with(console_layer)
        .with(file_layer)
        .init();

    tracing::info!(run_id = %run_id, "logging initialized");

    (LoggingGuard { _file_guard: file_guard }, run_id)
}

fn log_dir() -> PathBuf {
    dirs::data_local_dir()
        .unwrap_or_else(std::env::temp_dir)
        .join(toolgate_storage::DATA_DIR_NAME)
        .join("logs")
}
