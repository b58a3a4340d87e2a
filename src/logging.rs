//! Leveled logging setup
//!
//! The core only emits `tracing` events; this module decides where they go.
//! Sync mode writes straight into a daily rolling file, async mode hands
//! lines to a background writer thread through a bounded queue.

use tracing_appender::non_blocking::{NonBlockingBuilder, WorkerGuard};
use tracing_subscriber::fmt::time::ChronoLocal;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

use crate::config::{LogConfig, LogMode};
use crate::error::{ServerError, ServerResult};

const ASYNC_QUEUE_LINES: usize = 800;

/// Keeps the background writer alive; flushes on drop
pub enum LogGuard {
    Disabled,
    Sync,
    Async(WorkerGuard),
}

pub fn setup_logging(config: &LogConfig) -> ServerResult<LogGuard> {
    if config.disabled {
        return Ok(LogGuard::Disabled);
    }

    std::fs::create_dir_all(&config.dir)?;
    let appender = tracing_appender::rolling::daily(&config.dir, &config.file_prefix);
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let timer = ChronoLocal::new("%Y-%m-%d %H:%M:%S%.6f".to_string());

    match config.mode {
        LogMode::Sync => {
            tracing_subscriber::registry()
                .with(filter)
                .with(
                    tracing_subscriber::fmt::layer()
                        .with_timer(timer)
                        .with_ansi(false)
                        .with_thread_names(true)
                        .with_writer(appender),
                )
                .try_init()
                .map_err(|e| ServerError::Logging(e.to_string()))?;
            Ok(LogGuard::Sync)
        }
        LogMode::Async => {
            let (writer, guard) = NonBlockingBuilder::default()
                .buffered_lines_limit(ASYNC_QUEUE_LINES)
                .lossy(true)
                .finish(appender);
            tracing_subscriber::registry()
                .with(filter)
                .with(
                    tracing_subscriber::fmt::layer()
                        .with_timer(timer)
                        .with_ansi(false)
                        .with_thread_names(true)
                        .with_writer(writer),
                )
                .try_init()
                .map_err(|e| ServerError::Logging(e.to_string()))?;
            Ok(LogGuard::Async(guard))
        }
    }
}
