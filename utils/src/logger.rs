use common::config::LogConfig;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_log::LogTracer;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::{util::SubscriberInitExt, EnvFilter};

/// Initializes the process-wide logger.
///
/// `log::*` macros are bridged into `tracing` via [`LogTracer`], filtered by
/// `RUST_LOG` (falling back to the configured level, then `info`). When a log
/// directory is configured, a daily-rolling file writer is attached alongside
/// stdout. The returned guard must be kept alive for the lifetime of the
/// process or buffered file output is lost.
pub fn init(app_name: &str, config: &LogConfig) -> Option<WorkerGuard> {
    let default_level = config.level.as_deref().unwrap_or("info");
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_level));

    if LogTracer::init().is_err() {
        // Already initialized (tests reuse the process).
        return None;
    }

    let stdout_layer = tracing_subscriber::fmt::layer().with_target(true);

    match &config.dir {
        Some(dir) => {
            let appender =
                tracing_appender::rolling::daily(dir, format!("{app_name}.log"));
            let (file_writer, guard) = tracing_appender::non_blocking(appender);
            let file_layer = tracing_subscriber::fmt::layer()
                .with_ansi(false)
                .with_writer(file_writer);

            tracing_subscriber::registry()
                .with(filter)
                .with(stdout_layer)
                .with(file_layer)
                .init();
            Some(guard)
        }
        None => {
            tracing_subscriber::registry()
                .with(filter)
                .with(stdout_layer)
                .init();
            None
        }
    }
}
