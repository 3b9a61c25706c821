use anyhow::{Context, Result};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, fmt};

use mindful_config::TelemetryConfig;

/// Install the global subscriber.  `RUST_LOG` wins over the configured level.
/// Keep the returned guard alive for the life of the process so the file
/// writer flushes.
pub fn init(config: &TelemetryConfig) -> Result<Option<WorkerGuard>> {
    let filter = match EnvFilter::try_from_default_env() {
        Ok(filter) => filter,
        Err(_) => EnvFilter::try_new(&config.log_level)
            .with_context(|| format!("invalid telemetry.log_level {:?}", config.log_level))?,
    };
    let stderr = fmt::layer().with_writer(std::io::stderr);

    if config.log_dir.trim().is_empty() {
        tracing_subscriber::registry()
            .with(filter)
            .with(stderr)
            .try_init()
            .context("installing tracing subscriber")?;
        return Ok(None);
    }

    let appender = tracing_appender::rolling::daily(&config.log_dir, "mindful.log");
    let (writer, guard) = tracing_appender::non_blocking(appender);
    tracing_subscriber::registry()
        .with(filter)
        .with(stderr)
        .with(fmt::layer().with_ansi(false).with_writer(writer))
        .try_init()
        .context("installing tracing subscriber")?;
    Ok(Some(guard))
}
