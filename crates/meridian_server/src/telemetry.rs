//! Tracing subscriber setup.

use crate::{LogFormat, LoggingConfig};
use meridian_error::{ConfigError, MeridianResult};
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// Install the global subscriber.
///
/// `RUST_LOG` wins over the configured filter. Fails when a subscriber is
/// already installed.
pub fn init_tracing(config: &LoggingConfig) -> MeridianResult<()> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(config.filter()))
        .map_err(|e| ConfigError::new(format!("Invalid log filter: {}", e)))?;

    let registry = tracing_subscriber::registry().with(filter);
    let installed = match config.format() {
        LogFormat::Json => registry
            .with(fmt::layer().json().with_current_span(true))
            .try_init(),
        LogFormat::Pretty => registry.with(fmt::layer().with_target(true)).try_init(),
    };
    installed.map_err(|e| ConfigError::new(format!("Failed to install tracing: {}", e)))?;

    tracing::info!(format = ?config.format(), "Tracing initialised");
    Ok(())
}
