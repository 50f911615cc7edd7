//! Tracing subscriber setup

use crate::config::LoggingConfig;
use crate::{Error, Result};
use tracing_subscriber::{fmt, EnvFilter};

/// Install the global tracing subscriber
///
/// `RUST_LOG` wins over the configured level when it is set, so operators can
/// raise verbosity for a single module without editing the TOML file.
pub fn init_tracing(config: &LoggingConfig) -> Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&config.level))
        .map_err(|e| Error::Config(format!("Invalid log level '{}': {}", config.level, e)))?;

    let subscriber = fmt().with_env_filter(filter).with_target(true).finish();

    tracing::subscriber::set_global_default(subscriber)
        .map_err(|e| Error::Internal(format!("Failed to install tracing subscriber: {}", e)))
}
