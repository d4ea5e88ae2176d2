//! Logging setup
//!
//! All logging goes through `tracing`. Binaries call [`init_tracing`] once at
//! startup; libraries and tests install their own subscriber.

use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Registry};

use crate::config::LoggingConfig;
use crate::error::{FaultError, FaultResult};

/// Install the global subscriber. `RUST_LOG` wins over the configured level.
pub fn init_tracing(config: &LoggingConfig) -> FaultResult<()> {
    let env_filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&config.level))
        .map_err(|e| FaultError::configuration("logging", format!("Invalid log filter: {}", e)))?;

    let registry = Registry::default().with(env_filter);
    let installed = match config.format.as_str() {
        "json" => registry
            .with(fmt::layer().json().with_target(true).with_current_span(false))
            .try_init(),
        _ => registry
            .with(fmt::layer().with_target(true).with_thread_ids(true))
            .try_init(),
    };

    installed.map_err(|e| FaultError::configuration("logging", format!("Failed to install subscriber: {}", e)))
}
