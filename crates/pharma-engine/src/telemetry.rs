//! Tracing bootstrap for binaries embedding the engine.
//!
//! ## Log Levels
//! - `RUST_LOG=debug` - Show debug messages
//! - `RUST_LOG=pharma_engine=trace,sqlx=warn` - Per-crate levels
//! - Otherwise the `[logging] filter` setting (default: `info`)

use tracing_subscriber::EnvFilter;

use crate::config::LoggingConfig;
use crate::error::{EngineError, EngineResult};

/// Builds the event filter: `RUST_LOG` when set, else the configured one.
pub fn env_filter(config: &LoggingConfig) -> EngineResult<EnvFilter> {
    match EnvFilter::try_from_default_env() {
        Ok(filter) => Ok(filter),
        Err(_) => EnvFilter::try_new(&config.filter)
            .map_err(|e| EngineError::Config(format!("invalid log filter '{}': {e}", config.filter))),
    }
}

/// Installs the global subscriber.
///
/// Fails if the filter does not parse or a subscriber is already installed.
pub fn init_tracing(config: &LoggingConfig) -> EngineResult<()> {
    let filter = env_filter(config)?;
    let builder = tracing_subscriber::fmt().with_env_filter(filter).with_target(true);

    let installed = if config.json {
        builder.json().try_init()
    } else {
        builder.try_init()
    };

    installed.map_err(|e| EngineError::Config(format!("tracing already initialized: {e}")))
}
