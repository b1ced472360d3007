//! Holder log setup driven by the `[logging]` section.
//!
//! `RUST_LOG` wins over the configured level when it is set and parses.

use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::config::LoggingConfig;
use crate::{Error, Result};

/// Install the global subscriber described by `config`.
///
/// Fails with [`Error::Config`] when the level does not parse or a global
/// subscriber is already installed.
///
/// # Example
/// ```no_run
/// use keyward_core::{logging, Config};
///
/// let config = Config::default_config();
/// logging::init(&config.logging).ok();
/// tracing::info!(device_id = "desktop-1", "Watching device challenges");
/// ```
pub fn init(config: &LoggingConfig) -> Result<()> {
    let filter = filter_for(config)?;
    let registry = tracing_subscriber::registry().with(filter);

    let installed = if config.json {
        registry
            .with(fmt::layer().json().with_target(true).with_thread_ids(true))
            .try_init()
    } else {
        registry
            .with(fmt::layer().with_target(true).with_thread_ids(true))
            .try_init()
    };
    installed.map_err(|e| Error::Config(format!("logging already initialized: {e}")))
}

fn filter_for(config: &LoggingConfig) -> Result<EnvFilter> {
    EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&config.level))
        .map_err(|e| Error::Config(format!("invalid log level {:?}: {e}", config.level)))
}
