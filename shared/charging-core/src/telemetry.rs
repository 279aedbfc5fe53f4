//! Tracing bootstrap shared by all charging binaries

use tracing_subscriber::EnvFilter;

use crate::config::ServiceConfig;
use crate::error::{ChargingError, Result};

/// Install the global tracing subscriber.
///
/// `RUST_LOG` wins when present; otherwise `default_directive` (for example
/// `charging_service=debug`) is layered over the configured log level.
pub fn init_tracing(config: &ServiceConfig, default_directive: &str) -> Result<()> {
    let filter = EnvFilter::try_from_default_env().or_else(|_| {
        EnvFilter::try_new(&config.log_level).and_then(|f| {
            default_directive
                .parse()
                .map(|directive| f.add_directive(directive))
        })
    });
    let filter = filter.map_err(|e| ChargingError::Config(format!("Invalid log filter: {}", e)))?;

    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    let installed = if config.log_json {
        builder.json().try_init()
    } else {
        builder.try_init()
    };

    installed.map_err(|e| ChargingError::Config(format!("Tracing initialization failed: {}", e)))
}
