//! Tracing subscriber setup for binaries and tests that embed the library.

use tracing_subscriber::EnvFilter;

use crate::config::LoggingConfig;
use crate::error::{Error, Result};

/// Filter used when `RUST_LOG` is not set: this crate at `level`, dependencies at warn.
pub fn default_filter(level: &str) -> String {
    format!("{}={level},warn", env!("CARGO_CRATE_NAME"))
}

/// Install a global fmt subscriber.
///
/// `RUST_LOG` takes precedence over the config. Fails instead of panicking
/// when a global subscriber is already installed.
pub fn init_tracing(config: &LoggingConfig) -> Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_filter(&config.level)));

    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false);

    let installed = if config.json {
        subscriber.json().try_init()
    } else {
        subscriber.try_init()
    };
    installed.map_err(|e| Error::Config(format!("failed to install tracing subscriber: {e}")))
}
