//! Log output setup.
//!
//! Library code only emits `tracing` events; binaries call
//! [`init_tracing`] once to install a subscriber.

use crate::config::{LogFormat, LoggingConfig};
use thiserror::Error;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter};

/// The subscriber could not be installed.
#[derive(Debug, Error)]
pub enum TracingInitError {
    /// The configured level is not a valid filter directive.
    #[error("invalid log filter '{directive}': {message}")]
    Filter {
        /// The rejected directive.
        directive: String,
        /// Parser message.
        message: String,
    },

    /// A global subscriber is already set.
    #[error("tracing subscriber already installed: {0}")]
    AlreadySet(String),
}

/// Builds the filter: `RUST_LOG` when set, otherwise the configured level.
pub fn filter(config: &LoggingConfig) -> Result<EnvFilter, TracingInitError> {
    if let Ok(filter) = EnvFilter::try_from_default_env() {
        return Ok(filter);
    }
    directive_filter(&config.level)
}

fn directive_filter(directive: &str) -> Result<EnvFilter, TracingInitError> {
    EnvFilter::try_new(directive).map_err(|e| TracingInitError::Filter {
        directive: directive.to_string(),
        message: e.to_string(),
    })
}

/// Installs the global subscriber in the configured format.
pub fn init_tracing(config: &LoggingConfig) -> Result<(), TracingInitError> {
    let filter = filter(config)?;
    let registry = tracing_subscriber::registry().with(filter);
    let result = match config.format {
        LogFormat::Pretty => registry.with(fmt::layer().with_target(false)).try_init(),
        LogFormat::Json => registry
            .with(fmt::layer().json().flatten_event(true).with_current_span(true))
            .try_init(),
    };
    result.map_err(|e| TracingInitError::AlreadySet(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_directive_filter() {
        assert!(directive_filter("info,retail_etl=debug").is_ok());
        let err = directive_filter("retail_etl=loud").unwrap_err();
        assert!(err.to_string().contains("retail_etl=loud"));
    }
}
