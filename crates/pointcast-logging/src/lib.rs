//! # pointcast-logging
//!
//! Installs the process-wide `tracing` subscriber. `RUST_LOG` takes
//! precedence over the configured level; per-module overrides are appended
//! as extra filter directives.

#![deny(unsafe_code)]

pub mod types;

pub use types::{LogFormat, LogLevel};

use thiserror::Error;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer};

/// Subscriber configuration.
#[derive(Clone, Debug, Default)]
pub struct LoggingConfig {
    /// Default level when `RUST_LOG` is unset.
    pub level: LogLevel,
    /// Output encoding.
    pub format: LogFormat,
    /// Per-module level overrides (e.g. `"pointcast_server" => Debug`).
    pub module_levels: Vec<(String, LogLevel)>,
}

/// Errors installing the subscriber.
#[derive(Debug, Error)]
pub enum LoggingError {
    /// A global subscriber is already set.
    #[error("failed to install tracing subscriber: {0}")]
    Init(#[from] tracing_subscriber::util::TryInitError),
}

/// Build the `EnvFilter` directive string for a config.
#[must_use]
pub fn filter_directives(config: &LoggingConfig) -> String {
    let mut directives = config.level.as_str().to_string();
    for (module, level) in &config.module_levels {
        directives.push(',');
        directives.push_str(module);
        directives.push('=');
        directives.push_str(level.as_str());
    }
    directives
}

/// Install the global subscriber. Call once at startup.
pub fn init_subscriber(config: &LoggingConfig) -> Result<(), LoggingError> {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(filter_directives(config)));

    let fmt_layer = match config.format {
        LogFormat::Json => tracing_subscriber::fmt::layer()
            .json()
            .with_target(true)
            .with_span_list(true)
            .boxed(),
        LogFormat::Pretty => tracing_subscriber::fmt::layer().with_target(true).boxed(),
    };

    tracing_subscriber::registry()
        .with(fmt_layer.with_filter(env_filter))
        .try_init()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn directives_default_level_only() {
        assert_eq!(filter_directives(&LoggingConfig::default()), "info");
    }

    #[test]
    fn directives_with_module_overrides() {
        let config = LoggingConfig {
            level: LogLevel::Warn,
            format: LogFormat::Json,
            module_levels: vec![
                ("pointcast_server".into(), LogLevel::Debug),
                ("tower_http".into(), LogLevel::Error),
            ],
        };
        assert_eq!(
            filter_directives(&config),
            "warn,pointcast_server=debug,tower_http=error"
        );
    }

    #[test]
    fn second_init_fails() {
        let config = LoggingConfig::default();
        let _ = init_subscriber(&config);
        assert!(init_subscriber(&config).is_err());
    }
}
