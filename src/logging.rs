//! Tracing subscriber setup

use std::io::{self, IsTerminal};

use serde::{Deserialize, Serialize};
use tracing::subscriber::SetGlobalDefaultError;
use tracing::Subscriber;
use tracing_subscriber::{fmt, EnvFilter};

/// Filter used when `RUST_LOG` is unset.
pub const DEFAULT_FILTER: &str = "info";

/// Log output format
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "snake_case")]
pub enum LogFormat {
    /// Human-readable single line output
    #[default]
    Compact,
    /// Structured JSON, one object per event
    Json,
}

#[derive(Debug, thiserror::Error)]
pub enum LoggingError {
    #[error("invalid log filter: {0}")]
    Filter(String),

    #[error("failed to install subscriber: {0}")]
    Subscriber(#[from] SetGlobalDefaultError),
}

/// Install a global subscriber writing to stderr.
///
/// The filter comes from `RUST_LOG`, falling back to [`DEFAULT_FILTER`].
/// Returns `Ok(false)` without touching anything when another subscriber is
/// already installed.
pub fn init(format: LogFormat) -> Result<bool, LoggingError> {
    if tracing::dispatcher::has_been_set() {
        return Ok(false);
    }

    let filter = match std::env::var(EnvFilter::DEFAULT_ENV) {
        Ok(directives) => EnvFilter::try_new(directives),
        Err(_) => EnvFilter::try_new(DEFAULT_FILTER),
    }
    .map_err(|e| LoggingError::Filter(e.to_string()))?;

    let builder = fmt::Subscriber::builder()
        .with_env_filter(filter)
        .with_target(true)
        .with_writer(io::stderr)
        .with_ansi(io::stderr().is_terminal());

    let subscriber: Box<dyn Subscriber + Send + Sync> = match format {
        LogFormat::Json => Box::new(builder.json().flatten_event(true).finish()),
        LogFormat::Compact => Box::new(builder.compact().finish()),
    };

    match tracing::subscriber::set_global_default(subscriber) {
        Ok(()) => Ok(true),
        // lost a race with another installer
        Err(_) if tracing::dispatcher::has_been_set() => Ok(false),
        Err(e) => Err(e.into()),
    }
}
