//! Tracing subscriber setup for services embedding the HTTP layer
//!
//! Audit records are ordinary `tracing` events under the `audit` target, so
//! the same filter directives route or silence them.

use serde::{Deserialize, Serialize};
use std::str::FromStr;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

use crate::errors::{WebError, WebResult};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}

impl FromStr for LogFormat {
    type Err = WebError;

    fn from_str(s: &str) -> WebResult<Self> {
        match s.to_ascii_lowercase().as_str() {
            "pretty" | "text" => Ok(LogFormat::Pretty),
            "json" => Ok(LogFormat::Json),
            other => Err(WebError::internal(format!("Unknown log format: {}", other))),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Filter directives, e.g. `info,audit=debug`
    pub level: String,
    pub format: LogFormat,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: LogFormat::Pretty,
        }
    }
}

impl LoggingConfig {
    /// `CIVIBOOK_LOG_LEVEL` and `CIVIBOOK_LOG_FORMAT` over the defaults
    pub fn from_env() -> WebResult<Self> {
        let mut config = Self::default();
        if let Ok(level) = std::env::var("CIVIBOOK_LOG_LEVEL") {
            config.level = level;
        }
        if let Ok(format) = std::env::var("CIVIBOOK_LOG_FORMAT") {
            config.format = format.parse()?;
        }
        Ok(config)
    }

    fn env_filter(&self) -> EnvFilter {
        EnvFilter::try_new(&self.level)
            .or_else(|_| EnvFilter::try_from_default_env())
            .unwrap_or_else(|_| EnvFilter::new("info"))
    }
}

/// Install the global subscriber
///
/// Returns `false` when a subscriber was already installed; the existing one
/// is left in place.
pub fn init_tracing(config: &LoggingConfig) -> bool {
    let registry = tracing_subscriber::registry().with(config.env_filter());

    let result = match config.format {
        LogFormat::Pretty => registry
            .with(tracing_subscriber::fmt::layer().with_target(true))
            .try_init(),
        LogFormat::Json => registry
            .with(tracing_subscriber::fmt::layer().json().with_current_span(true))
            .try_init(),
    };

    match result {
        Ok(()) => true,
        Err(e) => {
            tracing::debug!("Tracing already initialized: {}", e);
            false
        }
    }
}
