use std::path::PathBuf;

use thiserror::Error;

/// Validation errors for caller-supplied values.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ValidationError {
    #[error("timestamp must be RFC3339 UTC (suffix Z): '{value}'")]
    TimestampNotUtc { value: String },

    #[error("source url cannot be empty")]
    EmptyUrl,

    #[error("max_items must be greater than zero")]
    ZeroMaxItems,

    #[error("invalid strategy '{value}', expected one of actor, api, scrape")]
    InvalidStrategy { value: String },
}

/// Errors raised while loading or validating configuration documents.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config '{path}': {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config '{path}': {message}")]
    Parse { path: PathBuf, message: String },

    #[error("provider '{provider}' declares unknown fallback '{target}'")]
    UnknownFallback { provider: String, target: String },

    #[error("fallback cycle detected: {}", chain.join(" -> "))]
    FallbackCycle { chain: Vec<String> },

    #[error("provider '{provider}' is invalid: {message}")]
    InvalidProvider { provider: String, message: String },

    #[error("invalid configuration: {0}")]
    Invalid(String),
}

impl ConfigError {
    pub const fn code(&self) -> &'static str {
        match self {
            Self::Read { .. } => "config.read",
            Self::Parse { .. } => "config.parse",
            Self::UnknownFallback { .. } => "config.unknown_fallback",
            Self::FallbackCycle { .. } => "config.fallback_cycle",
            Self::InvalidProvider { .. } => "config.invalid_provider",
            Self::Invalid(_) => "config.invalid",
        }
    }
}
