use std::path::PathBuf;

use thiserror::Error;

use crate::http_client::HttpError;
use crate::provider::ProviderError;
use crate::transcription::TranscriptionError;
use crate::{StrategyKind, ValidationError};

/// Terminal failures of a `collect` call.
#[derive(Debug, Error)]
pub enum CollectError {
    #[error("unsupported source '{url}': {reason}")]
    UnsupportedSource { url: String, reason: String },

    #[error("invalid source: {0}")]
    InvalidSource(#[from] ValidationError),

    #[error("{strategy} strategy unavailable: {reason}")]
    StrategyUnavailable {
        strategy: StrategyKind,
        reason: String,
    },

    #[error("{strategy} strategy failed: {message}")]
    StrategyFailed {
        strategy: StrategyKind,
        message: String,
    },

    #[error(transparent)]
    Provider(#[from] ProviderError),

    #[error(transparent)]
    Transcription(#[from] TranscriptionError),

    #[error("http failure: {0}")]
    Http(#[from] HttpError),

    #[error("i/o failure at '{path}': {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to encode artifact: {0}")]
    Encode(#[from] serde_json::Error),

    #[error("strategy chain is empty")]
    EmptyChain,
}

impl CollectError {
    pub fn unsupported(url: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::UnsupportedSource {
            url: url.into(),
            reason: reason.into(),
        }
    }

    pub fn unavailable(strategy: StrategyKind, reason: impl Into<String>) -> Self {
        Self::StrategyUnavailable {
            strategy,
            reason: reason.into(),
        }
    }

    pub fn failed(strategy: StrategyKind, message: impl Into<String>) -> Self {
        Self::StrategyFailed {
            strategy,
            message: message.into(),
        }
    }

    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    pub fn code(&self) -> &'static str {
        match self {
            Self::UnsupportedSource { .. } => "collect.unsupported_source",
            Self::InvalidSource(_) => "collect.invalid_source",
            Self::StrategyUnavailable { .. } => "collect.strategy_unavailable",
            Self::StrategyFailed { .. } => "collect.strategy_failed",
            Self::Provider(error) => error.code(),
            Self::Transcription(error) => error.code(),
            Self::Http(_) => "collect.http",
            Self::Io { .. } => "collect.io",
            Self::Encode(_) => "collect.encode",
            Self::EmptyChain => "collect.empty_chain",
        }
    }
}
