use thiserror::Error;

/// Errors surfaced by [`ToolProviderClient::call`](crate::ToolProviderClient::call).
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ProviderError {
    #[error("provider '{provider}' timed out after {timeout_ms}ms calling '{method}'")]
    Timeout {
        provider: String,
        method: String,
        timeout_ms: u64,
    },

    #[error("provider '{provider}' process failure: {message}")]
    Process { provider: String, message: String },

    #[error("provider '{provider}' failed '{method}': {message}")]
    Remote {
        provider: String,
        method: String,
        message: String,
    },

    #[error("provider '{provider}' does not support method '{method}'")]
    UnsupportedMethod { provider: String, method: String },

    #[error("no fallback available for provider '{provider}'")]
    NoFallbackAvailable { provider: String },
}

impl ProviderError {
    pub fn process(provider: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Process {
            provider: provider.into(),
            message: message.into(),
        }
    }

    pub fn remote(
        provider: impl Into<String>,
        method: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self::Remote {
            provider: provider.into(),
            method: method.into(),
            message: message.into(),
        }
    }

    pub const fn code(&self) -> &'static str {
        match self {
            Self::Timeout { .. } => "provider.timeout",
            Self::Process { .. } => "provider.process",
            Self::Remote { .. } => "provider.remote",
            Self::UnsupportedMethod { .. } => "provider.unsupported_method",
            Self::NoFallbackAvailable { .. } => "provider.no_fallback",
        }
    }

    pub fn provider(&self) -> &str {
        match self {
            Self::Timeout { provider, .. }
            | Self::Process { provider, .. }
            | Self::Remote { provider, .. }
            | Self::UnsupportedMethod { provider, .. }
            | Self::NoFallbackAvailable { provider } => provider,
        }
    }

    /// Process-level failures count against the provider's circuit breaker.
    pub const fn is_process_failure(&self) -> bool {
        matches!(self, Self::Process { .. })
    }
}
