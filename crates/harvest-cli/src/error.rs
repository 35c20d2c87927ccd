use thiserror::Error;

/// CLI-level error categories mapped to exit codes.
#[derive(Debug, Error)]
pub enum CliError {
    #[error("usage error: {0}")]
    Usage(String),

    #[error(transparent)]
    Config(#[from] harvest_core::ConfigError),

    #[error(transparent)]
    Collect(#[from] harvest_core::CollectError),

    #[error(transparent)]
    Provider(#[from] harvest_core::ProviderError),

    #[error(transparent)]
    Serialization(#[from] serde_json::Error),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error("interrupted")]
    Interrupted,
}

impl CliError {
    pub const fn exit_code(&self) -> u8 {
        match self {
            Self::Usage(_) => 2,
            Self::Config(_) => 2,
            Self::Collect(_) => 3,
            Self::Provider(_) => 3,
            Self::Serialization(_) => 4,
            Self::Io(_) => 10,
            Self::Interrupted => 130,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn maps_categories_to_exit_codes() {
        assert_eq!(CliError::Usage(String::from("bad")).exit_code(), 2);
        assert_eq!(
            CliError::from(harvest_core::ConfigError::Invalid(String::from("x"))).exit_code(),
            2
        );
        assert_eq!(
            CliError::from(harvest_core::CollectError::unsupported("u", "r")).exit_code(),
            3
        );
        assert_eq!(
            CliError::from(harvest_core::ProviderError::NoFallbackAvailable {
                provider: String::from("p")
            })
            .exit_code(),
            3
        );
        assert_eq!(CliError::from(std::io::Error::other("disk")).exit_code(), 10);
        assert_eq!(CliError::Interrupted.exit_code(), 130);
    }
}
