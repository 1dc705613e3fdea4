use thiserror::Error;

/// Core error type for ollama-meter.
/// Internally, modules can use `anyhow::Result<T>` for convenience,
/// but public boundaries should expose `CoreResult<T>` with this error.
#[derive(Debug, Error)]
pub enum MeterError {
    #[error("validation failed: {0}")]
    Validation(String),

    #[error("rate limited by {provider}")]
    RateLimited {
        provider: String,
        retry_after: Option<u64>,
    },

    #[error("provider unavailable: {provider}")]
    ProviderUnavailable { provider: String },

    #[error("upstream error from {provider}: {code} {message}")]
    ProviderError {
        provider: String,
        code: String,
        message: String,
    },

    #[error("metering submission failed: {0}")]
    Metering(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl MeterError {
    /// Rewrites the provider label on transport-level errors so callers see
    /// which collaborator (e.g. "ollama", "revenium") failed.
    pub fn with_provider(self, name: &str) -> Self {
        match self {
            Self::RateLimited { retry_after, .. } => Self::RateLimited {
                provider: name.to_string(),
                retry_after,
            },
            Self::ProviderUnavailable { .. } => Self::ProviderUnavailable {
                provider: name.to_string(),
            },
            Self::ProviderError { code, message, .. } => Self::ProviderError {
                provider: name.to_string(),
                code,
                message,
            },
            other => other,
        }
    }
}

pub type CoreResult<T> = std::result::Result<T, MeterError>;
