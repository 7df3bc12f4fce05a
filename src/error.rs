//! Top-level error types for driftbot.

use std::sync::Arc;

/// Crate-wide result type alias.
pub type Result<T> = std::result::Result<T, Error>;

/// Top-level error enum wrapping domain-specific errors.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Provider(#[from] ProviderError),

    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error("database error: {0}")]
    Sqlx(#[from] sqlx::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// Configuration loading errors. Fatal at startup, never raised while
/// handling a message.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to load config from {path}: {source}")]
    Load {
        path: String,
        source: Arc<std::io::Error>,
    },

    #[error("failed to parse config from {path}: {detail}")]
    Parse { path: String, detail: String },

    #[error("invalid configuration: {0}")]
    Invalid(String),

    #[error("missing required config key: {0}")]
    MissingKey(String),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// Persistent store errors. Callers treat any of these as the store being
/// unreachable and degrade rather than crash.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("failed to connect to SQLite: {0}")]
    Connect(#[source] sqlx::Error),

    #[error("migration failed: {0}")]
    Migration(String),

    #[error("store unavailable: {0}")]
    Unavailable(String),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl From<sqlx::Error> for StoreError {
    fn from(error: sqlx::Error) -> Self {
        StoreError::Unavailable(error.to_string())
    }
}

/// Inference provider errors, normalized across endpoints.
#[derive(Debug, thiserror::Error)]
pub enum ProviderError {
    #[error("request to {provider} timed out after {timeout_secs}s")]
    Timeout { provider: String, timeout_secs: u64 },

    #[error("{provider} rate-limited the request")]
    RateLimited { provider: String },

    #[error("{provider} returned HTTP {status}")]
    Status { provider: String, status: u16 },

    #[error("malformed response from {provider}: {detail}")]
    Malformed { provider: String, detail: String },

    #[error("network error calling {provider}: {detail}")]
    Network { provider: String, detail: String },

    #[error("missing API key for provider: {0}")]
    MissingKey(String),

    #[error("all configured providers failed")]
    Unavailable,

    #[error("no configured provider supports {capability}")]
    CapabilityUnavailable { capability: String },
}

impl ProviderError {
    /// Stable category label used for ErrorRecords and webhook throttling.
    pub fn category(&self) -> &'static str {
        match self {
            ProviderError::Timeout { .. } => "provider_timeout",
            ProviderError::RateLimited { .. } => "provider_rate_limited",
            ProviderError::Status { .. } => "provider_status",
            ProviderError::Malformed { .. } => "provider_malformed",
            ProviderError::Network { .. } => "provider_network",
            ProviderError::MissingKey(_) => "provider_missing_key",
            ProviderError::Unavailable => "provider_unavailable",
            ProviderError::CapabilityUnavailable { .. } => "provider_capability",
        }
    }
}

/// Outbound chat transport errors. A failed send drops that chunk only.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("send to channel {channel_id} failed: {detail}")]
    SendFailed { channel_id: String, detail: String },

    #[error("relay returned HTTP {status}")]
    Status { status: u16 },

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}
