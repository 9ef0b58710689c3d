//! Error taxonomy for the authentication core.
//!
//! Only [`AuthError`] crosses module boundaries. The specific reason behind an
//! authentication failure is logged where it is detected and then collapsed
//! into [`AuthError::InvalidToken`] or [`AuthError::InvalidCredentials`].

use crate::rate_limit::RateLimitExceeded;
use axum::http::StatusCode;
use std::path::PathBuf;
use thiserror::Error;

/// Result type for authentication operations.
pub type AuthResult<T> = Result<T, AuthError>;

/// Authentication error enum covering all failure classes.
#[derive(Debug, Error)]
pub enum AuthError {
    /// Fatal misconfiguration, detected at construction time.
    #[error("configuration error: {0}")]
    Configuration(#[from] ConfigError),

    #[error("not found")]
    NotFound,

    #[error("invalid credentials")]
    InvalidCredentials,

    /// Missing, revoked, expired, forged or otherwise unusable token.
    #[error("invalid token")]
    InvalidToken,

    #[error("conflict: {0}")]
    Conflict(String),

    #[error(transparent)]
    RateLimited(#[from] RateLimitExceeded),

    #[error("provider error: {0}")]
    Provider(#[from] ProviderError),

    /// The mutation was applied in memory but is not durable.
    #[error("store error: {0}")]
    Store(#[from] StoreError),

    #[error("internal error: {0}")]
    Internal(String),
}

impl AuthError {
    /// HTTP status the outer server should answer with.
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::NotFound | Self::InvalidCredentials | Self::InvalidToken => {
                StatusCode::UNAUTHORIZED
            }
            Self::Conflict(_) => StatusCode::CONFLICT,
            Self::RateLimited(_) => StatusCode::TOO_MANY_REQUESTS,
            Self::Provider(_) => StatusCode::BAD_GATEWAY,
            Self::Configuration(_) | Self::Store(_) | Self::Internal(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }

    /// Whether this error means "the caller is not who they claim to be".
    pub fn is_authentication_failure(&self) -> bool {
        matches!(
            self,
            Self::NotFound | Self::InvalidCredentials | Self::InvalidToken
        )
    }
}

/// Configuration errors. Never recovered from.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("unknown OAuth provider: {0}")]
    UnknownProvider(String),

    #[error("invalid IP or CIDR: {0}")]
    InvalidCidr(String),

    #[error("unusable key material at {path}: {reason}")]
    InvalidKeyMaterial { path: PathBuf, reason: String },

    #[error("unsupported JWT algorithm: {0}")]
    UnsupportedAlgorithm(String),

    #[error("invalid JWT secret: must be at least 32 bytes")]
    InvalidJwtSecret,

    #[error("unsupported store backend: {0}")]
    UnsupportedBackend(String),

    #[error("missing setting: {0}")]
    MissingSetting(&'static str),

    #[error("{field} of {minutes} minutes exceeds the supported maximum")]
    InvalidLifetime { field: &'static str, minutes: u64 },

    #[error("invalid URL in {field}: {reason}")]
    InvalidUrl { field: String, reason: String },

    #[error("invalid rate limit configuration: {0}")]
    InvalidRateLimit(String),

    #[error("invalid log level: {0}")]
    InvalidLogLevel(String),
}

/// Persistence failures on file or Redis backed stores.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("failed to access {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("unsupported schema version {found} (expected at most {supported})")]
    UnsupportedVersion { found: u64, supported: u64 },

    #[error("malformed store document: {0}")]
    Malformed(String),

    #[cfg(feature = "redis")]
    #[error("redis error: {0}")]
    Redis(#[from] redis::RedisError),
}

/// Failures talking to an external OAuth provider.
#[derive(Debug, Error)]
pub enum ProviderError {
    #[error("request failed: {0}")]
    Transport(#[source] reqwest::Error),

    #[error("request timed out")]
    Timeout,

    #[error("provider answered {status}")]
    Status { status: u16, body: String },

    #[error("malformed provider response: {0}")]
    InvalidResponse(String),
}

impl From<reqwest::Error> for ProviderError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            ProviderError::Timeout
        } else {
            ProviderError::Transport(e)
        }
    }
}
