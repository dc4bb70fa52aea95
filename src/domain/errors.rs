//! Error taxonomy shared across the crate.
//!
//! `StoreError` covers persistence failures, `UpstreamError` covers LLM
//! provider / channel transport failures, and `OrchestraError` is the
//! umbrella type services return, wrapping both plus the validation and
//! concurrency failures that arise purely in the domain layer.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("query failed: {0}")]
    QueryFailed(#[from] sqlx::Error),

    #[error("record not found: {0}")]
    NotFound(String),

    #[error("invalid uuid: {0}")]
    InvalidUuid(#[from] uuid::Error),

    #[error("invalid timestamp: {0}")]
    InvalidTimestamp(#[from] chrono::ParseError),

    #[error("serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),

    #[error("connection pool error: {0}")]
    ConnectionPoolError(String),

    #[error("migration error: {0}")]
    MigrationError(String),

    #[error("constraint violation: {0}")]
    ConstraintViolation(String),
}

/// Coarse classification of upstream LLM/channel failures, used to decide
/// retry-with-backoff vs. surface-to-operator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpstreamCategory {
    RateLimited,
    Overloaded,
    AuthFailed,
    InvalidRequest,
    Timeout,
    Unknown,
}

#[derive(Debug, Error)]
pub enum UpstreamError {
    #[error("upstream transport error: {0}")]
    Transport(String),

    #[error("upstream returned an error response: {0}")]
    Response(String),

    #[error("upstream request timed out after {0}ms")]
    Timeout(u64),

    #[error("channel is not connected: {0}")]
    NotConnected(String),
}

impl UpstreamError {
    /// Classify a raw upstream error string by substring match, the way
    /// `backoff` policies decide whether a failure is worth retrying.
    pub fn classify(raw: &str) -> UpstreamCategory {
        let lower = raw.to_lowercase();
        if lower.contains("rate limit") || lower.contains("429") {
            UpstreamCategory::RateLimited
        } else if lower.contains("overloaded") || lower.contains("529") || lower.contains("503") {
            UpstreamCategory::Overloaded
        } else if lower.contains("unauthorized") || lower.contains("401") || lower.contains("403") {
            UpstreamCategory::AuthFailed
        } else if lower.contains("invalid") || lower.contains("400") {
            UpstreamCategory::InvalidRequest
        } else if lower.contains("timeout") || lower.contains("timed out") {
            UpstreamCategory::Timeout
        } else {
            UpstreamCategory::Unknown
        }
    }

    pub fn category(&self) -> UpstreamCategory {
        match self {
            Self::Timeout(_) => UpstreamCategory::Timeout,
            Self::Transport(msg) | Self::Response(msg) => Self::classify(msg),
            Self::NotConnected(_) => UpstreamCategory::Unknown,
        }
    }

    pub fn is_retryable(&self) -> bool {
        matches!(
            self.category(),
            UpstreamCategory::RateLimited | UpstreamCategory::Overloaded | UpstreamCategory::Timeout
        )
    }
}

#[derive(Debug, Error)]
pub enum OrchestraError {
    #[error("validation failed: {0}")]
    Validation(String),

    #[error("concurrency violation: {0}")]
    Concurrency(String),

    #[error("dependency error: {0}")]
    Dependency(String),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Upstream(#[from] UpstreamError),
}
