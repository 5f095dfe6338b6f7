//! Capability errors.
//!
//! One enum per external capability. None of these reach the caller of a
//! context cycle: the component that hits one turns it into a backoff step
//! and a log line.

use thiserror::Error;

/// Failures of the generative capability.
#[derive(Debug, Clone, Error)]
pub enum ProviderError {
    #[error("Provider returned status {status_code}: {message}")]
    ApiError { status_code: u16, message: String },

    #[error("Provider rate limit hit, retry in {retry_after_secs}s")]
    RateLimited { retry_after_secs: u64 },

    #[error("Provider rejected credentials: {0}")]
    AuthenticationFailed(String),

    #[error("Provider not configured: {0}")]
    NotConfigured(String),

    #[error("Provider call timed out: {0}")]
    Timeout(String),

    #[error("Provider unreachable: {0}")]
    Network(String),

    /// The call succeeded but the answer had no usable text.
    #[error("Malformed provider answer: {0}")]
    Parse(String),
}

impl ProviderError {
    /// Unconfigured capabilities are a silent no-op, not a failure.
    pub fn is_not_configured(&self) -> bool {
        matches!(self, Self::NotConfigured(_))
    }
}

/// Failures of the lookup capability.
#[derive(Debug, Clone, Error)]
pub enum SearchError {
    #[error("Search not configured: {0}")]
    NotConfigured(String),

    #[error("Search timed out after {timeout_secs}s")]
    Timeout { timeout_secs: u64 },

    #[error("Search failed: {0}")]
    Failed(String),

    #[error("Search backend unreachable: {0}")]
    Network(String),
}

/// Failures loading or saving the knowledge snapshot.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Knowledge storage failed: {0}")]
    Storage(String),

    #[error("Knowledge snapshot unreadable: {0}")]
    Serialization(String),
}
