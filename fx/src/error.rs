//! Rate acquisition error types.

use thiserror::Error;

/// Errors that can occur while acquiring rates from a provider.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FxError {
    /// The provider rate limited the request (HTTP 429).
    #[error("Rate limit exceeded: {provider}")]
    RateLimited { provider: String },

    /// The provider rejected the API key.
    #[error("Invalid credentials: {provider}")]
    InvalidCredentials { provider: String },

    /// Non-success response or transport failure.
    #[error("Provider error: {provider} - {message}")]
    ProviderError {
        provider: String,
        /// HTTP status, if a response was received at all.
        status: Option<u16>,
        message: String,
    },

    /// The request timed out.
    #[error("Timeout: {provider}")]
    Timeout { provider: String },

    /// The response could not be decoded or is missing required data.
    #[error("Invalid response from {provider}: {message}")]
    InvalidResponse { provider: String, message: String },

    /// More pairs than the provider accepts in one request.
    #[error("Batch of {size} pairs exceeds provider limit of {max}")]
    BatchTooLarge { size: usize, max: usize },

    /// A pipeline worker died before delivering its batches.
    #[error("Rate worker failed: {0}")]
    Worker(String),

    /// The refresh was cancelled before completing.
    #[error("Rate refresh cancelled")]
    Cancelled,
}

impl FxError {
    /// Check if a single call may succeed when retried.
    pub fn is_transient(&self) -> bool {
        match self {
            FxError::Timeout { .. } => true,
            FxError::ProviderError { status: None, .. } => true,
            FxError::ProviderError {
                status: Some(status),
                ..
            } => *status >= 500,
            _ => false,
        }
    }

    /// Check if this error only reports cancellation.
    pub fn is_cancelled(&self) -> bool {
        matches!(self, FxError::Cancelled)
    }

    /// Get the stable error code.
    pub fn error_code(&self) -> &'static str {
        match self {
            FxError::RateLimited { .. } => "RATE_LIMITED",
            FxError::InvalidCredentials { .. } => "INVALID_CREDENTIALS",
            FxError::ProviderError { .. } => "PROVIDER_ERROR",
            FxError::Timeout { .. } => "TIMEOUT",
            FxError::InvalidResponse { .. } => "INVALID_RESPONSE",
            FxError::BatchTooLarge { .. } => "BATCH_TOO_LARGE",
            FxError::Worker(_) => "WORKER_FAILED",
            FxError::Cancelled => "CANCELLED",
        }
    }
}

/// Result type for rate acquisition.
pub type FxResult<T> = Result<T, FxError>;
