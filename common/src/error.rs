//! Error types for currency conversion.

use crate::{CurrencyCode, CurrencyKind};
use thiserror::Error;

/// Errors returned to callers of a conversion.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConversionError {
    /// Unknown or disabled currency.
    #[error("currency with code \"{0}\" is not available for conversion")]
    CurrencyNotAvailable(CurrencyCode),

    /// Both sides share the same classification.
    #[error("currency pair \"{base}/{quote}\" types are not compatible ({base_kind}/{quote_kind})")]
    InvalidCurrencyPair {
        base: CurrencyCode,
        quote: CurrencyCode,
        base_kind: CurrencyKind,
        quote_kind: CurrencyKind,
    },

    /// A needed rate is missing or unusable. Retryable once the cache refreshes.
    #[error("invalid rate for pair, please try later")]
    InvalidInternalRate,

    /// Unexpected internal fault. Deliberately opaque.
    #[error("service internal error")]
    ServiceInternal,
}

impl ConversionError {
    /// Check if the caller can fix this error by changing the request.
    pub fn is_client_error(&self) -> bool {
        matches!(
            self,
            ConversionError::CurrencyNotAvailable(_) | ConversionError::InvalidCurrencyPair { .. }
        )
    }

    /// Get the stable error code.
    pub fn error_code(&self) -> &'static str {
        match self {
            ConversionError::CurrencyNotAvailable(_) => "CURRENCY_NOT_AVAILABLE",
            ConversionError::InvalidCurrencyPair { .. } => "INVALID_CURRENCY_PAIR",
            ConversionError::InvalidInternalRate => "INVALID_INTERNAL_RATE",
            ConversionError::ServiceInternal => "SERVICE_INTERNAL",
        }
    }
}

/// Result type alias for conversions.
pub type ConversionResult<T> = std::result::Result<T, ConversionError>;
