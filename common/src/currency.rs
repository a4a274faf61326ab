//! Currency model for the rate calculator.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::borrow::Borrow;
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

use crate::error::ConversionError;

/// Currency code, normalized to trimmed upper case.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub struct CurrencyCode(String);

impl CurrencyCode {
    /// Create a new code, normalizing case and surrounding whitespace.
    pub fn new(code: impl AsRef<str>) -> Self {
        Self(code.as_ref().trim().to_uppercase())
    }

    /// Get the code as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Check if the code is empty after normalization.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// US dollar, the reference basis of every stored rate.
    pub fn usd() -> Self {
        Self::new("USD")
    }

    /// Tether, the bridge asset used to price crypto currencies.
    pub fn usdt() -> Self {
        Self::new("USDT")
    }
}

impl fmt::Display for CurrencyCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for CurrencyCode {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

impl From<String> for CurrencyCode {
    fn from(s: String) -> Self {
        Self::new(s)
    }
}

impl From<CurrencyCode> for String {
    fn from(code: CurrencyCode) -> Self {
        code.0
    }
}

impl Borrow<str> for CurrencyCode {
    fn borrow(&self) -> &str {
        &self.0
    }
}

impl AsRef<str> for CurrencyCode {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Classification of a currency. Conversions are only defined across it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum CurrencyKind {
    /// Government-issued currency.
    Fiat,
    /// Crypto asset.
    Crypto,
}

impl CurrencyKind {
    /// Canonical upper-case name, as stored by the currency repository.
    pub fn as_str(&self) -> &'static str {
        match self {
            CurrencyKind::Fiat => "FIAT",
            CurrencyKind::Crypto => "CRYPTO",
        }
    }
}

impl fmt::Display for CurrencyKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error returned when a classification name is not recognized.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("unknown currency classification \"{0}\"")]
pub struct UnknownCurrencyKind(pub String);

impl FromStr for CurrencyKind {
    type Err = UnknownCurrencyKind;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "FIAT" => Ok(CurrencyKind::Fiat),
            "CRYPTO" => Ok(CurrencyKind::Crypto),
            _ => Err(UnknownCurrencyKind(s.to_string())),
        }
    }
}

/// Currency metadata as held by the currency store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Currency {
    /// Unique, case-normalized code.
    pub code: CurrencyCode,
    /// Human-readable name.
    pub name: String,
    /// Fiat or crypto.
    pub kind: CurrencyKind,
    /// Whether the currency may take part in conversions.
    pub enabled: bool,
    /// Last modification time.
    pub updated_at: DateTime<Utc>,
}

impl Currency {
    /// Create a new enabled currency.
    pub fn new(code: impl Into<CurrencyCode>, name: impl Into<String>, kind: CurrencyKind) -> Self {
        Self {
            code: code.into(),
            name: name.into(),
            kind,
            enabled: true,
            updated_at: Utc::now(),
        }
    }

    /// Shorthand for an enabled fiat currency.
    pub fn fiat(code: impl Into<CurrencyCode>, name: impl Into<String>) -> Self {
        Self::new(code, name, CurrencyKind::Fiat)
    }

    /// Shorthand for an enabled crypto currency.
    pub fn crypto(code: impl Into<CurrencyCode>, name: impl Into<String>) -> Self {
        Self::new(code, name, CurrencyKind::Crypto)
    }

    /// Return this currency with the enabled flag set.
    pub fn with_enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    pub fn is_fiat(&self) -> bool {
        self.kind == CurrencyKind::Fiat
    }
}

impl fmt::Display for Currency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.code, self.kind)
    }
}

/// A currency pair built per conversion request. Never stored.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CurrencyPair {
    /// Currency the amount is expressed in.
    pub base: Currency,
    /// Currency the amount is converted into.
    pub quote: Currency,
}

impl CurrencyPair {
    /// Create a new currency pair.
    pub fn new(base: Currency, quote: Currency) -> Self {
        Self { base, quote }
    }

    /// Check that both sides are enabled and of different classification.
    pub fn validate(&self) -> Result<(), ConversionError> {
        if !self.base.enabled {
            return Err(ConversionError::CurrencyNotAvailable(self.base.code.clone()));
        }

        if !self.quote.enabled {
            return Err(ConversionError::CurrencyNotAvailable(self.quote.code.clone()));
        }

        if self.base.kind == self.quote.kind {
            return Err(ConversionError::InvalidCurrencyPair {
                base: self.base.code.clone(),
                quote: self.quote.code.clone(),
                base_kind: self.base.kind,
                quote_kind: self.quote.kind,
            });
        }

        Ok(())
    }
}

impl fmt::Display for CurrencyPair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.base.code, self.quote.code)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_code_normalization() {
        assert_eq!(CurrencyCode::new(" usd "), CurrencyCode::usd());
        assert_eq!(CurrencyCode::from("btc").as_str(), "BTC");
        assert!(CurrencyCode::new("   ").is_empty());
    }

    #[test]
    fn test_code_serde_normalizes() {
        let code: CurrencyCode = serde_json::from_str("\"eth\"").unwrap();
        assert_eq!(code.as_str(), "ETH");
        assert_eq!(serde_json::to_string(&code).unwrap(), "\"ETH\"");
    }

    #[test]
    fn test_kind_parsing() {
        assert_eq!("FIAT".parse::<CurrencyKind>().unwrap(), CurrencyKind::Fiat);
        assert_eq!("crypto".parse::<CurrencyKind>().unwrap(), CurrencyKind::Crypto);

        let err = "GOLD".parse::<CurrencyKind>().unwrap_err();
        assert_eq!(err, UnknownCurrencyKind("GOLD".into()));
        assert_eq!(err.to_string(), "unknown currency classification \"GOLD\"");
        let _: &dyn std::error::Error = &err;
    }

    #[test]
    fn test_pair_validation() {
        let usd = Currency::fiat("USD", "US Dollar");
        let btc = Currency::crypto("BTC", "Bitcoin");

        assert!(CurrencyPair::new(usd.clone(), btc.clone()).validate().is_ok());
        assert!(CurrencyPair::new(btc.clone(), usd.clone()).validate().is_ok());
    }

    #[test]
    fn test_pair_same_kind_rejected() {
        let usd = Currency::fiat("USD", "US Dollar");
        let eur = Currency::fiat("EUR", "Euro");

        let err = CurrencyPair::new(usd, eur).validate().unwrap_err();
        assert!(matches!(err, ConversionError::InvalidCurrencyPair { .. }));
    }

    #[test]
    fn test_pair_disabled_side_rejected() {
        let usd = Currency::fiat("USD", "US Dollar");
        let btc = Currency::crypto("BTC", "Bitcoin").with_enabled(false);

        let err = CurrencyPair::new(usd, btc).validate().unwrap_err();
        assert_eq!(err, ConversionError::CurrencyNotAvailable(CurrencyCode::new("BTC")));
    }

    #[test]
    fn test_pair_display() {
        let pair = CurrencyPair::new(
            Currency::fiat("usd", "US Dollar"),
            Currency::crypto("eth", "Ether"),
        );
        assert_eq!(pair.to_string(), "USD/ETH");
    }
}
