//! Rate provider capability.

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

use async_trait::async_trait;
use ratecalc_common::CurrencyCode;
use rust_decimal::Decimal;

use crate::error::FxResult;

/// A quoted market pair, e.g. `BTC/USDT`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct MarketPair {
    /// Asset being priced.
    pub base: CurrencyCode,
    /// Asset the price is expressed in.
    pub quote: CurrencyCode,
}

impl MarketPair {
    pub fn new(base: impl Into<CurrencyCode>, quote: impl Into<CurrencyCode>) -> Self {
        Self {
            base: base.into(),
            quote: quote.into(),
        }
    }
}

impl fmt::Display for MarketPair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.base, self.quote)
    }
}

impl FromStr for MarketPair {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.split_once('/') {
            Some((base, quote)) if !base.trim().is_empty() && !quote.trim().is_empty() => {
                Ok(MarketPair::new(base, quote))
            }
            _ => Err(format!("malformed market pair \"{}\"", s)),
        }
    }
}

/// Source of fiat rates and crypto prices.
#[async_trait]
pub trait RateProvider: Send + Sync {
    /// Get the provider name.
    fn name(&self) -> &str;

    /// Maximum number of pairs accepted by one `fetch_crypto_prices` call.
    fn max_pairs_per_request(&self) -> usize {
        10
    }

    /// Units of each quote currency per 1 unit of `base`.
    ///
    /// Codes the provider does not know are absent from the result.
    async fn fetch_fiat_rates(
        &self,
        base: &CurrencyCode,
        quotes: &[CurrencyCode],
    ) -> FxResult<HashMap<CurrencyCode, Decimal>>;

    /// Price of 1 `pair.base` expressed in `pair.quote`, for each pair.
    async fn fetch_crypto_prices(
        &self,
        pairs: &[MarketPair],
    ) -> FxResult<HashMap<MarketPair, Decimal>>;
}

#[cfg(any(test, feature = "test-utils"))]
pub use mock::MockRateProvider;

/// Mock rate provider for testing.
#[cfg(any(test, feature = "test-utils"))]
mod mock {
    use super::*;
    use crate::error::FxError;
    use dashmap::DashMap;
    use parking_lot::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    /// Scriptable in-memory provider that records every call it receives.
    pub struct MockRateProvider {
        name: String,
        /// Units per 1 USD.
        fiat_rates: DashMap<CurrencyCode, Decimal>,
        /// Price of one unit, keyed by market pair.
        crypto_prices: DashMap<MarketPair, Decimal>,
        fiat_failure: Mutex<Option<FxError>>,
        crypto_failures: DashMap<CurrencyCode, FxError>,
        crypto_delay: Mutex<Option<Duration>>,
        fiat_calls: Mutex<Vec<Vec<CurrencyCode>>>,
        crypto_batches: Mutex<Vec<Vec<MarketPair>>>,
        in_flight: AtomicUsize,
        max_in_flight: AtomicUsize,
    }

    impl MockRateProvider {
        /// Create a new mock provider.
        pub fn new(name: impl Into<String>) -> Self {
            Self {
                name: name.into(),
                fiat_rates: DashMap::new(),
                crypto_prices: DashMap::new(),
                fiat_failure: Mutex::new(None),
                crypto_failures: DashMap::new(),
                crypto_delay: Mutex::new(None),
                fiat_calls: Mutex::new(Vec::new()),
                crypto_batches: Mutex::new(Vec::new()),
                in_flight: AtomicUsize::new(0),
                max_in_flight: AtomicUsize::new(0),
            }
        }

        /// Set units of `code` per 1 USD.
        pub fn set_fiat_rate(&self, code: impl Into<CurrencyCode>, rate: Decimal) {
            self.fiat_rates.insert(code.into(), rate);
        }

        /// Set the price of 1 `base` in `quote`.
        pub fn set_crypto_price(
            &self,
            base: impl Into<CurrencyCode>,
            quote: impl Into<CurrencyCode>,
            price: Decimal,
        ) {
            self.crypto_prices.insert(MarketPair::new(base, quote), price);
        }

        /// Make every fiat call fail with `error`, or succeed again with `None`.
        pub fn fail_fiat(&self, error: Option<FxError>) {
            *self.fiat_failure.lock() = error;
        }

        /// Make any crypto batch containing `code` fail with `error`.
        pub fn fail_crypto(&self, code: impl Into<CurrencyCode>, error: FxError) {
            self.crypto_failures.insert(code.into(), error);
        }

        /// Delay every crypto call.
        pub fn set_crypto_delay(&self, delay: Duration) {
            *self.crypto_delay.lock() = Some(delay);
        }

        /// Quote lists of every fiat call, in call order.
        pub fn fiat_calls(&self) -> Vec<Vec<CurrencyCode>> {
            self.fiat_calls.lock().clone()
        }

        /// Pairs of every crypto batch, in call order.
        pub fn crypto_batches(&self) -> Vec<Vec<MarketPair>> {
            self.crypto_batches.lock().clone()
        }

        /// Highest number of crypto calls observed running at once.
        pub fn max_concurrent_crypto_calls(&self) -> usize {
            self.max_in_flight.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl RateProvider for MockRateProvider {
        fn name(&self) -> &str {
            &self.name
        }

        async fn fetch_fiat_rates(
            &self,
            base: &CurrencyCode,
            quotes: &[CurrencyCode],
        ) -> FxResult<HashMap<CurrencyCode, Decimal>> {
            self.fiat_calls.lock().push(quotes.to_vec());

            if let Some(error) = self.fiat_failure.lock().clone() {
                return Err(error);
            }

            let base_rate = if *base == CurrencyCode::usd() {
                Decimal::ONE
            } else {
                self.fiat_rates
                    .get(base)
                    .map(|r| *r)
                    .ok_or_else(|| FxError::ProviderError {
                        provider: self.name.clone(),
                        status: Some(400),
                        message: format!("unknown base {}", base),
                    })?
            };

            Ok(quotes
                .iter()
                .filter_map(|code| {
                    self.fiat_rates
                        .get(code)
                        .map(|rate| (code.clone(), *rate / base_rate))
                })
                .collect())
        }

        async fn fetch_crypto_prices(
            &self,
            pairs: &[MarketPair],
        ) -> FxResult<HashMap<MarketPair, Decimal>> {
            self.crypto_batches.lock().push(pairs.to_vec());

            let running = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.max_in_flight.fetch_max(running, Ordering::SeqCst);

            let delay = *self.crypto_delay.lock();
            if let Some(delay) = delay {
                tokio::time::sleep(delay).await;
            }

            self.in_flight.fetch_sub(1, Ordering::SeqCst);

            if pairs.len() > self.max_pairs_per_request() {
                return Err(FxError::BatchTooLarge {
                    size: pairs.len(),
                    max: self.max_pairs_per_request(),
                });
            }

            for pair in pairs {
                if let Some(error) = self.crypto_failures.get(&pair.base) {
                    return Err(error.clone());
                }
            }

            Ok(pairs
                .iter()
                .filter_map(|pair| {
                    self.crypto_prices
                        .get(pair)
                        .map(|price| (pair.clone(), *price))
                })
                .collect())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_market_pair_parsing() {
        let pair: MarketPair = "btc/usdt".parse().unwrap();
        assert_eq!(pair, MarketPair::new("BTC", "USDT"));
        assert_eq!(pair.to_string(), "BTC/USDT");

        assert!("BTCUSDT".parse::<MarketPair>().is_err());
        assert!("/USDT".parse::<MarketPair>().is_err());
    }

    #[test]
    fn test_mock_provider_fiat() {
        let provider = MockRateProvider::new("test");
        provider.set_fiat_rate("EUR", dec!(0.92));
        provider.set_fiat_rate("GBP", dec!(0.79));

        let quotes = vec![CurrencyCode::new("EUR"), CurrencyCode::new("JPY")];
        let rates = tokio_test::assert_ok!(tokio_test::block_on(
            provider.fetch_fiat_rates(&CurrencyCode::usd(), &quotes)
        ));

        assert_eq!(rates.len(), 1);
        assert_eq!(rates[&CurrencyCode::new("EUR")], dec!(0.92));
        assert_eq!(provider.fiat_calls(), vec![quotes]);
    }

    #[tokio::test]
    async fn test_mock_provider_crypto_failure() {
        let provider = MockRateProvider::new("test");
        provider.set_crypto_price("BTC", "USDT", dec!(50000));
        provider.fail_crypto(
            "ETH",
            crate::error::FxError::RateLimited {
                provider: "test".into(),
            },
        );

        let ok = provider
            .fetch_crypto_prices(&[MarketPair::new("BTC", "USDT")])
            .await
            .unwrap();
        assert_eq!(ok[&MarketPair::new("BTC", "USDT")], dec!(50000));

        let err = provider
            .fetch_crypto_prices(&[MarketPair::new("BTC", "USDT"), MarketPair::new("ETH", "USDT")])
            .await
            .unwrap_err();
        assert_eq!(err.error_code(), "RATE_LIMITED");
        assert_eq!(provider.crypto_batches().len(), 2);
    }
}
