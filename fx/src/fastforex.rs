//! FastForex rate provider.
//!
//! Endpoints used:
//! - `GET /fetch-multi?from=USD&to=EUR,GBP` → `{"results": {"EUR": 0.92, ...}}`
//! - `GET /crypto/fetch-prices?pairs=BTC/USDT,ETH/USDT` → `{"prices": {"BTC/USDT": 50000.0, ...}}`
//!
//! Every call carries the `api_key` query parameter and is retried on
//! transient failures only.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use ratecalc_common::CurrencyCode;
use reqwest::{Client, StatusCode};
use rust_decimal::Decimal;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use tracing::{debug, instrument, warn};

use crate::error::{FxError, FxResult};
use crate::provider::{MarketPair, RateProvider};
use crate::retry::RetryPolicy;

/// Provider ID constant
const PROVIDER_ID: &str = "FASTFOREX";

/// Public API endpoint.
pub const DEFAULT_BASE_URL: &str = "https://api.fastforex.io";

const MAX_PAIRS_PER_REQUEST: usize = 10;

/// FastForex client configuration.
#[derive(Debug, Clone)]
pub struct FastForexConfig {
    pub api_key: String,
    pub base_url: String,
    pub request_timeout: Duration,
    /// Retries after the first attempt of each call.
    pub retries_count: usize,
}

impl Default for FastForexConfig {
    fn default() -> Self {
        Self {
            api_key: String::new(),
            base_url: DEFAULT_BASE_URL.to_string(),
            request_timeout: Duration::from_secs(30),
            retries_count: 3,
        }
    }
}

#[derive(Debug, Deserialize)]
struct FetchMultiResponse {
    results: HashMap<String, Decimal>,
}

#[derive(Debug, Deserialize)]
struct CryptoPricesResponse {
    prices: HashMap<String, Decimal>,
}

/// HTTP client for the FastForex API.
pub struct FastForexClient {
    client: Client,
    config: FastForexConfig,
    retry: RetryPolicy,
}

impl FastForexClient {
    /// Create a new client. Fails on an empty API key.
    pub fn new(config: FastForexConfig) -> FxResult<Self> {
        if config.api_key.trim().is_empty() {
            return Err(FxError::InvalidCredentials {
                provider: PROVIDER_ID.to_string(),
            });
        }

        let client = Client::builder()
            .timeout(config.request_timeout)
            .build()
            .map_err(|e| FxError::ProviderError {
                provider: PROVIDER_ID.to_string(),
                status: None,
                message: e.to_string(),
            })?;

        let retry = RetryPolicy::with_retries(config.retries_count);

        Ok(Self {
            client,
            config,
            retry,
        })
    }

    /// Replace the retry policy.
    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Probe the API once. Only a credentials rejection is an error; other
    /// failures are logged and tolerated so a flaky provider does not block
    /// startup.
    pub async fn verify_credentials(&self) -> FxResult<()> {
        match self
            .fetch_fiat_rates(&CurrencyCode::usd(), &[CurrencyCode::new("EUR")])
            .await
        {
            Ok(_) => Ok(()),
            Err(e @ FxError::InvalidCredentials { .. }) => Err(e),
            Err(e) => {
                warn!(error = %e, "FastForex probe failed, continuing");
                Ok(())
            }
        }
    }

    async fn get<T: DeserializeOwned>(&self, path: &str, query: &[(&str, String)]) -> FxResult<T> {
        self.retry
            .retry_if(|_| self.get_once(path, query), FxError::is_transient)
            .await
    }

    async fn get_once<T: DeserializeOwned>(&self, path: &str, query: &[(&str, String)]) -> FxResult<T> {
        let url = format!("{}{}", self.config.base_url.trim_end_matches('/'), path);

        let response = self
            .client
            .get(&url)
            .query(query)
            .query(&[("api_key", self.config.api_key.as_str())])
            .send()
            .await
            .map_err(transport_error)?;

        let status = response.status();
        if status == StatusCode::TOO_MANY_REQUESTS {
            return Err(FxError::RateLimited {
                provider: PROVIDER_ID.to_string(),
            });
        }
        if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
            return Err(FxError::InvalidCredentials {
                provider: PROVIDER_ID.to_string(),
            });
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(FxError::ProviderError {
                provider: PROVIDER_ID.to_string(),
                status: Some(status.as_u16()),
                message: format!("{} {}: {}", status.as_u16(), path, body.trim()),
            });
        }

        response.json::<T>().await.map_err(|e| {
            if e.is_timeout() {
                FxError::Timeout {
                    provider: PROVIDER_ID.to_string(),
                }
            } else {
                FxError::InvalidResponse {
                    provider: PROVIDER_ID.to_string(),
                    message: e.without_url().to_string(),
                }
            }
        })
    }
}

/// Map a send failure, dropping the URL so the API key never reaches logs.
fn transport_error(e: reqwest::Error) -> FxError {
    if e.is_timeout() {
        FxError::Timeout {
            provider: PROVIDER_ID.to_string(),
        }
    } else {
        FxError::ProviderError {
            provider: PROVIDER_ID.to_string(),
            status: None,
            message: e.without_url().to_string(),
        }
    }
}

fn join_codes<'a>(codes: impl Iterator<Item = &'a str>) -> String {
    codes.collect::<Vec<_>>().join(",")
}

#[async_trait]
impl RateProvider for FastForexClient {
    fn name(&self) -> &str {
        PROVIDER_ID
    }

    fn max_pairs_per_request(&self) -> usize {
        MAX_PAIRS_PER_REQUEST
    }

    #[instrument(skip(self, quotes), fields(quotes = quotes.len()))]
    async fn fetch_fiat_rates(
        &self,
        base: &CurrencyCode,
        quotes: &[CurrencyCode],
    ) -> FxResult<HashMap<CurrencyCode, Decimal>> {
        if quotes.is_empty() {
            return Ok(HashMap::new());
        }

        let query = [
            ("from", base.to_string()),
            ("to", join_codes(quotes.iter().map(|c| c.as_str()))),
        ];
        let payload: FetchMultiResponse = self.get("/fetch-multi", &query).await?;

        debug!(received = payload.results.len(), "Fetched fiat rates");

        Ok(payload
            .results
            .into_iter()
            .map(|(code, rate)| (CurrencyCode::new(code), rate))
            .collect())
    }

    #[instrument(skip(self, pairs), fields(pairs = pairs.len()))]
    async fn fetch_crypto_prices(
        &self,
        pairs: &[MarketPair],
    ) -> FxResult<HashMap<MarketPair, Decimal>> {
        if pairs.is_empty() {
            return Ok(HashMap::new());
        }
        if pairs.len() > MAX_PAIRS_PER_REQUEST {
            return Err(FxError::BatchTooLarge {
                size: pairs.len(),
                max: MAX_PAIRS_PER_REQUEST,
            });
        }

        let rendered: Vec<String> = pairs.iter().map(|p| p.to_string()).collect();
        let query = [("pairs", join_codes(rendered.iter().map(|s| s.as_str())))];
        let payload: CryptoPricesResponse = self.get("/crypto/fetch-prices", &query).await?;

        let mut prices = HashMap::with_capacity(payload.prices.len());
        for (key, price) in payload.prices {
            match key.parse::<MarketPair>() {
                Ok(pair) => {
                    prices.insert(pair, price);
                }
                Err(e) => warn!(error = %e, "Skipping unrecognized price key"),
            }
        }

        debug!(received = prices.len(), "Fetched crypto prices");
        Ok(prices)
    }
}
