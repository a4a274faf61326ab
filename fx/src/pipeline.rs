//! Rate acquisition pipeline.
//!
//! One refresh fetches fiat rates in a single call, crypto prices in
//! fixed-size batches spread over a small worker pool, and the bridge
//! asset's own USD rate. Crypto prices are normalized through the bridge
//! into units per 1 USD. Nothing is written unless every fetch succeeded.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use ratecalc_common::{Currency, CurrencyCode};
use rust_decimal::Decimal;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use crate::error::{FxError, FxResult};
use crate::provider::{MarketPair, RateProvider};
use crate::store::RateStore;

/// Pipeline tuning.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// Pairs per crypto request. Capped by the provider limit.
    pub batch_size: usize,
    /// Concurrent crypto requests.
    pub workers: usize,
    /// Asset crypto prices are quoted in.
    pub bridge: CurrencyCode,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            batch_size: 10,
            workers: 3,
            bridge: CurrencyCode::usdt(),
        }
    }
}

/// Outcome of one refresh.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RefreshSummary {
    /// Fiat rates written, USD included.
    pub fiat: usize,
    /// Crypto rates written, the bridge asset included.
    pub crypto: usize,
    /// Codes the provider had no usable rate for.
    pub skipped: Vec<CurrencyCode>,
}

impl RefreshSummary {
    /// Total rates written.
    pub fn written(&self) -> usize {
        self.fiat + self.crypto
    }
}

type PriceBatch = FxResult<HashMap<MarketPair, Decimal>>;

/// Fetches rates for a currency set and writes them to the rate store.
pub struct RatePipeline {
    provider: Arc<dyn RateProvider>,
    rates: Arc<RateStore>,
    config: PipelineConfig,
}

impl RatePipeline {
    /// Create a pipeline with default tuning.
    pub fn new(provider: Arc<dyn RateProvider>, rates: Arc<RateStore>) -> Self {
        Self::with_config(provider, rates, PipelineConfig::default())
    }

    pub fn with_config(
        provider: Arc<dyn RateProvider>,
        rates: Arc<RateStore>,
        config: PipelineConfig,
    ) -> Self {
        Self {
            provider,
            rates,
            config,
        }
    }

    /// Refresh rates for `currencies`.
    ///
    /// The first provider error aborts the refresh and is returned as is.
    /// Cancelling `cancel` stops in-flight work and returns
    /// [`FxError::Cancelled`]. In both cases the rate store is untouched.
    #[instrument(skip(self, currencies, cancel), fields(count = currencies.len()))]
    pub async fn refresh(
        &self,
        currencies: &[Currency],
        cancel: &CancellationToken,
    ) -> FxResult<RefreshSummary> {
        if cancel.is_cancelled() {
            return Err(FxError::Cancelled);
        }

        let usd = CurrencyCode::usd();
        let bridge = self.config.bridge.clone();

        let mut seen = HashSet::new();
        let mut fiat_codes = Vec::new();
        let mut crypto_codes = Vec::new();
        let mut bridge_is_listed = false;

        for currency in currencies {
            if !seen.insert(currency.code.clone()) || currency.code == usd {
                continue;
            }
            if currency.is_fiat() {
                fiat_codes.push(currency.code.clone());
            } else if currency.code == bridge {
                bridge_is_listed = true;
            } else {
                crypto_codes.push(currency.code.clone());
            }
        }

        let need_bridge = bridge_is_listed || !crypto_codes.is_empty();

        debug!(
            fiat = fiat_codes.len(),
            crypto = crypto_codes.len(),
            need_bridge,
            "Starting rate refresh"
        );

        let fiat_fetch = async {
            if fiat_codes.is_empty() {
                Ok(HashMap::new())
            } else {
                self.provider.fetch_fiat_rates(&usd, &fiat_codes).await
            }
        };

        let bridge_fetch = async {
            if !need_bridge {
                return Ok(None);
            }
            let rates = self
                .provider
                .fetch_fiat_rates(&usd, std::slice::from_ref(&bridge))
                .await?;
            Ok::<_, FxError>(rates.get(&bridge).copied())
        };

        let crypto_fetch = self.fetch_crypto_prices(&crypto_codes, cancel);

        let (fiat_rates, bridge_rate, prices) = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(FxError::Cancelled),
            fetched = async { tokio::try_join!(fiat_fetch, bridge_fetch, crypto_fetch) } => fetched?,
        };

        let mut summary = RefreshSummary::default();
        let mut updates = vec![(usd, Decimal::ONE)];
        summary.fiat += 1;

        for code in fiat_codes {
            match fiat_rates.get(&code) {
                Some(rate) if rate.is_sign_positive() && !rate.is_zero() => {
                    updates.push((code, *rate));
                    summary.fiat += 1;
                }
                other => {
                    warn!(code = %code, rate = ?other, "No usable fiat rate, keeping previous");
                    summary.skipped.push(code);
                }
            }
        }

        if need_bridge {
            let bridge_rate = match bridge_rate {
                Some(rate) if rate.is_sign_positive() && !rate.is_zero() => rate,
                other => {
                    return Err(FxError::InvalidResponse {
                        provider: self.provider.name().to_string(),
                        message: format!("unusable bridge rate for {}: {:?}", bridge, other),
                    });
                }
            };

            if bridge_is_listed {
                updates.push((bridge.clone(), bridge_rate));
                summary.crypto += 1;
            }

            for code in crypto_codes {
                let pair = MarketPair::new(code.clone(), bridge.clone());
                let rate = prices
                    .get(&pair)
                    .filter(|price| price.is_sign_positive() && !price.is_zero())
                    .and_then(|price| bridge_rate.checked_div(*price));

                match rate {
                    Some(rate) => {
                        updates.push((code, rate));
                        summary.crypto += 1;
                    }
                    None => {
                        warn!(pair = %pair, price = ?prices.get(&pair), "No usable crypto price, keeping previous");
                        summary.skipped.push(code);
                    }
                }
            }
        }

        if cancel.is_cancelled() {
            return Err(FxError::Cancelled);
        }

        for (code, rate) in updates {
            self.rates.upsert(code, rate);
        }

        info!(
            fiat = summary.fiat,
            crypto = summary.crypto,
            skipped = summary.skipped.len(),
            "Rates refreshed"
        );

        Ok(summary)
    }

    /// Fetch `<code>/<bridge>` prices in batches over the worker pool.
    async fn fetch_crypto_prices(
        &self,
        codes: &[CurrencyCode],
        cancel: &CancellationToken,
    ) -> FxResult<HashMap<MarketPair, Decimal>> {
        if codes.is_empty() {
            return Ok(HashMap::new());
        }

        let batch_size = self
            .config
            .batch_size
            .min(self.provider.max_pairs_per_request())
            .max(1);

        let batches: Vec<Vec<MarketPair>> = codes
            .chunks(batch_size)
            .map(|chunk| {
                chunk
                    .iter()
                    .map(|code| MarketPair::new(code.clone(), self.config.bridge.clone()))
                    .collect()
            })
            .collect();

        let total = batches.len();
        let workers = self.config.workers.max(1).min(total);

        let (job_tx, job_rx) = mpsc::channel(total);
        for batch in batches {
            job_tx
                .send(batch)
                .await
                .map_err(|_| FxError::Worker("job queue closed".to_string()))?;
        }
        drop(job_tx);

        let job_rx = Arc::new(Mutex::new(job_rx));
        let (result_tx, mut result_rx) = mpsc::channel::<PriceBatch>(workers);
        let worker_cancel = cancel.child_token();
        let mut pool = JoinSet::new();

        for worker in 0..workers {
            let provider = self.provider.clone();
            let jobs = job_rx.clone();
            let results = result_tx.clone();
            let cancel = worker_cancel.clone();

            pool.spawn(async move {
                loop {
                    let batch: Option<Vec<MarketPair>> = jobs.lock().await.recv().await;
                    let Some(batch) = batch else { break };

                    let fetched = tokio::select! {
                        _ = cancel.cancelled() => break,
                        fetched = provider.fetch_crypto_prices(&batch) => fetched,
                    };

                    if results.send(fetched).await.is_err() {
                        break;
                    }
                }
                debug!(worker, "Crypto worker finished");
            });
        }
        drop(result_tx);

        let mut prices = HashMap::new();
        let mut delivered = 0;

        let outcome = loop {
            tokio::select! {
                _ = cancel.cancelled() => break Err(FxError::Cancelled),
                next = result_rx.recv() => match next {
                    Some(Ok(batch)) => {
                        delivered += 1;
                        prices.extend(batch);
                    }
                    Some(Err(e)) => break Err(e),
                    None if delivered == total => break Ok(()),
                    None => {
                        break Err(FxError::Worker(format!(
                            "{} of {} crypto batches delivered",
                            delivered, total
                        )))
                    }
                },
            }
        };

        worker_cancel.cancel();
        if outcome.is_err() {
            pool.abort_all();
        }
        while let Some(joined) = pool.join_next().await {
            if let Err(e) = joined {
                if e.is_panic() {
                    warn!(error = %e, "Crypto worker panicked");
                }
            }
        }

        outcome.map(|_| prices)
    }
}
