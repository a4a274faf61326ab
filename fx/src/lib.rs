//! Rate Calculator FX Core
//!
//! Keeps an in-memory view of currencies and USD-referenced rates and converts
//! amounts between them.
//!
//! # Features
//!
//! - Concurrent currency and rate stores with per-key consistency
//! - Batched, bounded-concurrency rate acquisition with bridge normalization
//! - FastForex provider client with retry and backoff
//! - Cross-rate conversion with a panic-to-error boundary
//!
//! # Example
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use ratecalc_fx::{ConversionEngine, CurrencyStore, RatePipeline, RateStore};
//!
//! let currencies = Arc::new(CurrencyStore::new());
//! let rates = Arc::new(RateStore::new());
//! let pipeline = RatePipeline::new(provider, rates.clone());
//!
//! pipeline.refresh(&currencies.values(), &cancel).await?;
//!
//! let engine = ConversionEngine::new(currencies, rates);
//! let conversion = engine.convert("usd", "btc", dec!(100), 5)?;
//! ```

pub mod conversion;
pub mod engine;
pub mod error;
pub mod fastforex;
pub mod pipeline;
pub mod provider;
pub mod retry;
pub mod store;

pub use conversion::Conversion;
pub use engine::{ConversionEngine, DEFAULT_DECIMAL_PLACES};
pub use error::{FxError, FxResult};
pub use fastforex::{FastForexClient, FastForexConfig};
pub use pipeline::{PipelineConfig, RatePipeline, RefreshSummary};
pub use provider::{MarketPair, RateProvider};
pub use retry::RetryPolicy;
pub use store::{CurrencyStore, RateStore, Store};

#[cfg(any(test, feature = "test-utils"))]
pub use provider::MockRateProvider;
