//! Full rate refresh over the current currency snapshot.

use std::sync::Arc;

use ratecalc_fx::{CurrencyStore, FxResult, RatePipeline, RefreshSummary};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error};

use crate::metrics::SharedMetrics;

/// Runs the acquisition pipeline for everything in the currency store and
/// records the outcome.
pub struct RateRefresher {
    pipeline: RatePipeline,
    currencies: Arc<CurrencyStore>,
    metrics: SharedMetrics,
}

impl RateRefresher {
    pub fn new(pipeline: RatePipeline, currencies: Arc<CurrencyStore>, metrics: SharedMetrics) -> Self {
        Self {
            pipeline,
            currencies,
            metrics,
        }
    }

    /// Refresh every known currency. `trigger` names the caller in logs.
    pub async fn refresh_all(
        &self,
        cancel: &CancellationToken,
        trigger: &'static str,
    ) -> FxResult<RefreshSummary> {
        let snapshot = self.currencies.values();
        self.metrics.refresh_started();

        match self.pipeline.refresh(&snapshot, cancel).await {
            Ok(summary) => {
                self.metrics.refresh_succeeded(summary.written());
                debug!(trigger, written = summary.written(), "Refresh complete");
                Ok(summary)
            }
            Err(e) => {
                if !e.is_cancelled() {
                    self.metrics.refresh_failed();
                    error!(trigger, error = %e, code = e.error_code(), "Rate refresh failed");
                }
                Err(e)
            }
        }
    }
}
