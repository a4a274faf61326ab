//! Fixed-interval rate poller.

use std::sync::Arc;
use std::time::Duration;

use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{info, instrument};

use crate::error::ServiceResult;
use crate::refresh::RateRefresher;

/// Refreshes all rates once per interval.
pub struct RatePoller {
    refresher: Arc<RateRefresher>,
    interval: Duration,
}

impl RatePoller {
    pub fn new(refresher: Arc<RateRefresher>, interval: Duration) -> Self {
        Self {
            refresher,
            interval,
        }
    }

    /// Run until cancelled or a refresh fails.
    ///
    /// The first tick fires one interval after start.
    #[instrument(skip_all, name = "rate_poller")]
    pub async fn run(self, cancel: CancellationToken) -> ServiceResult<()> {
        let mut ticker = interval_at(Instant::now() + self.interval, self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        info!(interval_ms = self.interval.as_millis() as u64, "Rate poller started");

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {}
            }

            match self.refresher.refresh_all(&cancel, "poller").await {
                Ok(_) => {}
                Err(e) if e.is_cancelled() => break,
                Err(e) => return Err(e.into()),
            }
        }

        info!("Rate poller stopped");
        Ok(())
    }
}
