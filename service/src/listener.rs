//! Currency update listener.
//!
//! Consumes the repository change feed, applies each change to the currency
//! store and refreshes rates so a newly enabled currency is convertible
//! right away.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::Utc;
use parking_lot::RwLock;
use ratecalc_common::{Currency, CurrencyKind};
use ratecalc_fx::CurrencyStore;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use crate::error::{RepositoryError, ServiceResult};
use crate::metrics::SharedMetrics;
use crate::refresh::RateRefresher;
use crate::repository::{CurrencyEvent, CurrencyRepository, Operation};
use crate::state::ListenerState;

/// Classification id → kind. Always replaced as a whole.
#[derive(Debug, Clone, Default)]
pub struct ClassificationTable {
    kinds: HashMap<i32, CurrencyKind>,
}

impl ClassificationTable {
    /// Build from repository rows. Rows with unknown names are left out.
    pub fn from_rows(rows: Vec<(i32, String)>) -> Self {
        let mut kinds = HashMap::with_capacity(rows.len());
        for (id, name) in rows {
            match name.parse::<CurrencyKind>() {
                Ok(kind) => {
                    kinds.insert(id, kind);
                }
                Err(e) => warn!(id, error = %e, "Ignoring classification"),
            }
        }
        Self { kinds }
    }

    pub fn kind(&self, id: i32) -> Option<CurrencyKind> {
        self.kinds.get(&id).copied()
    }

    pub fn len(&self) -> usize {
        self.kinds.len()
    }

    pub fn is_empty(&self) -> bool {
        self.kinds.is_empty()
    }
}

/// Listener over the currency change feed.
pub struct CurrencyListener {
    repository: Arc<dyn CurrencyRepository>,
    currencies: Arc<CurrencyStore>,
    refresher: Arc<RateRefresher>,
    metrics: SharedMetrics,
    classifications: ClassificationTable,
    state: Arc<RwLock<ListenerState>>,
}

impl CurrencyListener {
    pub fn new(
        repository: Arc<dyn CurrencyRepository>,
        currencies: Arc<CurrencyStore>,
        refresher: Arc<RateRefresher>,
        metrics: SharedMetrics,
        state: Arc<RwLock<ListenerState>>,
    ) -> Self {
        *state.write() = ListenerState::Idle;
        Self {
            repository,
            currencies,
            refresher,
            metrics,
            classifications: ClassificationTable::default(),
            state,
        }
    }

    /// Run until cancelled or a fatal error. Cancellation is a clean exit.
    #[instrument(skip_all, name = "currency_listener")]
    pub async fn run(mut self, cancel: CancellationToken) -> ServiceResult<()> {
        let result = match self.listen(&cancel).await {
            Err(e) if e.is_cancellation() => Ok(()),
            other => other,
        };

        *self.state.write() = if result.is_ok() {
            info!("Currency listener stopped");
            ListenerState::Stopped
        } else {
            ListenerState::Failed
        };

        result
    }

    async fn listen(&mut self, cancel: &CancellationToken) -> ServiceResult<()> {
        self.refresh_classifications().await?;
        let mut feed = self.repository.subscribe(cancel.clone()).await?;

        *self.state.write() = ListenerState::Subscribed;
        info!("Listening for currency updates");

        loop {
            let next = tokio::select! {
                _ = cancel.cancelled() => return Ok(()),
                next = feed.recv() => next,
            };

            match next {
                Some(Ok(event)) => self.handle_event(event, cancel).await?,
                Some(Err(e)) => return Err(e.into()),
                None if cancel.is_cancelled() => return Ok(()),
                None => return Err(RepositoryError::FeedClosed.into()),
            }
        }
    }

    async fn refresh_classifications(&mut self) -> ServiceResult<()> {
        let rows = self.repository.list_classifications().await?;
        self.classifications = ClassificationTable::from_rows(rows);
        if self.classifications.is_empty() {
            warn!("No usable currency classifications");
        } else {
            debug!(count = self.classifications.len(), "Classifications loaded");
        }
        Ok(())
    }

    async fn handle_event(&mut self, event: CurrencyEvent, cancel: &CancellationToken) -> ServiceResult<()> {
        self.refresh_classifications().await?;

        if event.operation == Operation::Delete || !event.enabled {
            debug!(operation = %event.operation, code = %event.code, "Removing currency");
            self.currencies.remove(&event.code);
        } else {
            let Some(kind) = self.classifications.kind(event.classification_id) else {
                warn!(
                    code = %event.code,
                    classification_id = event.classification_id,
                    "Unknown classification, skipping currency event"
                );
                return Ok(());
            };

            debug!(operation = %event.operation, code = %event.code, "Applying currency event");
            self.currencies.apply(Currency {
                code: event.code,
                name: event.name,
                kind,
                enabled: true,
                updated_at: Utc::now(),
            });
        }
        self.metrics.currency_event_applied();

        self.refresher.refresh_all(cancel, "listener").await?;
        Ok(())
    }
}
