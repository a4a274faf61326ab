//! Rate service orchestrator.
//!
//! Owns both stores, seeds them at start and supervises the currency
//! listener and the rate poller. The first task to fail stops the other and
//! becomes the result of [`RateService::start`].

use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use ratecalc_common::ConversionResult;
use ratecalc_fx::{
    Conversion, ConversionEngine, CurrencyStore, FxError, PipelineConfig, RatePipeline,
    RateProvider, RateStore,
};
use rust_decimal::Decimal;
use tokio::sync::watch;
use tokio::task::{self, JoinSet};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

use crate::config::RateServiceConfig;
use crate::error::{ServiceError, ServiceResult};
use crate::listener::CurrencyListener;
use crate::metrics::{ServiceMetrics, SharedMetrics};
use crate::poller::RatePoller;
use crate::refresh::RateRefresher;
use crate::repository::CurrencyRepository;
use crate::state::{ListenerState, ServiceState};

/// The rate calculator service.
pub struct RateService {
    config: RateServiceConfig,
    repository: Arc<dyn CurrencyRepository>,
    currencies: Arc<CurrencyStore>,
    rates: Arc<RateStore>,
    refresher: Arc<RateRefresher>,
    engine: ConversionEngine,
    metrics: SharedMetrics,
    started: AtomicBool,
    cancel: Mutex<CancellationToken>,
    state: watch::Sender<ServiceState>,
    listener_state: Arc<RwLock<ListenerState>>,
}

/// Clears the started flag however `start` ends.
struct StartGuard<'a> {
    service: &'a RateService,
}

impl Drop for StartGuard<'_> {
    fn drop(&mut self) {
        self.service.cancel.lock().cancel();
        if self.service.state().is_active() {
            self.service.set_state(ServiceState::Stopped);
        }
        self.service.started.store(false, Ordering::Release);
    }
}

impl RateService {
    /// Create a service with the default pipeline tuning.
    pub fn new(
        config: RateServiceConfig,
        repository: Arc<dyn CurrencyRepository>,
        provider: Arc<dyn RateProvider>,
    ) -> Self {
        Self::with_pipeline_config(config, repository, provider, PipelineConfig::default())
    }

    pub fn with_pipeline_config(
        config: RateServiceConfig,
        repository: Arc<dyn CurrencyRepository>,
        provider: Arc<dyn RateProvider>,
        pipeline_config: PipelineConfig,
    ) -> Self {
        let currencies = Arc::new(CurrencyStore::new());
        let rates = Arc::new(RateStore::new());
        let metrics = Arc::new(ServiceMetrics::new());

        let pipeline = RatePipeline::with_config(provider, rates.clone(), pipeline_config);
        let refresher = Arc::new(RateRefresher::new(
            pipeline,
            currencies.clone(),
            metrics.clone(),
        ));
        let engine = ConversionEngine::new(currencies.clone(), rates.clone());
        let (state, _) = watch::channel(ServiceState::Idle);

        Self {
            config,
            repository,
            currencies,
            rates,
            refresher,
            engine,
            metrics,
            started: AtomicBool::new(false),
            cancel: Mutex::new(CancellationToken::new()),
            state,
            listener_state: Arc::new(RwLock::new(ListenerState::Idle)),
        }
    }

    /// Start the service and run until stopped or a task fails.
    ///
    /// Loads currencies and performs one full refresh before the poller is
    /// launched. A stop request is a clean exit; any other task error is
    /// returned after both tasks have drained.
    #[instrument(skip(self))]
    pub async fn start(&self) -> ServiceResult<()> {
        if self
            .started
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return Err(ServiceError::AlreadyStarted);
        }
        let _guard = StartGuard { service: self };

        let cancel = CancellationToken::new();
        *self.cancel.lock() = cancel.clone();
        self.set_state(ServiceState::Starting);

        info!("Starting rate service");

        let result = self.supervise(&cancel).await;

        match &result {
            Ok(()) => {
                self.set_state(ServiceState::Stopped);
                info!("Rate service stopped");
            }
            Err(e) => {
                self.set_state(ServiceState::Failed);
                error!(error = %e, code = e.error_code(), "Rate service failed");
            }
        }

        result
    }

    async fn supervise(&self, cancel: &CancellationToken) -> ServiceResult<()> {
        let mut tasks = Supervisor::new();

        let listener = CurrencyListener::new(
            self.repository.clone(),
            self.currencies.clone(),
            self.refresher.clone(),
            self.metrics.clone(),
            self.listener_state.clone(),
        );
        tasks.spawn("listener", listener.run(cancel.clone()));

        if let Err(e) = self.initial_load(cancel).await {
            cancel.cancel();
            tasks.drain().await;
            return if e.is_cancellation() { Ok(()) } else { Err(e) };
        }

        let poller = RatePoller::new(self.refresher.clone(), self.config.rate_polling_interval);
        tasks.spawn("poller", poller.run(cancel.clone()));

        if !cancel.is_cancelled() {
            self.set_state(ServiceState::Running);
            info!("Rate service running");
        }

        let mut failure = None;
        while let Some(result) = tasks.join_next().await {
            match result {
                Ok(()) => {}
                Err(e) if e.is_cancellation() => {}
                Err(e) if failure.is_none() => {
                    error!(error = %e, "Supervised task failed, stopping");
                    self.set_state(ServiceState::Stopping);
                    cancel.cancel();
                    failure = Some(e);
                }
                Err(e) => debug!(error = %e, "Additional task error after shutdown"),
            }
        }

        failure.map_or(Ok(()), Err)
    }

    async fn initial_load(&self, cancel: &CancellationToken) -> ServiceResult<()> {
        let currencies = tokio::select! {
            _ = cancel.cancelled() => return Err(FxError::Cancelled.into()),
            listed = self.repository.list_enabled_currencies() => listed?,
        };

        let count = currencies.len();
        for currency in currencies {
            self.currencies.apply(currency);
        }
        info!(count, "Initial currencies loaded");

        self.refresher.refresh_all(cancel, "startup").await?;
        Ok(())
    }

    /// Request a stop and wait until background tasks have drained.
    #[instrument(skip(self))]
    pub async fn stop(&self) {
        if !self.state().is_active() {
            return;
        }

        info!("Stopping rate service");
        self.set_state(ServiceState::Stopping);
        self.cancel.lock().cancel();

        let mut state = self.state.subscribe();
        let _ = state.wait_for(|s| !s.is_active()).await;
    }

    /// Convert `amount` of `base` into `quote`.
    pub fn convert(
        &self,
        base: &str,
        quote: &str,
        amount: Decimal,
        decimal_places: u32,
    ) -> ConversionResult<Conversion> {
        let result = self.engine.convert(base, quote, amount, decimal_places);
        self.metrics.conversion(result.is_ok());
        if let Err(e) = &result {
            if !e.is_client_error() {
                warn!(base, quote, code = e.error_code(), "Conversion failed");
            }
        }
        result
    }

    pub fn state(&self) -> ServiceState {
        *self.state.borrow()
    }

    /// Receiver that observes every state change.
    pub fn subscribe_state(&self) -> watch::Receiver<ServiceState> {
        self.state.subscribe()
    }

    pub fn listener_state(&self) -> ListenerState {
        *self.listener_state.read()
    }

    pub fn metrics(&self) -> &SharedMetrics {
        &self.metrics
    }

    pub fn currencies(&self) -> &Arc<CurrencyStore> {
        &self.currencies
    }

    pub fn rates(&self) -> &Arc<RateStore> {
        &self.rates
    }

    fn set_state(&self, state: ServiceState) {
        let previous = self.state.send_replace(state);
        if previous != state {
            debug!(from = ?previous, to = ?state, "Service state changed");
        }
    }
}

/// Supervised tasks, named by task id so a panic can be attributed.
struct Supervisor {
    tasks: JoinSet<ServiceResult<()>>,
    names: HashMap<task::Id, &'static str>,
}

impl Supervisor {
    fn new() -> Self {
        Self {
            tasks: JoinSet::new(),
            names: HashMap::new(),
        }
    }

    fn spawn<F>(&mut self, task: &'static str, future: F)
    where
        F: Future<Output = ServiceResult<()>> + Send + 'static,
    {
        let handle = self.tasks.spawn(future);
        self.names.insert(handle.id(), task);
    }

    /// Next finished task. A panic is reported as [`ServiceError::TaskPanicked`],
    /// an aborted task as a clean exit.
    async fn join_next(&mut self) -> Option<ServiceResult<()>> {
        let joined = self.tasks.join_next_with_id().await?;
        Some(match joined {
            Ok((id, result)) => {
                self.names.remove(&id);
                result
            }
            Err(e) => {
                let task = self.names.remove(&e.id()).unwrap_or("unknown");
                if e.is_panic() {
                    error!(task, "Task panicked");
                    Err(ServiceError::TaskPanicked { task })
                } else {
                    Ok(())
                }
            }
        })
    }

    async fn drain(&mut self) {
        while let Some(result) = self.join_next().await {
            if let Err(e) = result {
                if !e.is_cancellation() {
                    debug!(error = %e, "Task error during teardown");
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::repository::memory::InMemoryCurrencyRepository;
    use ratecalc_common::{ConversionError, Currency};
    use ratecalc_fx::MockRateProvider;
    use rust_decimal_macros::dec;
    use std::time::Duration;

    fn provider() -> Arc<MockRateProvider> {
        let provider = MockRateProvider::new("mock");
        provider.set_fiat_rate("EUR", dec!(0.92));
        provider.set_fiat_rate("USDT", dec!(1));
        provider.set_crypto_price("BTC", "USDT", dec!(50000));
        Arc::new(provider)
    }

    fn service(provider: Arc<MockRateProvider>, repo: Arc<InMemoryCurrencyRepository>) -> Arc<RateService> {
        let config = RateServiceConfig {
            rate_polling_interval: Duration::from_secs(1),
        };
        Arc::new(RateService::new(config, repo, provider))
    }

    fn catalogue() -> Arc<InMemoryCurrencyRepository> {
        Arc::new(InMemoryCurrencyRepository::with_currencies(vec![
            Currency::fiat("USD", "US Dollar"),
            Currency::fiat("EUR", "Euro"),
            Currency::crypto("BTC", "Bitcoin"),
            Currency::crypto("ETH", "Ether").with_enabled(false),
        ]))
    }

    async fn wait_running(service: &RateService) {
        let mut state = service.subscribe_state();
        tokio::time::timeout(
            Duration::from_secs(5),
            state.wait_for(|s| *s == ServiceState::Running),
        )
        .await
        .expect("service did not reach running")
        .unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_start_seeds_stores_and_stops() {
        let service = service(provider(), catalogue());
        let task = tokio::spawn({
            let service = service.clone();
            async move { service.start().await }
        });

        wait_running(&service).await;
        assert!(service.state().is_operational());

        assert_eq!(service.currencies().len(), 3);
        assert!(!service.currencies().contains("ETH"));
        assert_eq!(service.rates().get("BTC"), Some(dec!(0.00002)));

        let conversion = service.convert("btc", "usd", dec!(1), 5).unwrap();
        assert_eq!(conversion.output, dec!(50000));
        assert_eq!(
            service.convert("eth", "usd", dec!(1), 5),
            Err(ConversionError::CurrencyNotAvailable("ETH".into()))
        );
        assert_eq!(service.metrics().snapshot().conversions_failed, 1);

        service.stop().await;
        assert_eq!(service.state(), ServiceState::Stopped);
        task.await.unwrap().unwrap();
        assert!(service.listener_state().is_terminal());
    }

    #[tokio::test(start_paused = true)]
    async fn test_second_start_rejected_and_restart_allowed() {
        let service = service(provider(), catalogue());
        let first = tokio::spawn({
            let service = service.clone();
            async move { service.start().await }
        });
        wait_running(&service).await;

        assert!(matches!(service.start().await, Err(ServiceError::AlreadyStarted)));

        service.stop().await;
        first.await.unwrap().unwrap();

        let second = tokio::spawn({
            let service = service.clone();
            async move { service.start().await }
        });
        wait_running(&service).await;
        service.stop().await;
        second.await.unwrap().unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_poller_rate_limit_fails_start() {
        let provider = provider();
        let service = service(provider.clone(), catalogue());
        let task = tokio::spawn({
            let service = service.clone();
            async move { service.start().await }
        });
        wait_running(&service).await;

        provider.fail_fiat(Some(FxError::RateLimited {
            provider: "mock".into(),
        }));

        let err = tokio::time::timeout(Duration::from_secs(10), task)
            .await
            .expect("start did not return")
            .unwrap()
            .unwrap_err();

        assert!(matches!(err, ServiceError::Fx(FxError::RateLimited { .. })));
        assert_eq!(service.state(), ServiceState::Failed);
        assert!(service.listener_state().is_terminal());

        // Rates from the successful refresh stay in place.
        assert_eq!(service.rates().get("EUR"), Some(dec!(0.92)));
    }

    #[tokio::test]
    async fn test_initial_load_failure_tears_down() {
        let repo = catalogue();
        repo.fail_listing(true);
        let service = service(provider(), repo);

        let err = service.start().await.unwrap_err();

        assert!(matches!(err, ServiceError::Repository(_)));
        assert_eq!(service.state(), ServiceState::Failed);
        assert!(service.listener_state().is_terminal());
    }

    #[tokio::test]
    async fn test_initial_refresh_failure_is_returned() {
        let provider = provider();
        provider.fail_fiat(Some(FxError::InvalidCredentials {
            provider: "mock".into(),
        }));
        let service = service(provider, catalogue());

        let err = service.start().await.unwrap_err();
        assert_eq!(err.error_code(), "INVALID_CREDENTIALS");
        assert_eq!(service.metrics().snapshot().refreshes_failed, 1);
    }

    #[tokio::test]
    async fn test_supervisor_names_panicked_task() {
        let mut tasks = Supervisor::new();
        tasks.spawn("steady", async { Ok(()) });
        tasks.spawn("faulty", async { panic!("boom") });

        let mut results = Vec::new();
        while let Some(result) = tasks.join_next().await {
            results.push(result);
        }

        assert_eq!(results.len(), 2);
        assert!(results.iter().any(|r| r.is_ok()));
        assert!(results
            .iter()
            .any(|r| matches!(r, Err(ServiceError::TaskPanicked { task: "faulty" }))));
        assert!(tasks.names.is_empty());
    }

    #[tokio::test]
    async fn test_supervisor_aborted_task_is_clean() {
        let mut tasks = Supervisor::new();
        tasks.spawn("idle", std::future::pending::<ServiceResult<()>>());
        tasks.tasks.abort_all();

        assert!(matches!(tasks.join_next().await, Some(Ok(()))));
        assert!(tasks.join_next().await.is_none());
    }

    #[tokio::test]
    async fn test_stop_when_idle_returns() {
        let service = service(provider(), catalogue());
        service.stop().await;
        assert_eq!(service.state(), ServiceState::Idle);
    }
}
