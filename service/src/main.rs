//! Rate Calculator Binary
//!
//! Runs the rate service and its HTTP surface until Ctrl-C or the first
//! fatal error.

use std::sync::Arc;

use anyhow::Context;
use tokio::net::TcpListener;
use tokio::task::{JoinError, JoinSet};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, info_span, Instrument};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use ratecalc_fx::FastForexClient;
use ratecalc_service::postgres::PgCurrencyRepository;
use ratecalc_service::{http, AppConfig, RateService};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = AppConfig::from_env()?;

    // Initialize logging
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| config.log_level.clone()),
        ))
        .with(tracing_subscriber::fmt::layer().json())
        .init();

    if let Err(e) = config.validate() {
        error!(error = %e, "Invalid configuration");
        return Err(e.into());
    }

    let span = info_span!("app", app = %config.app_name);
    run(config).instrument(span).await
}

async fn run(config: AppConfig) -> anyhow::Result<()> {
    info!("Starting rate calculator");

    let repository = PgCurrencyRepository::connect(&config.postgres)
        .await
        .context("connecting to PostgreSQL")?;

    let client = FastForexClient::new(config.fastforex.clone())?;
    client
        .verify_credentials()
        .await
        .context("verifying FastForex credentials")?;

    let service = Arc::new(RateService::new(
        config.service.clone(),
        Arc::new(repository),
        Arc::new(client),
    ));

    let listener = TcpListener::bind(config.http.listen_addr())
        .await
        .with_context(|| format!("binding {}", config.http.listen_addr()))?;
    info!(addr = %config.http.listen_addr(), "HTTP server listening");

    let cancel = CancellationToken::new();
    let mut tasks = JoinSet::new();

    tasks.spawn({
        let service = service.clone();
        async move { ("rate service", service.start().await.map_err(anyhow::Error::from)) }
        .in_current_span()
    });

    tasks.spawn(
        {
            let service = service.clone();
            let cancel = cancel.clone();
            let timeout = config.http.shutdown_timeout;
            async move {
                let result = http::serve(listener, service, cancel, timeout).await;
                ("http server", result.map_err(anyhow::Error::from))
            }
        }
        .in_current_span(),
    );

    let mut outcome = Ok(());
    tokio::select! {
        signal = tokio::signal::ctrl_c() => {
            if let Err(e) = signal {
                error!(error = %e, "Failed to listen for Ctrl+C");
            }
            info!("Shutdown signal received");
        }
        Some(joined) = tasks.join_next() => {
            outcome = report(joined);
        }
    }

    cancel.cancel();
    service.stop().await;

    while let Some(joined) = tasks.join_next().await {
        let result = report(joined);
        if outcome.is_ok() {
            outcome = result;
        }
    }

    info!("Rate calculator shutdown complete");
    outcome
}

fn report(joined: Result<(&'static str, anyhow::Result<()>), JoinError>) -> anyhow::Result<()> {
    match joined {
        Ok((_, Ok(()))) => Ok(()),
        Ok((task, Err(e))) => {
            error!(task, error = %e, "Task failed");
            Err(e.context(task))
        }
        Err(e) => Err(anyhow::anyhow!("task aborted: {}", e)),
    }
}
