//! PostgreSQL currency repository.
//!
//! Currency changes arrive through `LISTEN currency_events`; see
//! `sql/schema.sql` for the trigger that emits them.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use ratecalc_common::{Currency, CurrencyKind};
use sqlx::postgres::{PgListener, PgPool, PgPoolOptions, PgRow};
use sqlx::Row;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::config::PostgresConfig;
use crate::error::RepositoryError;
use crate::repository::{CurrencyEvent, CurrencyFeed, CurrencyRepository, FEED_CAPACITY};

/// Notification channel carrying currency changes.
pub const CURRENCY_EVENTS_CHANNEL: &str = "currency_events";

const ENABLED_CURRENCIES_SQL: &str = r#"
    SELECT c.name, c.code, t.name AS type_name, c.is_enabled, c.updated_at
    FROM currencies c
    LEFT JOIN currency_types t ON c.type_id = t.id
    WHERE c.is_enabled = true
"#;

const CLASSIFICATIONS_SQL: &str = "SELECT id, name FROM currency_types";

/// Currency repository backed by PostgreSQL.
#[derive(Clone)]
pub struct PgCurrencyRepository {
    pool: PgPool,
}

impl PgCurrencyRepository {
    /// Connect to the database.
    pub async fn connect(config: &PostgresConfig) -> Result<Self, RepositoryError> {
        let pool = PgPoolOptions::new()
            .max_connections(5)
            .acquire_timeout(Duration::from_secs(5))
            .connect(&config.dsn())
            .await?;

        info!(host = %config.host, database = %config.name, "Connected to PostgreSQL");
        Ok(Self::from_pool(pool))
    }

    pub fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }
}

fn decode_currency(row: &PgRow) -> Result<Currency, RepositoryError> {
    let code: String = row.try_get("code")?;
    let name: String = row.try_get("name")?;
    let type_name: Option<String> = row.try_get("type_name")?;
    let enabled: bool = row.try_get("is_enabled")?;
    let updated_at: DateTime<Utc> = row.try_get("updated_at")?;

    let kind: CurrencyKind = type_name
        .as_deref()
        .unwrap_or_default()
        .parse()
        .map_err(|e| RepositoryError::Malformed(format!("{}: {}", code, e)))?;

    let mut currency = Currency::new(code, name, kind).with_enabled(enabled);
    currency.updated_at = updated_at;
    Ok(currency)
}

#[async_trait]
impl CurrencyRepository for PgCurrencyRepository {
    async fn list_enabled_currencies(&self) -> Result<Vec<Currency>, RepositoryError> {
        let rows = sqlx::query(ENABLED_CURRENCIES_SQL)
            .fetch_all(&self.pool)
            .await?;

        let mut currencies = Vec::with_capacity(rows.len());
        for row in &rows {
            match decode_currency(row) {
                Ok(currency) => currencies.push(currency),
                Err(e) => warn!(error = %e, "Skipping unclassifiable currency"),
            }
        }

        debug!(count = currencies.len(), "Listed enabled currencies");
        Ok(currencies)
    }

    async fn list_classifications(&self) -> Result<Vec<(i32, String)>, RepositoryError> {
        let rows = sqlx::query_as::<_, (i32, String)>(CLASSIFICATIONS_SQL)
            .fetch_all(&self.pool)
            .await?;
        Ok(rows)
    }

    async fn subscribe(&self, cancel: CancellationToken) -> Result<CurrencyFeed, RepositoryError> {
        let mut listener = PgListener::connect_with(&self.pool).await?;
        listener.listen(CURRENCY_EVENTS_CHANNEL).await?;

        let (tx, rx) = mpsc::channel(FEED_CAPACITY);

        tokio::spawn(async move {
            loop {
                let received = tokio::select! {
                    _ = cancel.cancelled() => break,
                    received = listener.recv() => received,
                };

                match received {
                    Ok(notification) => match CurrencyEvent::from_payload(notification.payload()) {
                        Ok(event) => {
                            if tx.send(Ok(event)).await.is_err() {
                                break;
                            }
                        }
                        Err(e) => {
                            warn!(error = %e, payload = notification.payload(), "Skipping malformed currency event");
                        }
                    },
                    Err(e) => {
                        error!(error = %e, "Currency notification stream failed");
                        let _ = tx.send(Err(e.into())).await;
                        break;
                    }
                }
            }
            debug!("Currency feed closed");
        });

        info!(channel = CURRENCY_EVENTS_CHANNEL, "Subscribed to currency events");
        Ok(rx)
    }
}
