//! Currency repository capability and change-feed events.

use std::fmt;
use std::str::FromStr;

use async_trait::async_trait;
use ratecalc_common::{Currency, CurrencyCode};
use serde::Deserialize;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::error::RepositoryError;

/// Capacity of the change-feed channel.
pub const FEED_CAPACITY: usize = 10;

/// Change-feed receiver. Items are events or a terminal feed error.
pub type CurrencyFeed = mpsc::Receiver<Result<CurrencyEvent, RepositoryError>>;

/// Kind of change carried by an event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    /// Insert or update.
    Upsert,
    Delete,
}

impl FromStr for Operation {
    type Err = RepositoryError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "INSERT" | "UPDATE" | "UPSERT" => Ok(Operation::Upsert),
            "DELETE" => Ok(Operation::Delete),
            other => Err(RepositoryError::Malformed(format!(
                "unknown operation \"{}\"",
                other
            ))),
        }
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Operation::Upsert => f.write_str("UPSERT"),
            Operation::Delete => f.write_str("DELETE"),
        }
    }
}

/// A single currency change from the feed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CurrencyEvent {
    pub operation: Operation,
    pub code: CurrencyCode,
    pub name: String,
    pub enabled: bool,
    /// Numeric classification id, resolved through the classification table.
    pub classification_id: i32,
}

#[derive(Deserialize)]
struct EventPayload {
    operation: String,
    currency: CurrencyPayload,
}

#[derive(Deserialize)]
struct CurrencyPayload {
    code: String,
    name: String,
    is_enabled: bool,
    type_id: i32,
}

impl CurrencyEvent {
    /// Decode a JSON notification payload:
    /// `{"operation":"UPDATE","currency":{"code":"BTC","name":"Bitcoin","is_enabled":true,"type_id":2}}`.
    pub fn from_payload(payload: &str) -> Result<Self, RepositoryError> {
        let payload: EventPayload = serde_json::from_str(payload)
            .map_err(|e| RepositoryError::Malformed(e.to_string()))?;

        let code = CurrencyCode::new(&payload.currency.code);
        if code.is_empty() {
            return Err(RepositoryError::Malformed("empty currency code".to_string()));
        }

        Ok(Self {
            operation: payload.operation.parse()?,
            code,
            name: payload.currency.name,
            enabled: payload.currency.is_enabled,
            classification_id: payload.currency.type_id,
        })
    }
}

/// Source of currency records and their changes.
#[async_trait]
pub trait CurrencyRepository: Send + Sync {
    /// All currencies currently enabled.
    async fn list_enabled_currencies(&self) -> Result<Vec<Currency>, RepositoryError>;

    /// Classification table rows as `(id, name)`.
    async fn list_classifications(&self) -> Result<Vec<(i32, String)>, RepositoryError>;

    /// Subscribe to currency changes. The feed ends when `cancel` fires.
    async fn subscribe(&self, cancel: CancellationToken) -> Result<CurrencyFeed, RepositoryError>;
}


#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_payload() {
        let event = CurrencyEvent::from_payload(
            r#"{"operation":"UPDATE","currency":{"code":"btc","name":"Bitcoin","is_enabled":true,"type_id":2}}"#,
        )
        .unwrap();

        assert_eq!(event.operation, Operation::Upsert);
        assert_eq!(event.code.as_str(), "BTC");
        assert_eq!(event.name, "Bitcoin");
        assert!(event.enabled);
        assert_eq!(event.classification_id, 2);
    }

    #[test]
    fn test_decode_delete() {
        let event = CurrencyEvent::from_payload(
            r#"{"operation":"delete","currency":{"code":"EUR","name":"Euro","is_enabled":true,"type_id":1}}"#,
        )
        .unwrap();
        assert_eq!(event.operation, Operation::Delete);
    }

    #[test]
    fn test_decode_rejects_malformed() {
        assert!(CurrencyEvent::from_payload("not json").is_err());
        assert!(CurrencyEvent::from_payload(
            r#"{"operation":"TRUNCATE","currency":{"code":"EUR","name":"Euro","is_enabled":true,"type_id":1}}"#
        )
        .is_err());
        assert!(CurrencyEvent::from_payload(
            r#"{"operation":"INSERT","currency":{"code":" ","name":"Blank","is_enabled":true,"type_id":1}}"#
        )
        .is_err());
    }
}
