//! HTTP transport.
//!
//! - `GET /v0/convert?base=USD&quote=BTC&amount=100&decimals=2` → `{"output": 0.002}`
//! - `GET /v0/health`
//! - `GET /v0/metrics`

use std::future::IntoFuture;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use ratecalc_common::ConversionError;
use ratecalc_fx::DEFAULT_DECIMAL_PLACES;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::error::ServiceResult;
use crate::metrics::MetricsSnapshot;
use crate::service::RateService;
use crate::state::{ListenerState, ServiceState};

#[derive(Debug, Deserialize)]
struct ConvertParams {
    base: String,
    quote: String,
    amount: String,
    decimals: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ConvertResponse {
    pub output: f64,
}

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    /// Running with a live listener.
    pub ready: bool,
    pub state: ServiceState,
    pub listener: ListenerState,
    pub currencies: usize,
    pub rates: usize,
}

/// Error body with the status it is sent with.
#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    message: String,
}

impl ApiError {
    fn bad_request(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::BAD_REQUEST,
            message: message.into(),
        }
    }
}

impl From<ConversionError> for ApiError {
    fn from(err: ConversionError) -> Self {
        let status = match err {
            ConversionError::CurrencyNotAvailable(_) | ConversionError::InvalidInternalRate => {
                StatusCode::UNPROCESSABLE_ENTITY
            }
            ConversionError::InvalidCurrencyPair { .. } => StatusCode::BAD_REQUEST,
            ConversionError::ServiceInternal => StatusCode::INTERNAL_SERVER_ERROR,
        };
        Self {
            status,
            message: err.to_string(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        if self.status.is_server_error() {
            return self.status.into_response();
        }
        (
            self.status,
            Json(serde_json::json!({ "error": self.message })),
        )
            .into_response()
    }
}

type ApiResult<T> = Result<T, ApiError>;

fn parse_amount(raw: &str) -> ApiResult<Decimal> {
    let raw = raw.trim();
    Decimal::from_str(raw)
        .or_else(|_| Decimal::from_scientific(raw))
        .map_err(|_| ApiError::bad_request(format!("invalid amount \"{}\"", raw)))
}

fn parse_decimals(raw: Option<&str>) -> ApiResult<u32> {
    match raw.map(str::trim) {
        None | Some("") => Ok(DEFAULT_DECIMAL_PLACES),
        Some(raw) => raw
            .parse()
            .map_err(|_| ApiError::bad_request(format!("invalid decimals \"{}\"", raw))),
    }
}

async fn convert(
    State(service): State<Arc<RateService>>,
    Query(params): Query<ConvertParams>,
) -> ApiResult<Json<ConvertResponse>> {
    let amount = parse_amount(&params.amount)?;
    let decimals = parse_decimals(params.decimals.as_deref())?;

    let conversion = service.convert(&params.base, &params.quote, amount, decimals)?;

    Ok(Json(ConvertResponse {
        output: conversion.output_f64(),
    }))
}

async fn health(State(service): State<Arc<RateService>>) -> Json<HealthResponse> {
    let state = service.state();
    let listener = service.listener_state();
    Json(HealthResponse {
        ready: state.is_operational() && !listener.is_terminal(),
        state,
        listener,
        currencies: service.currencies().len(),
        rates: service.rates().len(),
    })
}

async fn metrics(State(service): State<Arc<RateService>>) -> Json<MetricsSnapshot> {
    Json(service.metrics().snapshot())
}

/// Build the HTTP router.
pub fn router(service: Arc<RateService>) -> Router {
    Router::new()
        .route("/v0/convert", get(convert))
        .route("/v0/health", get(health))
        .route("/v0/metrics", get(metrics))
        .with_state(service)
}

/// Serve until `cancel` fires, then drain for at most `shutdown_timeout`.
pub async fn serve(
    listener: TcpListener,
    service: Arc<RateService>,
    cancel: CancellationToken,
    shutdown_timeout: Duration,
) -> ServiceResult<()> {
    let shutdown = cancel.clone();
    let server = axum::serve(listener, router(service))
        .with_graceful_shutdown(async move { shutdown.cancelled().await })
        .into_future();
    tokio::pin!(server);

    tokio::select! {
        result = &mut server => return result.map_err(Into::into),
        _ = cancel.cancelled() => {}
    }

    info!("HTTP server draining");
    match tokio::time::timeout(shutdown_timeout, server).await {
        Ok(result) => result?,
        Err(_) => warn!(
            timeout_ms = shutdown_timeout.as_millis() as u64,
            "HTTP server shutdown timed out"
        ),
    }

    info!("HTTP server stopped");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RateServiceConfig;
    use crate::repository::memory::InMemoryCurrencyRepository;
    use axum::body::{to_bytes, Body};
    use axum::http::Request;
    use ratecalc_common::{Currency, CurrencyCode};
    use ratecalc_fx::MockRateProvider;
    use rust_decimal_macros::dec;
    use tower::ServiceExt;

    fn app() -> (Router, Arc<RateService>) {
        let service = Arc::new(RateService::new(
            RateServiceConfig::default(),
            Arc::new(InMemoryCurrencyRepository::new()),
            Arc::new(MockRateProvider::new("mock")),
        ));

        service.currencies().apply(Currency::fiat("USD", "US Dollar"));
        service.currencies().apply(Currency::fiat("EUR", "Euro"));
        service.currencies().apply(Currency::crypto("BTC", "Bitcoin"));
        service.rates().upsert(CurrencyCode::usd(), dec!(1));
        service.rates().upsert(CurrencyCode::new("BTC"), dec!(0.00002));

        (router(service.clone()), service)
    }

    async fn get(app: Router, uri: &str) -> (StatusCode, serde_json::Value) {
        let response = app
            .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
            .await
            .unwrap();
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let body = if bytes.is_empty() {
            serde_json::Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap_or(serde_json::Value::Null)
        };
        (status, body)
    }

    #[tokio::test]
    async fn test_convert_ok() {
        let (app, _) = app();

        let (status, body) = get(app.clone(), "/v0/convert?base=btc&quote=usd&amount=2").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["output"], 100000.0);

        let (status, body) =
            get(app, "/v0/convert?base=USD&quote=BTC&amount=1234.5&decimals=2").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["output"], 0.02);
    }

    #[tokio::test]
    async fn test_convert_error_statuses() {
        let (app, _) = app();

        let (status, body) = get(app.clone(), "/v0/convert?base=usd&quote=xyz&amount=1").await;
        assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
        assert_eq!(
            body["error"],
            "currency with code \"XYZ\" is not available for conversion"
        );

        let (status, _) = get(app.clone(), "/v0/convert?base=usd&quote=eur&amount=1").await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let (status, body) = get(app.clone(), "/v0/convert?base=eur&quote=btc&amount=1").await;
        assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
        assert_eq!(body["error"], "invalid rate for pair, please try later");

        let (status, _) = get(app.clone(), "/v0/convert?base=usd&quote=btc&amount=lots").await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let (status, _) = get(app.clone(), "/v0/convert?base=usd&quote=btc&amount=1&decimals=-1").await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let (status, _) = get(app, "/v0/convert?base=usd&amount=1").await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[test]
    fn test_internal_error_has_empty_body() {
        let response = ApiError::from(ConversionError::ServiceInternal).into_response();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[tokio::test]
    async fn test_health_and_metrics() {
        let (app, service) = app();
        let _ = service.convert("usd", "btc", dec!(1), 5);

        let (status, body) = get(app.clone(), "/v0/health").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["state"], "idle");
        assert_eq!(body["ready"], false);
        assert_eq!(body["currencies"], 3);

        let (status, body) = get(app, "/v0/metrics").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["conversions_succeeded"], 1);
    }

    #[tokio::test]
    async fn test_serve_stops_on_cancel() {
        let (_, service) = app();
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let cancel = CancellationToken::new();

        let server = tokio::spawn(serve(listener, service, cancel.clone(), Duration::from_secs(1)));
        cancel.cancel();

        tokio::time::timeout(Duration::from_secs(5), server)
            .await
            .expect("server did not stop")
            .unwrap()
            .unwrap();
    }
}
