//! Service configuration.

use std::time::Duration;

use ratecalc_fx::fastforex::DEFAULT_BASE_URL;
use ratecalc_fx::FastForexConfig;

use crate::error::{ServiceError, ServiceResult};

/// Rate service configuration.
#[derive(Debug, Clone)]
pub struct RateServiceConfig {
    /// Interval between full rate refreshes.
    pub rate_polling_interval: Duration,
}

impl Default for RateServiceConfig {
    fn default() -> Self {
        Self {
            rate_polling_interval: Duration::from_secs(60),
        }
    }
}

/// HTTP server configuration.
#[derive(Debug, Clone)]
pub struct HttpConfig {
    pub host: String,
    pub port: u16,
    /// Upper bound on draining in-flight requests at shutdown.
    pub shutdown_timeout: Duration,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8080,
            shutdown_timeout: Duration::from_secs(30),
        }
    }
}

impl HttpConfig {
    /// Socket address to bind.
    pub fn listen_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// PostgreSQL connection settings.
#[derive(Debug, Clone, Default)]
pub struct PostgresConfig {
    pub user: String,
    pub password: String,
    pub host: String,
    pub name: String,
}

impl PostgresConfig {
    /// Connection string.
    pub fn dsn(&self) -> String {
        format!(
            "postgres://{}:{}@{}/{}?sslmode=disable",
            self.user, self.password, self.host, self.name
        )
    }
}

/// Main application configuration.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub app_name: String,
    /// Default log filter when `RUST_LOG` is unset.
    pub log_level: String,
    pub service: RateServiceConfig,
    pub http: HttpConfig,
    pub postgres: PostgresConfig,
    pub fastforex: FastForexConfig,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            app_name: "rate-calculator".to_string(),
            log_level: "warn".to_string(),
            service: RateServiceConfig::default(),
            http: HttpConfig::default(),
            postgres: PostgresConfig::default(),
            fastforex: FastForexConfig::default(),
        }
    }
}

impl AppConfig {
    /// Load configuration from environment variables.
    ///
    /// `.env.local` and `.env` are read first when present; variables already
    /// set in the process environment win.
    pub fn from_env() -> ServiceResult<Self> {
        let _ = dotenvy::from_filename(".env.local");
        let _ = dotenvy::dotenv();

        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build configuration from an arbitrary variable source.
    pub fn from_lookup<F>(lookup: F) -> ServiceResult<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();
        let var = |key: &str| lookup(key).filter(|value| !value.trim().is_empty());

        if let Some(name) = var("APP_NAME") {
            config.app_name = name;
        }

        if let Some(level) = var("LOG_LEVEL") {
            config.log_level = level.to_lowercase();
        }

        if let Some(interval) = var("SERVICE_RATE_POLLING_INTERVAL") {
            config.service.rate_polling_interval =
                parse_duration(&interval).map_err(|e| invalid("SERVICE_RATE_POLLING_INTERVAL", e))?;
        }

        if let Some(host) = var("HTTP_SERVER_HOST") {
            config.http.host = host;
        }

        if let Some(port) = var("HTTP_SERVER_PORT") {
            config.http.port = port
                .trim()
                .parse()
                .map_err(|_| invalid("HTTP_SERVER_PORT", format!("not a port: {}", port)))?;
        }

        if let Some(timeout) = var("HTTP_SERVER_SHUTDOWN_TIMEOUT") {
            config.http.shutdown_timeout =
                parse_duration(&timeout).map_err(|e| invalid("HTTP_SERVER_SHUTDOWN_TIMEOUT", e))?;
        }

        if let Some(user) = var("POSTGRES_DB_USER") {
            config.postgres.user = user;
        }
        if let Some(password) = var("POSTGRES_DB_PASSWORD") {
            config.postgres.password = password;
        }
        if let Some(host) = var("POSTGRES_DB_HOST") {
            config.postgres.host = host;
        }
        if let Some(name) = var("POSTGRES_DB_NAME") {
            config.postgres.name = name;
        }

        if let Some(key) = var("FAST_FOREX_API_KEY") {
            config.fastforex.api_key = key;
        }

        if let Some(timeout) = var("FAST_FOREX_REQUEST_TIMEOUT") {
            config.fastforex.request_timeout =
                parse_duration(&timeout).map_err(|e| invalid("FAST_FOREX_REQUEST_TIMEOUT", e))?;
        }

        if let Some(retries) = var("FAST_FOREX_RETRIES_COUNT") {
            config.fastforex.retries_count = retries.trim().parse().map_err(|_| {
                invalid("FAST_FOREX_RETRIES_COUNT", format!("not a count: {}", retries))
            })?;
        }

        if let Some(url) = var("FAST_FOREX_BASE_URL") {
            config.fastforex.base_url = url;
        }

        Ok(config)
    }

    /// Validate configuration.
    pub fn validate(&self) -> ServiceResult<()> {
        if self.fastforex.api_key.trim().is_empty() {
            return Err(ServiceError::Configuration(
                "FAST_FOREX_API_KEY is required".to_string(),
            ));
        }

        if self.fastforex.request_timeout.is_zero() {
            return Err(ServiceError::Configuration(
                "FastForex request timeout cannot be 0".to_string(),
            ));
        }

        if self.fastforex.base_url.is_empty() {
            return Err(ServiceError::Configuration(format!(
                "FastForex base URL cannot be empty (default {})",
                DEFAULT_BASE_URL
            )));
        }

        let postgres = [
            ("POSTGRES_DB_USER", &self.postgres.user),
            ("POSTGRES_DB_PASSWORD", &self.postgres.password),
            ("POSTGRES_DB_HOST", &self.postgres.host),
            ("POSTGRES_DB_NAME", &self.postgres.name),
        ];
        if let Some((key, _)) = postgres.iter().find(|(_, value)| value.is_empty()) {
            return Err(ServiceError::Configuration(format!("{} is required", key)));
        }

        if self.service.rate_polling_interval.is_zero() {
            return Err(ServiceError::Configuration(
                "Rate polling interval cannot be 0".to_string(),
            ));
        }

        if self.http.port == 0 {
            return Err(ServiceError::Configuration(
                "Listen port cannot be 0".to_string(),
            ));
        }

        Ok(())
    }
}

fn invalid(key: &str, reason: impl std::fmt::Display) -> ServiceError {
    ServiceError::Configuration(format!("{}: {}", key, reason))
}

/// Parse `250ms`, `30s`, `5m`, `1h` or a bare number of seconds.
pub fn parse_duration(value: &str) -> Result<Duration, String> {
    let value = value.trim();
    let split = value
        .find(|c: char| !c.is_ascii_digit())
        .unwrap_or(value.len());
    let (digits, unit) = value.split_at(split);

    let amount: u64 = digits
        .parse()
        .map_err(|_| format!("invalid duration \"{}\"", value))?;

    let seconds = |scale: u64| {
        amount
            .checked_mul(scale)
            .map(Duration::from_secs)
            .ok_or_else(|| format!("duration \"{}\" is too large", value))
    };

    match unit.trim() {
        "ms" => Ok(Duration::from_millis(amount)),
        "" | "s" => Ok(Duration::from_secs(amount)),
        "m" => seconds(60),
        "h" => seconds(3600),
        other => Err(format!("unknown duration unit \"{}\" in \"{}\"", other, value)),
    }
}
