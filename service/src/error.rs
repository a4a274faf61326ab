//! Service error types.

use ratecalc_fx::FxError;
use thiserror::Error;

/// Currency repository and change-feed failures.
#[derive(Error, Debug)]
pub enum RepositoryError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// The change feed ended while the listener still expected events.
    #[error("Currency change feed closed")]
    FeedClosed,

    #[error("Malformed currency record: {0}")]
    Malformed(String),
}

/// Errors surfaced by the rate service lifecycle.
#[derive(Error, Debug)]
pub enum ServiceError {
    #[error("service is already started")]
    AlreadyStarted,

    #[error(transparent)]
    Fx(#[from] FxError),

    #[error(transparent)]
    Repository(#[from] RepositoryError),

    /// A supervised task panicked or was aborted.
    #[error("Task {task} terminated abnormally")]
    TaskPanicked { task: &'static str },

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("HTTP server error: {0}")]
    Http(#[from] std::io::Error),
}

impl ServiceError {
    /// Check if this error only reports cancellation and counts as a clean exit.
    pub fn is_cancellation(&self) -> bool {
        matches!(self, ServiceError::Fx(e) if e.is_cancelled())
    }

    /// Get the stable error code.
    pub fn error_code(&self) -> &'static str {
        match self {
            ServiceError::AlreadyStarted => "SERVICE_ALREADY_STARTED",
            ServiceError::Fx(e) => e.error_code(),
            ServiceError::Repository(_) => "REPOSITORY_ERROR",
            ServiceError::TaskPanicked { .. } => "TASK_PANICKED",
            ServiceError::Configuration(_) => "CONFIGURATION_ERROR",
            ServiceError::Http(_) => "HTTP_ERROR",
        }
    }
}

/// Result type for service operations.
pub type ServiceResult<T> = Result<T, ServiceError>;
