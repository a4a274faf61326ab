//! Rate Calculator Service
//!
//! Keeps the currency and rate stores current: a listener follows the
//! currency repository change feed, a poller refreshes every rate on a fixed
//! interval, and an HTTP surface answers conversion requests from the stores.

pub mod config;
pub mod error;
pub mod http;
pub mod listener;
pub mod metrics;
pub mod poller;
pub mod postgres;
pub mod refresh;
pub mod repository;
pub mod service;
pub mod state;

pub use config::AppConfig;
pub use error::{RepositoryError, ServiceError, ServiceResult};
pub use service::RateService;
pub use state::{ListenerState, ServiceState};
