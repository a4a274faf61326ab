//! Metrics collection for service monitoring.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use serde::Serialize;

/// Rate service counters.
#[derive(Default)]
pub struct ServiceMetrics {
    /// Refreshes started, by poller, listener or startup.
    pub refreshes_started: AtomicU64,
    pub refreshes_succeeded: AtomicU64,
    pub refreshes_failed: AtomicU64,
    /// Rates written across all refreshes.
    pub rates_written: AtomicU64,
    /// Change-feed events applied to the currency store.
    pub currency_events_applied: AtomicU64,
    pub conversions_succeeded: AtomicU64,
    pub conversions_failed: AtomicU64,
}

impl ServiceMetrics {
    /// Create new metrics instance.
    pub fn new() -> Self {
        Self::default()
    }

    pub fn refresh_started(&self) {
        self.refreshes_started.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a successful refresh that wrote `written` rates.
    pub fn refresh_succeeded(&self, written: usize) {
        self.refreshes_succeeded.fetch_add(1, Ordering::Relaxed);
        self.rates_written
            .fetch_add(written as u64, Ordering::Relaxed);
    }

    pub fn refresh_failed(&self) {
        self.refreshes_failed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn currency_event_applied(&self) {
        self.currency_events_applied.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a conversion outcome.
    pub fn conversion(&self, ok: bool) {
        if ok {
            self.conversions_succeeded.fetch_add(1, Ordering::Relaxed);
        } else {
            self.conversions_failed.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// Get current metrics snapshot.
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            refreshes_started: self.refreshes_started.load(Ordering::Relaxed),
            refreshes_succeeded: self.refreshes_succeeded.load(Ordering::Relaxed),
            refreshes_failed: self.refreshes_failed.load(Ordering::Relaxed),
            rates_written: self.rates_written.load(Ordering::Relaxed),
            currency_events_applied: self.currency_events_applied.load(Ordering::Relaxed),
            conversions_succeeded: self.conversions_succeeded.load(Ordering::Relaxed),
            conversions_failed: self.conversions_failed.load(Ordering::Relaxed),
        }
    }
}

/// Snapshot of metrics at a point in time.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct MetricsSnapshot {
    pub refreshes_started: u64,
    pub refreshes_succeeded: u64,
    pub refreshes_failed: u64,
    pub rates_written: u64,
    pub currency_events_applied: u64,
    pub conversions_succeeded: u64,
    pub conversions_failed: u64,
}

/// Shared metrics instance.
pub type SharedMetrics = Arc<ServiceMetrics>;
