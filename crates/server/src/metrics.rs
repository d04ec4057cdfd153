//! Request metrics
//!
//! Lock-free counters updated on every request and exposed as a JSON
//! snapshot at `/metrics`. All updates are atomic; the snapshot is a
//! consistent-enough read for monitoring purposes.

use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

/// Thread-safe request counters for the HTTP service
#[derive(Debug)]
pub struct MetricsCollector {
    /// Total requests received across all endpoints
    total_requests: AtomicU64,
    /// Classification requests served successfully
    predictions: AtomicU64,
    /// Grad-CAM explanations served successfully
    explanations: AtomicU64,
    /// Responses with a 4xx status
    client_errors: AtomicU64,
    /// Responses with a 5xx status
    server_errors: AtomicU64,
    /// Process start, for uptime reporting
    started: Instant,
}

/// Point-in-time view of the collected metrics
#[derive(Debug, Clone, Serialize)]
pub struct MetricsSnapshot {
    /// Total requests received
    pub total_requests: u64,
    /// Classification requests served
    pub predictions: u64,
    /// Explanations served
    pub explanations: u64,
    /// 4xx responses
    pub client_errors: u64,
    /// 5xx responses
    pub server_errors: u64,
    /// Seconds since the server started
    pub uptime_seconds: u64,
}

impl MetricsCollector {
    /// Create a collector with all counters at zero
    #[must_use]
    pub fn new() -> Self {
        Self {
            total_requests: AtomicU64::new(0),
            predictions: AtomicU64::new(0),
            explanations: AtomicU64::new(0),
            client_errors: AtomicU64::new(0),
            server_errors: AtomicU64::new(0),
            started: Instant::now(),
        }
    }

    /// Record an incoming request
    pub fn record_request(&self) {
        self.total_requests.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a served classification
    pub fn record_prediction(&self) {
        self.predictions.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a served explanation
    pub fn record_explanation(&self) {
        self.explanations.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a response status code
    pub fn record_status(&self, status: u16) {
        match status {
            400..=499 => {
                self.client_errors.fetch_add(1, Ordering::Relaxed);
            }
            500..=599 => {
                self.server_errors.fetch_add(1, Ordering::Relaxed);
            }
            _ => {}
        }
    }

    /// Consistent read of all counters
    #[must_use]
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            total_requests: self.total_requests.load(Ordering::Relaxed),
            predictions: self.predictions.load(Ordering::Relaxed),
            explanations: self.explanations.load(Ordering::Relaxed),
            client_errors: self.client_errors.load(Ordering::Relaxed),
            server_errors: self.server_errors.load(Ordering::Relaxed),
            uptime_seconds: self.started.elapsed().as_secs(),
        }
    }
}

impl Default for MetricsCollector {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counters_accumulate() {
        let metrics = MetricsCollector::new();
        metrics.record_request();
        metrics.record_request();
        metrics.record_prediction();
        metrics.record_explanation();
        metrics.record_status(400);
        metrics.record_status(500);
        metrics.record_status(200);

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.total_requests, 2);
        assert_eq!(snapshot.predictions, 1);
        assert_eq!(snapshot.explanations, 1);
        assert_eq!(snapshot.client_errors, 1);
        assert_eq!(snapshot.server_errors, 1);
    }
}
