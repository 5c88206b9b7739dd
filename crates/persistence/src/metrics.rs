//! Store metrics collection.
//!
//! Provides functions for recording blob store operation metrics.

use metrics::{counter, histogram};
use std::time::Instant;

/// Record store operation duration.
pub fn record_operation_duration(operation: &str, duration_secs: f64) {
    histogram!(
        "store_operation_duration_seconds",
        "operation" => operation.to_string()
    )
    .record(duration_secs);
}

/// Record a failed store operation.
pub fn record_operation_failure(operation: &str) {
    counter!(
        "store_operation_failures_total",
        "operation" => operation.to_string()
    )
    .increment(1);
}

/// A helper to time store operations and record metrics.
///
/// Usage:
/// ```ignore
/// let timer = StoreTimer::new("file_load");
/// let result = tokio::fs::read_to_string(&path).await;
/// timer.record();
/// ```
pub struct StoreTimer {
    operation: String,
    start: Instant,
}

impl StoreTimer {
    /// Create a new timer for the given operation name.
    pub fn new(operation: impl Into<String>) -> Self {
        Self {
            operation: operation.into(),
            start: Instant::now(),
        }
    }

    /// Record the elapsed duration to metrics.
    pub fn record(self) {
        let duration = self.start.elapsed().as_secs_f64();
        record_operation_duration(&self.operation, duration);
    }
}
