//! Metrics for observability.
//!
//! Exports Prometheus-compatible metrics through the `metrics` facade for:
//! - Batches and points copied
//! - Query/write latency
//! - Write retries
//! - Watermark position
//! - Per-measurement outcomes
//!
//! All metrics are prefixed with `sync_` and follow Prometheus conventions:
//! counters end in `_total`, gauges represent current state, histograms
//! track distributions.

use metrics::{counter, gauge, histogram};
use std::time::Duration;

/// Record one completed query/write cycle for a measurement.
pub fn record_batch_copied(database: &str, measurement: &str, points: usize) {
    counter!("sync_batches_total", "database" => database.to_string(), "measurement" => measurement.to_string()).increment(1);
    counter!("sync_points_total", "database" => database.to_string(), "measurement" => measurement.to_string()).increment(points as u64);
}

/// Record source query latency.
pub fn record_query_latency(database: &str, duration: Duration) {
    histogram!("sync_query_duration_seconds", "database" => database.to_string())
        .record(duration.as_secs_f64());
}

/// Record target write latency.
pub fn record_write_latency(destination: &str, duration: Duration) {
    histogram!("sync_write_duration_seconds", "destination" => destination.to_string())
        .record(duration.as_secs_f64());
}

/// Record one retried write attempt.
pub fn record_write_retry(operation: &str) {
    counter!("sync_write_retries_total", "operation" => operation.to_string()).increment(1);
}

/// Record a measurement finishing, successfully or not.
pub fn record_measurement_done(database: &str, measurement: &str, success: bool, duration: Duration) {
    let status = if success { "success" } else { "failure" };
    counter!("sync_measurements_total", "database" => database.to_string(), "status" => status)
        .increment(1);
    histogram!(
        "sync_measurement_duration_seconds",
        "database" => database.to_string(),
        "measurement" => measurement.to_string()
    )
    .record(duration.as_secs_f64());
}

/// Record the current watermark position (epoch nanoseconds).
pub fn set_watermark(nanos: i64) {
    gauge!("sync_watermark_nanoseconds").set(nanos as f64);
}

/// Record the number of workers currently paginating measurements.
pub fn set_active_workers(count: usize) {
    gauge!("sync_active_workers").set(count as f64);
}
