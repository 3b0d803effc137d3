//! Worker loop and per-measurement pagination driver.
//!
//! Each worker pulls measurement names off the shared job queue and drives
//! one measurement to exhaustion before taking the next:
//!
//! ```text
//! QUERY ──▶ (empty? DONE) ──▶ WRITE (retry policy) ──▶ ADVANCE ──▶ loop?
//! ```
//!
//! Within one measurement, batches are strictly ordered by the cursor
//! (query N+1 only starts after write N completes), so the run watermark
//! can only ever move forward. Across measurements no ordering is
//! guaranteed or required.
//!
//! # Shutdown
//!
//! The shutdown signal is checked before every query; a cancelled
//! measurement surfaces as a failed outcome and in-flight progress up to the
//! last persisted watermark is preserved.

use crate::backend::{DataSource, DataTarget};
use crate::config::SyncConfig;
use crate::error::{Result, SyncError};
use crate::metrics;
use crate::point::DataPoint;
use crate::replicator::report::{MeasurementStats, SyncOutcome};
use crate::watermark::WatermarkStore;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::{mpsc, watch, Mutex};
use tracing::{debug, error, info, warn};

/// Run one worker: take measurements from the queue until it is drained and
/// closed, emitting exactly one [`SyncOutcome`] per measurement taken.
#[allow(clippy::too_many_arguments)]
pub(crate) async fn run_worker<S: DataSource, T: DataTarget>(
    worker_id: usize,
    source: Arc<S>,
    target: Arc<T>,
    config: Arc<SyncConfig>,
    watermark: Arc<WatermarkStore>,
    database: String,
    jobs: Arc<Mutex<mpsc::Receiver<String>>>,
    results: mpsc::Sender<SyncOutcome>,
    shutdown_rx: watch::Receiver<bool>,
) {
    loop {
        // Hold the queue lock only for the take, not for the copy.
        let measurement = { jobs.lock().await.recv().await };
        let Some(measurement) = measurement else {
            debug!(worker_id, "job queue drained, worker exiting");
            break;
        };

        info!(worker_id, database = %database, measurement = %measurement, "measurement started");
        let started = Instant::now();

        let result = sync_measurement(
            source.as_ref(),
            target.as_ref(),
            &config,
            &watermark,
            &database,
            &measurement,
            &shutdown_rx,
        )
        .await;

        let elapsed = started.elapsed();
        metrics::record_measurement_done(&database, &measurement, result.is_ok(), elapsed);
        match &result {
            Ok(stats) => info!(
                worker_id,
                database = %database,
                measurement = %measurement,
                points = stats.points,
                batches = stats.batches,
                elapsed_ms = elapsed.as_millis() as u64,
                "measurement complete"
            ),
            Err(e) => error!(
                worker_id,
                database = %database,
                measurement = %measurement,
                elapsed_ms = elapsed.as_millis() as u64,
                error = %e,
                "measurement failed"
            ),
        }

        let outcome = SyncOutcome {
            measurement,
            result,
        };
        if results.send(outcome).await.is_err() {
            // Orchestrator went away; nothing left to report to.
            break;
        }
    }
}

/// Drive one measurement from the run watermark to exhaustion.
pub(crate) async fn sync_measurement<S, T>(
    source: &S,
    target: &T,
    config: &SyncConfig,
    watermark: &WatermarkStore,
    database: &str,
    measurement: &str,
    shutdown_rx: &watch::Receiver<bool>,
) -> Result<MeasurementStats>
where
    S: DataSource + ?Sized,
    T: DataTarget + ?Sized,
{
    let tag_keys = source.list_tag_keys(database, measurement).await?;
    debug!(database, measurement, ?tag_keys, "resolved tag keys");

    let retry = config.retry_policy();
    let pacer = config.pacer();
    let batch_size = config.effective_batch_size();
    let destination = config.destination(database);

    let mut stats = MeasurementStats::default();
    let mut cursor = watermark.initial();

    loop {
        if *shutdown_rx.borrow() {
            return Err(SyncError::Cancelled);
        }

        let query_started = Instant::now();
        let batch = source
            .query_points(database, measurement, cursor, batch_size)
            .await?;
        metrics::record_query_latency(database, query_started.elapsed());

        if batch.points.is_empty() {
            debug!(database, measurement, "no more points");
            break;
        }

        // The source contract promises strictly ascending pages; a page
        // that fails to advance the cursor would repeat forever.
        if batch.max_timestamp_nanos <= cursor {
            return Err(SyncError::query(
                format!("{database}/{measurement}"),
                format!(
                    "batch of {} point(s) did not advance the cursor past {}",
                    batch.points.len(),
                    cursor
                ),
            ));
        }

        write_batch(target, &retry, &destination, &batch.points).await?;

        stats.points += batch.points.len() as u64;
        stats.batches += 1;
        metrics::record_batch_copied(database, measurement, batch.points.len());
        debug!(
            database,
            measurement,
            points = batch.points.len(),
            from = cursor,
            to = batch.max_timestamp_nanos,
            "batch written"
        );

        cursor = batch.max_timestamp_nanos;
        watermark.advance(cursor).await;
        pacer.pace().await;

        // A short page means the source is exhausted.
        if batch.points.len() < batch_size {
            break;
        }
    }

    Ok(stats)
}

/// Write one batch through the retry policy.
async fn write_batch<T: DataTarget + ?Sized>(
    target: &T,
    retry: &crate::resilience::RetryPolicy,
    destination: &str,
    points: &[DataPoint],
) -> Result<()> {
    let write_started = Instant::now();
    let result = retry
        .run("write_points", || target.write_points(destination, points))
        .await;
    metrics::record_write_latency(destination, write_started.elapsed());

    if let Err(e) = &result {
        warn!(destination, error = %e, "write retries exhausted");
    }
    result
}
