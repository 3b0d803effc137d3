// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Replication orchestrator.
//!
//! The [`Replicator`] ties together:
//! - Source/target backends via the [`crate::backend`] capability traits
//! - Watermark persistence via [`crate::watermark::WatermarkStore`]
//! - Write retries and pacing via [`crate::resilience`]
//! - The per-measurement pagination driver in [`worker`]
//!
//! # Run Lifecycle
//!
//! 1. Connect source and target; a failure on either aborts before any work
//!    starts, releasing whichever side did connect.
//! 2. Compute the initial watermark from the configured start and the resume
//!    file.
//! 3. Resolve the database list: the explicit configured name, or the
//!    source's full list minus the reserved internal database and the
//!    exclusion set.
//! 4. Per database, sequentially: resolve measurements, fan them out to a
//!    bounded worker pool over a job queue, drain one outcome per
//!    measurement, aggregate.
//! 5. A database with failed measurements fails the run; later databases are
//!    not attempted. Connections are released on every exit path.

mod report;
mod worker;

pub use report::{MeasurementStats, SyncOutcome, SyncReport};

use crate::backend::{DataSource, DataTarget};
use crate::config::SyncConfig;
use crate::error::{Result, SyncError};
use crate::metrics;
use crate::watermark::{format_nanos, WatermarkStore};
use futures::future::join_all;
use std::sync::Arc;
use tokio::sync::{mpsc, watch, Mutex};
use tracing::{debug, error, info, warn};

/// Database name reserved for the source's own bookkeeping; never copied.
const RESERVED_INTERNAL_DB: &str = "_internal";

/// The replication engine for one run.
///
/// Owns the configuration and watermark for the run's lifetime. The source
/// and target handles are long-lived and shared read-only across all workers
/// of a database.
pub struct Replicator<S: DataSource, T: DataTarget> {
    config: Arc<SyncConfig>,
    source: Arc<S>,
    target: Arc<T>,
    shutdown_rx: watch::Receiver<bool>,
}

impl<S: DataSource, T: DataTarget> Replicator<S, T> {
    /// Create a replicator.
    ///
    /// `shutdown_rx` carries the cancellation signal: flipping it to `true`
    /// stops new queries and writes promptly without rolling back in-flight
    /// batches.
    pub fn new(
        config: SyncConfig,
        source: Arc<S>,
        target: Arc<T>,
        shutdown_rx: watch::Receiver<bool>,
    ) -> Self {
        Self {
            config: Arc::new(config),
            source,
            target,
            shutdown_rx,
        }
    }

    /// Execute the run to completion.
    pub async fn run(&self) -> Result<SyncReport> {
        self.source.connect().await.map_err(|e| {
            error!(error = %e, "source connection failed");
            e
        })?;

        if let Err(e) = self.target.connect().await {
            error!(error = %e, "target connection failed");
            if let Err(close_err) = self.source.close().await {
                warn!(side = "source", error = %close_err, "failed to close connection");
            }
            return Err(e);
        }

        let result = self.sync_all().await;

        let outcomes = join_all([self.source.close(), self.target.close()]).await;
        for (side, outcome) in ["source", "target"].into_iter().zip(outcomes) {
            if let Err(e) = outcome {
                warn!(side, error = %e, "failed to close connection");
            }
        }

        result
    }

    async fn sync_all(&self) -> Result<SyncReport> {
        let watermark = Arc::new(WatermarkStore::open(
            self.config.start.as_deref(),
            self.config.resume_file.as_deref(),
        ));
        info!(
            watermark = %format_nanos(watermark.initial()),
            "starting replication"
        );

        let databases = self.resolve_databases().await?;
        if databases.is_empty() {
            warn!("no databases to sync");
            return Ok(SyncReport::default());
        }

        let mut report = SyncReport {
            databases: databases.len(),
            ..Default::default()
        };

        for database in &databases {
            let (measurements, points) = self.sync_database(database, &watermark).await?;
            report.measurements += measurements;
            report.points += points;
        }

        info!(%report, "replication complete");
        Ok(report)
    }

    /// Resolve the set of databases to copy.
    async fn resolve_databases(&self) -> Result<Vec<String>> {
        if let Some(db) = &self.config.source_db {
            return Ok(vec![db.clone()]);
        }

        let all = self.source.list_databases().await?;
        Ok(all
            .into_iter()
            .filter(|db| db != RESERVED_INTERNAL_DB && !self.config.source_db_exclude.contains(db))
            .collect())
    }

    /// Copy every measurement of one database through the worker pool.
    ///
    /// Returns `(measurement count, point count)` on success.
    async fn sync_database(
        &self,
        database: &str,
        watermark: &Arc<WatermarkStore>,
    ) -> Result<(usize, u64)> {
        info!(database, "syncing database");

        let measurements = self.source.list_measurements(database).await?;
        if measurements.is_empty() {
            warn!(database, "database has no measurements, skipping");
            return Ok((0, 0));
        }

        let worker_count = self.config.effective_parallel();
        let (jobs_tx, jobs_rx) = mpsc::channel::<String>(measurements.len());
        let (results_tx, mut results_rx) = mpsc::channel::<SyncOutcome>(measurements.len());
        let jobs_rx = Arc::new(Mutex::new(jobs_rx));

        let mut handles = Vec::with_capacity(worker_count);
        for worker_id in 0..worker_count {
            handles.push(tokio::spawn(worker::run_worker(
                worker_id,
                Arc::clone(&self.source),
                Arc::clone(&self.target),
                Arc::clone(&self.config),
                Arc::clone(watermark),
                database.to_string(),
                Arc::clone(&jobs_rx),
                results_tx.clone(),
                self.shutdown_rx.clone(),
            )));
        }
        drop(results_tx);
        metrics::set_active_workers(worker_count);

        for measurement in &measurements {
            debug!(database, measurement = %measurement, "dispatching measurement");
            if jobs_tx.send(measurement.clone()).await.is_err() {
                break;
            }
        }
        drop(jobs_tx);

        let mut failed = 0usize;
        let mut points = 0u64;
        for _ in 0..measurements.len() {
            match results_rx.recv().await {
                Some(outcome) => match outcome.result {
                    Ok(stats) => points += stats.points,
                    Err(e) => {
                        failed += 1;
                        error!(
                            database,
                            measurement = %outcome.measurement,
                            error = %e,
                            "sync error"
                        );
                    }
                },
                // All workers exited without delivering every outcome.
                None => {
                    failed += 1;
                    break;
                }
            }
        }

        for handle in handles {
            if let Err(e) = handle.await {
                warn!(database, error = %e, "worker panicked");
            }
        }
        metrics::set_active_workers(0);

        if failed > 0 {
            return Err(SyncError::Database {
                database: database.to_string(),
                failed,
            });
        }

        Ok((measurements.len(), points))
    }
}
