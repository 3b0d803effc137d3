//! Scripted mock backends for engine tests.
//!
//! [`ScriptedSource`] serves a fixed in-memory dataset through the real
//! `query_points` contract (strictly-after filter, ascending order, limit),
//! so the pagination driver exercises the same batch arithmetic it would
//! against a live instance. [`RecordingTarget`] captures every write attempt
//! for assertions and can be scripted to fail.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::{Duration, Instant};
use tsdb_sync::backend::{BoxFuture, DataSource, DataTarget};
use tsdb_sync::error::SyncError;
use tsdb_sync::point::{DataPoint, QueryBatch};

/// Build `count` points one second apart, all strictly after `after_nanos`.
pub fn points(measurement: &str, after_nanos: i64, count: usize) -> Vec<DataPoint> {
    (0..count)
        .map(|i| {
            DataPoint::new(measurement, after_nanos + (i as i64 + 1) * 1_000_000_000)
                .with_tag("host", "db-01")
                .with_field("value", i as i64)
        })
        .collect()
}

/// In-memory source with instrumentation for concurrency and cursor
/// assertions.
#[derive(Default)]
pub struct ScriptedSource {
    databases: Vec<String>,
    measurements: HashMap<String, Vec<String>>,
    data: HashMap<(String, String), Vec<DataPoint>>,
    fail_queries: bool,
    /// Cursor of every query_points call, in arrival order.
    pub query_sinces: Mutex<Vec<i64>>,
    pub query_calls: AtomicUsize,
    in_flight: AtomicUsize,
    pub max_in_flight: AtomicUsize,
}

impl ScriptedSource {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a database with its measurements.
    pub fn with_database(mut self, database: &str, measurements: &[&str]) -> Self {
        self.databases.push(database.to_string());
        self.measurements.insert(
            database.to_string(),
            measurements.iter().map(|m| m.to_string()).collect(),
        );
        self
    }

    /// Register a bare database name without measurement bookkeeping
    /// (discovery-only tests).
    pub fn with_database_name(mut self, database: &str) -> Self {
        self.databases.push(database.to_string());
        self
    }

    /// Load points for one measurement.
    pub fn with_points(mut self, database: &str, measurement: &str, points: Vec<DataPoint>) -> Self {
        self.data
            .insert((database.to_string(), measurement.to_string()), points);
        self
    }

    /// Make every query fail.
    pub fn failing_queries(mut self) -> Self {
        self.fail_queries = true;
        self
    }

    pub fn observed_max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }
}

impl DataSource for ScriptedSource {
    fn connect(&self) -> BoxFuture<'_, ()> {
        Box::pin(async { Ok(()) })
    }

    fn close(&self) -> BoxFuture<'_, ()> {
        Box::pin(async { Ok(()) })
    }

    fn list_databases(&self) -> BoxFuture<'_, Vec<String>> {
        let dbs = self.databases.clone();
        Box::pin(async move { Ok(dbs) })
    }

    fn list_measurements(&self, database: &str) -> BoxFuture<'_, Vec<String>> {
        let measurements = self.measurements.get(database).cloned().unwrap_or_default();
        Box::pin(async move { Ok(measurements) })
    }

    fn list_tag_keys(&self, _database: &str, _measurement: &str) -> BoxFuture<'_, HashSet<String>> {
        Box::pin(async { Ok(["host".to_string()].into_iter().collect()) })
    }

    fn query_points(
        &self,
        database: &str,
        measurement: &str,
        since_nanos: i64,
        limit: usize,
    ) -> BoxFuture<'_, QueryBatch> {
        let key = (database.to_string(), measurement.to_string());
        Box::pin(async move {
            if self.fail_queries {
                return Err(SyncError::query(
                    format!("{}/{}", key.0, key.1),
                    "scripted query failure",
                ));
            }

            self.query_calls.fetch_add(1, Ordering::SeqCst);
            self.query_sinces.lock().unwrap().push(since_nanos);

            let concurrent = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.max_in_flight.fetch_max(concurrent, Ordering::SeqCst);
            // Give other workers a chance to overlap so the concurrency
            // bound is actually observable.
            tokio::time::sleep(Duration::from_millis(5)).await;
            self.in_flight.fetch_sub(1, Ordering::SeqCst);

            let mut matching: Vec<DataPoint> = self
                .data
                .get(&key)
                .into_iter()
                .flatten()
                .filter(|p| p.timestamp_nanos > since_nanos)
                .cloned()
                .collect();
            matching.sort_by_key(|p| p.timestamp_nanos);
            matching.truncate(limit);

            let mut batch = QueryBatch::empty(since_nanos);
            for point in matching {
                if point.timestamp_nanos > batch.max_timestamp_nanos {
                    batch.max_timestamp_nanos = point.timestamp_nanos;
                }
                batch.points.push(point);
            }
            Ok(batch)
        })
    }
}

/// Target that records every write attempt and can be scripted to fail the
/// first N attempts (or all of them).
#[derive(Default)]
pub struct RecordingTarget {
    /// Successfully accepted batches: (destination, points).
    pub written: Mutex<Vec<(String, Vec<DataPoint>)>>,
    /// Instant of every attempt, successful or not.
    pub attempt_times: Mutex<Vec<Instant>>,
    pub write_attempts: AtomicUsize,
    fail_first: AtomicUsize,
}

impl RecordingTarget {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail the first `n` write attempts.
    pub fn failing_first(self, n: usize) -> Self {
        self.fail_first.store(n, Ordering::SeqCst);
        self
    }

    /// Fail every write attempt.
    pub fn always_failing(self) -> Self {
        self.fail_first.store(usize::MAX, Ordering::SeqCst);
        self
    }

    pub fn total_points_written(&self) -> usize {
        self.written
            .lock()
            .unwrap()
            .iter()
            .map(|(_, points)| points.len())
            .sum()
    }

    pub fn destinations(&self) -> Vec<String> {
        self.written
            .lock()
            .unwrap()
            .iter()
            .map(|(destination, _)| destination.clone())
            .collect()
    }
}

impl DataTarget for RecordingTarget {
    fn connect(&self) -> BoxFuture<'_, ()> {
        Box::pin(async { Ok(()) })
    }

    fn close(&self) -> BoxFuture<'_, ()> {
        Box::pin(async { Ok(()) })
    }

    fn write_points(&self, destination: &str, points: &[DataPoint]) -> BoxFuture<'_, ()> {
        let destination = destination.to_string();
        let points = points.to_vec();
        Box::pin(async move {
            let attempt = self.write_attempts.fetch_add(1, Ordering::SeqCst);
            self.attempt_times.lock().unwrap().push(Instant::now());

            if attempt < self.fail_first.load(Ordering::SeqCst) {
                return Err(SyncError::write(&destination, "scripted write failure"));
            }

            self.written.lock().unwrap().push((destination, points));
            Ok(())
        })
    }
}
