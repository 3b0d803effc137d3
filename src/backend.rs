// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Capability traits for database backends.
//!
//! [`DataSource`] and [`DataTarget`] are the sole boundary between the sync
//! engine and any specific database technology. Each protocol adapter
//! (InfluxQL 1.x, Flux 2.x, SQL/compat 3.x) provides one struct per role,
//! owning its own connection handle and query-language formatting; the
//! engine drives them through these traits and never sees a wire format.
//!
//! Connection handles are long-lived and shared read-only across all workers
//! of a database, so every method takes `&self`; adapters use interior
//! mutability for the lazily established client.
//!
//! # Example
//!
//! ```rust,no_run
//! use tsdb_sync::backend::{BoxFuture, DataTarget};
//! use tsdb_sync::point::DataPoint;
//!
//! struct DiscardTarget;
//!
//! impl DataTarget for DiscardTarget {
//!     fn connect(&self) -> BoxFuture<'_, ()> {
//!         Box::pin(async { Ok(()) })
//!     }
//!
//!     fn close(&self) -> BoxFuture<'_, ()> {
//!         Box::pin(async { Ok(()) })
//!     }
//!
//!     fn write_points(&self, _destination: &str, points: &[DataPoint]) -> BoxFuture<'_, ()> {
//!         let n = points.len();
//!         Box::pin(async move {
//!             tracing::debug!(points = n, "discarding batch");
//!             Ok(())
//!         })
//!     }
//! }
//! ```

use crate::error::Result;
use crate::point::{DataPoint, QueryBatch};
use std::collections::HashSet;
use std::future::Future;
use std::pin::Pin;

/// Type alias for boxed async futures (reduces trait signature complexity).
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T>> + Send + 'a>>;

/// Read side of a replication run.
///
/// Implementations must uphold the `query_points` contract: at most `limit`
/// points with time strictly greater than `since_nanos`, in ascending time
/// order, and a `max_timestamp_nanos` equal to the largest returned point
/// time (or the unchanged cursor when the page is empty). The pagination
/// driver depends on this for forward progress and loop termination.
pub trait DataSource: Send + Sync + 'static {
    /// Establish the connection. Fails with `SyncError::Connection`.
    fn connect(&self) -> BoxFuture<'_, ()>;

    /// Release the connection. Idempotent; safe on a never-connected
    /// instance.
    fn close(&self) -> BoxFuture<'_, ()>;

    /// List database (or bucket) names visible on the source.
    fn list_databases(&self) -> BoxFuture<'_, Vec<String>>;

    /// List measurements in one database. An empty result is not an error;
    /// it means there is nothing to copy.
    fn list_measurements(&self, database: &str) -> BoxFuture<'_, Vec<String>>;

    /// Tag keys of one measurement, used to split tag columns from field
    /// columns when the wire format does not separate them.
    fn list_tag_keys(&self, database: &str, measurement: &str) -> BoxFuture<'_, HashSet<String>>;

    /// Fetch the next page of points after `since_nanos`.
    fn query_points(
        &self,
        database: &str,
        measurement: &str,
        since_nanos: i64,
        limit: usize,
    ) -> BoxFuture<'_, QueryBatch>;
}

/// Write side of a replication run.
pub trait DataTarget: Send + Sync + 'static {
    /// Establish the connection. Fails with `SyncError::Connection`.
    fn connect(&self) -> BoxFuture<'_, ()>;

    /// Release the connection. Idempotent; safe on a never-connected
    /// instance.
    fn close(&self) -> BoxFuture<'_, ()>;

    /// Append a batch of points to `destination`.
    ///
    /// All-or-nothing from the caller's perspective: on error the whole
    /// batch is retried, which may duplicate points already accepted by a
    /// partial write. That at-least-once cost is accepted by the engine.
    fn write_points(&self, destination: &str, points: &[DataPoint]) -> BoxFuture<'_, ()>;
}
