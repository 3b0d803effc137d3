// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Error types for the sync engine.
//!
//! Errors are categorized by where they occur in the copy pipeline and carry
//! enough context to identify the failing database/measurement.
//!
//! # Error Categories
//!
//! | Error Type | Retried | Description |
//! |------------|---------|-------------|
//! | `Connection` | No | Source or target unreachable / auth failure; aborts the run |
//! | `Query` | No | Read-side failure; fatal to the owning measurement |
//! | `Write` | Yes | Write-side failure; retried up to the configured count |
//! | `Checkpoint` | No | Resume-file persistence failure; logged, never fatal |
//! | `Config` | No | Configuration invalid; fix and restart |
//! | `Database` | No | Aggregate: one or more measurements in a database failed |
//! | `Cancelled` | No | Shutdown signal observed; partial progress is preserved |
//!
//! # Retry Behavior
//!
//! Only write failures are transient from the engine's point of view: the
//! pagination driver wraps `write_points` in the retry policy and gives up
//! after the configured attempt count. Everything else propagates on first
//! occurrence. [`SyncError::is_retryable()`] encodes that split.

use thiserror::Error;

/// Result type alias for sync operations.
pub type Result<T> = std::result::Result<T, SyncError>;

/// Errors that can occur during a replication run.
#[derive(Error, Debug)]
pub enum SyncError {
    /// Source or target endpoint unreachable, or authentication rejected.
    ///
    /// Raised while establishing connections, before any work starts.
    #[error("connection error ({endpoint}): {message}")]
    Connection { endpoint: String, message: String },

    /// Read-side failure: listing databases/measurements/tag keys or
    /// querying a batch of points.
    #[error("query error ({scope}): {message}")]
    Query { scope: String, message: String },

    /// Write-side failure against the target.
    ///
    /// Retried by the pagination driver; surfaces only once retries are
    /// exhausted.
    #[error("write error ({destination}): {message}")]
    Write {
        destination: String,
        message: String,
    },

    /// Resume-file read/write failure.
    ///
    /// Losing a checkpoint only risks re-copying already-written points on
    /// restart, so callers log this and continue.
    #[error("checkpoint error: {0}")]
    Checkpoint(#[from] std::io::Error),

    /// Invalid or missing configuration.
    #[error("configuration error: {0}")]
    Config(String),

    /// One or more measurements in a database failed to copy.
    #[error("sync of database {database} failed with {failed} error(s)")]
    Database { database: String, failed: usize },

    /// Shutdown signal observed mid-run.
    #[error("sync cancelled")]
    Cancelled,
}

impl SyncError {
    /// Create a connection error.
    pub fn connection(endpoint: impl Into<String>, message: impl ToString) -> Self {
        Self::Connection {
            endpoint: endpoint.into(),
            message: message.to_string(),
        }
    }

    /// Create a query error scoped to a database or database/measurement.
    pub fn query(scope: impl Into<String>, message: impl ToString) -> Self {
        Self::Query {
            scope: scope.into(),
            message: message.to_string(),
        }
    }

    /// Create a write error for a destination database/bucket.
    pub fn write(destination: impl Into<String>, message: impl ToString) -> Self {
        Self::Write {
            destination: destination.into(),
            message: message.to_string(),
        }
    }

    /// Check if this error is worth retrying.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Write { .. })
    }
}
