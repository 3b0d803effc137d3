//! # tsdb-sync
//!
//! An incremental, resumable, rate-limited bulk copier for time-series data
//! between database instances that may speak different wire protocols.
//!
//! ## Architecture
//!
//! The engine is agnostic to the databases on either end; protocol adapters
//! plug into it through the [`backend`] capability traits:
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────────┐
//! │                             tsdb-sync                                │
//! │                                                                      │
//! │  ┌────────────┐    ┌───────────────────┐    ┌─────────────────────┐  │
//! │  │ Replicator │───►│ worker pool (N)   │───►│ pagination driver   │  │
//! │  │ (discover) │    │ (job queue)       │    │ query→write→advance │  │
//! │  └────────────┘    └───────────────────┘    └─────────────────────┘  │
//! │        │                                              │              │
//! │        ▼                                              ▼              │
//! │  ┌────────────┐                             ┌─────────────────────┐  │
//! │  │ DataSource │                             │ WatermarkStore      │  │
//! │  │ DataTarget │                             │ (resume file)       │  │
//! │  └────────────┘                             └─────────────────────┘  │
//! └──────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Per database, measurements fan out to a bounded worker pool; each worker
//! drives one measurement through a strictly ordered query/write/advance
//! loop, checkpointing the run-global watermark after every written batch.
//! Failed writes are retried on a fixed interval; a resume file lets the
//! next run continue past everything already confirmed copied.
//!
//! ## Usage
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use tokio::sync::watch;
//! use tsdb_sync::adapters::{Influx1Config, Influx1Source, Influx1Target};
//! use tsdb_sync::{Replicator, SyncConfig};
//!
//! #[tokio::main]
//! async fn main() {
//!     let source = Arc::new(Influx1Source::new(Influx1Config {
//!         url: "http://source:8086".into(),
//!         ..Default::default()
//!     }));
//!     let target = Arc::new(Influx1Target::new(Influx1Config {
//!         url: "http://target:8086".into(),
//!         ..Default::default()
//!     }));
//!
//!     let (_shutdown_tx, shutdown_rx) = watch::channel(false);
//!     let replicator = Replicator::new(SyncConfig::default(), source, target, shutdown_rx);
//!     let report = replicator.run().await.expect("sync failed");
//!     println!("copied {report}");
//! }
//! ```

pub mod adapters;
pub mod backend;
pub mod config;
pub mod error;
pub mod metrics;
pub mod point;
pub mod replicator;
pub mod resilience;
pub mod watermark;

// Re-exports for convenience
pub use backend::{DataSource, DataTarget};
pub use config::{Config, SyncConfig};
pub use error::{Result, SyncError};
pub use point::{DataPoint, FieldValue, QueryBatch};
pub use replicator::{Replicator, SyncOutcome, SyncReport};
pub use watermark::WatermarkStore;
