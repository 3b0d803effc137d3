// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Watermark persistence for resumable runs.
//!
//! The watermark is a single nanosecond timestamp marking the highest point
//! time known fully copied across the whole run. It is persisted to a plain
//! text resume file holding one RFC3339 timestamp with nanosecond precision
//! (e.g. `2024-06-01T12:00:00.123456789Z`).
//!
//! # Resume Semantics
//!
//! On startup the initial watermark is the larger of the configured `start`
//! and the resume-file contents; the resume value wins only when strictly
//! after the configured start. A missing path, unreadable file, or
//! unparseable contents silently falls back to `start` (or the epoch when
//! that too is absent or invalid). This lets a restarted run skip past a
//! stale static `start` without config edits.
//!
//! ```text
//! query batch → write batch → advance watermark → persist resume file
//!               (crash here = re-copy the batch, idempotent under
//!                at-least-once delivery)
//! ```
//!
//! # Failure Policy
//!
//! A persistence failure is logged as a warning and never aborts the batch
//! that produced it: losing the latest checkpoint only risks re-copying
//! already-written points on the next run.
//!
//! # Concurrency
//!
//! Multiple measurements advance the watermark concurrently; updates are
//! serialized behind a mutex and only ever move forward, so the persisted
//! value is non-decreasing for the lifetime of the run.

use crate::error::Result;
use chrono::{DateTime, SecondsFormat, TimeZone, Utc};
use std::path::{Path, PathBuf};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

/// Run-global watermark with best-effort file persistence.
pub struct WatermarkStore {
    /// Resume-file path; `None` disables persistence entirely.
    path: Option<PathBuf>,
    /// Highest fully-copied point time, nanoseconds since the epoch.
    current: Mutex<i64>,
    /// The value computed at open time, before any batch ran.
    initial: i64,
}

impl WatermarkStore {
    /// Compute the initial watermark and build the store.
    ///
    /// `start` is the configured RFC3339 window start; `resume_file` is the
    /// optional checkpoint path read now and rewritten on every advance.
    pub fn open(start: Option<&str>, resume_file: Option<&Path>) -> Self {
        let configured = start.and_then(parse_rfc3339_nanos).unwrap_or(0);

        let resumed = resume_file
            .and_then(|p| std::fs::read_to_string(p).ok())
            .and_then(|s| parse_rfc3339_nanos(s.trim()));

        let initial = match resumed {
            // Resume value wins only when strictly after the configured start.
            Some(r) if r > configured => {
                info!(
                    resumed = %format_nanos(r),
                    configured = %format_nanos(configured),
                    "resuming from checkpoint"
                );
                r
            }
            _ => configured,
        };

        Self {
            path: resume_file.map(Path::to_path_buf),
            current: Mutex::new(initial),
            initial,
        }
    }

    /// The watermark computed at open time.
    pub fn initial(&self) -> i64 {
        self.initial
    }

    /// The current watermark.
    pub async fn current(&self) -> i64 {
        *self.current.lock().await
    }

    /// Advance the watermark to `nanos` if it moved forward, persisting the
    /// new value. Regressions are ignored; persistence failures are logged
    /// and swallowed.
    pub async fn advance(&self, nanos: i64) {
        let mut current = self.current.lock().await;
        if nanos <= *current {
            return;
        }
        *current = nanos;
        crate::metrics::set_watermark(nanos);

        if self.path.is_some() {
            if let Err(e) = self.save(nanos).await {
                warn!(error = %e, "failed to persist watermark");
            } else {
                debug!(watermark = %format_nanos(nanos), "watermark persisted");
            }
        }
    }

    /// Write `nanos` to the resume file via a temp-file rename.
    ///
    /// Single-writer atomicity is all that is needed: one run owns the file
    /// at a time.
    pub async fn save(&self, nanos: i64) -> Result<()> {
        let Some(path) = &self.path else {
            return Ok(());
        };
        let tmp = path.with_extension("tmp");
        tokio::fs::write(&tmp, format_nanos(nanos)).await?;
        tokio::fs::rename(&tmp, path).await?;
        Ok(())
    }
}

/// Parse an RFC3339 timestamp (nanosecond precision allowed) into epoch
/// nanoseconds. Returns `None` for anything unparseable or out of range.
pub fn parse_rfc3339_nanos(s: &str) -> Option<i64> {
    DateTime::parse_from_rfc3339(s)
        .ok()
        .and_then(|t| t.timestamp_nanos_opt())
}

/// Format epoch nanoseconds as an RFC3339 timestamp with full nanosecond
/// precision in UTC.
pub fn format_nanos(nanos: i64) -> String {
    Utc.timestamp_nanos(nanos)
        .to_rfc3339_opts(SecondsFormat::Nanos, true)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_parse_and_format_round_trip() {
        let s = "2024-06-01T12:00:00.123456789Z";
        let nanos = parse_rfc3339_nanos(s).unwrap();
        assert_eq!(format_nanos(nanos), s);
    }

    #[test]
    fn test_parse_rejects_garbage() {
        assert!(parse_rfc3339_nanos("not a time").is_none());
        assert!(parse_rfc3339_nanos("").is_none());
        assert!(parse_rfc3339_nanos("2024-06-01").is_none());
    }

    #[test]
    fn test_open_without_start_or_resume_is_epoch() {
        let store = WatermarkStore::open(None, None);
        assert_eq!(store.initial(), 0);
    }

    #[test]
    fn test_open_uses_configured_start() {
        let store = WatermarkStore::open(Some("2024-01-01T00:00:00Z"), None);
        assert_eq!(
            store.initial(),
            parse_rfc3339_nanos("2024-01-01T00:00:00Z").unwrap()
        );
    }

    #[test]
    fn test_open_invalid_start_falls_back_to_epoch() {
        let store = WatermarkStore::open(Some("yesterday-ish"), None);
        assert_eq!(store.initial(), 0);
    }

    #[test]
    fn test_resume_file_wins_when_later() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("resume");
        std::fs::write(&path, "2024-06-01T00:00:00Z").unwrap();

        let store = WatermarkStore::open(Some("2024-01-01T00:00:00Z"), Some(&path));
        assert_eq!(
            store.initial(),
            parse_rfc3339_nanos("2024-06-01T00:00:00Z").unwrap()
        );
    }

    #[test]
    fn test_stale_resume_file_loses_to_start() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("resume");
        std::fs::write(&path, "2023-01-01T00:00:00Z").unwrap();

        let store = WatermarkStore::open(Some("2024-01-01T00:00:00Z"), Some(&path));
        assert_eq!(
            store.initial(),
            parse_rfc3339_nanos("2024-01-01T00:00:00Z").unwrap()
        );
    }

    #[test]
    fn test_unreadable_resume_file_falls_back() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("missing");

        let store = WatermarkStore::open(Some("2024-01-01T00:00:00Z"), Some(&path));
        assert_eq!(
            store.initial(),
            parse_rfc3339_nanos("2024-01-01T00:00:00Z").unwrap()
        );
    }

    #[test]
    fn test_corrupt_resume_file_falls_back() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("resume");
        std::fs::write(&path, "corrupted ####").unwrap();

        let store = WatermarkStore::open(Some("2024-01-01T00:00:00Z"), Some(&path));
        assert_eq!(
            store.initial(),
            parse_rfc3339_nanos("2024-01-01T00:00:00Z").unwrap()
        );
    }

    #[tokio::test]
    async fn test_advance_persists_and_is_monotone() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("resume");

        let store = WatermarkStore::open(None, Some(&path));
        store.advance(1_000_000_000).await;
        assert_eq!(store.current().await, 1_000_000_000);
        assert_eq!(
            std::fs::read_to_string(&path).unwrap(),
            format_nanos(1_000_000_000)
        );

        // A regression must not move the watermark or rewrite the file
        store.advance(5).await;
        assert_eq!(store.current().await, 1_000_000_000);
        assert_eq!(
            std::fs::read_to_string(&path).unwrap(),
            format_nanos(1_000_000_000)
        );

        store.advance(2_000_000_000).await;
        assert_eq!(store.current().await, 2_000_000_000);
        assert_eq!(
            std::fs::read_to_string(&path).unwrap(),
            format_nanos(2_000_000_000)
        );
    }

    #[tokio::test]
    async fn test_advance_without_path_keeps_state_in_memory() {
        let store = WatermarkStore::open(None, None);
        store.advance(42).await;
        assert_eq!(store.current().await, 42);
    }

    #[tokio::test]
    async fn test_reopen_resumes_from_persisted_value() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("resume");

        {
            let store = WatermarkStore::open(None, Some(&path));
            store.advance(1_717_243_200_000_000_000).await;
        }

        let store = WatermarkStore::open(None, Some(&path));
        assert_eq!(store.initial(), 1_717_243_200_000_000_000);
    }
}
