//! Resilience utilities: bounded write retries and batch pacing.
//!
//! Two small wrappers protect the target from transient failure and
//! overload:
//!
//! - [`RetryPolicy`]: fixed-interval retry for a fallible write operation
//! - [`Pacer`]: fixed pause after each successfully written batch
//!
//! Neither holds shared mutable state, so both are safe to use concurrently
//! from every worker of a database.
//!
//! # Example
//!
//! ```rust,no_run
//! # async fn example() -> tsdb_sync::error::Result<()> {
//! use tsdb_sync::resilience::{Pacer, RetryPolicy};
//!
//! let retry = RetryPolicy::from_config(3, 500);
//! retry
//!     .run("write_points", || async { Ok::<_, tsdb_sync::error::SyncError>(()) })
//!     .await?;
//!
//! let pacer = Pacer::from_config(Some(50));
//! pacer.pace().await; // sleeps 50ms
//! # Ok(())
//! # }
//! ```

use crate::error::Result;
use std::future::Future;
use std::time::Duration;
use tracing::warn;

/// Default number of write attempts when the configured count is ≤ 0.
const DEFAULT_RETRY_COUNT: u32 = 3;

/// Default sleep between attempts when the configured interval is ≤ 0.
const DEFAULT_RETRY_INTERVAL_MS: u64 = 500;

/// Default pause after each written batch when the rate limit is unset.
const DEFAULT_RATE_LIMIT_MS: u64 = 50;

/// Bounded fixed-interval retry for a fallible operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts, including the first one.
    pub max_attempts: u32,
    /// Sleep between consecutive attempts.
    pub interval: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_RETRY_COUNT,
            interval: Duration::from_millis(DEFAULT_RETRY_INTERVAL_MS),
        }
    }
}

impl RetryPolicy {
    /// Build a policy from raw config values, substituting defaults for
    /// non-positive inputs.
    pub fn from_config(retry_count: i64, retry_interval_ms: i64) -> Self {
        let max_attempts = if retry_count <= 0 {
            DEFAULT_RETRY_COUNT
        } else {
            retry_count as u32
        };
        let interval = if retry_interval_ms <= 0 {
            Duration::from_millis(DEFAULT_RETRY_INTERVAL_MS)
        } else {
            Duration::from_millis(retry_interval_ms as u64)
        };
        Self {
            max_attempts,
            interval,
        }
    }

    /// Fast policy for tests.
    pub fn testing() -> Self {
        Self {
            max_attempts: 3,
            interval: Duration::from_millis(5),
        }
    }

    /// Run `op` up to `max_attempts` times, sleeping `interval` between
    /// attempts. Returns the first success, or the last observed error once
    /// attempts are exhausted.
    pub async fn run<F, Fut, T>(&self, operation: &str, mut op: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let mut attempt = 0;
        loop {
            attempt += 1;
            match op().await {
                Ok(value) => return Ok(value),
                Err(e) => {
                    warn!(
                        operation,
                        attempt,
                        max_attempts = self.max_attempts,
                        error = %e,
                        "attempt failed"
                    );
                    crate::metrics::record_write_retry(operation);
                    if attempt >= self.max_attempts {
                        return Err(e);
                    }
                    tokio::time::sleep(self.interval).await;
                }
            }
        }
    }
}

/// Fixed pause applied after each successfully written batch.
///
/// A configured value of `0` is honored as "disabled", distinct from an
/// unset value, which gets the 50ms default.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Pacer {
    pause: Duration,
}

impl Pacer {
    /// Build from the optional configured rate limit in milliseconds.
    pub fn from_config(rate_limit_ms: Option<i64>) -> Self {
        let pause = match rate_limit_ms {
            None => Duration::from_millis(DEFAULT_RATE_LIMIT_MS),
            Some(ms) if ms <= 0 => Duration::ZERO,
            Some(ms) => Duration::from_millis(ms as u64),
        };
        Self { pause }
    }

    /// A pacer that never sleeps.
    pub fn disabled() -> Self {
        Self {
            pause: Duration::ZERO,
        }
    }

    /// Sleep the configured pause, if any. Cancel-safe.
    pub async fn pace(&self) {
        if !self.pause.is_zero() {
            tokio::time::sleep(self.pause).await;
        }
    }

    /// Configured pause, for logging and tests.
    pub fn pause(&self) -> Duration {
        self.pause
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::SyncError;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::time::Instant;

    #[test]
    fn test_from_config_defaults_for_non_positive() {
        let policy = RetryPolicy::from_config(0, -10);
        assert_eq!(policy.max_attempts, 3);
        assert_eq!(policy.interval, Duration::from_millis(500));
    }

    #[test]
    fn test_from_config_explicit_values() {
        let policy = RetryPolicy::from_config(5, 100);
        assert_eq!(policy.max_attempts, 5);
        assert_eq!(policy.interval, Duration::from_millis(100));
    }

    #[tokio::test]
    async fn test_run_returns_first_success() {
        let calls = AtomicU32::new(0);
        let policy = RetryPolicy::testing();

        let result = policy
            .run("op", || {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Ok::<u32, SyncError>(7) }
            })
            .await;

        assert_eq!(result.unwrap(), 7);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_run_recovers_after_transient_failure() {
        let calls = AtomicU32::new(0);
        let policy = RetryPolicy::testing();

        let result = policy
            .run("op", || {
                let n = calls.fetch_add(1, Ordering::SeqCst);
                async move {
                    if n < 1 {
                        Err(SyncError::write("dest", "transient"))
                    } else {
                        Ok(42)
                    }
                }
            })
            .await;

        assert_eq!(result.unwrap(), 42);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_run_exhausts_attempts_and_returns_last_error() {
        let calls = AtomicU32::new(0);
        let policy = RetryPolicy {
            max_attempts: 4,
            interval: Duration::from_millis(10),
        };

        let start = Instant::now();
        let result: Result<()> = policy
            .run("op", || {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err(SyncError::write("dest", "down")) }
            })
            .await;

        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 4);
        // 3 sleeps between 4 attempts
        assert!(start.elapsed() >= Duration::from_millis(30));
    }

    #[tokio::test]
    async fn test_pacer_disabled_by_explicit_zero() {
        let pacer = Pacer::from_config(Some(0));
        assert_eq!(pacer.pause(), Duration::ZERO);

        let start = Instant::now();
        pacer.pace().await;
        assert!(start.elapsed() < Duration::from_millis(5));
    }

    #[test]
    fn test_pacer_default_when_unset() {
        let pacer = Pacer::from_config(None);
        assert_eq!(pacer.pause(), Duration::from_millis(50));
    }

    #[tokio::test]
    async fn test_pacer_sleeps_configured_pause() {
        let pacer = Pacer::from_config(Some(20));
        let start = Instant::now();
        pacer.pace().await;
        assert!(start.elapsed() >= Duration::from_millis(15));
    }
}
