//! Configuration for the sync engine.
//!
//! Two layers: [`Config`] mirrors the YAML file the binary loads, and
//! [`SyncConfig`] is the flat, engine-facing view handed to
//! [`Replicator::new()`](crate::Replicator::new). The engine performs no
//! file I/O or parsing of configuration itself beyond the resume-file
//! handling in [`crate::watermark`].
//!
//! # YAML Example
//!
//! ```yaml
//! source:
//!   type: 1                 # 1: InfluxDB 1.x, 2: 2.x, 3: 3.x
//!   url: "http://src:8086"
//!   user: "admin"
//!   pass: "secret"
//!   db_exclude: ["sys"]
//!
//! target:
//!   type: 2
//!   url: "http://dst:8086"
//!   token: "…"
//!   org: "acme"
//!   db_prefix: "backup_"
//!   db_suffix: "_v2"
//!
//! sync:
//!   start: "2024-01-01T00:00:00Z"
//!   batch_size: 1000
//!   parallel: 4
//!   retry_count: 3
//!   retry_interval: 500     # ms
//!   rate_limit: 50          # ms; 0 disables pacing
//!   resume_file: "/var/lib/tsdb-sync/resume"
//!
//! log:
//!   level: "info"
//! ```

use crate::error::{Result, SyncError};
use crate::resilience::{Pacer, RetryPolicy};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

// ═══════════════════════════════════════════════════════════════════════════════
// File-level config, loaded by the binary
// ═══════════════════════════════════════════════════════════════════════════════

/// Top-level YAML configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    pub source: DbConfig,
    pub target: DbConfig,
    #[serde(default)]
    pub sync: SyncSettings,
    #[serde(default)]
    pub log: LogConfig,
}

impl Config {
    /// Load and validate a YAML config file.
    pub fn from_yaml_file(path: impl AsRef<Path>) -> Result<Self> {
        let text = std::fs::read_to_string(path.as_ref())
            .map_err(|e| SyncError::Config(format!("read {}: {e}", path.as_ref().display())))?;
        let config: Config = serde_yaml::from_str(&text)
            .map_err(|e| SyncError::Config(format!("parse {}: {e}", path.as_ref().display())))?;
        config.validate()?;
        Ok(config)
    }

    /// Reject configs that cannot possibly run.
    pub fn validate(&self) -> Result<()> {
        for (role, db) in [("source", &self.source), ("target", &self.target)] {
            if !(1..=3).contains(&db.version) {
                return Err(SyncError::Config(format!(
                    "{role}.type must be 1, 2 or 3 (got {})",
                    db.version
                )));
            }
            if db.url.is_empty() {
                return Err(SyncError::Config(format!("{role}.url must be set")));
            }
        }
        Ok(())
    }

    /// Flatten into the engine-facing view.
    pub fn sync_config(&self) -> SyncConfig {
        let target_name = if !self.target.bucket.is_empty() {
            Some(self.target.bucket.clone())
        } else if !self.target.db.is_empty() {
            Some(self.target.db.clone())
        } else {
            None
        };

        SyncConfig {
            source_db: (!self.source.db.is_empty()).then(|| self.source.db.clone()),
            source_db_exclude: self.source.db_exclude.clone(),
            target_name,
            target_prefix: self.target.db_prefix.clone(),
            target_suffix: self.target.db_suffix.clone(),
            start: self.sync.start.clone(),
            end: self.sync.end.clone(),
            batch_size: self.sync.batch_size,
            parallel: self.sync.parallel,
            retry_count: self.sync.retry_count,
            retry_interval_ms: self.sync.retry_interval,
            rate_limit_ms: self.sync.rate_limit,
            resume_file: self.sync.resume_file.clone(),
        }
    }
}

/// One side (source or target) of the copy.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DbConfig {
    /// Database generation: 1 (InfluxQL), 2 (Flux), 3 (SQL/compat).
    #[serde(rename = "type", default)]
    pub version: u8,
    #[serde(default)]
    pub url: String,
    #[serde(default)]
    pub user: String,
    #[serde(default)]
    pub pass: String,
    /// Explicit single database; empty means "discover all".
    #[serde(default)]
    pub db: String,
    /// Database names to skip during discovery.
    #[serde(default)]
    pub db_exclude: Vec<String>,
    /// Destination naming rule parts, applied when no fixed name is set.
    #[serde(default)]
    pub db_prefix: String,
    #[serde(default)]
    pub db_suffix: String,
    #[serde(default)]
    pub token: String,
    #[serde(default)]
    pub org: String,
    #[serde(default)]
    pub bucket: String,
    /// 3.x only: "v1", "v2", or "native".
    #[serde(default)]
    pub compat_mode: String,
    /// 3.x only: database name.
    #[serde(default)]
    pub database: String,
    /// 3.x only: namespace for native mode.
    #[serde(default)]
    pub namespace: String,
}

impl DbConfig {
    /// Resolve the 3.x compat mode into its tagged config.
    ///
    /// The mode is fixed at adapter construction; every site matching on
    /// [`Influx3Config`] is exhaustive, so an unsupported mode can only be
    /// rejected here.
    pub fn influx3_config(&self) -> Result<Influx3Config> {
        match self.compat_mode.as_str() {
            "v1" => Ok(Influx3Config::V1Compat {
                url: self.url.clone(),
                user: self.user.clone(),
                pass: self.pass.clone(),
                database: self.database.clone(),
            }),
            "v2" => Ok(Influx3Config::V2Compat {
                url: self.url.clone(),
                token: self.token.clone(),
                org: self.org.clone(),
                database: self.database.clone(),
            }),
            "native" | "" => Ok(Influx3Config::Native {
                url: self.url.clone(),
                token: self.token.clone(),
                database: self.database.clone(),
                namespace: (!self.namespace.is_empty()).then(|| self.namespace.clone()),
            }),
            other => Err(SyncError::Config(format!(
                "unsupported compat_mode {other:?} (expected v1, v2 or native)"
            ))),
        }
    }
}

/// 3.x connection mode, selected at construction time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Influx3Config {
    /// InfluxQL endpoints (`/query`, `/write`) with basic auth.
    V1Compat {
        url: String,
        user: String,
        pass: String,
        database: String,
    },
    /// v2-style endpoints with token auth.
    V2Compat {
        url: String,
        token: String,
        org: String,
        database: String,
    },
    /// Native 3.x SQL + line protocol.
    Native {
        url: String,
        token: String,
        database: String,
        namespace: Option<String>,
    },
}

/// Copy-window and throughput settings.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SyncSettings {
    /// Window start, RFC3339. Missing means "from the epoch".
    #[serde(default)]
    pub start: Option<String>,
    /// Window end, RFC3339. Accepted and carried; not yet enforced.
    #[serde(default)]
    pub end: Option<String>,
    /// Points per query/write cycle; ≤ 0 gets the default 1000.
    #[serde(default)]
    pub batch_size: i64,
    #[serde(default)]
    pub resume_file: Option<PathBuf>,
    /// Worker count per database; ≤ 0 gets the default 4.
    #[serde(default)]
    pub parallel: i64,
    /// Write attempts per batch; ≤ 0 gets the default 3.
    #[serde(default)]
    pub retry_count: i64,
    /// Sleep between write attempts, ms; ≤ 0 gets the default 500.
    #[serde(default)]
    pub retry_interval: i64,
    /// Pause after each written batch, ms. Absent = default 50;
    /// explicit 0 = disabled.
    #[serde(default)]
    pub rate_limit: Option<i64>,
}

/// Process log settings, consumed by the binary only.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Engine-facing flat config
// ═══════════════════════════════════════════════════════════════════════════════

/// Immutable configuration for one replication run, consumed by the engine.
#[derive(Debug, Clone, Default)]
pub struct SyncConfig {
    /// Explicit single source database; `None` means discover via the
    /// source, minus the reserved internal name and the exclusion set.
    pub source_db: Option<String>,
    pub source_db_exclude: Vec<String>,
    /// Fixed destination name; overrides the prefix/suffix rule.
    pub target_name: Option<String>,
    pub target_prefix: String,
    pub target_suffix: String,
    pub start: Option<String>,
    pub end: Option<String>,
    pub batch_size: i64,
    pub parallel: i64,
    pub retry_count: i64,
    pub retry_interval_ms: i64,
    pub rate_limit_ms: Option<i64>,
    pub resume_file: Option<PathBuf>,
}

impl SyncConfig {
    /// Batch size with the default substituted for ≤ 0.
    pub fn effective_batch_size(&self) -> usize {
        if self.batch_size <= 0 {
            1000
        } else {
            self.batch_size as usize
        }
    }

    /// Worker count with the default substituted for ≤ 0.
    pub fn effective_parallel(&self) -> usize {
        if self.parallel <= 0 {
            4
        } else {
            self.parallel as usize
        }
    }

    /// Retry policy for target writes.
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::from_config(self.retry_count, self.retry_interval_ms)
    }

    /// Pacer applied after each written batch.
    pub fn pacer(&self) -> Pacer {
        Pacer::from_config(self.rate_limit_ms)
    }

    /// Destination name for points read from `source_db`: the fixed target
    /// name when configured, else `prefix + source_db + suffix`.
    pub fn destination(&self, source_db: &str) -> String {
        match &self.target_name {
            Some(name) => name.clone(),
            None => format!("{}{}{}", self.target_prefix, source_db, self.target_suffix),
        }
    }

    /// Minimal config for tests: tiny delays, no resume file.
    pub fn for_testing() -> Self {
        Self {
            batch_size: 1000,
            parallel: 4,
            retry_count: 3,
            retry_interval_ms: 5,
            rate_limit_ms: Some(0),
            ..Default::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_effective_defaults_for_non_positive() {
        let config = SyncConfig::default();
        assert_eq!(config.effective_batch_size(), 1000);
        assert_eq!(config.effective_parallel(), 4);
        assert_eq!(config.retry_policy().max_attempts, 3);
    }

    #[test]
    fn test_effective_explicit_values() {
        let config = SyncConfig {
            batch_size: 250,
            parallel: 2,
            ..Default::default()
        };
        assert_eq!(config.effective_batch_size(), 250);
        assert_eq!(config.effective_parallel(), 2);
    }

    #[test]
    fn test_destination_prefix_suffix_rule() {
        let config = SyncConfig {
            target_prefix: "backup_".to_string(),
            target_suffix: "_v2".to_string(),
            ..Default::default()
        };
        assert_eq!(config.destination("metrics"), "backup_metrics_v2");
    }

    #[test]
    fn test_destination_defaults_reproduce_source_name() {
        let config = SyncConfig::default();
        assert_eq!(config.destination("metrics"), "metrics");
    }

    #[test]
    fn test_destination_fixed_name_overrides_rule() {
        let config = SyncConfig {
            target_name: Some("fixed".to_string()),
            target_prefix: "backup_".to_string(),
            target_suffix: "_v2".to_string(),
            ..Default::default()
        };
        assert_eq!(config.destination("metrics"), "fixed");
        assert_eq!(config.destination("telegraf"), "fixed");
    }

    #[test]
    fn test_yaml_round_trip() {
        let yaml = r#"
source:
  type: 1
  url: "http://src:8086"
  user: "admin"
  pass: "secret"
  db_exclude: ["sys"]
target:
  type: 2
  url: "http://dst:8086"
  token: "tok"
  org: "acme"
  db_prefix: "backup_"
sync:
  start: "2024-01-01T00:00:00Z"
  batch_size: 500
  parallel: 2
  rate_limit: 0
log:
  level: "debug"
"#;
        let config: Config = serde_yaml::from_str(yaml).unwrap();
        config.validate().unwrap();

        assert_eq!(config.source.version, 1);
        assert_eq!(config.source.db_exclude, vec!["sys"]);
        assert_eq!(config.target.db_prefix, "backup_");
        assert_eq!(config.log.level, "debug");

        let sync = config.sync_config();
        assert_eq!(sync.source_db, None);
        assert_eq!(sync.batch_size, 500);
        // explicit 0 must survive as Some(0), not fall back to the default
        assert_eq!(sync.rate_limit_ms, Some(0));
        assert_eq!(sync.destination("metrics"), "backup_metrics");
    }

    #[test]
    fn test_yaml_rate_limit_absent_is_none() {
        let yaml = r#"
source: { type: 1, url: "http://s" }
target: { type: 1, url: "http://t" }
"#;
        let config: Config = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(config.sync.rate_limit, None);
        assert_eq!(
            config.sync_config().pacer().pause(),
            std::time::Duration::from_millis(50)
        );
    }

    #[test]
    fn test_validate_rejects_bad_version() {
        let yaml = r#"
source: { type: 4, url: "http://s" }
target: { type: 1, url: "http://t" }
"#;
        let config: Config = serde_yaml::from_str(yaml).unwrap();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_missing_url() {
        let yaml = r#"
source: { type: 1, url: "http://s" }
target: { type: 1 }
"#;
        let config: Config = serde_yaml::from_str(yaml).unwrap();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_sync_config_target_bucket_becomes_fixed_name() {
        let mut config = Config::default();
        config.target.bucket = "fixed".to_string();
        assert_eq!(config.sync_config().target_name.as_deref(), Some("fixed"));
    }

    #[test]
    fn test_influx3_config_modes() {
        let mut db = DbConfig {
            url: "http://h:8181".to_string(),
            token: "tok".to_string(),
            database: "metrics".to_string(),
            ..Default::default()
        };

        db.compat_mode = "native".to_string();
        assert!(matches!(
            db.influx3_config().unwrap(),
            Influx3Config::Native { .. }
        ));

        db.compat_mode = "v1".to_string();
        db.user = "u".to_string();
        db.pass = "p".to_string();
        assert!(matches!(
            db.influx3_config().unwrap(),
            Influx3Config::V1Compat { .. }
        ));

        db.compat_mode = "v2".to_string();
        assert!(matches!(
            db.influx3_config().unwrap(),
            Influx3Config::V2Compat { .. }
        ));

        db.compat_mode = "v9".to_string();
        assert!(db.influx3_config().is_err());
    }

    #[test]
    fn test_influx3_empty_mode_defaults_to_native() {
        let db = DbConfig {
            url: "http://h:8181".to_string(),
            database: "metrics".to_string(),
            namespace: "ns1".to_string(),
            ..Default::default()
        };
        match db.influx3_config().unwrap() {
            Influx3Config::Native { namespace, .. } => {
                assert_eq!(namespace.as_deref(), Some("ns1"));
            }
            other => panic!("expected native config, got {other:?}"),
        }
    }
}
