//! Binary entry point: load config, wire up adapters, run one sync.

use std::process::ExitCode;
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;
use tsdb_sync::adapters::{
    Influx1Config, Influx1Source, Influx1Target, Influx2Config, Influx2Source, Influx2Target,
    Influx3Source, Influx3Target,
};
use tsdb_sync::config::DbConfig;
use tsdb_sync::{Config, Replicator, Result, SyncError, SyncReport};

fn usage() -> &'static str {
    "usage: tsdb-sync <config.yaml>\n\n\
     Copies all points above the watermark from the source instance to the\n\
     target instance, resuming from the configured resume file if present."
}

#[tokio::main]
async fn main() -> ExitCode {
    let mut args = std::env::args().skip(1);
    let config_path = match args.next() {
        Some(arg) if arg == "-h" || arg == "--help" => {
            println!("{}", usage());
            return ExitCode::SUCCESS;
        }
        Some(path) => path,
        None => {
            eprintln!("{}", usage());
            return ExitCode::FAILURE;
        }
    };

    let config = match Config::from_yaml_file(&config_path) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("failed to load config: {e}");
            return ExitCode::from(2);
        }
    };

    let filter = EnvFilter::try_new(&config.log.level)
        .unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("interrupt received, stopping after in-flight batches");
            let _ = shutdown_tx.send(true);
        }
    });

    match run(&config, shutdown_rx).await {
        Ok(report) => {
            info!(%report, "sync complete");
            println!("sync complete: {report}");
            ExitCode::SUCCESS
        }
        Err(e) => {
            eprintln!("sync failed: {e}");
            ExitCode::from(2)
        }
    }
}

/// Dispatch on the configured source/target generations.
async fn run(config: &Config, shutdown_rx: watch::Receiver<bool>) -> Result<SyncReport> {
    let sync = config.sync_config();
    match (config.source.version, config.target.version) {
        (1, 1) => {
            let source = Arc::new(Influx1Source::new(influx1_config(&config.source)));
            let target = Arc::new(Influx1Target::new(influx1_config(&config.target)));
            Replicator::new(sync, source, target, shutdown_rx).run().await
        }
        (1, 2) => {
            let source = Arc::new(Influx1Source::new(influx1_config(&config.source)));
            let target = Arc::new(Influx2Target::new(influx2_config(&config.target)));
            Replicator::new(sync, source, target, shutdown_rx).run().await
        }
        (2, 2) => {
            let source = Arc::new(Influx2Source::new(influx2_config(&config.source)));
            let target = Arc::new(Influx2Target::new(influx2_config(&config.target)));
            Replicator::new(sync, source, target, shutdown_rx).run().await
        }
        (3, 3) => {
            let source = Arc::new(Influx3Source::new(config.source.influx3_config()?));
            let target = Arc::new(Influx3Target::new(config.target.influx3_config()?));
            Replicator::new(sync, source, target, shutdown_rx).run().await
        }
        (source, target) => Err(SyncError::Config(format!(
            "unsupported sync pair: source.type={source}, target.type={target} \
             (supported: 1→1, 1→2, 2→2, 3→3)"
        ))),
    }
}

fn influx1_config(db: &DbConfig) -> Influx1Config {
    Influx1Config {
        url: db.url.clone(),
        user: db.user.clone(),
        pass: db.pass.clone(),
    }
}

fn influx2_config(db: &DbConfig) -> Influx2Config {
    Influx2Config {
        url: db.url.clone(),
        token: db.token.clone(),
        org: db.org.clone(),
        bucket: db.bucket.clone(),
    }
}
