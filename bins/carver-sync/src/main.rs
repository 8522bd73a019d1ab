//! Carver block sync binary.
//!
//! One invocation syncs the ledger up to the peer's tip (or a pinned height)
//! and exits; run it from cron. Exit codes: 0 success, 1 failure, 2 another
//! run already holds the lock.

use std::path::PathBuf;
use std::process;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::{error, info};

use carver_sync_lib::{
    run_job, EngineOptions, FileLocker, RocksStore, RpcClient, RunOptions, SyncConfig, SyncEngine,
};

/// Carver block sync: reconcile the address ledger against a chain peer.
#[derive(Parser, Debug)]
#[command(name = "carver-sync", version, about = "Carver block sync job")]
struct Args {
    /// TOML configuration file
    #[arg(long)]
    config: Option<PathBuf>,

    /// Log level override (trace, debug, info, warn, error)
    #[arg(long)]
    log_level: Option<String>,

    /// Log output format ("text" or "json")
    #[arg(long, default_value = "text")]
    log_format: String,

    /// Roll back everything at or above this height and exit ("-" to skip)
    undo_height: Option<String>,

    /// Sync up to this height instead of the peer's tip ("-" to skip)
    tip_height: Option<String>,
}

impl Args {
    fn run_options(&self) -> RunOptions {
        RunOptions {
            undo_height: parse_height(self.undo_height.as_deref()),
            tip_height: parse_height(self.tip_height.as_deref()),
        }
    }
}

/// Positional heights are optional; anything non-numeric leaves them unset.
fn parse_height(arg: Option<&str>) -> Option<u64> {
    arg.and_then(|s| s.trim().parse().ok())
}

#[tokio::main]
async fn main() {
    let args = Args::parse();
    let config = SyncConfig::load(args.config.as_deref());

    let level = args
        .log_level
        .clone()
        .or_else(|| config.as_ref().ok().map(|c| c.log_level.clone()))
        .unwrap_or_else(|| "info".to_string());
    init_logging(&level, &args.log_format);

    let config = match config {
        Ok(c) => c,
        Err(e) => {
            error!("failed to load configuration: {}", e);
            process::exit(1);
        }
    };

    match sync(config, args.run_options()).await {
        Ok(code) => process::exit(code),
        Err(e) => {
            error!("{:#}", e);
            process::exit(1);
        }
    }
}

/// Take the run lock, then open the ledger and peer and run the block job.
/// Everything opened here is dropped before the caller exits.
async fn sync(config: SyncConfig, options: RunOptions) -> Result<i32> {
    info!("Carver sync v{}", env!("CARGO_PKG_VERSION"));
    info!("data_dir: {:?}", config.data_dir);
    info!("rpc_endpoint: {}", config.rpc_endpoint);
    info!(anomalies = config.anomalies.len(), "Loaded anomaly list");

    std::fs::create_dir_all(&config.data_dir)
        .with_context(|| format!("creating data dir {}", config.data_dir.display()))?;

    // RocksDB holds its own directory lock, so the job lock must come first.
    let mut locker = FileLocker::new(config.lock_dir());
    let code = run_job(
        &mut locker,
        || {
            let store = RocksStore::open(config.db_path())?;
            let rpc = RpcClient::from_config(&config)?;
            Ok(SyncEngine::new(
                store,
                rpc,
                config.anomaly_list(),
                EngineOptions::from(&config),
            ))
        },
        options,
    )
    .await;
    Ok(code)
}

/// Initialize tracing subscriber with the given log level and output format.
///
/// `RUST_LOG` takes precedence over `level_str`. Pass `format = "json"` for
/// structured JSON output; any other value gives human-readable text.
fn init_logging(level_str: &str, format: &str) {
    use tracing_subscriber::filter::EnvFilter;
    use tracing_subscriber::fmt;
    use tracing_subscriber::prelude::*;

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level_str));

    if format == "json" {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().json())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().with_target(true).with_level(true))
            .init();
    }
}
