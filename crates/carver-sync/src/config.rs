//! Sync job configuration.
//!
//! [`SyncConfig`] is layered with the `config` crate: built-in defaults, then
//! an optional TOML file, then `CARVER_*` environment variables (for example
//! `CARVER_RPC_ENDPOINT`, `CARVER_BLOCK_CONFIRMATIONS`).

use std::path::{Path, PathBuf};
use std::time::Duration;

use carver_core::anomaly::{Anomaly, AnomalyList};
use carver_core::constants::{
    DEFAULT_ADDRESS_CACHE_LIMIT, DEFAULT_BLOCK_CONFIRMATIONS, DEFAULT_RPC_TIMEOUT_SECS,
    DEFAULT_UNDO_BATCH_SIZE,
};
use carver_core::error::CarverError;
use config::{Config, Environment, File};
use serde::{Deserialize, Serialize};

/// Environment variable prefix for overrides.
pub const ENV_PREFIX: &str = "CARVER";

/// Configuration for one sync job invocation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    /// Root directory for the ledger database and lock files.
    pub data_dir: PathBuf,
    /// JSON-RPC endpoint of the chain peer.
    pub rpc_endpoint: String,
    pub rpc_user: Option<String>,
    pub rpc_password: Option<String>,
    /// Upper bound on a single RPC call, in seconds.
    pub rpc_timeout_secs: u64,
    /// Confirmations a block needs before it is checked against the peer.
    pub block_confirmations: u64,
    /// Capacity of the ordinary-address cache tier.
    pub address_cache_limit: usize,
    /// Address movements reversed per rollback batch.
    pub undo_batch_size: usize,
    /// Log level filter string (e.g. "info", "carver_sync_lib=debug").
    pub log_level: String,
    /// Transactions skipped outright, by height and txid.
    pub anomalies: Vec<Anomaly>,
}

impl Default for SyncConfig {
    fn default() -> Self {
        let data_dir = dirs::data_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("carver");

        Self {
            data_dir,
            rpc_endpoint: "http://127.0.0.1:51473".to_string(),
            rpc_user: None,
            rpc_password: None,
            rpc_timeout_secs: DEFAULT_RPC_TIMEOUT_SECS,
            block_confirmations: DEFAULT_BLOCK_CONFIRMATIONS,
            address_cache_limit: DEFAULT_ADDRESS_CACHE_LIMIT,
            undo_batch_size: DEFAULT_UNDO_BATCH_SIZE,
            log_level: "info".to_string(),
            anomalies: Vec::new(),
        }
    }
}

impl SyncConfig {
    /// Load defaults, then `path` (when given), then the environment.
    pub fn load(path: Option<&Path>) -> Result<Self, CarverError> {
        let defaults = Config::try_from(&SyncConfig::default()).map_err(config_err)?;
        let mut builder = Config::builder().add_source(defaults);

        if let Some(path) = path {
            builder = builder.add_source(File::from(path).required(true));
        }

        builder = builder.add_source(Environment::with_prefix(ENV_PREFIX).try_parsing(true));

        let config: SyncConfig = builder
            .build()
            .and_then(|c| c.try_deserialize())
            .map_err(config_err)?;
        config.validate()?;
        Ok(config)
    }

    /// Reject settings the sync job cannot run with.
    pub fn validate(&self) -> Result<(), CarverError> {
        if self.rpc_endpoint.trim().is_empty() {
            return Err(CarverError::Config("rpc_endpoint must not be empty".into()));
        }
        if self.block_confirmations == 0 {
            return Err(CarverError::Config("block_confirmations must be at least 1".into()));
        }
        if self.undo_batch_size == 0 {
            return Err(CarverError::Config("undo_batch_size must be at least 1".into()));
        }
        if self.rpc_user.is_some() != self.rpc_password.is_some() {
            return Err(CarverError::Config(
                "rpc_user and rpc_password must be set together".into(),
            ));
        }
        Ok(())
    }

    /// Path to the RocksDB ledger directory.
    pub fn db_path(&self) -> PathBuf {
        self.data_dir.join("ledger")
    }

    /// Directory holding the per-job lock files.
    pub fn lock_dir(&self) -> PathBuf {
        self.data_dir.join("locks")
    }

    pub fn rpc_timeout(&self) -> Duration {
        Duration::from_secs(self.rpc_timeout_secs)
    }

    /// Basic-auth credentials, when both are configured.
    pub fn rpc_auth(&self) -> Option<(&str, &str)> {
        match (&self.rpc_user, &self.rpc_password) {
            (Some(user), Some(password)) => Some((user.as_str(), password.as_str())),
            _ => None,
        }
    }

    pub fn anomaly_list(&self) -> AnomalyList {
        AnomalyList::new(self.anomalies.iter().cloned())
    }
}

fn config_err(e: config::ConfigError) -> CarverError {
    CarverError::Config(e.to_string())
}
