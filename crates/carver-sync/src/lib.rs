//! # carver-sync-lib
//!
//! Block sync job over RocksDB and JSON-RPC, with reorg reconciliation.
//!
//! Composes the Carver ledger pieces into the cron-style sync job:
//! - [`storage::RocksStore`]: persistent ledger backed by RocksDB
//! - [`rpc::RpcClient`]: JSON-RPC client for the chain peer
//! - [`engine::SyncEngine`]: recovery, confirmation and the forward walk
//! - [`locker::FileLocker`]: per-job run lock
//! - [`config::SyncConfig`]: job configuration

pub mod applier;
pub mod config;
pub mod confirm;
pub mod engine;
pub mod locker;
pub mod recovery;
pub mod rpc;
pub mod storage;
pub mod undo;
pub mod walker;

pub use config::SyncConfig;
pub use engine::{run_job, EngineOptions, RunOptions, RunOutcome, SyncEngine};
pub use locker::FileLocker;
pub use rpc::RpcClient;
pub use storage::RocksStore;
