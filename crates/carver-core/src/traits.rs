//! Trait interfaces for the sync job's collaborators.
//!
//! - [`ChainSource`]: the RPC surface of the upstream peer (`carver-sync-lib`
//!   implements it over JSON-RPC, tests over a scripted chain)
//! - [`RunLock`]: per-job mutual exclusion between invocations

use async_trait::async_trait;

use crate::error::{LockError, PeerError};
use crate::types::{RpcBlock, RpcInfo, RpcTransaction};

/// Read-only view of a node's chain over RPC.
#[async_trait]
pub trait ChainSource: Send + Sync {
    /// `getblockhash(height)`.
    async fn get_block_hash(&self, height: u64) -> Result<String, PeerError>;

    /// `getblock(hash)`.
    async fn get_block(&self, hash: &str) -> Result<RpcBlock, PeerError>;

    /// `getrawtransaction(txid, 1)`: the verbose, decoded form.
    async fn get_raw_transaction(&self, txid: &str) -> Result<RpcTransaction, PeerError>;

    /// `getinfo()`.
    async fn get_info(&self) -> Result<RpcInfo, PeerError>;
}

/// Serializes runs of the same job type.
pub trait RunLock {
    /// Acquire the lock for `job`. Fails with [`LockError::AlreadyHeld`] when
    /// another run holds it.
    fn lock(&mut self, job: &str) -> Result<(), LockError>;

    /// Release the lock for `job`.
    fn unlock(&mut self, job: &str) -> Result<(), LockError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    fn _assert_chain_source_object_safe(source: &dyn ChainSource) {
        let _ = source;
    }

    fn _assert_run_lock_object_safe(lock: &mut dyn RunLock) {
        let _ = lock;
    }
}
