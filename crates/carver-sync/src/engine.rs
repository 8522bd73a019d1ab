//! Sync engine and job runner.
//!
//! [`SyncEngine`] owns the ledger store, the chain peer and the address
//! cache for the duration of one run. A run is: roll back crash residue,
//! confirm (or roll back) recent blocks against the peer, then walk forward
//! to the peer's tip. [`run_job`] wraps a run in the run lock and maps the
//! result to a process exit code.

use tracing::{error, info, warn};

use carver_core::anomaly::AnomalyList;
use carver_core::cache::AddressCache;
use carver_core::constants::{
    DEFAULT_ADDRESS_CACHE_LIMIT, DEFAULT_BLOCK_CONFIRMATIONS, DEFAULT_UNDO_BATCH_SIZE, JOB_BLOCK,
};
use carver_core::error::CarverError;
use carver_core::ledger::LedgerStore;
use carver_core::traits::{ChainSource, RunLock};

use crate::config::SyncConfig;
use crate::confirm::ConfirmSummary;
use crate::recovery::residue_height;
use crate::undo::{undo_from, UndoSummary};
use crate::walker::SyncSummary;

/// Tunables of the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EngineOptions {
    pub block_confirmations: u64,
    pub address_cache_limit: usize,
    pub undo_batch_size: usize,
}

impl Default for EngineOptions {
    fn default() -> Self {
        Self {
            block_confirmations: DEFAULT_BLOCK_CONFIRMATIONS,
            address_cache_limit: DEFAULT_ADDRESS_CACHE_LIMIT,
            undo_batch_size: DEFAULT_UNDO_BATCH_SIZE,
        }
    }
}

impl From<&SyncConfig> for EngineOptions {
    fn from(config: &SyncConfig) -> Self {
        Self {
            block_confirmations: config.block_confirmations,
            address_cache_limit: config.address_cache_limit,
            undo_batch_size: config.undo_batch_size,
        }
    }
}

/// Per-invocation arguments.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RunOptions {
    /// Roll back everything at or above this height, then stop.
    pub undo_height: Option<u64>,
    /// Sync up to this height instead of the peer's reported tip.
    pub tip_height: Option<u64>,
}

/// What a successful run did.
#[derive(Debug, Clone, PartialEq)]
pub enum RunOutcome {
    /// Maintenance rollback.
    Undone(UndoSummary),
    /// Nothing to walk.
    UpToDate {
        recovered: Option<UndoSummary>,
        confirmed: ConfirmSummary,
        db_height: u64,
        rpc_height: u64,
    },
    Synced {
        recovered: Option<UndoSummary>,
        confirmed: ConfirmSummary,
        synced: SyncSummary,
    },
}

pub struct SyncEngine<S, C> {
    pub(crate) store: S,
    pub(crate) chain: C,
    pub(crate) cache: AddressCache,
    pub(crate) anomalies: AnomalyList,
    pub(crate) options: EngineOptions,
}

impl<S: LedgerStore, C: ChainSource> SyncEngine<S, C> {
    pub fn new(store: S, chain: C, anomalies: AnomalyList, options: EngineOptions) -> Self {
        Self {
            cache: AddressCache::new(options.address_cache_limit),
            store,
            chain,
            anomalies,
            options,
        }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn store_mut(&mut self) -> &mut S {
        &mut self.store
    }

    pub fn chain_mut(&mut self) -> &mut C {
        &mut self.chain
    }

    pub fn cache(&self) -> &AddressCache {
        &self.cache
    }

    pub fn into_store(self) -> S {
        self.store
    }

    /// Roll back everything at or above `height` and drop the cache, whose
    /// aggregates may reflect undone movements.
    pub fn undo(&mut self, height: u64) -> Result<UndoSummary, CarverError> {
        let summary = undo_from(&mut self.store, height, self.options.undo_batch_size)?;
        self.cache.clear();
        Ok(summary)
    }

    /// Roll back the residue of an interrupted run, if there is any.
    pub fn recover(&mut self) -> Result<Option<UndoSummary>, CarverError> {
        match residue_height(&self.store)? {
            Some(height) => {
                warn!(height, "Partial block entry found, removing corrupt sync data");
                Ok(Some(self.undo(height)?))
            }
            None => Ok(None),
        }
    }

    /// One full run of the block job.
    pub async fn run(&mut self, options: RunOptions) -> Result<RunOutcome, CarverError> {
        if let Some(height) = options.undo_height {
            info!(height, "Undoing all ledger records at or above height");
            let summary = self.undo(height)?;
            info!("All movements unreconciled successfully");
            return Ok(RunOutcome::Undone(summary));
        }

        let recovered = self.recover()?;
        let info = self.chain.get_info().await?;
        let confirmed = self.confirm_blocks(info.blocks).await?;

        let db_height = self.store.highest_block()?.map_or(0, |b| b.height);
        let rpc_height = options.tip_height.unwrap_or(info.blocks);
        info!(db_height, rpc_height, pinned = options.tip_height.is_some(), "Sync target");

        if db_height >= rpc_height {
            info!("No sync required");
            return Ok(RunOutcome::UpToDate {
                recovered,
                confirmed,
                db_height,
                rpc_height,
            });
        }

        let synced = self.sync_blocks(rpc_height).await?;
        Ok(RunOutcome::Synced {
            recovered,
            confirmed,
            synced,
        })
    }
}

/// Run the block job under the run lock and return the process exit code:
/// 0 on success, 2 when another run holds the lock, 1 on any other failure.
///
/// `open` builds the engine only once the lock is held, so a contending run
/// never touches the ledger. The store is flushed before the lock is
/// released.
pub async fn run_job<S, C, L, F>(locker: &mut L, open: F, options: RunOptions) -> i32
where
    S: LedgerStore,
    C: ChainSource,
    L: RunLock + ?Sized,
    F: FnOnce() -> Result<SyncEngine<S, C>, CarverError>,
{
    if let Err(e) = locker.lock(JOB_BLOCK) {
        let err = CarverError::from(e);
        error!(error = %err, "Could not acquire run lock");
        return err.exit_code();
    }

    let result = match open() {
        Ok(mut engine) => {
            let outcome = engine.run(options).await;
            let flushed = engine.store.flush();
            outcome.and_then(|outcome| flushed.map(|()| outcome))
        }
        Err(e) => Err(e),
    };

    if let Err(e) = locker.unlock(JOB_BLOCK) {
        warn!(error = %e, "Failed to release run lock");
    }

    match result {
        Ok(outcome) => {
            info!(?outcome, "Block sync finished");
            0
        }
        Err(e) => {
            error!(error = %e, "Block sync failed");
            e.exit_code()
        }
    }
}
