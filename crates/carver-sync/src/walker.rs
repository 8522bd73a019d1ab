//! Forward block walker.
//!
//! Walks heights from the highest stored block to the sync target, applying
//! every transaction in order. The block record for a height is written only
//! after all of its transactions, which makes it the commit marker the
//! recovery pass relies on.

use tracing::{debug, info};

use carver_core::constants::{PREV_GENESIS, PREV_UNKNOWN};
use carver_core::decompose::{collect_vin_utxos, decompose, is_economically_empty};
use carver_core::error::CarverError;
use carver_core::ledger::LedgerStore;
use carver_core::sequencer::Sequencer;
use carver_core::traits::ChainSource;
use carver_core::types::{BlockRecord, RpcBlock};

use crate::applier::apply_movement;
use crate::confirm::depth;
use crate::engine::SyncEngine;

/// Counts from one forward walk.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SyncSummary {
    pub from_height: u64,
    pub to_height: u64,
    pub blocks: u64,
    /// Transactions decomposed and applied.
    pub transactions: u64,
    /// Deny-listed transactions.
    pub anomalies: u64,
    /// Transactions that move nothing.
    pub empty: u64,
    pub movements: u64,
}

/// Per-height tallies kept while walking one block.
#[derive(Debug, Default)]
struct BlockTally {
    vins: u64,
    vouts: u64,
    applied: u64,
    anomalies: u64,
    empty: u64,
}

impl<S: LedgerStore, C: ChainSource> SyncEngine<S, C> {
    /// Sync every height above the highest stored block up to `stop`.
    pub async fn sync_blocks(&mut self, stop: u64) -> Result<SyncSummary, CarverError> {
        let (start, last_sequence) = self
            .store
            .highest_block()?
            .map_or((0, 0), |block| (block.height, block.sequence_end));
        let mut sequencer = Sequencer::resume_from(last_sequence);
        let mut summary = SyncSummary {
            from_height: start + 1,
            to_height: stop,
            ..SyncSummary::default()
        };

        info!(from = start + 1, stop, sequence = last_sequence, "Syncing blocks");
        for height in (start + 1)..=stop {
            let (record, tally) = self.sync_height(height, &mut sequencer).await?;

            summary.blocks += 1;
            summary.transactions += tally.applied;
            summary.anomalies += tally.anomalies;
            summary.empty += tally.empty;
            summary.movements += record.movement_count();

            info!(
                percent = %format!("{:.2}", height as f64 / stop as f64 * 100.0),
                height,
                stop,
                hash = %record.hash,
                txs = record.tx_count,
                vins = record.vins_count,
                vouts = record.vouts_count,
                cache_normal = self.cache.len_normal(),
                cache_common = self.cache.len_common(),
                "Synced block"
            );
        }
        Ok(summary)
    }

    async fn sync_height(
        &mut self,
        height: u64,
        sequencer: &mut Sequencer,
    ) -> Result<(BlockRecord, BlockTally), CarverError> {
        let hash = self.chain.get_block_hash(height).await?;
        let block = self.chain.get_block(&hash).await?;
        let range = sequencer.begin_block(height);
        let mut tally = BlockTally::default();

        for txid in &block.tx {
            if self.anomalies.contains(height, txid) {
                debug!(height, txid = %txid, "Skipping deny-listed transaction");
                tally.anomalies += 1;
                continue;
            }
            let tx = self.chain.get_raw_transaction(txid).await?;
            tally.vins += tx.vin.len() as u64;
            tally.vouts += tx.vout.len() as u64;

            if is_economically_empty(&tx) {
                debug!(height, txid = %tx.txid, "Skipping empty transaction");
                tally.empty += 1;
                continue;
            }

            let utxos = collect_vin_utxos(&tx, &self.store)?;
            let parsed = decompose(&block, &tx, &utxos)?;
            apply_movement(&mut self.store, &mut self.cache, sequencer, &parsed)?;
            tally.applied += 1;
        }

        let range = sequencer.end_block(range)?;
        let record = BlockRecord {
            sequence_start: range.start,
            sequence_end: range.end,
            vins_count: tally.vins,
            vouts_count: tally.vouts,
            is_confirmed: depth(block.confirmations) >= self.options.block_confirmations,
            ..block_record(&block)
        };
        self.store.put_block(&record)?;
        Ok((record, tally))
    }
}

/// Header fields of `block`, with an empty sequence range and no counts.
fn block_record(block: &RpcBlock) -> BlockRecord {
    let prev = if block.height == 1 {
        PREV_GENESIS.to_string()
    } else {
        block
            .previousblockhash
            .clone()
            .unwrap_or_else(|| PREV_UNKNOWN.to_string())
    };

    BlockRecord {
        height: block.height,
        hash: block.hash.clone(),
        bits: block.bits.clone(),
        difficulty: block.difficulty,
        merkle_root: block.merkleroot.clone(),
        nonce: block.nonce,
        version: block.version,
        size: block.size,
        prev,
        time: block.time,
        confirmations: block.confirmations,
        is_confirmed: false,
        sequence_start: 0,
        sequence_end: 0,
        tx_count: block.tx.len() as u64,
        vins_count: 0,
        vouts_count: 0,
    }
}
