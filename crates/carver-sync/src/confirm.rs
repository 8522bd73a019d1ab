//! Block confirmation and reorg reconciliation.
//!
//! Unconfirmed blocks are re-checked against the peer once they are deep
//! enough. A block whose merkle root no longer matches the peer's is on an
//! abandoned branch: the top stored block is rolled back and the scan starts
//! over, until the mismatching height itself is gone. Blocks at or below the
//! last confirmed one are never revisited.

use tracing::{debug, info, warn};

use carver_core::error::CarverError;
use carver_core::ledger::LedgerStore;
use carver_core::traits::ChainSource;

use crate::engine::SyncEngine;

/// Counts from one confirmation pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ConfirmSummary {
    /// Blocks flipped to confirmed.
    pub confirmed: u64,
    /// Top blocks rolled back because of a merkle mismatch.
    pub rolled_back: u64,
    /// Lowest height rolled back, when a reorg was found.
    pub reorg_height: Option<u64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ConfirmState {
    Scanning { height: u64 },
    RollingBack { mismatch: u64 },
}

/// Peer confirmation count as an unsigned depth. Orphaned blocks report -1.
pub(crate) fn depth(confirmations: i64) -> u64 {
    u64::try_from(confirmations).unwrap_or(0)
}

impl<S: LedgerStore, C: ChainSource> SyncEngine<S, C> {
    /// Confirm stored blocks that are now `block_confirmations` deep,
    /// rolling back any that the peer has reorganized away.
    pub async fn confirm_blocks(&mut self, rpc_height: u64) -> Result<ConfirmSummary, CarverError> {
        let mut summary = ConfirmSummary::default();
        let Some(start) = self.confirm_start(rpc_height)? else {
            debug!(rpc_height, "No blocks awaiting confirmation");
            return Ok(summary);
        };

        let mut state = ConfirmState::Scanning { height: start };
        loop {
            state = match state {
                ConfirmState::Scanning { height } => {
                    if height > rpc_height {
                        break;
                    }
                    let Some(mut block) = self.store.get_block(height)? else {
                        break;
                    };
                    let hash = self.chain.get_block_hash(height).await?;
                    let peer = self.chain.get_block(&hash).await?;
                    if depth(peer.confirmations) < self.options.block_confirmations {
                        break;
                    }

                    if peer.merkleroot != block.merkle_root {
                        warn!(
                            height,
                            stored = %block.merkle_root,
                            peer = %peer.merkleroot,
                            "Merkle root mismatch, chain reorganized"
                        );
                        ConfirmState::RollingBack { mismatch: height }
                    } else {
                        block.is_confirmed = true;
                        block.confirmations = peer.confirmations;
                        self.store.put_block(&block)?;
                        summary.confirmed += 1;
                        debug!(height, confirmations = peer.confirmations, "Block confirmed");
                        ConfirmState::Scanning { height: height + 1 }
                    }
                }
                ConfirmState::RollingBack { mismatch } => {
                    let Some(top) = self.store.highest_block()? else {
                        break;
                    };
                    info!(mismatch, height = top.height, "Rolling back top block");
                    self.undo(top.height)?;
                    summary.rolled_back += 1;
                    summary.reorg_height = Some(top.height);

                    match self.confirm_start(rpc_height)? {
                        Some(height) => ConfirmState::Scanning { height },
                        None => break,
                    }
                }
            };
        }

        if summary.rolled_back > 0 {
            warn!(
                rolled_back = summary.rolled_back,
                reorg_height = summary.reorg_height,
                "Reorg reconciled"
            );
        }
        Ok(summary)
    }

    /// First height to check, or `None` when the peer is not ahead of it.
    fn confirm_start(&self, rpc_height: u64) -> Result<Option<u64>, CarverError> {
        let start = self
            .store
            .last_confirmed_block()?
            .map_or(1, |block| block.height + 1);
        Ok((start < rpc_height).then_some(start))
    }
}
