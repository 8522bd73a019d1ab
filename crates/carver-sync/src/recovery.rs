//! Crash residue detection.
//!
//! A block record is written only after everything its transactions
//! produced, so any record beyond the highest block (by height for outputs
//! and transaction movements, by sequence for address movements) is residue
//! of an interrupted run. The same goes for an address first seen beyond
//! the highest block, which a rollback interrupted before its last step
//! leaves behind with no movements pointing at it.

use tracing::debug;

use carver_core::error::CarverError;
use carver_core::ledger::LedgerStore;

/// Height the ledger must be rolled back from before syncing, if any.
pub fn residue_height<S: LedgerStore + ?Sized>(store: &S) -> Result<Option<u64>, CarverError> {
    let Some(block) = store.highest_block()? else {
        return Ok(if store.has_ledger_records()? { Some(1) } else { None });
    };

    let movement_beyond = store
        .last_movement()?
        .is_some_and(|m| m.block_height > block.height || m.sequence > block.sequence_end);
    let address_movement_beyond = store
        .last_address_movement()?
        .is_some_and(|m| m.sequence > block.sequence_end);
    let utxo_beyond = store
        .last_utxo_height()?
        .is_some_and(|h| h > block.height);
    let address_beyond = store
        .last_address_height()?
        .is_some_and(|h| h > block.height);

    debug!(
        height = block.height,
        sequence_end = block.sequence_end,
        movement_beyond,
        address_movement_beyond,
        utxo_beyond,
        address_beyond,
        "Checked ledger for crash residue"
    );

    if movement_beyond || address_movement_beyond || utxo_beyond || address_beyond {
        Ok(Some(block.height + 1))
    } else {
        Ok(None)
    }
}
