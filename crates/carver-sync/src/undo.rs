//! Rollback of everything at or above a height.
//!
//! Blocks go first, so a crash mid-rollback leaves the whole range marked
//! unsynced and the next run's recovery pass simply rolls back again.
//! Address movements are then reversed newest first, in bounded batches,
//! walking each address's linked list backwards.

use std::collections::BTreeMap;

use tracing::{debug, info, warn};

use carver_core::error::{CarverError, ConsistencyError};
use carver_core::ledger::LedgerStore;
use carver_core::types::{CarverAddress, CarverAddressMovement};

/// Record counts removed by one rollback.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct UndoSummary {
    pub blocks: u64,
    pub utxos: u64,
    pub reward_details: u64,
    pub address_movements: u64,
    /// Address movements whose aggregate update never landed.
    pub skipped_movements: u64,
    pub movements: u64,
    pub addresses: u64,
    pub batches: u64,
}

/// Roll back every record at or above `height`.
pub fn undo_from<S: LedgerStore + ?Sized>(
    store: &mut S,
    height: u64,
    batch_size: usize,
) -> Result<UndoSummary, CarverError> {
    let mut summary = UndoSummary {
        blocks: store.delete_blocks_from(height)?,
        utxos: store.delete_utxos_from(height)?,
        reward_details: store.delete_reward_details_from(height)?,
        ..UndoSummary::default()
    };

    loop {
        let batch = store.address_movements_from_height_desc(height, batch_size.max(1))?;
        let (Some(newest), Some(oldest)) = (batch.first(), batch.last()) else {
            break;
        };
        let lowest = oldest.sequence;
        debug!(
            count = batch.len(),
            from = lowest,
            to = newest.sequence,
            "Undoing address movements"
        );

        let mut touched: BTreeMap<String, CarverAddress> = BTreeMap::new();
        for movement in &batch {
            if reverse_movement(&*store, &mut touched, movement)? {
                summary.address_movements += 1;
            } else {
                summary.skipped_movements += 1;
            }
        }

        let updated: Vec<CarverAddress> = touched.into_values().collect();
        store.put_addresses(&updated)?;
        store.delete_address_movements_from(lowest)?;
        summary.batches += 1;
    }

    summary.movements = store.delete_movements_from(height)?;
    summary.addresses = store.delete_addresses_from(height)?;

    if summary.skipped_movements > 0 {
        warn!(
            height,
            skipped = summary.skipped_movements,
            "Rolled back partially applied address movements"
        );
    }
    info!(
        height,
        blocks = summary.blocks,
        address_movements = summary.address_movements,
        movements = summary.movements,
        addresses = summary.addresses,
        "Rollback complete"
    );
    Ok(summary)
}

/// Reverse one movement on its address, loading the address into `touched`
/// on first use. Returns `false` when the movement never reached the
/// address aggregate.
fn reverse_movement<S: LedgerStore + ?Sized>(
    store: &S,
    touched: &mut BTreeMap<String, CarverAddress>,
    movement: &CarverAddressMovement,
) -> Result<bool, CarverError> {
    if !touched.contains_key(&movement.label) {
        match store.get_address(&movement.label)? {
            Some(address) => {
                touched.insert(movement.label.clone(), address);
            }
            // The address was to be created by this movement and its insert
            // never landed.
            None if movement.previous_address_movement.is_none() => return Ok(false),
            None => return Err(ConsistencyError::MissingAddress(movement.label.clone()).into()),
        }
    }
    let Some(address) = touched.get_mut(&movement.label) else {
        return Err(ConsistencyError::MissingAddress(movement.label.clone()).into());
    };

    if address.sequence < movement.sequence {
        return Ok(false);
    }
    if address.sequence > movement.sequence {
        return Err(ConsistencyError::OutOfSequence {
            label: address.label.clone(),
            address_sequence: address.sequence,
            movement_sequence: movement.sequence,
        }
        .into());
    }

    address.reverse_credit_debit(movement.amount_in, movement.amount_out, movement.is_reward);
    match movement.previous_address_movement {
        Some(previous) => {
            let prior = store.get_address_movement(previous)?.ok_or(
                ConsistencyError::MissingPreviousMovement {
                    sequence: movement.sequence,
                    previous,
                },
            )?;
            address.link_movement(&prior);
        }
        None => address.unlink_movements(),
    }
    Ok(true)
}

#[cfg(test)]
mod tests {
    use super::*;
    use carver_core::ledger::MemoryLedgerStore;
    use carver_core::types::MovementKey;

    /// Apply a raw movement to `label` the way the applier does.
    fn push(
        store: &mut MemoryLedgerStore,
        label: &str,
        sequence: u64,
        height: u64,
        amount_in: i64,
        amount_out: i64,
    ) {
        let mut address = store
            .get_address(label)
            .unwrap()
            .unwrap_or_else(|| CarverAddress::new(label, height));
        address.credit_debit(amount_in, amount_out, false);
        let movement = CarverAddressMovement {
            sequence,
            label: label.into(),
            carver_movement: MovementKey { block_height: height, txid: format!("t{sequence}") },
            amount_in,
            amount_out,
            balance: address.balance,
            time: height as i64,
            block_height: height,
            is_reward: false,
            previous_address_movement: address.last_movement,
        };
        address.link_movement(&movement);
        store.put_address_movements(&[movement]).unwrap();
        store.put_addresses(&[address]).unwrap();
    }

    #[test]
    fn undo_restores_previous_aggregate() {
        let mut store = MemoryLedgerStore::new();
        push(&mut store, "A", 1, 1, 10, 0);
        let snapshot = store.get_address("A").unwrap().unwrap();
        push(&mut store, "A", 2, 2, 5, 3);
        push(&mut store, "A", 3, 3, 0, 4);

        let summary = undo_from(&mut store, 2, 1000).unwrap();
        assert_eq!(summary.address_movements, 2);
        assert_eq!(summary.skipped_movements, 0);
        assert_eq!(store.get_address("A").unwrap().unwrap(), snapshot);
        assert_eq!(store.address_movement_count(), 1);
    }

    #[test]
    fn undo_deletes_addresses_created_in_range() {
        let mut store = MemoryLedgerStore::new();
        push(&mut store, "A", 1, 1, 10, 0);
        push(&mut store, "B", 2, 2, 10, 0);
        let summary = undo_from(&mut store, 2, 1000).unwrap();
        assert_eq!(summary.addresses, 1);
        assert!(store.get_address("B").unwrap().is_none());
        assert!(store.get_address("A").unwrap().is_some());
    }

    #[test]
    fn small_batches_reach_same_state() {
        let mut a = MemoryLedgerStore::new();
        for s in 1..=20u64 {
            let label = if s % 3 == 0 { "B" } else { "A" };
            push(&mut a, label, s, 1 + s / 4, 7, if s % 2 == 0 { 2 } else { 0 });
        }
        let mut b = a.clone();

        let big = undo_from(&mut a, 3, 1000).unwrap();
        let small = undo_from(&mut b, 3, 2).unwrap();
        assert_eq!(a, b);
        assert!(small.batches > big.batches);
    }

    #[test]
    fn residue_without_address_update_is_skipped() {
        let mut store = MemoryLedgerStore::new();
        push(&mut store, "A", 1, 1, 10, 0);
        let snapshot = store.get_address("A").unwrap().unwrap();

        // Movement stored, aggregate update lost.
        let residue = CarverAddressMovement {
            sequence: 2,
            label: "A".into(),
            carver_movement: MovementKey { block_height: 2, txid: "t2".into() },
            amount_in: 3,
            amount_out: 0,
            balance: 13,
            time: 2,
            block_height: 2,
            is_reward: false,
            previous_address_movement: Some(1),
        };
        store.put_address_movements(&[residue]).unwrap();

        let summary = undo_from(&mut store, 2, 1000).unwrap();
        assert_eq!(summary.skipped_movements, 1);
        assert_eq!(store.get_address("A").unwrap().unwrap(), snapshot);
        assert_eq!(store.address_movement_count(), 1);
    }

    #[test]
    fn residue_of_never_inserted_address_is_skipped() {
        let mut store = MemoryLedgerStore::new();
        let residue = CarverAddressMovement {
            sequence: 1,
            label: "NEW".into(),
            carver_movement: MovementKey { block_height: 1, txid: "t1".into() },
            amount_in: 3,
            amount_out: 0,
            balance: 3,
            time: 1,
            block_height: 1,
            is_reward: false,
            previous_address_movement: None,
        };
        store.put_address_movements(&[residue]).unwrap();
        let summary = undo_from(&mut store, 1, 1000).unwrap();
        assert_eq!(summary.skipped_movements, 1);
        assert_eq!(store.address_movement_count(), 0);
    }

    #[test]
    fn address_ahead_of_movement_is_fatal() {
        let mut store = MemoryLedgerStore::new();
        push(&mut store, "A", 1, 1, 10, 0);
        push(&mut store, "A", 2, 2, 10, 0);
        // Corrupt: the address claims a movement newer than any stored.
        let mut address = store.get_address("A").unwrap().unwrap();
        address.sequence = 9;
        store.put_addresses(&[address]).unwrap();

        let err = undo_from(&mut store, 2, 1000).unwrap_err();
        assert!(matches!(
            err,
            CarverError::Consistency(ConsistencyError::OutOfSequence {
                address_sequence: 9,
                movement_sequence: 2,
                ..
            })
        ));
    }

    #[test]
    fn missing_previous_movement_is_fatal() {
        let mut store = MemoryLedgerStore::new();
        push(&mut store, "A", 1, 1, 10, 0);
        push(&mut store, "A", 2, 2, 10, 0);
        store.delete_address_movements_from(1).unwrap();
        push(&mut store, "A", 3, 2, 1, 0);
        // Movement 3 links to 2, which is gone.
        let err = undo_from(&mut store, 2, 1000).unwrap_err();
        assert!(matches!(
            err,
            CarverError::Consistency(ConsistencyError::MissingPreviousMovement { .. })
        ));
    }

    #[test]
    fn undo_is_idempotent() {
        let mut store = MemoryLedgerStore::new();
        push(&mut store, "A", 1, 1, 10, 0);
        push(&mut store, "A", 2, 2, 5, 0);
        undo_from(&mut store, 2, 1000).unwrap();
        let once = store.clone();
        let summary = undo_from(&mut store, 2, 1000).unwrap();
        assert_eq!(summary, UndoSummary::default());
        assert_eq!(store, once);
    }
}
