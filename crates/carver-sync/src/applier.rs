//! Ledger applier: turns one decomposed transaction into persisted records.
//!
//! Write order is part of the crash contract. Outputs, reward details, the
//! transaction movement and the address movements are all written before
//! any address aggregate, so an aggregate never points at a movement that
//! was not stored.

use tracing::debug;

use carver_core::cache::AddressCache;
use carver_core::decompose::ParsedMovement;
use carver_core::error::CarverError;
use carver_core::ledger::LedgerStore;
use carver_core::sequencer::Sequencer;
use carver_core::types::{BlockRewardDetails, CarverAddressMovement, CarverMovement, MovementKey};

/// Apply `parsed` to the ledger, consuming one sequence per consolidated
/// entry. Returns the stored transaction movement.
pub fn apply_movement<S: LedgerStore + ?Sized>(
    store: &mut S,
    cache: &mut AddressCache,
    sequencer: &mut Sequencer,
    parsed: &ParsedMovement,
) -> Result<CarverMovement, CarverError> {
    let is_reward = parsed.is_reward();
    let key = MovementKey {
        block_height: parsed.block_height,
        txid: parsed.txid.clone(),
    };

    let mut address_movements = Vec::with_capacity(parsed.consolidated.len());
    let mut to_insert = Vec::new();
    let mut to_update = Vec::new();
    let mut addresses_in = 0u32;
    let mut addresses_out = 0u32;

    for entry in parsed.consolidated.iter() {
        let sequence = sequencer.advance();
        let cached = cache.resolve(&entry.label, parsed.block_height, &*store)?;

        cached
            .address
            .credit_debit(entry.amount_in, entry.amount_out, is_reward);
        if entry.amount_out > 0 {
            addresses_in += 1;
        }
        if entry.amount_in > 0 {
            addresses_out += 1;
        }

        let movement = CarverAddressMovement {
            sequence,
            label: entry.label.clone(),
            carver_movement: key.clone(),
            amount_in: entry.amount_in,
            amount_out: entry.amount_out,
            balance: cached.address.balance,
            time: parsed.time,
            block_height: parsed.block_height,
            is_reward,
            previous_address_movement: cached.address.last_movement,
        };
        cached.address.link_movement(&movement);

        if std::mem::replace(&mut cached.is_new, false) {
            to_insert.push(cached.address.clone());
        } else {
            to_update.push(cached.address.clone());
        }
        address_movements.push(movement);
    }

    store.put_utxos(&parsed.new_utxos)?;

    let block_reward_details = match &parsed.reward_split {
        Some(split) if is_reward => {
            store.put_reward_details(&BlockRewardDetails {
                block_height: parsed.block_height,
                txid: parsed.txid.clone(),
                tx_type: parsed.tx_type,
                carver_movement: key.clone(),
                time: parsed.time,
                split: split.clone(),
            })?;
            Some(key.clone())
        }
        _ => None,
    };

    let movement = CarverMovement {
        txid: parsed.txid.clone(),
        tx_type: parsed.tx_type,
        amount_in: parsed.amount_in,
        amount_out: parsed.amount_out,
        block_height: parsed.block_height,
        time: parsed.time,
        sequence: sequencer.current(),
        addresses_in,
        addresses_out,
        is_reward,
        block_reward_details,
    };
    store.put_movement(&movement)?;
    store.put_address_movements(&address_movements)?;
    store.put_addresses(&to_insert)?;
    store.put_addresses(&to_update)?;

    debug!(
        txid = %parsed.txid,
        tx_type = ?parsed.tx_type,
        sequence = movement.sequence,
        new_addresses = to_insert.len(),
        updated_addresses = to_update.len(),
        "Applied transaction"
    );

    Ok(movement)
}
