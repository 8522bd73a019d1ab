//! Ledger storage contract and an in-memory implementation.
//!
//! [`LedgerStore`] is the durable side of the sync job. Writes are issued in
//! a fixed order by the applier and the walker so that a crash at any point
//! leaves residue the recovery pass can detect (see `carver-sync-lib`).
//! The production implementation is the RocksDB store in `carver-sync-lib`;
//! [`MemoryLedgerStore`] backs tests and benches.

use std::collections::{BTreeMap, HashMap};

use crate::error::CarverError;
use crate::types::{
    BlockRecord, BlockRewardDetails, CarverAddress, CarverAddressMovement, CarverMovement,
    MovementKey, Utxo,
};

/// Persistent ledger state.
pub trait LedgerStore: Send + Sync {
    // --- Blocks ---

    fn get_block(&self, height: u64) -> Result<Option<BlockRecord>, CarverError>;

    /// Insert or overwrite the block record at `block.height`.
    fn put_block(&mut self, block: &BlockRecord) -> Result<(), CarverError>;

    /// Block with the greatest height, if any.
    fn highest_block(&self) -> Result<Option<BlockRecord>, CarverError>;

    /// Highest block with `is_confirmed` set, if any.
    fn last_confirmed_block(&self) -> Result<Option<BlockRecord>, CarverError>;

    /// Delete every block at or above `height`. Returns the number deleted.
    fn delete_blocks_from(&mut self, height: u64) -> Result<u64, CarverError>;

    // --- Addresses ---

    fn get_address(&self, label: &str) -> Result<Option<CarverAddress>, CarverError>;

    /// Insert or overwrite address aggregates, all in one write.
    fn put_addresses(&mut self, addresses: &[CarverAddress]) -> Result<(), CarverError>;

    /// Greatest creation height among stored addresses.
    fn last_address_height(&self) -> Result<Option<u64>, CarverError>;

    /// Delete addresses first seen at or above `height`.
    fn delete_addresses_from(&mut self, height: u64) -> Result<u64, CarverError>;

    /// Every stored address aggregate, ordered by label.
    fn all_addresses(&self) -> Result<Vec<CarverAddress>, CarverError>;

    // --- Address movements ---

    fn get_address_movement(
        &self,
        sequence: u64,
    ) -> Result<Option<CarverAddressMovement>, CarverError>;

    fn put_address_movements(
        &mut self,
        movements: &[CarverAddressMovement],
    ) -> Result<(), CarverError>;

    /// Up to `limit` movements with `block_height >= height`, in descending
    /// sequence order.
    fn address_movements_from_height_desc(
        &self,
        height: u64,
        limit: usize,
    ) -> Result<Vec<CarverAddressMovement>, CarverError>;

    /// Delete every address movement with `sequence >= sequence`.
    fn delete_address_movements_from(&mut self, sequence: u64) -> Result<u64, CarverError>;

    /// Address movement with the greatest sequence, if any.
    fn last_address_movement(&self) -> Result<Option<CarverAddressMovement>, CarverError>;

    // --- Movements ---

    fn get_movement(&self, key: &MovementKey) -> Result<Option<CarverMovement>, CarverError>;

    fn put_movement(&mut self, movement: &CarverMovement) -> Result<(), CarverError>;

    /// Movement at the greatest height, if any.
    fn last_movement(&self) -> Result<Option<CarverMovement>, CarverError>;

    fn delete_movements_from(&mut self, height: u64) -> Result<u64, CarverError>;

    // --- UTXOs ---

    /// Look up an output by its `txid:n` label.
    fn get_utxo(&self, label: &str) -> Result<Option<Utxo>, CarverError>;

    fn put_utxos(&mut self, utxos: &[Utxo]) -> Result<(), CarverError>;

    /// Greatest `block_height` among stored outputs.
    fn last_utxo_height(&self) -> Result<Option<u64>, CarverError>;

    fn delete_utxos_from(&mut self, height: u64) -> Result<u64, CarverError>;

    // --- Reward details ---

    fn get_reward_details(
        &self,
        key: &MovementKey,
    ) -> Result<Option<BlockRewardDetails>, CarverError>;

    fn put_reward_details(&mut self, details: &BlockRewardDetails) -> Result<(), CarverError>;

    fn delete_reward_details_from(&mut self, height: u64) -> Result<u64, CarverError>;

    /// Persist buffered writes. Stores without a write buffer do nothing.
    fn flush(&self) -> Result<(), CarverError> {
        Ok(())
    }

    /// Whether any movement, address movement, address or output is stored.
    ///
    /// Default implementation probes the `last_*` accessors and the address
    /// table.
    fn has_ledger_records(&self) -> Result<bool, CarverError> {
        Ok(self.last_movement()?.is_some()
            || self.last_address_movement()?.is_some()
            || self.last_utxo_height()?.is_some()
            || !self.all_addresses()?.is_empty())
    }
}

/// In-memory ledger store.
///
/// Stores everything in ordered maps with no persistence. Used by tests,
/// benches and dry runs.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct MemoryLedgerStore {
    blocks: BTreeMap<u64, BlockRecord>,
    addresses: BTreeMap<String, CarverAddress>,
    address_movements: BTreeMap<u64, CarverAddressMovement>,
    movements: BTreeMap<MovementKey, CarverMovement>,
    utxos: HashMap<String, Utxo>,
    reward_details: BTreeMap<MovementKey, BlockRewardDetails>,
}

impl MemoryLedgerStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored address movements.
    pub fn address_movement_count(&self) -> usize {
        self.address_movements.len()
    }

    /// Number of stored transaction movements.
    pub fn movement_count(&self) -> usize {
        self.movements.len()
    }

    pub fn block_count(&self) -> usize {
        self.blocks.len()
    }

    pub fn reward_details_count(&self) -> usize {
        self.reward_details.len()
    }
}

/// Lowest possible key at `height`.
fn height_floor(height: u64) -> MovementKey {
    MovementKey {
        block_height: height,
        txid: String::new(),
    }
}

/// Remove every entry at or above `from`, returning how many were removed.
fn truncate_from<K: Ord + Clone, V>(map: &mut BTreeMap<K, V>, from: &K) -> u64 {
    map.split_off(from).len() as u64
}

impl LedgerStore for MemoryLedgerStore {
    fn get_block(&self, height: u64) -> Result<Option<BlockRecord>, CarverError> {
        Ok(self.blocks.get(&height).cloned())
    }

    fn put_block(&mut self, block: &BlockRecord) -> Result<(), CarverError> {
        self.blocks.insert(block.height, block.clone());
        Ok(())
    }

    fn highest_block(&self) -> Result<Option<BlockRecord>, CarverError> {
        Ok(self.blocks.values().next_back().cloned())
    }

    fn last_confirmed_block(&self) -> Result<Option<BlockRecord>, CarverError> {
        Ok(self.blocks.values().rev().find(|b| b.is_confirmed).cloned())
    }

    fn delete_blocks_from(&mut self, height: u64) -> Result<u64, CarverError> {
        Ok(truncate_from(&mut self.blocks, &height))
    }

    fn get_address(&self, label: &str) -> Result<Option<CarverAddress>, CarverError> {
        Ok(self.addresses.get(label).cloned())
    }

    fn put_addresses(&mut self, addresses: &[CarverAddress]) -> Result<(), CarverError> {
        for address in addresses {
            self.addresses.insert(address.label.clone(), address.clone());
        }
        Ok(())
    }

    fn last_address_height(&self) -> Result<Option<u64>, CarverError> {
        Ok(self.addresses.values().map(|a| a.block_height).max())
    }

    fn delete_addresses_from(&mut self, height: u64) -> Result<u64, CarverError> {
        let before = self.addresses.len();
        self.addresses.retain(|_, a| a.block_height < height);
        Ok((before - self.addresses.len()) as u64)
    }

    fn all_addresses(&self) -> Result<Vec<CarverAddress>, CarverError> {
        Ok(self.addresses.values().cloned().collect())
    }

    fn get_address_movement(
        &self,
        sequence: u64,
    ) -> Result<Option<CarverAddressMovement>, CarverError> {
        Ok(self.address_movements.get(&sequence).cloned())
    }

    fn put_address_movements(
        &mut self,
        movements: &[CarverAddressMovement],
    ) -> Result<(), CarverError> {
        for movement in movements {
            self.address_movements.insert(movement.sequence, movement.clone());
        }
        Ok(())
    }

    fn address_movements_from_height_desc(
        &self,
        height: u64,
        limit: usize,
    ) -> Result<Vec<CarverAddressMovement>, CarverError> {
        Ok(self
            .address_movements
            .values()
            .rev()
            .filter(|m| m.block_height >= height)
            .take(limit)
            .cloned()
            .collect())
    }

    fn delete_address_movements_from(&mut self, sequence: u64) -> Result<u64, CarverError> {
        Ok(truncate_from(&mut self.address_movements, &sequence))
    }

    fn last_address_movement(&self) -> Result<Option<CarverAddressMovement>, CarverError> {
        Ok(self.address_movements.values().next_back().cloned())
    }

    fn get_movement(&self, key: &MovementKey) -> Result<Option<CarverMovement>, CarverError> {
        Ok(self.movements.get(key).cloned())
    }

    fn put_movement(&mut self, movement: &CarverMovement) -> Result<(), CarverError> {
        self.movements.insert(movement.key(), movement.clone());
        Ok(())
    }

    fn last_movement(&self) -> Result<Option<CarverMovement>, CarverError> {
        Ok(self.movements.values().next_back().cloned())
    }

    fn delete_movements_from(&mut self, height: u64) -> Result<u64, CarverError> {
        Ok(truncate_from(&mut self.movements, &height_floor(height)))
    }

    fn get_utxo(&self, label: &str) -> Result<Option<Utxo>, CarverError> {
        Ok(self.utxos.get(label).cloned())
    }

    fn put_utxos(&mut self, utxos: &[Utxo]) -> Result<(), CarverError> {
        for utxo in utxos {
            self.utxos.insert(utxo.label(), utxo.clone());
        }
        Ok(())
    }

    fn last_utxo_height(&self) -> Result<Option<u64>, CarverError> {
        Ok(self.utxos.values().map(|u| u.block_height).max())
    }

    fn delete_utxos_from(&mut self, height: u64) -> Result<u64, CarverError> {
        let before = self.utxos.len();
        self.utxos.retain(|_, u| u.block_height < height);
        Ok((before - self.utxos.len()) as u64)
    }

    fn get_reward_details(
        &self,
        key: &MovementKey,
    ) -> Result<Option<BlockRewardDetails>, CarverError> {
        Ok(self.reward_details.get(key).cloned())
    }

    fn put_reward_details(&mut self, details: &BlockRewardDetails) -> Result<(), CarverError> {
        self.reward_details
            .insert(details.carver_movement.clone(), details.clone());
        Ok(())
    }

    fn delete_reward_details_from(&mut self, height: u64) -> Result<u64, CarverError> {
        Ok(truncate_from(&mut self.reward_details, &height_floor(height)))
    }
}
