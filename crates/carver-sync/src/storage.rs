//! RocksDB-backed ledger storage.
//!
//! Implements [`LedgerStore`] with one column family per record kind plus two
//! height indexes. Heights and sequences are stored big-endian so that key
//! order is numeric order, which the range deletes and the "last record"
//! lookups rely on. Every put is a single [`WriteBatch`]; range deletes walk
//! keys from the top and write in bounded chunks.

use std::path::Path;

use rocksdb::{ColumnFamilyDescriptor, IteratorMode, Options, WriteBatch, DB};

use carver_core::error::CarverError;
use carver_core::ledger::LedgerStore;
use carver_core::types::{
    BlockRecord, BlockRewardDetails, CarverAddress, CarverAddressMovement, CarverMovement,
    MovementKey, Utxo,
};

// --- Column family names ---

const CF_BLOCKS: &str = "blocks";
const CF_ADDRESSES: &str = "addresses";
const CF_ADDRESS_HEIGHTS: &str = "address_heights";
const CF_ADDRESS_MOVEMENTS: &str = "address_movements";
const CF_MOVEMENTS: &str = "movements";
const CF_UTXOS: &str = "utxos";
const CF_UTXO_HEIGHTS: &str = "utxo_heights";
const CF_REWARD_DETAILS: &str = "reward_details";

/// Upper bound on write operations per batch during range deletes.
const DELETE_CHUNK: usize = 4096;

/// All column family names.
const ALL_CFS: &[&str] = &[
    CF_BLOCKS,
    CF_ADDRESSES,
    CF_ADDRESS_HEIGHTS,
    CF_ADDRESS_MOVEMENTS,
    CF_MOVEMENTS,
    CF_UTXOS,
    CF_UTXO_HEIGHTS,
    CF_REWARD_DETAILS,
];

/// RocksDB-backed ledger.
pub struct RocksStore {
    db: DB,
}

impl RocksStore {
    /// Open or create a ledger database at the given path.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, CarverError> {
        let mut db_opts = Options::default();
        db_opts.create_if_missing(true);
        db_opts.create_missing_column_families(true);

        let cf_descriptors: Vec<ColumnFamilyDescriptor> = ALL_CFS
            .iter()
            .map(|name| ColumnFamilyDescriptor::new(*name, Options::default()))
            .collect();

        let db = DB::open_cf_descriptors(&db_opts, path.as_ref(), cf_descriptors)
            .map_err(|e| CarverError::Storage(e.to_string()))?;

        Ok(Self { db })
    }

    /// Get a column family handle.
    fn cf_handle(&self, name: &str) -> Result<&rocksdb::ColumnFamily, CarverError> {
        self.db
            .cf_handle(name)
            .ok_or_else(|| CarverError::Storage(format!("missing column family: {name}")))
    }

    fn get<T: bincode::Decode<()>>(&self, cf: &str, key: &[u8]) -> Result<Option<T>, CarverError> {
        let cf = self.cf_handle(cf)?;
        match self
            .db
            .get_cf(cf, key)
            .map_err(|e| CarverError::Storage(e.to_string()))?
        {
            Some(bytes) => Ok(Some(decode(&bytes)?)),
            None => Ok(None),
        }
    }

    /// Decoded value of the entry with the greatest key.
    fn last<T: bincode::Decode<()>>(&self, cf: &str) -> Result<Option<T>, CarverError> {
        match self.last_entry(cf)? {
            Some((_, value)) => Ok(Some(decode(&value)?)),
            None => Ok(None),
        }
    }

    fn last_entry(&self, cf: &str) -> Result<Option<(Box<[u8]>, Box<[u8]>)>, CarverError> {
        let cf = self.cf_handle(cf)?;
        self.db
            .iterator_cf(cf, IteratorMode::End)
            .next()
            .transpose()
            .map_err(|e| CarverError::Storage(e.to_string()))
    }

    /// Height of the greatest entry in a `height ++ key` index.
    fn last_indexed_height(&self, cf: &str) -> Result<Option<u64>, CarverError> {
        match self.last_entry(cf)? {
            Some((key, _)) => {
                let bytes: [u8; 8] = key
                    .get(..8)
                    .and_then(|b| b.try_into().ok())
                    .ok_or_else(|| CarverError::Storage(format!("invalid {cf} index key")))?;
                Ok(Some(u64::from_be_bytes(bytes)))
            }
            None => Ok(None),
        }
    }

    fn is_cf_empty(&self, cf: &str) -> Result<bool, CarverError> {
        let cf = self.cf_handle(cf)?;
        let first = self
            .db
            .iterator_cf(cf, IteratorMode::Start)
            .next()
            .transpose()
            .map_err(|e| CarverError::Storage(e.to_string()))?;
        Ok(first.is_none())
    }

    /// Delete every key >= `from`, highest first. Only keys are read, and
    /// deletes are written in batches of at most [`DELETE_CHUNK`] operations,
    /// so an interrupted call leaves a contiguous prefix behind.
    fn delete_keys_from<F>(
        &self,
        cf_name: &str,
        from: &[u8],
        mut delete: F,
    ) -> Result<u64, CarverError>
    where
        F: FnMut(&mut WriteBatch, &[u8]),
    {
        let cf = self.cf_handle(cf_name)?;
        let mut iter = self.db.raw_iterator_cf(cf);
        iter.seek_to_last();

        let mut batch = WriteBatch::default();
        let mut deleted = 0u64;
        while let Some(key) = iter.key() {
            if key < from {
                break;
            }
            delete(&mut batch, key);
            deleted += 1;
            if batch.len() >= DELETE_CHUNK {
                self.write(std::mem::take(&mut batch))?;
            }
            iter.prev();
        }
        iter.status().map_err(|e| CarverError::Storage(e.to_string()))?;

        if !batch.is_empty() {
            self.write(batch)?;
        }
        Ok(deleted)
    }

    /// Delete every key >= `from` in a height-keyed column family.
    fn delete_from(&mut self, cf_name: &str, from: &[u8]) -> Result<u64, CarverError> {
        let cf = self.cf_handle(cf_name)?;
        self.delete_keys_from(cf_name, from, |batch, key| batch.delete_cf(cf, key))
    }

    /// Delete the records named by a `height ++ key` index, and the index
    /// entries themselves, for every height >= `height`.
    fn delete_indexed_from(
        &mut self,
        cf_index: &str,
        cf_records: &str,
        height: u64,
    ) -> Result<u64, CarverError> {
        let index = self.cf_handle(cf_index)?;
        let records = self.cf_handle(cf_records)?;
        self.delete_keys_from(cf_index, &height_key(height), |batch, key| {
            if let Some(record) = key.get(8..) {
                batch.delete_cf(records, record);
            }
            batch.delete_cf(index, key);
        })
    }

    fn write(&self, batch: WriteBatch) -> Result<(), CarverError> {
        self.db
            .write(batch)
            .map_err(|e| CarverError::Storage(e.to_string()))
    }
}

fn encode<T: bincode::Encode>(value: &T) -> Result<Vec<u8>, CarverError> {
    bincode::encode_to_vec(value, bincode::config::standard())
        .map_err(|e| CarverError::Encoding(e.to_string()))
}

fn decode<T: bincode::Decode<()>>(bytes: &[u8]) -> Result<T, CarverError> {
    bincode::decode_from_slice(bytes, bincode::config::standard())
        .map(|(value, _)| value)
        .map_err(|e| CarverError::Encoding(e.to_string()))
}

/// Encode a height or sequence as big-endian bytes for ordered iteration.
fn height_key(height: u64) -> [u8; 8] {
    height.to_be_bytes()
}

/// `height(BE) ++ suffix`.
fn height_prefixed(height: u64, suffix: &[u8]) -> Vec<u8> {
    let mut key = Vec::with_capacity(8 + suffix.len());
    key.extend_from_slice(&height_key(height));
    key.extend_from_slice(suffix);
    key
}

fn movement_key(key: &MovementKey) -> Vec<u8> {
    height_prefixed(key.block_height, key.txid.as_bytes())
}

impl LedgerStore for RocksStore {
    fn get_block(&self, height: u64) -> Result<Option<BlockRecord>, CarverError> {
        self.get(CF_BLOCKS, &height_key(height))
    }

    fn put_block(&mut self, block: &BlockRecord) -> Result<(), CarverError> {
        let cf = self.cf_handle(CF_BLOCKS)?;
        let mut batch = WriteBatch::default();
        batch.put_cf(cf, height_key(block.height), encode(block)?);
        self.write(batch)
    }

    fn highest_block(&self) -> Result<Option<BlockRecord>, CarverError> {
        self.last(CF_BLOCKS)
    }

    fn last_confirmed_block(&self) -> Result<Option<BlockRecord>, CarverError> {
        let cf = self.cf_handle(CF_BLOCKS)?;
        for item in self.db.iterator_cf(cf, IteratorMode::End) {
            let (_, value) = item.map_err(|e| CarverError::Storage(e.to_string()))?;
            let block: BlockRecord = decode(&value)?;
            if block.is_confirmed {
                return Ok(Some(block));
            }
        }
        Ok(None)
    }

    fn delete_blocks_from(&mut self, height: u64) -> Result<u64, CarverError> {
        self.delete_from(CF_BLOCKS, &height_key(height))
    }

    fn get_address(&self, label: &str) -> Result<Option<CarverAddress>, CarverError> {
        self.get(CF_ADDRESSES, label.as_bytes())
    }

    fn put_addresses(&mut self, addresses: &[CarverAddress]) -> Result<(), CarverError> {
        if addresses.is_empty() {
            return Ok(());
        }
        let cf = self.cf_handle(CF_ADDRESSES)?;
        let cf_heights = self.cf_handle(CF_ADDRESS_HEIGHTS)?;
        let mut batch = WriteBatch::default();
        for address in addresses {
            batch.put_cf(cf, address.label.as_bytes(), encode(address)?);
            batch.put_cf(
                cf_heights,
                height_prefixed(address.block_height, address.label.as_bytes()),
                b"",
            );
        }
        self.write(batch)
    }

    fn last_address_height(&self) -> Result<Option<u64>, CarverError> {
        self.last_indexed_height(CF_ADDRESS_HEIGHTS)
    }

    fn delete_addresses_from(&mut self, height: u64) -> Result<u64, CarverError> {
        self.delete_indexed_from(CF_ADDRESS_HEIGHTS, CF_ADDRESSES, height)
    }

    fn all_addresses(&self) -> Result<Vec<CarverAddress>, CarverError> {
        let cf = self.cf_handle(CF_ADDRESSES)?;
        self.db
            .iterator_cf(cf, IteratorMode::Start)
            .map(|item| {
                let (_, value) = item.map_err(|e| CarverError::Storage(e.to_string()))?;
                decode(&value)
            })
            .collect()
    }

    fn get_address_movement(
        &self,
        sequence: u64,
    ) -> Result<Option<CarverAddressMovement>, CarverError> {
        self.get(CF_ADDRESS_MOVEMENTS, &height_key(sequence))
    }

    fn put_address_movements(
        &mut self,
        movements: &[CarverAddressMovement],
    ) -> Result<(), CarverError> {
        if movements.is_empty() {
            return Ok(());
        }
        let cf = self.cf_handle(CF_ADDRESS_MOVEMENTS)?;
        let mut batch = WriteBatch::default();
        for movement in movements {
            batch.put_cf(cf, height_key(movement.sequence), encode(movement)?);
        }
        self.write(batch)
    }

    fn address_movements_from_height_desc(
        &self,
        height: u64,
        limit: usize,
    ) -> Result<Vec<CarverAddressMovement>, CarverError> {
        // Sequences grow with height, so the movements at or above `height`
        // are exactly the tail of the sequence keyspace.
        let cf = self.cf_handle(CF_ADDRESS_MOVEMENTS)?;
        let mut movements = Vec::new();
        for item in self.db.iterator_cf(cf, IteratorMode::End) {
            if movements.len() >= limit {
                break;
            }
            let (_, value) = item.map_err(|e| CarverError::Storage(e.to_string()))?;
            let movement: CarverAddressMovement = decode(&value)?;
            if movement.block_height < height {
                break;
            }
            movements.push(movement);
        }
        Ok(movements)
    }

    fn delete_address_movements_from(&mut self, sequence: u64) -> Result<u64, CarverError> {
        self.delete_from(CF_ADDRESS_MOVEMENTS, &height_key(sequence))
    }

    fn last_address_movement(&self) -> Result<Option<CarverAddressMovement>, CarverError> {
        self.last(CF_ADDRESS_MOVEMENTS)
    }

    fn get_movement(&self, key: &MovementKey) -> Result<Option<CarverMovement>, CarverError> {
        self.get(CF_MOVEMENTS, &movement_key(key))
    }

    fn put_movement(&mut self, movement: &CarverMovement) -> Result<(), CarverError> {
        let cf = self.cf_handle(CF_MOVEMENTS)?;
        let mut batch = WriteBatch::default();
        batch.put_cf(cf, movement_key(&movement.key()), encode(movement)?);
        self.write(batch)
    }

    fn last_movement(&self) -> Result<Option<CarverMovement>, CarverError> {
        self.last(CF_MOVEMENTS)
    }

    fn delete_movements_from(&mut self, height: u64) -> Result<u64, CarverError> {
        self.delete_from(CF_MOVEMENTS, &height_key(height))
    }

    fn get_utxo(&self, label: &str) -> Result<Option<Utxo>, CarverError> {
        self.get(CF_UTXOS, label.as_bytes())
    }

    fn put_utxos(&mut self, utxos: &[Utxo]) -> Result<(), CarverError> {
        if utxos.is_empty() {
            return Ok(());
        }
        let cf = self.cf_handle(CF_UTXOS)?;
        let cf_heights = self.cf_handle(CF_UTXO_HEIGHTS)?;
        let mut batch = WriteBatch::default();
        for utxo in utxos {
            let label = utxo.label();
            batch.put_cf(cf, label.as_bytes(), encode(utxo)?);
            batch.put_cf(cf_heights, height_prefixed(utxo.block_height, label.as_bytes()), b"");
        }
        self.write(batch)
    }

    fn last_utxo_height(&self) -> Result<Option<u64>, CarverError> {
        self.last_indexed_height(CF_UTXO_HEIGHTS)
    }

    fn delete_utxos_from(&mut self, height: u64) -> Result<u64, CarverError> {
        self.delete_indexed_from(CF_UTXO_HEIGHTS, CF_UTXOS, height)
    }

    fn get_reward_details(
        &self,
        key: &MovementKey,
    ) -> Result<Option<BlockRewardDetails>, CarverError> {
        self.get(CF_REWARD_DETAILS, &movement_key(key))
    }

    fn put_reward_details(&mut self, details: &BlockRewardDetails) -> Result<(), CarverError> {
        let cf = self.cf_handle(CF_REWARD_DETAILS)?;
        let mut batch = WriteBatch::default();
        batch.put_cf(cf, movement_key(&details.carver_movement), encode(details)?);
        self.write(batch)
    }

    fn delete_reward_details_from(&mut self, height: u64) -> Result<u64, CarverError> {
        self.delete_from(CF_REWARD_DETAILS, &height_key(height))
    }

    /// Flush memtables to disk.
    fn flush(&self) -> Result<(), CarverError> {
        for name in ALL_CFS {
            let cf = self.cf_handle(name)?;
            self.db
                .flush_cf(cf)
                .map_err(|e| CarverError::Storage(e.to_string()))?;
        }
        Ok(())
    }

    fn has_ledger_records(&self) -> Result<bool, CarverError> {
        for cf in [CF_ADDRESSES, CF_ADDRESS_MOVEMENTS, CF_MOVEMENTS, CF_UTXOS, CF_REWARD_DETAILS] {
            if !self.is_cf_empty(cf)? {
                return Ok(true);
            }
        }
        Ok(false)
    }
}
