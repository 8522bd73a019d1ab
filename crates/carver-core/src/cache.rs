//! Two-tier address cache.
//!
//! Reserved-role addresses (`COINBASE`, `FEE`, `MN`, `POS`, `ZEROCOIN`) are
//! touched by nearly every block and live in the common tier for the whole
//! run. Ordinary addresses go to the normal tier, which is bounded: inserting
//! into a full normal tier drops the entire tier first.
//!
//! Entries are the authoritative in-flight aggregates. The applier persists a
//! clone of every entry it touches at the end of each transaction, so a
//! dropped entry is simply re-read from the store on its next use.

use std::collections::HashMap;
use std::collections::hash_map::Entry;

use tracing::debug;

use crate::error::CarverError;
use crate::ledger::LedgerStore;
use crate::types::{AddressType, CarverAddress};

/// A cached aggregate plus whether it still has to be inserted.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CachedAddress {
    pub address: CarverAddress,
    /// `true` until the aggregate has been queued for its first insert.
    pub is_new: bool,
}

#[derive(Debug)]
pub struct AddressCache {
    common: HashMap<String, CachedAddress>,
    normal: HashMap<String, CachedAddress>,
    limit: usize,
}

impl AddressCache {
    /// Cache whose normal tier holds at most `limit` ordinary addresses.
    pub fn new(limit: usize) -> Self {
        Self {
            common: HashMap::new(),
            normal: HashMap::new(),
            limit,
        }
    }

    /// Cached aggregate for `label`, loading it from `store` or creating a
    /// fresh one (first seen at `block_height`) on a miss.
    pub fn resolve<S: LedgerStore + ?Sized>(
        &mut self,
        label: &str,
        block_height: u64,
        store: &S,
    ) -> Result<&mut CachedAddress, CarverError> {
        let reserved = AddressType::for_label(label).is_reserved();
        let limit = self.limit;
        let tier = if reserved { &mut self.common } else { &mut self.normal };
        if !reserved && tier.len() >= limit && !tier.contains_key(label) {
            debug!(evicted = tier.len(), "Address cache full, clearing normal tier");
            tier.clear();
        }

        match tier.entry(label.to_string()) {
            Entry::Occupied(slot) => Ok(slot.into_mut()),
            Entry::Vacant(slot) => {
                let entry = match store.get_address(label)? {
                    Some(address) => CachedAddress { address, is_new: false },
                    None => CachedAddress {
                        address: CarverAddress::new(label, block_height),
                        is_new: true,
                    },
                };
                Ok(slot.insert(entry))
            }
        }
    }

    /// Drop both tiers. Called after every rollback.
    pub fn clear(&mut self) {
        self.common.clear();
        self.normal.clear();
    }

    pub fn len_common(&self) -> usize {
        self.common.len()
    }

    pub fn len_normal(&self) -> usize {
        self.normal.len()
    }

    pub fn is_empty(&self) -> bool {
        self.common.is_empty() && self.normal.is_empty()
    }
}
