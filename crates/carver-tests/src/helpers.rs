//! Shared test helpers: a scripted chain peer, a fault-injecting store,
//! transaction builders and ledger law checks.

use std::collections::HashMap;

use async_trait::async_trait;

use carver_core::constants::{COIN, SCRIPT_NONSTANDARD};
use carver_core::error::{CarverError, PeerError};
use carver_core::ledger::{LedgerStore, MemoryLedgerStore};
use carver_core::sequencer::SequenceRange;
use carver_core::traits::ChainSource;
use carver_core::types::*;

/// Pool of ordinary addresses used by generated chains.
pub const ADDRESSES: [&str; 5] = ["A", "B", "C", "D", "E"];

// --- Transaction builders ---

/// Pay-to-address output of `coins`.
pub fn pay(n: u32, coins: f64, address: &str) -> RpcVout {
    RpcVout {
        value: coins,
        n,
        script_pub_key: RpcScriptPubKey {
            kind: "pubkeyhash".into(),
            addresses: vec![address.into()],
        },
    }
}

/// Zero-value marker output.
pub fn marker(n: u32) -> RpcVout {
    RpcVout {
        value: 0.0,
        n,
        script_pub_key: RpcScriptPubKey {
            kind: SCRIPT_NONSTANDARD.into(),
            addresses: vec![],
        },
    }
}

pub fn spend(txid: &str, n: u32) -> RpcVin {
    RpcVin {
        txid: Some(txid.into()),
        vout: Some(n),
        ..RpcVin::default()
    }
}

fn coinbase_vin() -> RpcVin {
    RpcVin {
        coinbase: Some("03a1b2c3".into()),
        ..RpcVin::default()
    }
}

/// Proof-of-work coinbase paying each `(address, coins)` in order.
pub fn coinbase(txid: &str, payouts: &[(&str, f64)]) -> RpcTransaction {
    RpcTransaction {
        txid: txid.into(),
        vin: vec![coinbase_vin()],
        vout: payouts
            .iter()
            .enumerate()
            .map(|(n, (address, coins))| pay(n as u32, *coins, address))
            .collect(),
    }
}

/// The empty coinbase of a proof-of-stake block.
pub fn empty_coinbase(txid: &str) -> RpcTransaction {
    RpcTransaction {
        txid: txid.into(),
        vin: vec![coinbase_vin()],
        vout: vec![marker(0)],
    }
}

/// Spend `inputs` (`(txid, n)`) into `payouts`.
pub fn transfer(txid: &str, inputs: &[(&str, u32)], payouts: &[(&str, f64)]) -> RpcTransaction {
    RpcTransaction {
        txid: txid.into(),
        vin: inputs.iter().map(|(t, n)| spend(t, *n)).collect(),
        vout: payouts
            .iter()
            .enumerate()
            .map(|(n, (address, coins))| pay(n as u32, *coins, address))
            .collect(),
    }
}

/// Stake reward: spends `input`, pays the staker and a masternode after the
/// zero-value marker.
pub fn stake(
    txid: &str,
    input: (&str, u32),
    staker: (&str, f64),
    masternode: (&str, f64),
) -> RpcTransaction {
    RpcTransaction {
        txid: txid.into(),
        vin: vec![spend(input.0, input.1)],
        vout: vec![
            marker(0),
            pay(1, staker.1, staker.0),
            pay(2, masternode.1, masternode.0),
        ],
    }
}

// --- Scripted chain ---

#[derive(Clone, Debug)]
struct ScriptedBlock {
    hash: String,
    merkle_root: String,
    txids: Vec<String>,
}

/// In-memory chain peer. Block hashes and merkle roots carry the branch
/// name, so blocks re-mined on another branch never match the originals.
#[derive(Clone, Debug)]
pub struct ScriptedChain {
    blocks: Vec<ScriptedBlock>,
    txs: HashMap<String, RpcTransaction>,
    branch: String,
}

impl Default for ScriptedChain {
    fn default() -> Self {
        Self::new()
    }
}

impl ScriptedChain {
    pub fn new() -> Self {
        Self {
            blocks: Vec::new(),
            txs: HashMap::new(),
            branch: "a".into(),
        }
    }

    pub fn tip(&self) -> u64 {
        self.blocks.len() as u64
    }

    /// Mine a block holding `txs` on top of the current tip.
    pub fn push_block(&mut self, txs: Vec<RpcTransaction>) -> u64 {
        let height = self.tip() + 1;
        let txids = txs.iter().map(|tx| tx.txid.clone()).collect();
        for tx in txs {
            self.txs.insert(tx.txid.clone(), tx);
        }
        self.blocks.push(ScriptedBlock {
            hash: format!("{}-{height}", self.branch),
            merkle_root: format!("merkle-{}-{height}", self.branch),
            txids,
        });
        height
    }

    /// Abandon every block at or above `height`; later blocks are mined on
    /// `branch`.
    pub fn fork_at(&mut self, height: u64, branch: &str) {
        self.blocks.truncate(height.saturating_sub(1) as usize);
        self.branch = branch.into();
    }

    pub fn merkle_root(&self, height: u64) -> Option<&str> {
        self.block_at(height).map(|b| b.merkle_root.as_str())
    }

    fn block_at(&self, height: u64) -> Option<&ScriptedBlock> {
        height
            .checked_sub(1)
            .and_then(|i| self.blocks.get(i as usize))
    }

    fn rpc_block(&self, height: u64, block: &ScriptedBlock) -> RpcBlock {
        RpcBlock {
            hash: block.hash.clone(),
            height,
            time: 1_500_000_000 + height as i64 * 60,
            bits: "1e0ffff0".into(),
            confirmations: (self.tip() - height + 1) as i64,
            difficulty: 1.5,
            merkleroot: block.merkle_root.clone(),
            nonce: height * 7,
            previousblockhash: self.block_at(height - 1).map(|b| b.hash.clone()),
            size: 200 + block.txids.len() as u64 * 250,
            tx: block.txids.clone(),
            version: 3,
        }
    }
}

fn remote(method: &str, message: &str) -> PeerError {
    PeerError::Remote {
        method: method.into(),
        message: message.into(),
    }
}

#[async_trait]
impl ChainSource for ScriptedChain {
    async fn get_block_hash(&self, height: u64) -> Result<String, PeerError> {
        self.block_at(height)
            .map(|b| b.hash.clone())
            .ok_or_else(|| remote("getblockhash", "Block height out of range"))
    }

    async fn get_block(&self, hash: &str) -> Result<RpcBlock, PeerError> {
        self.blocks
            .iter()
            .enumerate()
            .find(|(_, b)| b.hash == hash)
            .map(|(i, b)| self.rpc_block(i as u64 + 1, b))
            .ok_or_else(|| remote("getblock", "Block not found"))
    }

    async fn get_raw_transaction(&self, txid: &str) -> Result<RpcTransaction, PeerError> {
        self.txs
            .get(txid)
            .cloned()
            .ok_or_else(|| remote("getrawtransaction", "No information available about transaction"))
    }

    async fn get_info(&self) -> Result<RpcInfo, PeerError> {
        Ok(RpcInfo { blocks: self.tip() })
    }
}

// --- Generated chains ---

/// One transfer in a generated block: spend the unspent output at
/// `spend % len`, send `percent` of it to `ADDRESSES[to % len]` and the
/// rest back to the owner.
#[derive(Clone, Debug)]
pub struct TxPlan {
    pub spend: usize,
    pub to: usize,
    pub percent: u8,
}

/// One generated block: a coinbase of `reward` coins to `ADDRESSES[miner]`
/// followed by `transfers`.
#[derive(Clone, Debug)]
pub struct BlockPlan {
    pub miner: usize,
    pub reward: u32,
    pub transfers: Vec<TxPlan>,
}

#[derive(Clone, Debug)]
struct Unspent {
    txid: String,
    n: u32,
    address: String,
    units: i64,
}

/// Builds a [`ScriptedChain`] from plans, tracking unspent outputs so
/// every transfer spends something that exists on the current branch.
#[derive(Clone, Debug, Default)]
pub struct ChainBuilder {
    chain: ScriptedChain,
    unspent: Vec<Unspent>,
    /// Unspent set before each block, for forks.
    history: Vec<Vec<Unspent>>,
}

fn coins(units: i64) -> f64 {
    units as f64 / COIN as f64
}

impl ChainBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn chain(&self) -> &ScriptedChain {
        &self.chain
    }

    pub fn into_chain(self) -> ScriptedChain {
        self.chain
    }

    pub fn block(&mut self, plan: &BlockPlan) -> u64 {
        self.history.push(self.unspent.clone());
        let height = self.chain.tip() + 1;
        let branch = self.chain.branch.clone();

        let miner = ADDRESSES[plan.miner % ADDRESSES.len()];
        let reward = i64::from(plan.reward.max(1)) * COIN;
        let cb_txid = format!("cb-{branch}-{height}");
        let mut txs = vec![coinbase(&cb_txid, &[(miner, coins(reward))])];
        let mut created = vec![Unspent {
            txid: cb_txid,
            n: 0,
            address: miner.into(),
            units: reward,
        }];

        for (i, tx) in plan.transfers.iter().enumerate() {
            if self.unspent.is_empty() {
                break;
            }
            let input = self.unspent.remove(tx.spend % self.unspent.len());
            let to = ADDRESSES[tx.to % ADDRESSES.len()];
            let sent = input.units * i64::from(tx.percent.min(100)) / 100;
            let change = input.units - sent;

            let txid = format!("tx-{branch}-{height}-{i}");
            let mut payouts = Vec::new();
            if sent > 0 {
                payouts.push((to, coins(sent)));
            }
            if change > 0 {
                payouts.push((input.address.as_str(), coins(change)));
            }
            for (n, (address, value)) in payouts.iter().enumerate() {
                created.push(Unspent {
                    txid: txid.clone(),
                    n: n as u32,
                    address: address.to_string(),
                    units: (value * COIN as f64).round() as i64,
                });
            }
            txs.push(transfer(&txid, &[(input.txid.as_str(), input.n)], &payouts));
        }

        self.unspent.extend(created);
        self.chain.push_block(txs)
    }

    pub fn blocks(&mut self, plans: &[BlockPlan]) {
        for plan in plans {
            self.block(plan);
        }
    }

    /// Abandon blocks at or above `height` and continue on `branch`.
    pub fn fork_at(&mut self, height: u64, branch: &str) {
        let keep = height.saturating_sub(1) as usize;
        if let Some(unspent) = self.history.get(keep) {
            self.unspent = unspent.clone();
        }
        self.history.truncate(keep);
        self.chain.fork_at(height, branch);
    }
}

// --- Fault injection ---

/// Where [`FaultyStore`] fails, once.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Fault {
    /// Writing the block record at this height.
    PutBlock(u64),
    /// The first address aggregate write after movements at this height
    /// were stored.
    AddressesAfterMovementsAt(u64),
    /// Deleting the addresses created at or above this height, the last
    /// step of a rollback.
    DeleteAddressesFrom(u64),
}

/// Memory store that simulates a crash at one write.
#[derive(Clone, Debug, Default)]
pub struct FaultyStore {
    inner: MemoryLedgerStore,
    fault: Option<Fault>,
    armed: bool,
}

impl FaultyStore {
    pub fn new(inner: MemoryLedgerStore, fault: Fault) -> Self {
        Self {
            inner,
            fault: Some(fault),
            armed: false,
        }
    }

    pub fn inner(&self) -> &MemoryLedgerStore {
        &self.inner
    }

    pub fn into_inner(self) -> MemoryLedgerStore {
        self.inner
    }

    fn crash(&mut self) -> CarverError {
        self.fault = None;
        self.armed = false;
        CarverError::Storage("injected crash".into())
    }
}

impl LedgerStore for FaultyStore {
    fn get_block(&self, height: u64) -> Result<Option<BlockRecord>, CarverError> {
        self.inner.get_block(height)
    }

    fn put_block(&mut self, block: &BlockRecord) -> Result<(), CarverError> {
        if self.fault == Some(Fault::PutBlock(block.height)) {
            return Err(self.crash());
        }
        self.inner.put_block(block)
    }

    fn highest_block(&self) -> Result<Option<BlockRecord>, CarverError> {
        self.inner.highest_block()
    }

    fn last_confirmed_block(&self) -> Result<Option<BlockRecord>, CarverError> {
        self.inner.last_confirmed_block()
    }

    fn delete_blocks_from(&mut self, height: u64) -> Result<u64, CarverError> {
        self.inner.delete_blocks_from(height)
    }

    fn get_address(&self, label: &str) -> Result<Option<CarverAddress>, CarverError> {
        self.inner.get_address(label)
    }

    fn put_addresses(&mut self, addresses: &[CarverAddress]) -> Result<(), CarverError> {
        if self.armed {
            return Err(self.crash());
        }
        self.inner.put_addresses(addresses)
    }

    fn last_address_height(&self) -> Result<Option<u64>, CarverError> {
        self.inner.last_address_height()
    }

    fn delete_addresses_from(&mut self, height: u64) -> Result<u64, CarverError> {
        if self.fault == Some(Fault::DeleteAddressesFrom(height)) {
            return Err(self.crash());
        }
        self.inner.delete_addresses_from(height)
    }

    fn all_addresses(&self) -> Result<Vec<CarverAddress>, CarverError> {
        self.inner.all_addresses()
    }

    fn get_address_movement(
        &self,
        sequence: u64,
    ) -> Result<Option<CarverAddressMovement>, CarverError> {
        self.inner.get_address_movement(sequence)
    }

    fn put_address_movements(
        &mut self,
        movements: &[CarverAddressMovement],
    ) -> Result<(), CarverError> {
        if let Some(Fault::AddressesAfterMovementsAt(height)) = self.fault {
            if movements.iter().any(|m| m.block_height == height) {
                self.armed = true;
            }
        }
        self.inner.put_address_movements(movements)
    }

    fn address_movements_from_height_desc(
        &self,
        height: u64,
        limit: usize,
    ) -> Result<Vec<CarverAddressMovement>, CarverError> {
        self.inner.address_movements_from_height_desc(height, limit)
    }

    fn delete_address_movements_from(&mut self, sequence: u64) -> Result<u64, CarverError> {
        self.inner.delete_address_movements_from(sequence)
    }

    fn last_address_movement(&self) -> Result<Option<CarverAddressMovement>, CarverError> {
        self.inner.last_address_movement()
    }

    fn get_movement(&self, key: &MovementKey) -> Result<Option<CarverMovement>, CarverError> {
        self.inner.get_movement(key)
    }

    fn put_movement(&mut self, movement: &CarverMovement) -> Result<(), CarverError> {
        self.inner.put_movement(movement)
    }

    fn last_movement(&self) -> Result<Option<CarverMovement>, CarverError> {
        self.inner.last_movement()
    }

    fn delete_movements_from(&mut self, height: u64) -> Result<u64, CarverError> {
        self.inner.delete_movements_from(height)
    }

    fn get_utxo(&self, label: &str) -> Result<Option<Utxo>, CarverError> {
        self.inner.get_utxo(label)
    }

    fn put_utxos(&mut self, utxos: &[Utxo]) -> Result<(), CarverError> {
        self.inner.put_utxos(utxos)
    }

    fn last_utxo_height(&self) -> Result<Option<u64>, CarverError> {
        self.inner.last_utxo_height()
    }

    fn delete_utxos_from(&mut self, height: u64) -> Result<u64, CarverError> {
        self.inner.delete_utxos_from(height)
    }

    fn get_reward_details(
        &self,
        key: &MovementKey,
    ) -> Result<Option<BlockRewardDetails>, CarverError> {
        self.inner.get_reward_details(key)
    }

    fn put_reward_details(&mut self, details: &BlockRewardDetails) -> Result<(), CarverError> {
        self.inner.put_reward_details(details)
    }

    fn delete_reward_details_from(&mut self, height: u64) -> Result<u64, CarverError> {
        self.inner.delete_reward_details_from(height)
    }
}

// --- Ledger laws ---

/// Every stored address movement, ascending by sequence.
pub fn address_movements<S: LedgerStore + ?Sized>(store: &S) -> Vec<CarverAddressMovement> {
    let last = store
        .last_address_movement()
        .ok()
        .flatten()
        .map_or(0, |m| m.sequence);
    (1..=last)
        .filter_map(|sequence| store.get_address_movement(sequence).ok().flatten())
        .collect()
}

/// Walk every address's movement list from its head back to the empty
/// link, then replay it oldest first onto a fresh aggregate. The running
/// balance must match each movement, and the replayed balance, counts and
/// values must match the stored aggregate.
pub fn check_replay_law<S: LedgerStore + ?Sized>(store: &S) -> Result<(), String> {
    let all = address_movements(store);
    let addresses = store.all_addresses().map_err(|e| e.to_string())?;

    for address in &addresses {
        let mut cursor = address.last_movement;
        let mut linked = Vec::new();
        let mut next_sequence = u64::MAX;

        while let Some(sequence) = cursor {
            let movement = store
                .get_address_movement(sequence)
                .map_err(|e| e.to_string())?
                .ok_or(format!("{}: dangling link to {sequence}", address.label))?;
            if movement.label != address.label {
                return Err(format!("{}: movement {sequence} belongs to {}", address.label, movement.label));
            }
            if movement.sequence >= next_sequence {
                return Err(format!("{}: list not descending at {sequence}", address.label));
            }
            next_sequence = movement.sequence;
            cursor = movement.previous_address_movement;
            linked.push(movement);
        }

        let mut replayed = CarverAddress::new(address.label.clone(), address.block_height);
        for movement in linked.iter().rev() {
            replayed.credit_debit(movement.amount_in, movement.amount_out, movement.is_reward);
            if movement.balance != replayed.balance {
                return Err(format!(
                    "{}: balance after {} is {} but replay gives {}",
                    address.label, movement.sequence, movement.balance, replayed.balance
                ));
            }
            replayed.link_movement(movement);
        }

        let aggregate = |a: &CarverAddress| (a.balance, a.count_in, a.count_out, a.value_in, a.value_out);
        if aggregate(&replayed) != aggregate(address) {
            return Err(format!(
                "{}: stored (balance, count_in, count_out, value_in, value_out) {:?} but replay gives {:?}",
                address.label,
                aggregate(address),
                aggregate(&replayed)
            ));
        }
        let stored = all.iter().filter(|m| m.label == address.label).count();
        if stored != linked.len() {
            return Err(format!("{}: {stored} movements stored, {} linked", address.label, linked.len()));
        }
        if address.sequence != address.last_movement.unwrap_or(0) {
            return Err(format!("{}: sequence disagrees with last movement", address.label));
        }
    }
    Ok(())
}

/// Block ranges abut, and each block's range holds exactly the movements
/// produced at its height.
pub fn check_sequence_law<S: LedgerStore + ?Sized>(store: &S) -> Result<(), String> {
    let all = address_movements(store);
    let top = store
        .highest_block()
        .map_err(|e| e.to_string())?
        .map_or(0, |b| b.height);

    let mut previous_end = 0;
    for height in 1..=top {
        let block = store
            .get_block(height)
            .map_err(|e| e.to_string())?
            .ok_or(format!("missing block {height}"))?;
        if block.sequence_start != previous_end {
            return Err(format!(
                "block {height} starts at {} after {previous_end}",
                block.sequence_start
            ));
        }
        let range = SequenceRange {
            height,
            start: block.sequence_start,
            end: block.sequence_end,
        };
        let inside: Vec<_> = all.iter().filter(|m| range.contains(m.sequence)).collect();
        if inside.len() as u64 != block.movement_count() {
            return Err(format!("block {height}: range holds {} movements", inside.len()));
        }
        if let Some(stray) = inside.iter().find(|m| m.block_height != height) {
            return Err(format!("block {height}: movement {} is from {}", stray.sequence, stray.block_height));
        }
        previous_end = block.sequence_end;
    }
    Ok(())
}

/// Copy of `store` with per-ingest confirmation state cleared, for
/// comparing ledgers synced against different chain tips.
pub fn normalized(store: &MemoryLedgerStore) -> MemoryLedgerStore {
    let mut copy = store.clone();
    let top = copy.highest_block().ok().flatten().map_or(0, |b| b.height);
    for height in 1..=top {
        if let Ok(Some(mut block)) = copy.get_block(height) {
            block.confirmations = 0;
            block.is_confirmed = false;
            let _ = copy.put_block(&block);
        }
    }
    copy
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn scripted_chain_reports_depth() {
        let mut chain = ScriptedChain::new();
        chain.push_block(vec![coinbase("cb1", &[("A", 50.0)])]);
        chain.push_block(vec![coinbase("cb2", &[("B", 50.0)])]);

        let hash = chain.get_block_hash(1).await.unwrap();
        let block = chain.get_block(&hash).await.unwrap();
        assert_eq!(block.confirmations, 2);
        assert_eq!(block.previousblockhash, None);
        assert_eq!(chain.get_info().await.unwrap().blocks, 2);
        assert!(chain.get_block_hash(3).await.is_err());
    }

    #[test]
    fn fork_replaces_merkle_roots() {
        let mut chain = ScriptedChain::new();
        chain.push_block(vec![]);
        chain.push_block(vec![]);
        let before = chain.merkle_root(2).map(str::to_string);
        chain.fork_at(2, "b");
        chain.push_block(vec![]);
        assert_eq!(chain.tip(), 2);
        assert_ne!(chain.merkle_root(2).map(str::to_string), before);
    }

    /// Ledger holding one address with a receive at height 1 and a spend
    /// at height 2.
    fn two_movement_ledger() -> (MemoryLedgerStore, CarverAddress) {
        let mut store = MemoryLedgerStore::new();
        let mut address = CarverAddress::new("A", 1);
        let mut previous = None;
        for (sequence, amount_in, amount_out) in [(1, 50, 0), (2, 0, 20)] {
            address.credit_debit(amount_in, amount_out, false);
            let movement = CarverAddressMovement {
                sequence,
                label: "A".into(),
                carver_movement: MovementKey { block_height: sequence, txid: format!("t{sequence}") },
                amount_in,
                amount_out,
                balance: address.balance,
                time: 0,
                block_height: sequence,
                is_reward: false,
                previous_address_movement: previous,
            };
            address.link_movement(&movement);
            store.put_address_movements(&[movement]).unwrap();
            previous = Some(sequence);
        }
        store.put_addresses(&[address.clone()]).unwrap();
        (store, address)
    }

    #[test]
    fn replay_law_accepts_consistent_aggregate() {
        let (store, address) = two_movement_ledger();
        assert_eq!((address.count_in, address.count_out), (1, 1));
        assert_eq!(check_replay_law(&store), Ok(()));
    }

    #[test]
    fn replay_law_checks_counts_and_values() {
        let (mut store, address) = two_movement_ledger();
        store
            .put_addresses(&[CarverAddress { count_in: 2, ..address.clone() }])
            .unwrap();
        assert!(check_replay_law(&store).is_err());

        store
            .put_addresses(&[CarverAddress { value_out: 0, ..address }])
            .unwrap();
        let err = check_replay_law(&store).unwrap_err();
        assert!(err.contains("replay gives"), "{err}");
    }
}
