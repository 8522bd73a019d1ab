//! Ledger records and upstream RPC payloads.
//!
//! Ledger records are what the sync job persists: one [`BlockRecord`] per
//! height, one [`CarverMovement`] per processed transaction, one
//! [`CarverAddressMovement`] per (address, transaction) pair, the running
//! [`CarverAddress`] aggregates, [`Utxo`]s and [`BlockRewardDetails`].
//!
//! All amounts are signed base units (see [`crate::constants::COIN`]).
//! Reserved-role addresses such as `COINBASE` legitimately carry negative
//! balances, since minted coins are booked as paid out of them.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::constants::{
    LABEL_COINBASE, LABEL_FEE, LABEL_MASTERNODE, LABEL_POS, LABEL_ZEROCOIN,
};

/// Role of a ledger address.
#[derive(
    Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, Hash, Default,
    bincode::Encode, bincode::Decode,
)]
pub enum AddressType {
    /// An ordinary chain address.
    #[default]
    Address,
    Coinbase,
    Fee,
    Masternode,
    ProofOfStake,
    /// Privacy pool.
    Zerocoin,
}

impl AddressType {
    /// Address type implied by a label. Reserved labels map to their role,
    /// everything else is an ordinary address.
    pub fn for_label(label: &str) -> Self {
        match label {
            LABEL_COINBASE => AddressType::Coinbase,
            LABEL_FEE => AddressType::Fee,
            LABEL_MASTERNODE => AddressType::Masternode,
            LABEL_POS => AddressType::ProofOfStake,
            LABEL_ZEROCOIN => AddressType::Zerocoin,
            _ => AddressType::Address,
        }
    }

    pub fn is_reserved(self) -> bool {
        self != AddressType::Address
    }
}

/// Classification of a processed transaction.
#[derive(
    Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, Hash,
    bincode::Encode, bincode::Decode,
)]
pub enum TxType {
    ProofOfWork,
    ProofOfStake,
    Transfer,
}

impl TxType {
    pub fn is_reward(self) -> bool {
        matches!(self, TxType::ProofOfWork | TxType::ProofOfStake)
    }
}

/// Key of a [`CarverMovement`] and of its [`BlockRewardDetails`].
#[derive(
    Serialize, Deserialize, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord,
    bincode::Encode, bincode::Decode,
)]
pub struct MovementKey {
    pub block_height: u64,
    pub txid: String,
}

impl fmt::Display for MovementKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.block_height, self.txid)
    }
}

/// One synced height. Its presence is the commit marker for everything the
/// walker wrote while processing that height.
#[derive(
    Serialize, Deserialize, Clone, Debug, PartialEq,
    bincode::Encode, bincode::Decode,
)]
pub struct BlockRecord {
    pub height: u64,
    pub hash: String,
    pub bits: String,
    pub difficulty: f64,
    pub merkle_root: String,
    pub nonce: u64,
    pub version: i64,
    pub size: u64,
    /// Previous block hash, or one of the `GENESIS` / `UNKNOWN` sentinels.
    pub prev: String,
    /// Block time, unix seconds.
    pub time: i64,
    /// Confirmations reported by the peer at ingest.
    pub confirmations: i64,
    pub is_confirmed: bool,
    /// Last sequence number before this height (exclusive start).
    pub sequence_start: u64,
    /// Last sequence number produced by this height (inclusive end).
    pub sequence_end: u64,
    pub tx_count: u64,
    pub vins_count: u64,
    pub vouts_count: u64,
}

impl BlockRecord {
    /// Number of address movements produced while processing this height.
    pub fn movement_count(&self) -> u64 {
        self.sequence_end.saturating_sub(self.sequence_start)
    }

    pub fn date(&self) -> Option<DateTime<Utc>> {
        DateTime::from_timestamp(self.time, 0)
    }
}

/// Running aggregate of one ledger address.
#[derive(
    Serialize, Deserialize, Clone, Debug, PartialEq, Eq,
    bincode::Encode, bincode::Decode,
)]
pub struct CarverAddress {
    pub label: String,
    pub address_type: AddressType,
    pub balance: i64,
    pub count_in: u64,
    pub count_out: u64,
    pub value_in: i64,
    pub value_out: i64,
    /// Sequence of the movement referenced by `last_movement`, 0 if none.
    pub sequence: u64,
    /// Sequence key of the most recent [`CarverAddressMovement`].
    pub last_movement: Option<u64>,
    pub last_movement_time: Option<i64>,
    pub last_movement_block_height: Option<u64>,
    /// Height at which the address was first seen.
    pub block_height: u64,
}

impl CarverAddress {
    /// A fresh aggregate with no movements.
    pub fn new(label: impl Into<String>, block_height: u64) -> Self {
        let label = label.into();
        Self {
            address_type: AddressType::for_label(&label),
            label,
            balance: 0,
            count_in: 0,
            count_out: 0,
            value_in: 0,
            value_out: 0,
            sequence: 0,
            last_movement: None,
            last_movement_time: None,
            last_movement_block_height: None,
            block_height,
        }
    }

    /// Whether a movement counts towards the in/out counters.
    ///
    /// Reward payouts to ordinary addresses only move the balance, so the
    /// sent/received figures of an address reflect non-reward activity.
    /// Reserved-role addresses count every movement.
    pub fn counts_movement(&self, is_reward: bool) -> bool {
        !is_reward || self.address_type.is_reserved()
    }

    /// Apply one movement's amounts to the aggregate.
    pub fn credit_debit(&mut self, amount_in: i64, amount_out: i64, is_reward: bool) {
        let counts = self.counts_movement(is_reward);
        if amount_out > 0 {
            if counts {
                self.count_out += 1;
                self.value_out += amount_out;
            }
            self.balance -= amount_out;
        }
        if amount_in > 0 {
            if counts {
                self.count_in += 1;
                self.value_in += amount_in;
            }
            self.balance += amount_in;
        }
    }

    /// Exact inverse of [`credit_debit`](Self::credit_debit).
    pub fn reverse_credit_debit(&mut self, amount_in: i64, amount_out: i64, is_reward: bool) {
        let counts = self.counts_movement(is_reward);
        if amount_in > 0 {
            if counts {
                self.count_in = self.count_in.saturating_sub(1);
                self.value_in -= amount_in;
            }
            self.balance -= amount_in;
        }
        if amount_out > 0 {
            if counts {
                self.count_out = self.count_out.saturating_sub(1);
                self.value_out -= amount_out;
            }
            self.balance += amount_out;
        }
    }

    /// Point the aggregate at `movement` as its most recent one.
    pub fn link_movement(&mut self, movement: &CarverAddressMovement) {
        self.sequence = movement.sequence;
        self.last_movement = Some(movement.sequence);
        self.last_movement_time = Some(movement.time);
        self.last_movement_block_height = Some(movement.block_height);
    }

    /// Reset the movement link to the empty state.
    pub fn unlink_movements(&mut self) {
        self.sequence = 0;
        self.last_movement = None;
        self.last_movement_time = None;
        self.last_movement_block_height = None;
    }
}

/// One processed transaction.
#[derive(
    Serialize, Deserialize, Clone, Debug, PartialEq, Eq,
    bincode::Encode, bincode::Decode,
)]
pub struct CarverMovement {
    pub txid: String,
    pub tx_type: TxType,
    pub amount_in: i64,
    pub amount_out: i64,
    pub block_height: u64,
    pub time: i64,
    /// Last sequence number consumed while processing the transaction.
    pub sequence: u64,
    /// Addresses debited (input side).
    pub addresses_in: u32,
    /// Addresses credited (output side).
    pub addresses_out: u32,
    pub is_reward: bool,
    pub block_reward_details: Option<MovementKey>,
}

impl CarverMovement {
    pub fn key(&self) -> MovementKey {
        MovementKey {
            block_height: self.block_height,
            txid: self.txid.clone(),
        }
    }
}

/// One address's share of one transaction. Keyed by `sequence`.
#[derive(
    Serialize, Deserialize, Clone, Debug, PartialEq, Eq,
    bincode::Encode, bincode::Decode,
)]
pub struct CarverAddressMovement {
    pub sequence: u64,
    pub label: String,
    pub carver_movement: MovementKey,
    pub amount_in: i64,
    pub amount_out: i64,
    /// Address balance after this movement.
    pub balance: i64,
    pub time: i64,
    pub block_height: u64,
    pub is_reward: bool,
    /// Sequence of the same address's previous movement.
    pub previous_address_movement: Option<u64>,
}

/// A spendable output.
#[derive(
    Serialize, Deserialize, Clone, Debug, PartialEq, Eq,
    bincode::Encode, bincode::Decode,
)]
pub struct Utxo {
    pub txid: String,
    pub n: u32,
    pub value: i64,
    /// Owning address label.
    pub address: String,
    pub block_height: u64,
}

impl Utxo {
    /// Storage key of the output `n` of `txid`.
    pub fn label_for(txid: &str, n: u32) -> String {
        format!("{txid}:{n}")
    }

    pub fn label(&self) -> String {
        Self::label_for(&self.txid, self.n)
    }
}

/// Split of a reward transaction between its recipients.
#[derive(
    Serialize, Deserialize, Clone, Debug, PartialEq, Eq, Default,
    bincode::Encode, bincode::Decode,
)]
pub struct RewardSplit {
    pub miner: Option<String>,
    pub miner_reward: i64,
    pub staker: Option<String>,
    pub stake_input: i64,
    pub stake_output: i64,
    pub staker_reward: i64,
    pub masternode: Option<String>,
    pub masternode_reward: i64,
    pub fee: i64,
}

/// Reward breakdown linked from a reward [`CarverMovement`].
#[derive(
    Serialize, Deserialize, Clone, Debug, PartialEq, Eq,
    bincode::Encode, bincode::Decode,
)]
pub struct BlockRewardDetails {
    pub block_height: u64,
    pub txid: String,
    pub tx_type: TxType,
    pub carver_movement: MovementKey,
    pub time: i64,
    pub split: RewardSplit,
}

// --- RPC payloads ---

/// `getblock` result.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct RpcBlock {
    pub hash: String,
    pub height: u64,
    pub time: i64,
    pub bits: String,
    pub confirmations: i64,
    pub difficulty: f64,
    pub merkleroot: String,
    pub nonce: u64,
    #[serde(default)]
    pub previousblockhash: Option<String>,
    pub size: u64,
    pub tx: Vec<String>,
    pub version: i64,
}

/// Verbose `getrawtransaction` result.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct RpcTransaction {
    pub txid: String,
    #[serde(default)]
    pub vin: Vec<RpcVin>,
    #[serde(default)]
    pub vout: Vec<RpcVout>,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Default)]
pub struct RpcVin {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub coinbase: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub txid: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub vout: Option<u32>,
}

impl RpcVin {
    /// The UTXO key this input spends, if it spends one.
    pub fn spent_label(&self) -> Option<String> {
        match (&self.txid, self.vout) {
            (Some(txid), Some(n)) => Some(Utxo::label_for(txid, n)),
            _ => None,
        }
    }
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct RpcVout {
    pub value: f64,
    pub n: u32,
    #[serde(rename = "scriptPubKey")]
    pub script_pub_key: RpcScriptPubKey,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Default)]
pub struct RpcScriptPubKey {
    #[serde(rename = "type", default)]
    pub kind: String,
    #[serde(default)]
    pub addresses: Vec<String>,
}

/// `getinfo` result (only the fields the sync job reads).
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct RpcInfo {
    pub blocks: u64,
}
