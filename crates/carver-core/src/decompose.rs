//! Transaction decomposition.
//!
//! Turns one raw transaction, plus the outputs its inputs spend, into a
//! classification and a consolidated per-label list of credits and debits.
//! Every decomposed transaction balances: the sum of all `amount_out` equals
//! the sum of all `amount_in`. Value with no explicit source or sink is booked
//! against the reserved roles:
//!
//! - minted proof-of-work coins are paid out of `COINBASE`;
//! - stake gains are paid out of `POS`, masternode payouts out of `MN`;
//! - unclaimed input value (fees and burned outputs) goes to `FEE`;
//! - output value not covered by any input is drawn from `ZEROCOIN`.

use std::collections::HashMap;

use crate::constants::{
    LABEL_COINBASE, LABEL_FEE, LABEL_MASTERNODE, LABEL_POS, LABEL_ZEROCOIN,
    REWARD_OUTPUT_COUNT, SCRIPT_NONSTANDARD, SCRIPT_ZEROCOIN_MINT, to_units,
};
use crate::error::{CarverError, ConsistencyError};
use crate::ledger::LedgerStore;
use crate::types::{RewardSplit, RpcBlock, RpcTransaction, TxType, Utxo};

/// Outputs spent by a transaction, keyed by `txid:n`.
pub type VinUtxos = HashMap<String, Utxo>;

/// Net amounts of one label within one transaction.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ConsolidatedEntry {
    pub label: String,
    pub amount_in: i64,
    pub amount_out: i64,
}

/// Per-label amounts in order of first appearance.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ConsolidatedMovements {
    entries: Vec<ConsolidatedEntry>,
    index: HashMap<String, usize>,
}

impl ConsolidatedMovements {
    fn entry(&mut self, label: &str) -> &mut ConsolidatedEntry {
        let idx = match self.index.get(label).copied() {
            Some(idx) => idx,
            None => {
                self.entries.push(ConsolidatedEntry {
                    label: label.to_string(),
                    amount_in: 0,
                    amount_out: 0,
                });
                self.index.insert(label.to_string(), self.entries.len() - 1);
                self.entries.len() - 1
            }
        };
        &mut self.entries[idx]
    }

    /// Add `amount` received by `label`. Zero amounts are ignored.
    pub fn credit(&mut self, label: &str, amount: i64) {
        if amount != 0 {
            self.entry(label).amount_in += amount;
        }
    }

    /// Add `amount` paid by `label`. Zero amounts are ignored.
    pub fn debit(&mut self, label: &str, amount: i64) {
        if amount != 0 {
            self.entry(label).amount_out += amount;
        }
    }

    pub fn get(&self, label: &str) -> Option<&ConsolidatedEntry> {
        self.index.get(label).map(|idx| &self.entries[*idx])
    }

    pub fn iter(&self) -> impl Iterator<Item = &ConsolidatedEntry> {
        self.entries.iter()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn total_in(&self) -> i64 {
        self.entries.iter().map(|e| e.amount_in).sum()
    }

    pub fn total_out(&self) -> i64 {
        self.entries.iter().map(|e| e.amount_out).sum()
    }
}

/// A decomposed transaction, ready for the applier.
#[derive(Clone, Debug, PartialEq)]
pub struct ParsedMovement {
    pub txid: String,
    pub tx_type: TxType,
    pub block_height: u64,
    pub time: i64,
    /// Sum of all credits.
    pub amount_in: i64,
    /// Sum of all debits.
    pub amount_out: i64,
    pub consolidated: ConsolidatedMovements,
    /// Outputs created by the transaction.
    pub new_utxos: Vec<Utxo>,
    /// Present for reward transactions only.
    pub reward_split: Option<RewardSplit>,
}

impl ParsedMovement {
    pub fn is_reward(&self) -> bool {
        self.tx_type.is_reward()
    }
}

/// Stake reward pattern: one input, three outputs, the first a zero-value
/// `nonstandard` marker at index 0.
///
/// Rewards with more outputs exist on related chains and are classified as
/// transfers; the pattern is matched exactly as the peer emits it.
pub fn is_reward_raw_transaction(tx: &RpcTransaction) -> bool {
    tx.vin.len() == 1
        && tx.vout.len() == REWARD_OUTPUT_COUNT
        && tx.vout[0].value == 0.0
        && tx.vout[0].n == 0
        && tx.vout[0].script_pub_key.kind == SCRIPT_NONSTANDARD
}

pub fn classify(tx: &RpcTransaction) -> TxType {
    if tx.vin.first().is_some_and(|vin| vin.coinbase.is_some()) {
        TxType::ProofOfWork
    } else if is_reward_raw_transaction(tx) {
        TxType::ProofOfStake
    } else {
        TxType::Transfer
    }
}

/// No input spends an output and no output carries value, e.g. the empty
/// coinbase of a proof-of-stake block.
pub fn is_economically_empty(tx: &RpcTransaction) -> bool {
    tx.vin.iter().all(|vin| vin.spent_label().is_none())
        && tx.vout.iter().all(|vout| to_units(vout.value) == 0)
}

/// Load the outputs spent by `tx`. An input that references an output the
/// ledger does not know is a consistency violation.
pub fn collect_vin_utxos<S: LedgerStore + ?Sized>(
    tx: &RpcTransaction,
    store: &S,
) -> Result<VinUtxos, CarverError> {
    let mut utxos = VinUtxos::new();
    for label in tx.vin.iter().filter_map(|vin| vin.spent_label()) {
        let utxo = store
            .get_utxo(&label)?
            .ok_or_else(|| ConsistencyError::MissingUtxo(format!("{label} (spent by {})", tx.txid)))?;
        utxos.insert(label, utxo);
    }
    Ok(utxos)
}

/// Decompose `tx`, included in `block`, into consolidated movements.
pub fn decompose(
    block: &RpcBlock,
    tx: &RpcTransaction,
    vin_utxos: &VinUtxos,
) -> Result<ParsedMovement, CarverError> {
    let tx_type = classify(tx);
    let mut consolidated = ConsolidatedMovements::default();
    let mut new_utxos = Vec::new();

    // Owner and value of the first output-backed input (the staker for
    // stake rewards).
    let mut first_input: Option<(String, i64)> = None;
    for vin in &tx.vin {
        if vin.coinbase.is_some() {
            continue;
        }
        // Inputs without an outpoint are privacy-pool spends, balanced below.
        let Some(label) = vin.spent_label() else {
            continue;
        };
        let utxo = vin_utxos
            .get(&label)
            .ok_or_else(|| ConsistencyError::MissingUtxo(format!("{label} (spent by {})", tx.txid)))?;
        consolidated.debit(&utxo.address, utxo.value);
        if first_input.is_none() {
            first_input = Some((utxo.address.clone(), utxo.value));
        }
    }

    let mut paid: Vec<(String, i64)> = Vec::new();
    for vout in &tx.vout {
        let value = to_units(vout.value);
        let script = &vout.script_pub_key;
        if value == 0 && script.kind == SCRIPT_NONSTANDARD {
            continue;
        }
        if script.kind == SCRIPT_ZEROCOIN_MINT {
            consolidated.credit(LABEL_ZEROCOIN, value);
            continue;
        }
        let Some(address) = script.addresses.first() else {
            continue;
        };
        new_utxos.push(Utxo {
            txid: tx.txid.clone(),
            n: vout.n,
            value,
            address: address.clone(),
            block_height: block.height,
        });
        if value > 0 {
            consolidated.credit(address, value);
            paid.push((address.clone(), value));
        }
    }

    let mut reward_split = match tx_type {
        TxType::ProofOfWork => {
            let minted = consolidated.total_in();
            consolidated.debit(LABEL_COINBASE, minted);
            let mut split = RewardSplit::default();
            if let Some((miner, reward)) = paid.first() {
                split.miner = Some(miner.clone());
                split.miner_reward = *reward;
            }
            if let Some((masternode, _)) = paid.get(1) {
                split.masternode = Some(masternode.clone());
                split.masternode_reward = paid[1..].iter().map(|(_, v)| v).sum();
            }
            Some(split)
        }
        TxType::ProofOfStake => {
            let mut split = RewardSplit::default();
            if let Some((staker, stake_input)) = &first_input {
                let stake_output: i64 = paid
                    .iter()
                    .filter(|(label, _)| label == staker)
                    .map(|(_, v)| v)
                    .sum();
                let others: Vec<&(String, i64)> =
                    paid.iter().filter(|(label, _)| label != staker).collect();
                let masternode_reward: i64 = others.iter().map(|(_, v)| v).sum();
                let staker_reward = (stake_output - stake_input).max(0);

                consolidated.debit(LABEL_POS, staker_reward);
                consolidated.debit(LABEL_MASTERNODE, masternode_reward);

                split.staker = Some(staker.clone());
                split.stake_input = *stake_input;
                split.stake_output = stake_output;
                split.staker_reward = staker_reward;
                split.masternode = others.first().map(|(label, _)| label.clone());
                split.masternode_reward = masternode_reward;
            }
            Some(split)
        }
        TxType::Transfer => None,
    };

    let debits = consolidated.total_out();
    let credits = consolidated.total_in();
    if debits > credits {
        consolidated.credit(LABEL_FEE, debits - credits);
        if let Some(split) = reward_split.as_mut() {
            split.fee = debits - credits;
        }
    } else if credits > debits {
        consolidated.debit(LABEL_ZEROCOIN, credits - debits);
    }

    Ok(ParsedMovement {
        txid: tx.txid.clone(),
        tx_type,
        block_height: block.height,
        time: block.time,
        amount_in: consolidated.total_in(),
        amount_out: consolidated.total_out(),
        consolidated,
        new_utxos,
        reward_split,
    })
}
