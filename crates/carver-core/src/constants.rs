//! Ledger constants. All stored amounts are in base units (1 coin = 10^8 units).

pub const COIN: i64 = 100_000_000;

/// Reserved label for newly minted proof-of-work coins.
pub const LABEL_COINBASE: &str = "COINBASE";
/// Reserved label credited with transaction fees.
pub const LABEL_FEE: &str = "FEE";
/// Reserved label paying masternode rewards.
pub const LABEL_MASTERNODE: &str = "MN";
/// Reserved label paying proof-of-stake rewards.
pub const LABEL_POS: &str = "POS";
/// Reserved label for the privacy pool (zerocoin mints and spends).
pub const LABEL_ZEROCOIN: &str = "ZEROCOIN";

/// `prev` value stored for the block at height 1.
pub const PREV_GENESIS: &str = "GENESIS";
/// `prev` value stored when the peer omits `previousblockhash`.
pub const PREV_UNKNOWN: &str = "UNKNOWN";

/// Script type of the zero-value marker output in stake rewards.
pub const SCRIPT_NONSTANDARD: &str = "nonstandard";
/// Script type of privacy-pool mint outputs.
pub const SCRIPT_ZEROCOIN_MINT: &str = "zerocoinmint";

/// Output count of the stake reward pattern (marker, stake, masternode).
pub const REWARD_OUTPUT_COUNT: usize = 3;

/// Confirmations required before a block is checked against the peer.
pub const DEFAULT_BLOCK_CONFIRMATIONS: u64 = 10;
/// Ordinary addresses kept in memory before the normal tier is flushed.
pub const DEFAULT_ADDRESS_CACHE_LIMIT: usize = 50_000;
/// Address movements reversed per rollback iteration.
pub const DEFAULT_UNDO_BATCH_SIZE: usize = 1000;
/// Upper bound on a single RPC call.
pub const DEFAULT_RPC_TIMEOUT_SECS: u64 = 30;

/// Run-lock job type of the block sync job.
pub const JOB_BLOCK: &str = "block";
/// Run-lock job type of the masternode snapshot job.
pub const JOB_MASTERNODE: &str = "masternode";

/// Convert a peer-reported coin amount into base units.
pub fn to_units(value: f64) -> i64 {
    (value * COIN as f64).round() as i64
}
