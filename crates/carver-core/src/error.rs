//! Error types for the Carver ledger.
use thiserror::Error;

/// Failures talking to the upstream RPC peer. Always fatal to the current run.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PeerError {
    #[error("rpc transport: {0}")] Transport(String),
    #[error("rpc request timed out: {0}")] Timeout(String),
    #[error("malformed rpc response for {method}: {reason}")] Malformed { method: String, reason: String },
    #[error("rpc error from peer for {method}: {message}")] Remote { method: String, message: String },
}

/// Broken ledger invariants. Never repaired silently.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConsistencyError {
    #[error("out-of-sequence address movement for {label}: address at {address_sequence} > movement {movement_sequence}")]
    OutOfSequence { label: String, address_sequence: u64, movement_sequence: u64 },
    #[error("address not found: {0}")] MissingAddress(String),
    #[error("utxo not found for input {0}")] MissingUtxo(String),
    #[error("previous movement {previous} of movement {sequence} not found")]
    MissingPreviousMovement { sequence: u64, previous: u64 },
    #[error("block sequence range mismatch at height {height}: end {end} < start {start}")]
    SequenceRange { height: u64, start: u64, end: u64 },
}

/// Run-lock failures.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum LockError {
    #[error("job '{0}' is already running")] AlreadyHeld(String),
    #[error("lock file for job '{job}': {reason}")] Io { job: String, reason: String },
}

#[derive(Error, Debug)]
pub enum CarverError {
    #[error(transparent)] Peer(#[from] PeerError),
    #[error(transparent)] Consistency(#[from] ConsistencyError),
    #[error(transparent)] Lock(#[from] LockError),
    #[error("storage: {0}")] Storage(String),
    #[error("encoding: {0}")] Encoding(String),
    #[error("config: {0}")] Config(String),
}

impl CarverError {
    /// Process exit code for this failure. Lock contention gets its own code so
    /// a scheduler can tell "try again later" apart from a real failure.
    pub fn exit_code(&self) -> i32 {
        match self {
            CarverError::Lock(LockError::AlreadyHeld(_)) => 2,
            _ => 1,
        }
    }
}
