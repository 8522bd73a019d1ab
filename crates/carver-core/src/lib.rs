//! # carver-core
//! Ledger types, storage contract and the pure parts of block sync:
//! transaction decomposition, the address cache and the movement sequence.

pub mod anomaly;
pub mod cache;
pub mod constants;
pub mod decompose;
pub mod error;
pub mod ledger;
pub mod sequencer;
pub mod traits;
pub mod types;
