//! Scenario and property test suite for the Carver ledger.
//!
//! Drives the sync engine against a scripted in-memory chain and checks the
//! ledger laws end to end: linked-list replay, sequence ranges, rollback,
//! reorg reconciliation and crash recovery.

pub mod helpers;
