//! Chain anomaly deny-list.
//!
//! Some historical transactions on the indexed chain cannot be decomposed
//! (they spend outputs the peer never reports, or double count mints). They
//! are listed by `(height, txid)` in configuration and skipped before any
//! counting or decomposition.

use std::collections::HashSet;

use serde::{Deserialize, Serialize};

/// One deny-listed transaction.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq, Hash)]
pub struct Anomaly {
    pub height: u64,
    pub txid: String,
}

#[derive(Clone, Debug, Default)]
pub struct AnomalyList {
    entries: HashSet<(u64, String)>,
}

impl AnomalyList {
    pub fn new<I: IntoIterator<Item = Anomaly>>(anomalies: I) -> Self {
        Self {
            entries: anomalies.into_iter().map(|a| (a.height, a.txid)).collect(),
        }
    }

    /// Whether `txid` at `height` must be skipped.
    pub fn contains(&self, height: u64, txid: &str) -> bool {
        self.entries.contains(&(height, txid.to_string()))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
