//! Global movement sequence.
//!
//! Every address movement gets the next value of a single counter that is
//! never reused while the movement exists. A block records the counter's
//! value before (`sequence_start`, exclusive) and after (`sequence_end`,
//! inclusive) its transactions, so the ranges of consecutive blocks abut and
//! never overlap.

use crate::error::ConsistencyError;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Sequencer {
    current: u64,
}

impl Sequencer {
    /// Resume after `last`, the `sequence_end` of the highest stored block
    /// (0 on an empty ledger).
    pub fn resume_from(last: u64) -> Self {
        Self { current: last }
    }

    /// Last sequence handed out.
    pub fn current(&self) -> u64 {
        self.current
    }

    /// Hand out the next sequence.
    pub fn advance(&mut self) -> u64 {
        self.current += 1;
        self.current
    }

    /// Open a block range at the current position.
    pub fn begin_block(&self, height: u64) -> SequenceRange {
        SequenceRange {
            height,
            start: self.current,
            end: self.current,
        }
    }

    /// Close `range` at the current position.
    pub fn end_block(&self, range: SequenceRange) -> Result<SequenceRange, ConsistencyError> {
        if self.current < range.start {
            return Err(ConsistencyError::SequenceRange {
                height: range.height,
                start: range.start,
                end: self.current,
            });
        }
        Ok(SequenceRange {
            end: self.current,
            ..range
        })
    }
}

/// Sequence range of one block: `(start, end]`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SequenceRange {
    pub height: u64,
    pub start: u64,
    pub end: u64,
}

impl SequenceRange {
    /// Movements produced inside the range.
    pub fn count(&self) -> u64 {
        self.end - self.start
    }

    pub fn contains(&self, sequence: u64) -> bool {
        sequence > self.start && sequence <= self.end
    }
}
