//! Per-key checkpoint sequences.
//!
//! A sequence is strictly increasing in version; only the tail entry may be
//! overwritten in place. Reads are O(log n) with two short-circuit fast
//! paths, writes are O(1).

use crate::errors::LedgerError;
use tally_types::{Amount, Checkpoint, Version};

/// Whether a write created a new entry or replaced the tail.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteOutcome {
    Appended,
    Overwrote,
}

/// Ordered checkpoint sequence for a single ledger key.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CheckpointSeq {
    entries: Vec<Checkpoint>,
}

impl CheckpointSeq {
    pub fn new() -> Self {
        Self::default()
    }

    /// Rebuild a sequence from persisted entries. The store wrote them in
    /// order, so ordering is trusted here.
    pub fn from_entries(entries: Vec<Checkpoint>) -> Self {
        Self { entries }
    }

    pub fn entries(&self) -> &[Checkpoint] {
        &self.entries
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Value recorded by the tail entry, zero if the sequence is empty.
    pub fn latest(&self) -> Amount {
        self.entries.last().map(|c| c.value).unwrap_or(0)
    }

    /// True when this sequence can answer a query at `version` on its own,
    /// i.e. the earliest local entry does not postdate the version. When
    /// false the caller must consult ancestry (or report zero).
    pub fn covers(&self, version: Version) -> bool {
        match self.entries.first() {
            Some(first) => first.version <= version,
            None => false,
        }
    }

    /// Value as of `version`: the value of the greatest entry whose version
    /// is `<= version`, zero when no such entry exists.
    pub fn value_at(&self, version: Version) -> Amount {
        let Some(tail) = self.entries.last() else {
            return 0;
        };
        // Fast path: "current" queries are the overwhelming majority.
        if version >= tail.version {
            return tail.value;
        }
        let first = self.entries[0];
        if version < first.version {
            return 0;
        }
        // Rightmost entry with entry.version <= version. The guards above
        // pin the answer inside [0, len - 1).
        let mut lo = 0usize;
        let mut hi = self.entries.len() - 1;
        while lo < hi {
            let mid = (lo + hi + 1) / 2;
            if self.entries[mid].version <= version {
                lo = mid;
            } else {
                hi = mid - 1;
            }
        }
        self.entries[lo].value
    }

    /// Record `value` as of `version`.
    ///
    /// Appends a fresh entry when the sequence is empty or the caller may
    /// not overwrite the tail; otherwise replaces the tail in place. A
    /// same-version write always collapses into the tail so no two entries
    /// ever share a version.
    pub fn write(
        &mut self,
        value: Amount,
        version: Version,
        may_overwrite_tail: bool,
    ) -> Result<WriteOutcome, LedgerError> {
        match self.entries.last_mut() {
            None => {
                self.entries.push(Checkpoint::new(version, value));
                Ok(WriteOutcome::Appended)
            }
            Some(tail) => {
                if version < tail.version {
                    return Err(LedgerError::NonMonotonicVersion {
                        version,
                        tail: tail.version,
                    });
                }
                if may_overwrite_tail || version == tail.version {
                    tail.version = version;
                    tail.value = value;
                    Ok(WriteOutcome::Overwrote)
                } else {
                    self.entries.push(Checkpoint::new(version, value));
                    Ok(WriteOutcome::Appended)
                }
            }
        }
    }
}
