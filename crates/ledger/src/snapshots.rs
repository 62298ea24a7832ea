//! Declared snapshot versions and the overwrite-vs-append decision.
//!
//! The register is what bounds checkpoint storage: between two snapshot
//! declarations every balance update for a key collapses into a single
//! checkpoint entry, so a key accrues at most one entry per snapshot it was
//! touched in.

use crate::errors::LedgerError;
use std::collections::HashMap;
use tally_types::{Address, Version};

/// Ordered, strictly increasing sequence of declared snapshot versions,
/// plus per-key bookkeeping of the snapshot in effect when the key's
/// checkpoint tail was last written.
#[derive(Debug, Clone, Default)]
pub struct SnapshotRegister {
    declared: Vec<Version>,
    /// Cached tail of `declared`; zero when nothing was declared yet.
    last: Version,
    markers: HashMap<Address, Version>,
}

impl SnapshotRegister {
    pub fn new() -> Self {
        Self::default()
    }

    /// Rebuild from persisted state. The declared sequence was written in
    /// order; the cache is re-derived from its tail.
    pub fn from_parts(declared: Vec<Version>, markers: HashMap<Address, Version>) -> Self {
        let last = declared.last().copied().unwrap_or(0);
        Self {
            declared,
            last,
            markers,
        }
    }

    pub fn declared(&self) -> &[Version] {
        &self.declared
    }

    pub fn last_version(&self) -> Version {
        self.last
    }

    /// Declare a snapshot at `current_version`. Snapshots must strictly
    /// increase; at most one may be declared per version-unit.
    pub fn declare(&mut self, current_version: Version) -> Result<Version, LedgerError> {
        if current_version <= self.last {
            return Err(LedgerError::NonMonotonicSnapshot {
                declared: current_version,
                last: self.last,
            });
        }
        self.declared.push(current_version);
        self.last = current_version;
        Ok(current_version)
    }

    /// Exact membership in the declared sequence.
    pub fn is_snapshot_version(&self, version: Version) -> bool {
        if self.declared.is_empty() {
            return false;
        }
        if version == self.last {
            return true;
        }
        if version > self.last || version < self.declared[0] {
            return false;
        }
        // Rightmost declared version <= `version`, then exact compare.
        let mut lo = 0usize;
        let mut hi = self.declared.len() - 1;
        while lo < hi {
            let mid = (lo + hi + 1) / 2;
            if self.declared[mid] <= version {
                lo = mid;
            } else {
                hi = mid - 1;
            }
        }
        self.declared[lo] == version
    }

    /// Decide whether the upcoming write for `key` may overwrite the tail
    /// checkpoint: true iff the key has checkpoints and no snapshot was
    /// declared since the key was last written.
    pub fn may_overwrite_tail(&self, key: &Address, seq_non_empty: bool) -> bool {
        seq_non_empty && self.marker(key) >= self.last
    }

    /// Snapshot version in effect the last time `key` was written.
    pub fn marker(&self, key: &Address) -> Version {
        self.markers.get(key).copied().unwrap_or(0)
    }

    /// Record that `key` was appended to under the current snapshot. The
    /// overwrite path leaves the marker untouched.
    pub fn mark_written(&mut self, key: Address) -> Version {
        self.markers.insert(key, self.last);
        self.last
    }

    /// Install a marker value, used when committing a staged write.
    pub fn set_marker(&mut self, key: Address, snapshot: Version) {
        self.markers.insert(key, snapshot);
    }
}
