//! Delegation of pre-cutoff history to a parent ledger.

use crate::errors::LedgerError;
use crate::ledger::Ledger;
use std::sync::Arc;
use tally_types::{Address, Amount, Version};

/// Immutable link from a derived ledger to its parent.
///
/// Queries forwarded through the link are clipped to the cutoff, so a
/// derived ledger never observes its ancestor's activity after the point it
/// split off. Delegation recurses through the parent's own `balance_at`
/// contract and bottoms out at a ledger with no link.
pub struct Ancestry {
    parent: Arc<Ledger>,
    cutoff: Version,
}

impl Ancestry {
    /// Build a link, validating that `cutoff` is a declared snapshot
    /// version of the parent.
    pub fn link(parent: Arc<Ledger>, cutoff: Version) -> Result<Self, LedgerError> {
        if !parent.is_snapshot_version(cutoff) {
            return Err(LedgerError::CutoffNotSnapshot(cutoff));
        }
        Ok(Self { parent, cutoff })
    }

    pub fn parent(&self) -> &Arc<Ledger> {
        &self.parent
    }

    pub fn cutoff(&self) -> Version {
        self.cutoff
    }

    /// Parent's balance for `key`, clipped to the cutoff.
    pub fn balance_at(&self, key: &Address, requested: Version) -> Amount {
        self.parent.balance_at(key, requested.min(self.cutoff))
    }
}
