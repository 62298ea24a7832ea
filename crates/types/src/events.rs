use crate::address::Address;
use crate::scalars::{Amount, Version};
use serde::{Deserialize, Serialize};

/// Records emitted by ledger operations for external observers.
///
/// The ledger never consumes its own events; they exist so an embedding
/// process (indexer, explorer, audit trail) can follow value movement.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum LedgerEvent {
    /// Value moved from `from` to `to`. Mint and burn are reported with the
    /// null address on the created/destroyed side.
    Transfer {
        from: Address,
        to: Address,
        amount: Amount,
        memo: Vec<u8>,
    },
    /// `owner` granted `spender` an allowance of `amount`.
    Approval {
        owner: Address,
        spender: Address,
        amount: Amount,
    },
    /// A snapshot was declared at `version`.
    SnapshotDeclared { version: Version },
    /// A derived ledger was created from `parent` with history frozen at
    /// `cutoff`.
    DerivedCreated {
        ledger: String,
        parent: String,
        cutoff: Version,
    },
    /// The controlling authority changed hands.
    ControllerChanged {
        previous: Address,
        current: Address,
    },
    /// The controller reclaimed value stranded on the ledger's own address.
    TokensReclaimed {
        ledger: String,
        controller: Address,
        amount: Amount,
    },
}
