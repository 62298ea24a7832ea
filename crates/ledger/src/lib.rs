//! Tally checkpoint ledger
//!
//! A fungible-value ledger that answers point-in-time historical balance
//! queries without storing a balance entry per transfer:
//! - per-key checkpoint sequences with O(1) amortized writes and O(log n)
//!   lookups
//! - explicitly declared snapshot versions that bound storage growth to
//!   one checkpoint per key per snapshot it was touched in
//! - derived ledgers that inherit a parent's history up to a fixed cutoff

pub mod allowances;
pub mod ancestry;
pub mod checkpoint;
pub mod errors;
pub mod hooks;
pub mod ledger;
pub mod registry;
pub mod snapshots;
pub mod version;

pub use allowances::AllowanceTable;
pub use ancestry::Ancestry;
pub use checkpoint::{CheckpointSeq, WriteOutcome};
pub use errors::LedgerError;
pub use hooks::{AllowAll, HookError, HookRegistry, RecipientHook, TransferAuthorizer};
pub use ledger::{ledger_address, Ledger};
pub use registry::LedgerRegistry;
pub use snapshots::SnapshotRegister;
pub use version::VersionWatermark;

/// Module version for API introspection
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
