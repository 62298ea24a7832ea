//! Tally core types
//!
//! Shared value types for the snapshot ledger:
//! - versioned amounts and account addresses
//! - checkpoint records
//! - token configuration
//! - events emitted for external observers

pub mod address;
pub mod checkpoint;
pub mod config;
pub mod events;
pub mod scalars;

pub use address::*;
pub use checkpoint::*;
pub use config::*;
pub use events::*;
pub use scalars::*;

/// Module version for API introspection
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
