//! Scalar aliases shared across the ledger crates.

/// Monotonically non-decreasing sequence number supplied by the execution
/// environment (block height in a chain deployment).
pub type Version = u128;

/// Fungible value. All arithmetic on amounts is checked; the ledger never
/// wraps silently.
pub type Amount = u128;
