use tally_types::{Amount, Version};
use thiserror::Error;

/// Errors that can occur while operating a ledger.
///
/// Insufficient balance during `transfer` is deliberately *not* here: it is
/// the one expected-at-runtime condition, reported as `Ok(false)` so callers
/// can branch on it in a loop without unwinding.
#[derive(Debug, Error)]
pub enum LedgerError {
    #[error("transfers are disabled on this ledger")]
    TransfersDisabled,

    #[error("the null address cannot take part in this operation")]
    NullAddress,

    #[error("the ledger's own address cannot take part in this operation")]
    OwnAddress,

    #[error("amount must be non-zero")]
    ZeroAmount,

    #[error("caller is not the controlling authority")]
    NotController,

    #[error("snapshot version {declared} must exceed the last declared snapshot {last}")]
    NonMonotonicSnapshot { declared: Version, last: Version },

    #[error("checkpoint version {version} precedes the sequence tail {tail}")]
    NonMonotonicVersion { version: Version, tail: Version },

    #[error("version {0} is not a declared snapshot")]
    NotASnapshot(Version),

    #[error("cutoff version {0} is not a declared snapshot of the parent ledger")]
    CutoffNotSnapshot(Version),

    #[error("ancestry cutoff {cutoff} is not strictly in the past at version {version}")]
    CutoffInFuture { cutoff: Version, version: Version },

    #[error("transfer authorization hook rejected the operation")]
    AuthorizationRejected,

    #[error("approval authorization hook rejected the operation")]
    ApprovalRejected,

    #[error("recipient notification hook rejected the transfer: {0}")]
    RecipientRejected(String),

    #[error("allowance {allowed} is insufficient for requested amount {requested}")]
    AllowanceExceeded { allowed: Amount, requested: Amount },

    #[error("allowance must be reset to zero before granting a new amount")]
    PendingAllowance,

    #[error("balance {balance} is insufficient to remove {requested}")]
    BalanceUnderflow { balance: Amount, requested: Amount },

    #[error("amount exceeds the representable value range")]
    AmountOverflow,

    #[error("unknown ledger: {0}")]
    UnknownLedger(String),

    #[error("ledger already exists: {0}")]
    DuplicateLedger(String),

    #[error("invalid ledger id: {0}")]
    InvalidLedgerId(String),

    #[error(transparent)]
    Storage(#[from] anyhow::Error),
}
