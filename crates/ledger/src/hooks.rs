//! External collaborator hooks consulted by ledger operations.
//!
//! Hooks run while the calling ledger's state lock is held; a hook
//! implementation must not call back into the same ledger.

use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;
use tally_types::{Address, Amount};

/// Failure reported by a recipient notification hook.
#[derive(Debug, thiserror::Error)]
#[error("{0}")]
pub struct HookError(pub String);

impl HookError {
    pub fn new(message: impl Into<String>) -> Self {
        Self(message.into())
    }
}

/// Authorization collaborator consulted before transfers and approvals.
///
/// A `false` answer converts the whole operation into a hard failure.
pub trait TransferAuthorizer: Send + Sync {
    fn authorize_transfer(&self, from: &Address, to: &Address, amount: Amount) -> bool;
    fn authorize_approval(&self, owner: &Address, spender: &Address, amount: Amount) -> bool;
}

/// Default authorizer: every transfer and approval is accepted.
pub struct AllowAll;

impl TransferAuthorizer for AllowAll {
    fn authorize_transfer(&self, _from: &Address, _to: &Address, _amount: Amount) -> bool {
        true
    }

    fn authorize_approval(&self, _owner: &Address, _spender: &Address, _amount: Amount) -> bool {
        true
    }
}

/// Notification collaborator for programmable recipients, invoked after the
/// balance movement is computed but before it commits. An error voids the
/// whole transfer.
pub trait RecipientHook: Send + Sync {
    fn on_tokens_received(
        &self,
        from: &Address,
        amount: Amount,
        memo: &[u8],
    ) -> Result<(), HookError>;
}

/// Registry of programmable recipients.
///
/// In the source domain a recipient is probed for code at runtime; in a
/// Rust process a programmable account is simply one that registered a
/// [`RecipientHook`]. Unregistered addresses are plain accounts and receive
/// no notification.
#[derive(Default)]
pub struct HookRegistry {
    hooks: RwLock<HashMap<Address, Arc<dyn RecipientHook>>>,
}

impl HookRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, address: Address, hook: Arc<dyn RecipientHook>) {
        self.hooks.write().insert(address, hook);
    }

    pub fn unregister(&self, address: &Address) {
        self.hooks.write().remove(address);
    }

    pub fn get(&self, address: &Address) -> Option<Arc<dyn RecipientHook>> {
        self.hooks.read().get(address).cloned()
    }

    pub fn is_programmable(&self, address: &Address) -> bool {
        self.hooks.read().contains_key(address)
    }
}
