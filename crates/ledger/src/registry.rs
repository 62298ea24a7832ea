//! Factory and handle registry for ledgers.
//!
//! The registry owns the storage backend and the shared collaborators, and
//! is the only place derived ledgers are created: it resolves the parent
//! handle, validates the cutoff snapshot, and assigns control of the new
//! ledger to the caller.

use crate::ancestry::Ancestry;
use crate::errors::LedgerError;
use crate::hooks::{AllowAll, HookRegistry, TransferAuthorizer};
use crate::ledger::Ledger;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;
use tally_storage::LedgerStore;
use tally_types::{Address, LedgerEvent, TokenConfig, Version};

pub struct LedgerRegistry {
    store: Arc<dyn LedgerStore>,
    authorizer: Arc<dyn TransferAuthorizer>,
    hooks: Arc<HookRegistry>,
    ledgers: RwLock<HashMap<String, Arc<Ledger>>>,
}

impl LedgerRegistry {
    pub fn new(store: Arc<dyn LedgerStore>) -> Self {
        Self::with_authorizer(store, Arc::new(AllowAll))
    }

    pub fn with_authorizer(
        store: Arc<dyn LedgerStore>,
        authorizer: Arc<dyn TransferAuthorizer>,
    ) -> Self {
        Self {
            store,
            authorizer,
            hooks: Arc::new(HookRegistry::new()),
            ledgers: RwLock::new(HashMap::new()),
        }
    }

    /// Shared registry of programmable recipients, consulted by every
    /// ledger created through this registry.
    pub fn hooks(&self) -> Arc<HookRegistry> {
        self.hooks.clone()
    }

    /// Create a fresh root ledger.
    pub fn create(
        &self,
        id: &str,
        config: TokenConfig,
        controller: Address,
        current_version: Version,
    ) -> Result<Arc<Ledger>, LedgerError> {
        let mut ledgers = self.ledgers.write();
        if ledgers.contains_key(id) {
            return Err(LedgerError::DuplicateLedger(id.to_string()));
        }
        let ledger = Ledger::create_with(
            self.store.clone(),
            id,
            config,
            controller,
            self.authorizer.clone(),
            self.hooks.clone(),
            None,
            current_version,
        )?;
        ledgers.insert(id.to_string(), ledger.clone());
        Ok(ledger)
    }

    /// Create a ledger derived from `parent_id`, with history up to
    /// `cutoff` answered by the parent. `cutoff` must be a declared
    /// snapshot of the parent; the caller becomes the new ledger's
    /// controlling authority.
    pub fn create_derived(
        &self,
        parent_id: &str,
        id: &str,
        config: TokenConfig,
        cutoff: Version,
        caller: Address,
        current_version: Version,
    ) -> Result<Arc<Ledger>, LedgerError> {
        let parent = self
            .get(parent_id)
            .ok_or_else(|| LedgerError::UnknownLedger(parent_id.to_string()))?;
        let link = Ancestry::link(parent.clone(), cutoff)?;

        let mut ledgers = self.ledgers.write();
        if ledgers.contains_key(id) {
            return Err(LedgerError::DuplicateLedger(id.to_string()));
        }
        let ledger = Ledger::create_with(
            self.store.clone(),
            id,
            config,
            caller,
            self.authorizer.clone(),
            self.hooks.clone(),
            Some(link),
            current_version,
        )?;
        ledgers.insert(id.to_string(), ledger.clone());
        drop(ledgers);

        parent.push_event(LedgerEvent::DerivedCreated {
            ledger: id.to_string(),
            parent: parent_id.to_string(),
            cutoff,
        });
        tracing::info!(ledger = id, parent = parent_id, cutoff = %cutoff, "derived ledger created");
        Ok(ledger)
    }

    pub fn get(&self, id: &str) -> Option<Arc<Ledger>> {
        self.ledgers.read().get(id).cloned()
    }

    /// Reload a persisted ledger (and, recursively, its ancestors) from
    /// the storage backend.
    pub fn open(&self, id: &str) -> Result<Arc<Ledger>, LedgerError> {
        if let Some(ledger) = self.get(id) {
            return Ok(ledger);
        }
        let parent = match self.store.get_ancestry(id)? {
            Some(record) => Some(self.open(&record.parent_id)?),
            None => None,
        };
        let ledger = Ledger::open_with(
            self.store.clone(),
            id,
            parent,
            self.authorizer.clone(),
            self.hooks.clone(),
        )?;
        self.ledgers.write().insert(id.to_string(), ledger.clone());
        Ok(ledger)
    }

    /// Reload every persisted ledger.
    pub fn open_all(&self) -> Result<Vec<Arc<Ledger>>, LedgerError> {
        let mut opened = Vec::new();
        for id in self.store.ledger_ids()? {
            opened.push(self.open(&id)?);
        }
        Ok(opened)
    }
}
