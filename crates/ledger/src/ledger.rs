//! The ledger proper: versioned balances, snapshot-aware writes, and the
//! value-changing operations.
//!
//! One checkpoint sequence is kept per account address; the aggregate total
//! lives in the same map under the reserved null key. All mutating
//! operations serialize on a single state lock and commit either fully or
//! not at all: every precondition and hook runs before the first write,
//! writes are staged on cloned sequences, the whole operation lands in the
//! store as one atomic batch, and only then is the staged state installed
//! in memory. An operation that returns an error changed nothing, in
//! memory or on disk.

use crate::allowances::AllowanceTable;
use crate::ancestry::Ancestry;
use crate::checkpoint::{CheckpointSeq, WriteOutcome};
use crate::errors::LedgerError;
use crate::hooks::{AllowAll, HookRegistry, TransferAuthorizer};
use crate::snapshots::SnapshotRegister;
use crate::version::VersionWatermark;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;
use tally_storage::{AncestryRecord, LedgerMeta, LedgerStore, WriteBatch};
use tally_types::{Address, Amount, LedgerEvent, TokenConfig, Version};

/// Deterministic address a ledger occupies in its own key space. Transfers
/// to or from this address are rejected; value can only strand here through
/// privileged operations and is recoverable via [`Ledger::reclaim`].
pub fn ledger_address(id: &str) -> Address {
    Address(*blake3::hash(id.as_bytes()).as_bytes())
}

fn validate_id(id: &str) -> Result<(), LedgerError> {
    if id.is_empty() || id.contains('/') {
        return Err(LedgerError::InvalidLedgerId(id.to_string()));
    }
    Ok(())
}

struct LedgerState {
    config: TokenConfig,
    controller: Address,
    /// Checkpoint sequences per key; `Address::NULL` holds the aggregate
    /// total.
    balances: HashMap<Address, CheckpointSeq>,
    snapshots: SnapshotRegister,
    allowances: AllowanceTable,
    watermark: VersionWatermark,
    events: Vec<LedgerEvent>,
}

/// A balance write computed against current state but not yet applied.
struct StagedWrite {
    key: Address,
    seq: CheckpointSeq,
    /// Marker to install when the write appended a fresh checkpoint.
    marker: Option<Version>,
}

pub struct Ledger {
    id: String,
    address: Address,
    store: Arc<dyn LedgerStore>,
    authorizer: Arc<dyn TransferAuthorizer>,
    hooks: Arc<HookRegistry>,
    ancestry: Option<Ancestry>,
    state: RwLock<LedgerState>,
}

impl std::fmt::Debug for Ledger {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Ledger")
            .field("id", &self.id)
            .field("address", &self.address)
            .finish_non_exhaustive()
    }
}

impl Ledger {
    /// Create a fresh root ledger with default collaborators.
    pub fn create(
        store: Arc<dyn LedgerStore>,
        id: &str,
        config: TokenConfig,
        controller: Address,
    ) -> Result<Arc<Self>, LedgerError> {
        Self::create_with(
            store,
            id,
            config,
            controller,
            Arc::new(AllowAll),
            Arc::new(HookRegistry::new()),
            None,
            0,
        )
    }

    /// Create a ledger with explicit collaborators and, for derived
    /// ledgers, an ancestry link. `current_version` seeds the version
    /// watermark; for a derived ledger it must not precede the cutoff.
    #[allow(clippy::too_many_arguments)]
    pub fn create_with(
        store: Arc<dyn LedgerStore>,
        id: &str,
        config: TokenConfig,
        controller: Address,
        authorizer: Arc<dyn TransferAuthorizer>,
        hooks: Arc<HookRegistry>,
        ancestry: Option<Ancestry>,
        current_version: Version,
    ) -> Result<Arc<Self>, LedgerError> {
        validate_id(id)?;
        if store.get_meta(id)?.is_some() {
            return Err(LedgerError::DuplicateLedger(id.to_string()));
        }
        let mut batch = WriteBatch::default();
        if let Some(link) = &ancestry {
            if current_version < link.cutoff() {
                return Err(LedgerError::CutoffInFuture {
                    cutoff: link.cutoff(),
                    version: current_version,
                });
            }
            batch.ancestry = Some(AncestryRecord {
                parent_id: link.parent().id().to_string(),
                cutoff: link.cutoff(),
            });
        }
        batch.meta = Some(LedgerMeta {
            config: config.clone(),
            controller,
            last_version: current_version,
        });
        store.apply(id, &batch)?;
        tracing::info!(ledger = id, controller = %controller, "created ledger");

        Ok(Arc::new(Self {
            id: id.to_string(),
            address: ledger_address(id),
            store,
            authorizer,
            hooks,
            ancestry,
            state: RwLock::new(LedgerState {
                config,
                controller,
                balances: HashMap::new(),
                snapshots: SnapshotRegister::new(),
                allowances: AllowanceTable::default(),
                watermark: VersionWatermark::starting_at(current_version),
                events: Vec::new(),
            }),
        }))
    }

    /// Reload a persisted ledger. A derived ledger needs its (already
    /// reloaded) parent handle.
    pub fn open(
        store: Arc<dyn LedgerStore>,
        id: &str,
        parent: Option<Arc<Ledger>>,
    ) -> Result<Arc<Self>, LedgerError> {
        Self::open_with(
            store,
            id,
            parent,
            Arc::new(AllowAll),
            Arc::new(HookRegistry::new()),
        )
    }

    pub fn open_with(
        store: Arc<dyn LedgerStore>,
        id: &str,
        parent: Option<Arc<Ledger>>,
        authorizer: Arc<dyn TransferAuthorizer>,
        hooks: Arc<HookRegistry>,
    ) -> Result<Arc<Self>, LedgerError> {
        let meta = store
            .get_meta(id)?
            .ok_or_else(|| LedgerError::UnknownLedger(id.to_string()))?;

        let ancestry = match store.get_ancestry(id)? {
            Some(record) => {
                let parent =
                    parent.ok_or_else(|| LedgerError::UnknownLedger(record.parent_id.clone()))?;
                if parent.id() != record.parent_id {
                    return Err(LedgerError::UnknownLedger(record.parent_id));
                }
                Some(Ancestry::link(parent, record.cutoff)?)
            }
            None => None,
        };

        let mut balances = HashMap::new();
        for key in store.checkpoint_keys(id)? {
            let entries = store.get_checkpoints(id, &key)?;
            balances.insert(key, CheckpointSeq::from_entries(entries));
        }
        let snapshots = SnapshotRegister::from_parts(store.get_snapshots(id)?, store.get_markers(id)?);
        let allowances = AllowanceTable::from_grants(store.get_allowances(id)?);

        Ok(Arc::new(Self {
            id: id.to_string(),
            address: ledger_address(id),
            store,
            authorizer,
            hooks,
            ancestry,
            state: RwLock::new(LedgerState {
                config: meta.config,
                controller: meta.controller,
                balances,
                snapshots,
                allowances,
                watermark: VersionWatermark::starting_at(meta.last_version),
                events: Vec::new(),
            }),
        }))
    }

    // ------------------------------------------------------------------
    // Queries
    // ------------------------------------------------------------------

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn address(&self) -> Address {
        self.address
    }

    pub fn controller(&self) -> Address {
        self.state.read().controller
    }

    pub fn config(&self) -> TokenConfig {
        self.state.read().config.clone()
    }

    pub fn transfers_enabled(&self) -> bool {
        self.state.read().config.transfers_enabled
    }

    pub fn cutoff(&self) -> Option<Version> {
        self.ancestry.as_ref().map(|link| link.cutoff())
    }

    pub fn parent_id(&self) -> Option<String> {
        self.ancestry
            .as_ref()
            .map(|link| link.parent().id().to_string())
    }

    /// Highest environment version this ledger has observed.
    pub fn current_version(&self) -> Version {
        self.state.read().watermark.current()
    }

    /// Balance at the latest observed version.
    pub fn balance_of(&self, key: &Address) -> Amount {
        let st = self.state.read();
        self.balance_at_state(&st, key, st.watermark.current())
    }

    /// Balance as of an arbitrary past (or future) version, delegating to
    /// the ancestry link when local history does not reach back that far.
    pub fn balance_at(&self, key: &Address, version: Version) -> Amount {
        let st = self.state.read();
        self.balance_at_state(&st, key, version)
    }

    /// Balance at a declared snapshot version.
    pub fn balance_at_snapshot(
        &self,
        key: &Address,
        snapshot: Version,
    ) -> Result<Amount, LedgerError> {
        let st = self.state.read();
        if !st.snapshots.is_snapshot_version(snapshot) {
            return Err(LedgerError::NotASnapshot(snapshot));
        }
        Ok(self.balance_at_state(&st, key, snapshot))
    }

    pub fn total_supply(&self) -> Amount {
        self.balance_of(&Address::NULL)
    }

    pub fn total_at(&self, version: Version) -> Amount {
        self.balance_at(&Address::NULL, version)
    }

    pub fn total_at_snapshot(&self, snapshot: Version) -> Result<Amount, LedgerError> {
        self.balance_at_snapshot(&Address::NULL, snapshot)
    }

    pub fn is_snapshot_version(&self, version: Version) -> bool {
        self.state.read().snapshots.is_snapshot_version(version)
    }

    pub fn last_snapshot_version(&self) -> Version {
        self.state.read().snapshots.last_version()
    }

    pub fn snapshot_versions(&self) -> Vec<Version> {
        self.state.read().snapshots.declared().to_vec()
    }

    pub fn allowance(&self, owner: &Address, spender: &Address) -> Amount {
        self.state.read().allowances.allowance(owner, spender)
    }

    /// Number of checkpoint entries recorded for `key` locally.
    pub fn checkpoint_count(&self, key: &Address) -> usize {
        self.state
            .read()
            .balances
            .get(key)
            .map(|seq| seq.len())
            .unwrap_or(0)
    }

    /// Take all events emitted since the last drain.
    pub fn drain_events(&self) -> Vec<LedgerEvent> {
        std::mem::take(&mut self.state.write().events)
    }

    pub(crate) fn push_event(&self, event: LedgerEvent) {
        self.state.write().events.push(event);
    }

    fn balance_at_state(&self, st: &LedgerState, key: &Address, version: Version) -> Amount {
        match st.balances.get(key) {
            Some(seq) if seq.covers(version) => seq.value_at(version),
            _ => match &self.ancestry {
                Some(link) => link.balance_at(key, version),
                None => 0,
            },
        }
    }

    // ------------------------------------------------------------------
    // Mutations
    // ------------------------------------------------------------------

    /// Move `amount` from `from` to `to`.
    ///
    /// Returns `Ok(false)` — with no state change — when `from`'s balance
    /// is insufficient; every other failure is a hard error.
    pub fn transfer(
        &self,
        from: Address,
        to: Address,
        amount: Amount,
        memo: &[u8],
        current_version: Version,
    ) -> Result<bool, LedgerError> {
        let mut st = self.state.write();
        let version = st.watermark.clip(current_version);
        let staged = match self.prepare_transfer(&st, from, to, amount, memo, version)? {
            Some(staged) => staged,
            None => return Ok(false),
        };
        let batch = self.batch_for(&st, &staged, version);
        self.store.apply(&self.id, &batch)?;
        Self::install(&mut st, staged, version);
        st.events.push(LedgerEvent::Transfer {
            from,
            to,
            amount,
            memo: memo.to_vec(),
        });
        Ok(true)
    }

    /// Spend from `from` on behalf of its owner. The controller bypasses
    /// the allowance table; everyone else needs a sufficient grant, which
    /// is consumed only when the transfer actually applies.
    pub fn transfer_from(
        &self,
        spender: Address,
        from: Address,
        to: Address,
        amount: Amount,
        memo: &[u8],
        current_version: Version,
    ) -> Result<bool, LedgerError> {
        let mut st = self.state.write();
        let version = st.watermark.clip(current_version);
        let remaining_grant = if spender == st.controller {
            None
        } else {
            let allowed = st.allowances.allowance(&from, &spender);
            if allowed < amount {
                return Err(LedgerError::AllowanceExceeded {
                    allowed,
                    requested: amount,
                });
            }
            Some(allowed - amount)
        };
        let staged = match self.prepare_transfer(&st, from, to, amount, memo, version)? {
            Some(staged) => staged,
            None => return Ok(false),
        };
        let mut batch = self.batch_for(&st, &staged, version);
        if let Some(remaining) = remaining_grant {
            batch.allowances.push(((from, spender), remaining));
        }
        self.store.apply(&self.id, &batch)?;
        Self::install(&mut st, staged, version);
        if let Some(remaining) = remaining_grant {
            st.allowances.set(from, spender, remaining);
        }
        st.events.push(LedgerEvent::Transfer {
            from,
            to,
            amount,
            memo: memo.to_vec(),
        });
        Ok(true)
    }

    /// Grant `spender` an allowance over `owner`'s balance. A live
    /// non-zero grant must be reset to zero before it can be replaced.
    pub fn approve(
        &self,
        owner: Address,
        spender: Address,
        amount: Amount,
        current_version: Version,
    ) -> Result<bool, LedgerError> {
        let mut st = self.state.write();
        let version = st.watermark.clip(current_version);
        if !st.config.transfers_enabled {
            return Err(LedgerError::TransfersDisabled);
        }
        if owner.is_null() || spender.is_null() {
            return Err(LedgerError::NullAddress);
        }
        if amount != 0 && st.allowances.allowance(&owner, &spender) != 0 {
            return Err(LedgerError::PendingAllowance);
        }
        if !self.authorizer.authorize_approval(&owner, &spender, amount) {
            return Err(LedgerError::ApprovalRejected);
        }
        let batch = WriteBatch {
            allowances: vec![((owner, spender), amount)],
            meta: Some(self.meta_record(&st, version)),
            ..WriteBatch::default()
        };
        self.store.apply(&self.id, &batch)?;
        st.allowances.set(owner, spender, amount);
        st.watermark.advance_to(version);
        st.events.push(LedgerEvent::Approval {
            owner,
            spender,
            amount,
        });
        Ok(true)
    }

    /// Create `amount` new units on `owner`'s balance. Controller only;
    /// permitted even while transfers are disabled.
    pub fn mint(
        &self,
        caller: Address,
        owner: Address,
        amount: Amount,
        current_version: Version,
    ) -> Result<bool, LedgerError> {
        let mut st = self.state.write();
        let version = st.watermark.clip(current_version);
        Self::require_controller(&st, caller)?;
        if owner.is_null() {
            return Err(LedgerError::NullAddress);
        }
        let total = self.balance_at_state(&st, &Address::NULL, version);
        let new_total = total.checked_add(amount).ok_or(LedgerError::AmountOverflow)?;
        let balance = self.balance_at_state(&st, &owner, version);
        let new_balance = balance
            .checked_add(amount)
            .ok_or(LedgerError::AmountOverflow)?;
        let staged = vec![
            self.stage_balance(&st, Address::NULL, new_total, version)?,
            self.stage_balance(&st, owner, new_balance, version)?,
        ];
        let batch = self.batch_for(&st, &staged, version);
        self.store.apply(&self.id, &batch)?;
        Self::install(&mut st, staged, version);
        st.events.push(LedgerEvent::Transfer {
            from: Address::NULL,
            to: owner,
            amount,
            memo: Vec::new(),
        });
        tracing::info!(ledger = %self.id, owner = %owner, amount = %amount, "minted");
        Ok(true)
    }

    /// Destroy `amount` units from `owner`'s balance. Controller only;
    /// hard-fails when the balance cannot cover the amount.
    pub fn burn(
        &self,
        caller: Address,
        owner: Address,
        amount: Amount,
        current_version: Version,
    ) -> Result<bool, LedgerError> {
        let mut st = self.state.write();
        let version = st.watermark.clip(current_version);
        Self::require_controller(&st, caller)?;
        if owner.is_null() {
            return Err(LedgerError::NullAddress);
        }
        let balance = self.balance_at_state(&st, &owner, version);
        if balance < amount {
            return Err(LedgerError::BalanceUnderflow {
                balance,
                requested: amount,
            });
        }
        let total = self.balance_at_state(&st, &Address::NULL, version);
        let new_total = total
            .checked_sub(amount)
            .ok_or(LedgerError::BalanceUnderflow {
                balance: total,
                requested: amount,
            })?;
        let staged = vec![
            self.stage_balance(&st, Address::NULL, new_total, version)?,
            self.stage_balance(&st, owner, balance - amount, version)?,
        ];
        let batch = self.batch_for(&st, &staged, version);
        self.store.apply(&self.id, &batch)?;
        Self::install(&mut st, staged, version);
        st.events.push(LedgerEvent::Transfer {
            from: owner,
            to: Address::NULL,
            amount,
            memo: Vec::new(),
        });
        tracing::info!(ledger = %self.id, owner = %owner, amount = %amount, "burned");
        Ok(true)
    }

    /// Declare the current version as a snapshot. Controller only.
    pub fn declare_snapshot(
        &self,
        caller: Address,
        current_version: Version,
    ) -> Result<Version, LedgerError> {
        let mut st = self.state.write();
        let version = st.watermark.clip(current_version);
        Self::require_controller(&st, caller)?;
        let last = st.snapshots.last_version();
        if version <= last {
            return Err(LedgerError::NonMonotonicSnapshot {
                declared: version,
                last,
            });
        }
        let mut declared = st.snapshots.declared().to_vec();
        declared.push(version);
        let batch = WriteBatch {
            snapshots: Some(declared),
            meta: Some(self.meta_record(&st, version)),
            ..WriteBatch::default()
        };
        self.store.apply(&self.id, &batch)?;
        let declared = st.snapshots.declare(version)?;
        st.watermark.advance_to(version);
        st.events.push(LedgerEvent::SnapshotDeclared { version: declared });
        tracing::info!(ledger = %self.id, version = %declared, "snapshot declared");
        Ok(declared)
    }

    /// Toggle the transfer gate. Controller only.
    pub fn set_transferable(&self, caller: Address, enabled: bool) -> Result<(), LedgerError> {
        let mut st = self.state.write();
        Self::require_controller(&st, caller)?;
        let mut meta = self.meta_record(&st, st.watermark.current());
        meta.config.transfers_enabled = enabled;
        let batch = WriteBatch {
            meta: Some(meta),
            ..WriteBatch::default()
        };
        self.store.apply(&self.id, &batch)?;
        st.config.transfers_enabled = enabled;
        tracing::info!(ledger = %self.id, enabled, "transfer gate updated");
        Ok(())
    }

    /// Hand control to a new authority. Controller only; the null address
    /// is accepted and permanently burns control.
    pub fn set_controller(
        &self,
        caller: Address,
        new_controller: Address,
    ) -> Result<(), LedgerError> {
        let mut st = self.state.write();
        Self::require_controller(&st, caller)?;
        let previous = st.controller;
        let mut meta = self.meta_record(&st, st.watermark.current());
        meta.controller = new_controller;
        let batch = WriteBatch {
            meta: Some(meta),
            ..WriteBatch::default()
        };
        self.store.apply(&self.id, &batch)?;
        st.controller = new_controller;
        st.events.push(LedgerEvent::ControllerChanged {
            previous,
            current: new_controller,
        });
        tracing::info!(ledger = %self.id, previous = %previous, current = %new_controller, "controller changed");
        Ok(())
    }

    /// Sweep value stranded on the ledger's own address to the controller.
    pub fn reclaim(&self, caller: Address, current_version: Version) -> Result<Amount, LedgerError> {
        let mut st = self.state.write();
        let version = st.watermark.clip(current_version);
        Self::require_controller(&st, caller)?;
        let stranded = self.balance_at_state(&st, &self.address, version);
        if stranded == 0 {
            return Ok(0);
        }
        let controller = st.controller;
        let controller_balance = self.balance_at_state(&st, &controller, version);
        let new_controller_balance = controller_balance
            .checked_add(stranded)
            .ok_or(LedgerError::AmountOverflow)?;
        let staged = vec![
            self.stage_balance(&st, self.address, 0, version)?,
            self.stage_balance(&st, controller, new_controller_balance, version)?,
        ];
        let batch = self.batch_for(&st, &staged, version);
        self.store.apply(&self.id, &batch)?;
        Self::install(&mut st, staged, version);
        st.events.push(LedgerEvent::TokensReclaimed {
            ledger: self.id.clone(),
            controller,
            amount: stranded,
        });
        tracing::info!(ledger = %self.id, amount = %stranded, "stranded value reclaimed");
        Ok(stranded)
    }

    // ------------------------------------------------------------------
    // Internals
    // ------------------------------------------------------------------

    fn require_controller(st: &LedgerState, caller: Address) -> Result<(), LedgerError> {
        if caller != st.controller {
            return Err(LedgerError::NotController);
        }
        Ok(())
    }

    fn check_gate(&self, st: &LedgerState, version: Version) -> Result<(), LedgerError> {
        if !st.config.transfers_enabled {
            return Err(LedgerError::TransfersDisabled);
        }
        if let Some(link) = &self.ancestry {
            if version <= link.cutoff() {
                return Err(LedgerError::CutoffInFuture {
                    cutoff: link.cutoff(),
                    version,
                });
            }
        }
        Ok(())
    }

    /// Validate a transfer and stage its balance writes without applying
    /// them. `Ok(None)` is the soft failure: the sender's balance cannot
    /// cover the amount.
    fn prepare_transfer(
        &self,
        st: &LedgerState,
        from: Address,
        to: Address,
        amount: Amount,
        memo: &[u8],
        version: Version,
    ) -> Result<Option<Vec<StagedWrite>>, LedgerError> {
        self.check_gate(st, version)?;
        if amount == 0 {
            return Err(LedgerError::ZeroAmount);
        }
        for actor in [from, to] {
            if actor.is_null() {
                return Err(LedgerError::NullAddress);
            }
            if actor == self.address {
                return Err(LedgerError::OwnAddress);
            }
        }

        let from_balance = self.balance_at_state(st, &from, version);
        if from_balance < amount {
            tracing::debug!(
                ledger = %self.id, from = %from, to = %to, amount = %amount,
                "transfer declined: insufficient balance"
            );
            return Ok(None);
        }
        if !self.authorizer.authorize_transfer(&from, &to, amount) {
            return Err(LedgerError::AuthorizationRejected);
        }
        let to_balance = self.balance_at_state(st, &to, version);
        let new_to_balance = to_balance
            .checked_add(amount)
            .ok_or(LedgerError::AmountOverflow)?;

        // The recipient hook can still void the transfer, so it runs before
        // anything is staged.
        if let Some(hook) = self.hooks.get(&to) {
            hook.on_tokens_received(&from, amount, memo)
                .map_err(|e| LedgerError::RecipientRejected(e.to_string()))?;
        }

        if from == to {
            // Net-zero movement; nothing to write.
            return Ok(Some(Vec::new()));
        }
        Ok(Some(vec![
            self.stage_balance(st, from, from_balance - amount, version)?,
            self.stage_balance(st, to, new_to_balance, version)?,
        ]))
    }

    fn stage_balance(
        &self,
        st: &LedgerState,
        key: Address,
        value: Amount,
        version: Version,
    ) -> Result<StagedWrite, LedgerError> {
        let mut seq = st.balances.get(&key).cloned().unwrap_or_default();
        let may_overwrite = st.snapshots.may_overwrite_tail(&key, !seq.is_empty());
        let outcome = seq.write(value, version, may_overwrite)?;
        let marker = match outcome {
            WriteOutcome::Appended => Some(st.snapshots.last_version()),
            WriteOutcome::Overwrote => None,
        };
        Ok(StagedWrite { key, seq, marker })
    }

    fn meta_record(&self, st: &LedgerState, last_version: Version) -> LedgerMeta {
        LedgerMeta {
            config: st.config.clone(),
            controller: st.controller,
            last_version,
        }
    }

    /// Collect staged balance writes and the updated metadata into the
    /// batch the store applies atomically.
    fn batch_for(&self, st: &LedgerState, staged: &[StagedWrite], version: Version) -> WriteBatch {
        let mut batch = WriteBatch::default();
        for write in staged {
            batch
                .checkpoints
                .push((write.key, write.seq.entries().to_vec()));
            if let Some(snapshot) = write.marker {
                batch.markers.push((write.key, snapshot));
            }
        }
        batch.meta = Some(self.meta_record(st, version));
        batch
    }

    /// Install staged writes in memory. Runs only after the store accepted
    /// the batch; nothing here can fail.
    fn install(st: &mut LedgerState, staged: Vec<StagedWrite>, version: Version) {
        for write in staged {
            if let Some(snapshot) = write.marker {
                st.snapshots.set_marker(write.key, snapshot);
            }
            st.balances.insert(write.key, write.seq);
        }
        st.watermark.advance_to(version);
    }
}
