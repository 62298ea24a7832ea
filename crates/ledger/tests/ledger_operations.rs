//! Behavior tests for the value-changing ledger operations: mint, burn,
//! transfer (soft-fail contract), approvals, hooks, and the transfer gate.

use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tally_ledger::{HookError, Ledger, LedgerError, LedgerRegistry, RecipientHook, TransferAuthorizer};
use tally_storage::{AncestryRecord, LedgerMeta, LedgerStore, MemoryStore, WriteBatch};
use tally_types::{Address, Amount, Checkpoint, LedgerEvent, TokenConfig, Version};

fn addr(byte: u8) -> Address {
    Address([byte; 32])
}

fn registry() -> LedgerRegistry {
    LedgerRegistry::new(Arc::new(MemoryStore::new()))
}

fn funded_ledger(registry: &LedgerRegistry) -> (Arc<Ledger>, Address, Address, Address) {
    let controller = addr(0xC0);
    let alice = addr(1);
    let bob = addr(2);
    let ledger = registry
        .create("main", TokenConfig::default(), controller, 1)
        .unwrap();
    ledger.mint(controller, alice, 1_000, 5).unwrap();
    (ledger, controller, alice, bob)
}

#[test]
fn mint_credits_balance_and_total() {
    let registry = registry();
    let (ledger, _, alice, _) = funded_ledger(&registry);
    assert_eq!(ledger.balance_of(&alice), 1_000);
    assert_eq!(ledger.total_supply(), 1_000);
}

#[test]
fn mint_requires_controller() {
    let registry = registry();
    let (ledger, _, alice, bob) = funded_ledger(&registry);
    let err = ledger.mint(bob, alice, 10, 6).unwrap_err();
    assert!(matches!(err, LedgerError::NotController));
    assert_eq!(ledger.total_supply(), 1_000);
}

#[test]
fn transfer_moves_value() {
    let registry = registry();
    let (ledger, _, alice, bob) = funded_ledger(&registry);
    assert!(ledger.transfer(alice, bob, 400, b"", 6).unwrap());
    assert_eq!(ledger.balance_of(&alice), 600);
    assert_eq!(ledger.balance_of(&bob), 400);
    assert_eq!(ledger.total_supply(), 1_000);
}

#[test]
fn insufficient_balance_soft_fails_without_state_change() {
    let registry = registry();
    let (ledger, _, alice, bob) = funded_ledger(&registry);
    let applied = ledger.transfer(alice, bob, 1_001, b"", 6).unwrap();
    assert!(!applied);
    assert_eq!(ledger.balance_of(&alice), 1_000);
    assert_eq!(ledger.balance_of(&bob), 0);
}

#[test]
fn zero_amount_transfer_is_a_hard_error() {
    let registry = registry();
    let (ledger, _, alice, bob) = funded_ledger(&registry);
    let err = ledger.transfer(alice, bob, 0, b"", 6).unwrap_err();
    assert!(matches!(err, LedgerError::ZeroAmount));
}

#[test]
fn null_and_own_addresses_are_rejected() {
    let registry = registry();
    let (ledger, _, alice, _) = funded_ledger(&registry);
    assert!(matches!(
        ledger.transfer(alice, Address::NULL, 10, b"", 6),
        Err(LedgerError::NullAddress)
    ));
    assert!(matches!(
        ledger.transfer(alice, ledger.address(), 10, b"", 6),
        Err(LedgerError::OwnAddress)
    ));
}

#[test]
fn transfer_gate_blocks_transfers_but_not_mint() {
    let registry = registry();
    let (ledger, controller, alice, bob) = funded_ledger(&registry);
    ledger.set_transferable(controller, false).unwrap();
    assert!(matches!(
        ledger.transfer(alice, bob, 10, b"", 6),
        Err(LedgerError::TransfersDisabled)
    ));
    assert!(ledger.mint(controller, bob, 50, 7).unwrap());
    assert!(ledger.burn(controller, bob, 20, 8).unwrap());
    ledger.set_transferable(controller, true).unwrap();
    assert!(ledger.transfer(alice, bob, 10, b"", 9).unwrap());
}

#[test]
fn burn_beyond_balance_hard_fails_without_state_change() {
    let registry = registry();
    let (ledger, controller, alice, _) = funded_ledger(&registry);
    let err = ledger.burn(controller, alice, 1_001, 6).unwrap_err();
    assert!(matches!(
        err,
        LedgerError::BalanceUnderflow {
            balance: 1_000,
            requested: 1_001
        }
    ));
    assert_eq!(ledger.balance_of(&alice), 1_000);
    assert_eq!(ledger.total_supply(), 1_000);
}

#[test]
fn burn_adjusts_total_and_balance_symmetrically() {
    let registry = registry();
    let (ledger, controller, alice, _) = funded_ledger(&registry);
    ledger.burn(controller, alice, 300, 6).unwrap();
    assert_eq!(ledger.balance_of(&alice), 700);
    assert_eq!(ledger.total_supply(), 700);
}

#[test]
fn conservation_holds_across_operation_mix() {
    let registry = registry();
    let (ledger, controller, alice, bob) = funded_ledger(&registry);
    let carol = addr(3);
    ledger.mint(controller, bob, 500, 6).unwrap();
    ledger.transfer(alice, carol, 250, b"", 7).unwrap();
    ledger.burn(controller, bob, 100, 8).unwrap();
    ledger.transfer(carol, bob, 50, b"", 9).unwrap();

    let sum: u128 = [alice, bob, carol]
        .iter()
        .map(|k| ledger.balance_of(k))
        .sum();
    assert_eq!(sum, ledger.total_supply());
}

#[test]
fn transfer_emits_event_with_memo() {
    let registry = registry();
    let (ledger, _, alice, bob) = funded_ledger(&registry);
    ledger.drain_events();
    ledger.transfer(alice, bob, 5, b"invoice-42", 6).unwrap();
    let events = ledger.drain_events();
    assert_eq!(
        events,
        vec![LedgerEvent::Transfer {
            from: alice,
            to: bob,
            amount: 5,
            memo: b"invoice-42".to_vec(),
        }]
    );
    assert!(ledger.drain_events().is_empty());
}

// ----------------------------------------------------------------------
// Authorization hook
// ----------------------------------------------------------------------

struct DenyTransfers;

impl TransferAuthorizer for DenyTransfers {
    fn authorize_transfer(&self, _: &Address, _: &Address, _: Amount) -> bool {
        false
    }
    fn authorize_approval(&self, _: &Address, _: &Address, _: Amount) -> bool {
        true
    }
}

#[test]
fn rejected_authorization_is_a_hard_error() {
    let registry = LedgerRegistry::with_authorizer(
        Arc::new(MemoryStore::new()),
        Arc::new(DenyTransfers),
    );
    let (ledger, _, alice, bob) = funded_ledger(&registry);
    let err = ledger.transfer(alice, bob, 10, b"", 6).unwrap_err();
    assert!(matches!(err, LedgerError::AuthorizationRejected));
    assert_eq!(ledger.balance_of(&alice), 1_000);
}

// ----------------------------------------------------------------------
// Recipient notification hook
// ----------------------------------------------------------------------

struct RecordingHook {
    calls: Mutex<Vec<(Address, Amount, Vec<u8>)>>,
    fail: bool,
}

impl RecordingHook {
    fn new(fail: bool) -> Arc<Self> {
        Arc::new(Self {
            calls: Mutex::new(Vec::new()),
            fail,
        })
    }
}

impl RecipientHook for RecordingHook {
    fn on_tokens_received(
        &self,
        from: &Address,
        amount: Amount,
        memo: &[u8],
    ) -> Result<(), HookError> {
        self.calls.lock().push((*from, amount, memo.to_vec()));
        if self.fail {
            return Err(HookError::new("recipient declined"));
        }
        Ok(())
    }
}

#[test]
fn programmable_recipient_is_notified() {
    let registry = registry();
    let (ledger, _, alice, bob) = funded_ledger(&registry);
    let hook = RecordingHook::new(false);
    registry.hooks().register(bob, hook.clone());

    ledger.transfer(alice, bob, 25, b"ping", 6).unwrap();
    let calls = hook.calls.lock();
    assert_eq!(calls.as_slice(), &[(alice, 25, b"ping".to_vec())]);
}

#[test]
fn recipient_rejection_voids_the_transfer() {
    let registry = registry();
    let (ledger, _, alice, bob) = funded_ledger(&registry);
    registry.hooks().register(bob, RecordingHook::new(true));

    let err = ledger.transfer(alice, bob, 25, b"", 6).unwrap_err();
    assert!(matches!(err, LedgerError::RecipientRejected(_)));
    assert_eq!(ledger.balance_of(&alice), 1_000);
    assert_eq!(ledger.balance_of(&bob), 0);
}

#[test]
fn plain_recipients_receive_no_notification() {
    let registry = registry();
    let (ledger, _, alice, bob) = funded_ledger(&registry);
    let hook = RecordingHook::new(true);
    registry.hooks().register(addr(9), hook.clone());

    ledger.transfer(alice, bob, 25, b"", 6).unwrap();
    assert!(hook.calls.lock().is_empty());
}

// ----------------------------------------------------------------------
// Allowances
// ----------------------------------------------------------------------

#[test]
fn approve_and_transfer_from() {
    let registry = registry();
    let (ledger, _, alice, bob) = funded_ledger(&registry);
    let spender = addr(7);

    assert!(ledger.approve(alice, spender, 300, 6).unwrap());
    assert_eq!(ledger.allowance(&alice, &spender), 300);

    assert!(ledger
        .transfer_from(spender, alice, bob, 120, b"", 7)
        .unwrap());
    assert_eq!(ledger.balance_of(&bob), 120);
    assert_eq!(ledger.allowance(&alice, &spender), 180);
}

#[test]
fn transfer_from_beyond_allowance_hard_fails() {
    let registry = registry();
    let (ledger, _, alice, bob) = funded_ledger(&registry);
    let spender = addr(7);
    ledger.approve(alice, spender, 50, 6).unwrap();

    let err = ledger
        .transfer_from(spender, alice, bob, 51, b"", 7)
        .unwrap_err();
    assert!(matches!(err, LedgerError::AllowanceExceeded { .. }));
    assert_eq!(ledger.balance_of(&alice), 1_000);
}

#[test]
fn soft_failed_transfer_from_keeps_allowance() {
    let registry = registry();
    let (ledger, _, alice, bob) = funded_ledger(&registry);
    let spender = addr(7);
    ledger.approve(alice, spender, 5_000, 6).unwrap();

    let applied = ledger
        .transfer_from(spender, alice, bob, 2_000, b"", 7)
        .unwrap();
    assert!(!applied);
    assert_eq!(ledger.allowance(&alice, &spender), 5_000);
}

#[test]
fn controller_bypasses_allowance() {
    let registry = registry();
    let (ledger, controller, alice, bob) = funded_ledger(&registry);
    assert!(ledger
        .transfer_from(controller, alice, bob, 200, b"", 6)
        .unwrap());
    assert_eq!(ledger.balance_of(&bob), 200);
}

#[test]
fn live_allowance_must_be_zeroed_before_regrant() {
    let registry = registry();
    let (ledger, _, alice, _) = funded_ledger(&registry);
    let spender = addr(7);
    ledger.approve(alice, spender, 10, 6).unwrap();
    let err = ledger.approve(alice, spender, 20, 7).unwrap_err();
    assert!(matches!(err, LedgerError::PendingAllowance));
    ledger.approve(alice, spender, 0, 8).unwrap();
    ledger.approve(alice, spender, 20, 9).unwrap();
    assert_eq!(ledger.allowance(&alice, &spender), 20);
}

// ----------------------------------------------------------------------
// Controller operations
// ----------------------------------------------------------------------

#[test]
fn controller_handover() {
    let registry = registry();
    let (ledger, controller, alice, _) = funded_ledger(&registry);
    let successor = addr(0xC1);
    ledger.set_controller(controller, successor).unwrap();
    assert_eq!(ledger.controller(), successor);
    assert!(matches!(
        ledger.mint(controller, alice, 1, 6),
        Err(LedgerError::NotController)
    ));
    assert!(ledger.mint(successor, alice, 1, 7).unwrap());
}

#[test]
fn reclaim_sweeps_stranded_value_to_controller() {
    let registry = registry();
    let (ledger, controller, _, _) = funded_ledger(&registry);
    // Value can only strand on the ledger's own address through privileged
    // operations.
    ledger.mint(controller, ledger.address(), 77, 6).unwrap();
    ledger.drain_events();

    let reclaimed = ledger.reclaim(controller, 7).unwrap();
    assert_eq!(reclaimed, 77);
    assert_eq!(ledger.balance_of(&ledger.address()), 0);
    assert_eq!(ledger.balance_of(&controller), 77);
    assert!(matches!(
        ledger.drain_events().as_slice(),
        [LedgerEvent::TokensReclaimed { amount: 77, .. }]
    ));

    assert_eq!(ledger.reclaim(controller, 8).unwrap(), 0);
}

// ----------------------------------------------------------------------
// Overflow
// ----------------------------------------------------------------------

#[test]
fn mint_overflowing_the_total_is_rejected() {
    let registry = registry();
    let controller = addr(0xC0);
    let alice = addr(1);
    let bob = addr(2);
    let ledger = registry
        .create("main", TokenConfig::default(), controller, 1)
        .unwrap();
    ledger.mint(controller, alice, u128::MAX - 10, 5).unwrap();

    let err = ledger.mint(controller, bob, 20, 6).unwrap_err();
    assert!(matches!(err, LedgerError::AmountOverflow));
    assert_eq!(ledger.balance_of(&alice), u128::MAX - 10);
    assert_eq!(ledger.balance_of(&bob), 0);
    assert_eq!(ledger.total_supply(), u128::MAX - 10);

    // Minting right up to the limit still works; one unit past it does not.
    ledger.mint(controller, bob, 10, 7).unwrap();
    assert_eq!(ledger.total_supply(), u128::MAX);
    assert!(matches!(
        ledger.mint(controller, bob, 1, 8),
        Err(LedgerError::AmountOverflow)
    ));

    // Conservation caps every balance at the total, so a full-balance
    // transfer at the limit stays representable.
    assert!(ledger.transfer(alice, bob, u128::MAX - 10, b"", 9).unwrap());
    assert_eq!(ledger.balance_of(&bob), u128::MAX);
}

// ----------------------------------------------------------------------
// Storage failure atomicity
// ----------------------------------------------------------------------

/// Store whose write path can be switched to fail, for checking that a
/// storage error leaves the in-memory ledger untouched.
struct FlakyStore {
    inner: MemoryStore,
    failing: AtomicBool,
}

impl FlakyStore {
    fn new() -> Arc<Self> {
        Arc::new(Self {
            inner: MemoryStore::new(),
            failing: AtomicBool::new(false),
        })
    }

    fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }
}

impl LedgerStore for FlakyStore {
    fn get_checkpoints(&self, ledger: &str, key: &Address) -> anyhow::Result<Vec<Checkpoint>> {
        self.inner.get_checkpoints(ledger, key)
    }
    fn put_checkpoints(
        &self,
        ledger: &str,
        key: &Address,
        seq: &[Checkpoint],
    ) -> anyhow::Result<()> {
        self.inner.put_checkpoints(ledger, key, seq)
    }
    fn checkpoint_keys(&self, ledger: &str) -> anyhow::Result<Vec<Address>> {
        self.inner.checkpoint_keys(ledger)
    }
    fn get_snapshots(&self, ledger: &str) -> anyhow::Result<Vec<Version>> {
        self.inner.get_snapshots(ledger)
    }
    fn put_snapshots(&self, ledger: &str, declared: &[Version]) -> anyhow::Result<()> {
        self.inner.put_snapshots(ledger, declared)
    }
    fn get_markers(&self, ledger: &str) -> anyhow::Result<HashMap<Address, Version>> {
        self.inner.get_markers(ledger)
    }
    fn put_marker(&self, ledger: &str, key: &Address, snapshot: Version) -> anyhow::Result<()> {
        self.inner.put_marker(ledger, key, snapshot)
    }
    fn get_allowances(
        &self,
        ledger: &str,
    ) -> anyhow::Result<HashMap<(Address, Address), Amount>> {
        self.inner.get_allowances(ledger)
    }
    fn put_allowance(
        &self,
        ledger: &str,
        owner: &Address,
        spender: &Address,
        amount: Amount,
    ) -> anyhow::Result<()> {
        self.inner.put_allowance(ledger, owner, spender, amount)
    }
    fn get_meta(&self, ledger: &str) -> anyhow::Result<Option<LedgerMeta>> {
        self.inner.get_meta(ledger)
    }
    fn put_meta(&self, ledger: &str, meta: &LedgerMeta) -> anyhow::Result<()> {
        self.inner.put_meta(ledger, meta)
    }
    fn get_ancestry(&self, ledger: &str) -> anyhow::Result<Option<AncestryRecord>> {
        self.inner.get_ancestry(ledger)
    }
    fn put_ancestry(&self, ledger: &str, record: &AncestryRecord) -> anyhow::Result<()> {
        self.inner.put_ancestry(ledger, record)
    }
    fn ledger_ids(&self) -> anyhow::Result<Vec<String>> {
        self.inner.ledger_ids()
    }
    fn apply(&self, ledger: &str, batch: &WriteBatch) -> anyhow::Result<()> {
        if self.failing.load(Ordering::SeqCst) {
            anyhow::bail!("injected storage failure");
        }
        self.inner.apply(ledger, batch)
    }
}

#[test]
fn storage_failure_leaves_state_untouched() {
    let store = FlakyStore::new();
    let registry = LedgerRegistry::new(store.clone());
    let (ledger, controller, alice, bob) = funded_ledger(&registry);
    let spender = addr(7);
    ledger.approve(alice, spender, 300, 6).unwrap();
    ledger.drain_events();

    store.set_failing(true);
    assert!(matches!(
        ledger.transfer(alice, bob, 100, b"", 7),
        Err(LedgerError::Storage(_))
    ));
    assert!(matches!(
        ledger.transfer_from(spender, alice, bob, 100, b"", 7),
        Err(LedgerError::Storage(_))
    ));
    assert!(matches!(
        ledger.mint(controller, bob, 10, 8),
        Err(LedgerError::Storage(_))
    ));
    assert!(matches!(
        ledger.burn(controller, alice, 10, 8),
        Err(LedgerError::Storage(_))
    ));
    assert!(matches!(
        ledger.declare_snapshot(controller, 9),
        Err(LedgerError::Storage(_))
    ));

    // The hard failures changed nothing: balances, allowance, snapshots,
    // version, events.
    assert_eq!(ledger.balance_of(&alice), 1_000);
    assert_eq!(ledger.balance_of(&bob), 0);
    assert_eq!(ledger.total_supply(), 1_000);
    assert_eq!(ledger.allowance(&alice, &spender), 300);
    assert_eq!(ledger.last_snapshot_version(), 0);
    assert_eq!(ledger.current_version(), 6);
    assert!(ledger.drain_events().is_empty());

    store.set_failing(false);
    assert!(ledger
        .transfer_from(spender, alice, bob, 100, b"", 10)
        .unwrap());
    assert_eq!(ledger.balance_of(&bob), 100);
    assert_eq!(ledger.allowance(&alice, &spender), 200);
}

// ----------------------------------------------------------------------
// Version watermark
// ----------------------------------------------------------------------

#[test]
fn failed_operations_do_not_advance_the_version() {
    let registry = registry();
    let (ledger, controller, alice, bob) = funded_ledger(&registry);
    assert_eq!(ledger.current_version(), 5);

    assert!(ledger.mint(bob, alice, 10, 50).is_err());
    assert!(ledger.transfer(alice, bob, 0, b"", 60).is_err());
    assert!(ledger.burn(controller, alice, 5_000, 70).is_err());
    // A declined transfer is no state change either.
    assert!(!ledger.transfer(alice, bob, 9_999, b"", 75).unwrap());
    assert_eq!(ledger.current_version(), 5);

    assert!(ledger.transfer(alice, bob, 10, b"", 80).unwrap());
    assert_eq!(ledger.current_version(), 80);
}

#[test]
fn stale_environment_version_cannot_rewind_history() {
    let registry = registry();
    let (ledger, controller, alice, bob) = funded_ledger(&registry);
    ledger.transfer(alice, bob, 100, b"", 10).unwrap();
    // The environment reports an older version; the ledger clips it.
    ledger.transfer(alice, bob, 100, b"", 4).unwrap();
    assert_eq!(ledger.current_version(), 10);
    assert_eq!(ledger.balance_at(&bob, 10), 200);
    // Snapshot declaration at the stale version is also clipped and thus
    // rejected as non-monotonic once a snapshot exists there.
    ledger.declare_snapshot(controller, 10).unwrap();
    assert!(matches!(
        ledger.declare_snapshot(controller, 4),
        Err(LedgerError::NonMonotonicSnapshot { .. })
    ));
}
