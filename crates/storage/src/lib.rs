//! Durable persistence for Tally ledgers.
//!
//! Every record family the ledger needs to answer history queries after a
//! restart lives behind the [`LedgerStore`] trait: per-key checkpoint
//! sequences, the declared snapshot sequence, the per-key last-used-snapshot
//! markers, the allowance table, the ancestry link, and the ledger metadata
//! (token config, controller, version watermark).
//!
//! Mutating operations persist through [`LedgerStore::apply`], which takes
//! all of an operation's writes as one [`WriteBatch`] and applies them
//! atomically; the granular getters and putters serve reloads and
//! maintenance.
//!
//! Two backends are provided: [`SledStore`] (one sled tree per record
//! family, values serialized with `serde_json`, batches applied through a
//! multi-tree transaction) and [`MemoryStore`] for tests and ephemeral
//! embeddings.

use anyhow::Result;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use sled::transaction::TransactionError;
use sled::{Db, Transactional, Tree};
use std::collections::HashMap;
use std::path::Path;
use tally_types::{decode_address, Address, Amount, Checkpoint, TokenConfig, Version};

/// Storage errors
#[derive(thiserror::Error, Debug)]
pub enum StorageError {
    #[error("Database error: {0}")]
    Database(#[from] sled::Error),
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("Malformed storage key: {0}")]
    InvalidKey(String),
}

/// Ledger metadata persisted alongside the checkpoint data.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerMeta {
    pub config: TokenConfig,
    pub controller: Address,
    /// Highest environment version this ledger has observed.
    pub last_version: Version,
}

/// Immutable ancestry link of a derived ledger.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AncestryRecord {
    pub parent_id: String,
    pub cutoff: Version,
}

/// Durable writes produced by one ledger operation.
///
/// A batch is applied as a single atomic unit, so a crash or storage error
/// can never persist one record family without the others. An allowance
/// amount of zero removes the grant.
#[derive(Debug, Clone, Default)]
pub struct WriteBatch {
    pub checkpoints: Vec<(Address, Vec<Checkpoint>)>,
    pub markers: Vec<(Address, Version)>,
    pub allowances: Vec<((Address, Address), Amount)>,
    pub snapshots: Option<Vec<Version>>,
    pub ancestry: Option<AncestryRecord>,
    pub meta: Option<LedgerMeta>,
}

/// Abstract persistence trait for ledger state.
pub trait LedgerStore: Send + Sync {
    fn get_checkpoints(&self, ledger: &str, key: &Address) -> Result<Vec<Checkpoint>>;
    fn put_checkpoints(&self, ledger: &str, key: &Address, seq: &[Checkpoint]) -> Result<()>;
    /// All keys with at least one checkpoint in the given ledger.
    fn checkpoint_keys(&self, ledger: &str) -> Result<Vec<Address>>;

    fn get_snapshots(&self, ledger: &str) -> Result<Vec<Version>>;
    fn put_snapshots(&self, ledger: &str, declared: &[Version]) -> Result<()>;

    fn get_markers(&self, ledger: &str) -> Result<HashMap<Address, Version>>;
    fn put_marker(&self, ledger: &str, key: &Address, snapshot: Version) -> Result<()>;

    fn get_allowances(&self, ledger: &str) -> Result<HashMap<(Address, Address), Amount>>;
    fn put_allowance(
        &self,
        ledger: &str,
        owner: &Address,
        spender: &Address,
        amount: Amount,
    ) -> Result<()>;

    fn get_meta(&self, ledger: &str) -> Result<Option<LedgerMeta>>;
    fn put_meta(&self, ledger: &str, meta: &LedgerMeta) -> Result<()>;

    fn get_ancestry(&self, ledger: &str) -> Result<Option<AncestryRecord>>;
    fn put_ancestry(&self, ledger: &str, record: &AncestryRecord) -> Result<()>;

    /// Ids of every ledger with persisted metadata.
    fn ledger_ids(&self) -> Result<Vec<String>>;

    /// Apply a batch of writes atomically: either every record becomes
    /// durable or none does.
    fn apply(&self, ledger: &str, batch: &WriteBatch) -> Result<()>;
}

fn scoped_key(ledger: &str, key: &Address) -> Vec<u8> {
    format!("{ledger}/{key}").into_bytes()
}

fn allowance_key(ledger: &str, owner: &Address, spender: &Address) -> Vec<u8> {
    format!("{ledger}/{owner}/{spender}").into_bytes()
}

fn parse_scoped_address(ledger: &str, raw: &[u8]) -> Result<Address> {
    let text = std::str::from_utf8(raw)
        .map_err(|_| StorageError::InvalidKey(hex::encode(raw)))?
        .to_string();
    let suffix = text
        .strip_prefix(&format!("{ledger}/"))
        .ok_or_else(|| StorageError::InvalidKey(text.clone()))?;
    let bytes =
        decode_address(suffix).map_err(|_| StorageError::InvalidKey(suffix.to_string()))?;
    Ok(Address(bytes))
}

/// Sled-backed implementation
pub struct SledStore {
    db: Db,
    checkpoints: Tree,
    snapshots: Tree,
    markers: Tree,
    allowances: Tree,
    meta: Tree,
    ancestry: Tree,
}

impl SledStore {
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let db = sled::open(path)?;
        let checkpoints = db.open_tree("checkpoints")?;
        let snapshots = db.open_tree("snapshots")?;
        let markers = db.open_tree("markers")?;
        let allowances = db.open_tree("allowances")?;
        let meta = db.open_tree("meta")?;
        let ancestry = db.open_tree("ancestry")?;
        tracing::debug!("opened sled ledger store");

        Ok(Self {
            db,
            checkpoints,
            snapshots,
            markers,
            allowances,
            meta,
            ancestry,
        })
    }

    pub fn flush(&self) -> Result<()> {
        self.db.flush()?;
        Ok(())
    }
}

impl LedgerStore for SledStore {
    fn get_checkpoints(&self, ledger: &str, key: &Address) -> Result<Vec<Checkpoint>> {
        Ok(self
            .checkpoints
            .get(scoped_key(ledger, key))?
            .map(|v| serde_json::from_slice(&v))
            .transpose()?
            .unwrap_or_default())
    }

    fn put_checkpoints(&self, ledger: &str, key: &Address, seq: &[Checkpoint]) -> Result<()> {
        let data = serde_json::to_vec(seq)?;
        self.checkpoints.insert(scoped_key(ledger, key), data)?;
        Ok(())
    }

    fn checkpoint_keys(&self, ledger: &str) -> Result<Vec<Address>> {
        let prefix = format!("{ledger}/").into_bytes();
        let mut keys = Vec::new();
        for item in self.checkpoints.scan_prefix(&prefix) {
            let (raw, _) = item?;
            keys.push(parse_scoped_address(ledger, &raw)?);
        }
        Ok(keys)
    }

    fn get_snapshots(&self, ledger: &str) -> Result<Vec<Version>> {
        Ok(self
            .snapshots
            .get(ledger.as_bytes())?
            .map(|v| serde_json::from_slice(&v))
            .transpose()?
            .unwrap_or_default())
    }

    fn put_snapshots(&self, ledger: &str, declared: &[Version]) -> Result<()> {
        let data = serde_json::to_vec(declared)?;
        self.snapshots.insert(ledger.as_bytes(), data)?;
        Ok(())
    }

    fn get_markers(&self, ledger: &str) -> Result<HashMap<Address, Version>> {
        let prefix = format!("{ledger}/").into_bytes();
        let mut markers = HashMap::new();
        for item in self.markers.scan_prefix(&prefix) {
            let (raw, value) = item?;
            let key = parse_scoped_address(ledger, &raw)?;
            let snapshot: Version = serde_json::from_slice(&value)?;
            markers.insert(key, snapshot);
        }
        Ok(markers)
    }

    fn put_marker(&self, ledger: &str, key: &Address, snapshot: Version) -> Result<()> {
        let data = serde_json::to_vec(&snapshot)?;
        self.markers.insert(scoped_key(ledger, key), data)?;
        Ok(())
    }

    fn get_allowances(&self, ledger: &str) -> Result<HashMap<(Address, Address), Amount>> {
        let prefix = format!("{ledger}/").into_bytes();
        let mut allowances = HashMap::new();
        for item in self.allowances.scan_prefix(&prefix) {
            let (raw, value) = item?;
            let text = std::str::from_utf8(&raw)
                .map_err(|_| StorageError::InvalidKey(hex::encode(&raw)))?;
            let suffix = text
                .strip_prefix(&format!("{ledger}/"))
                .ok_or_else(|| StorageError::InvalidKey(text.to_string()))?;
            let (owner_text, spender_text) = suffix
                .split_once('/')
                .ok_or_else(|| StorageError::InvalidKey(suffix.to_string()))?;
            let owner = decode_address(owner_text)
                .map_err(|_| StorageError::InvalidKey(owner_text.to_string()))?;
            let spender = decode_address(spender_text)
                .map_err(|_| StorageError::InvalidKey(spender_text.to_string()))?;
            let amount: Amount = serde_json::from_slice(&value)?;
            allowances.insert((Address(owner), Address(spender)), amount);
        }
        Ok(allowances)
    }

    fn put_allowance(
        &self,
        ledger: &str,
        owner: &Address,
        spender: &Address,
        amount: Amount,
    ) -> Result<()> {
        let key = allowance_key(ledger, owner, spender);
        if amount == 0 {
            self.allowances.remove(key)?;
        } else {
            self.allowances.insert(key, serde_json::to_vec(&amount)?)?;
        }
        Ok(())
    }

    fn get_meta(&self, ledger: &str) -> Result<Option<LedgerMeta>> {
        self.meta
            .get(ledger.as_bytes())?
            .map(|v| serde_json::from_slice(&v))
            .transpose()
            .map_err(Into::into)
    }

    fn put_meta(&self, ledger: &str, meta: &LedgerMeta) -> Result<()> {
        self.meta
            .insert(ledger.as_bytes(), serde_json::to_vec(meta)?)?;
        Ok(())
    }

    fn get_ancestry(&self, ledger: &str) -> Result<Option<AncestryRecord>> {
        self.ancestry
            .get(ledger.as_bytes())?
            .map(|v| serde_json::from_slice(&v))
            .transpose()
            .map_err(Into::into)
    }

    fn put_ancestry(&self, ledger: &str, record: &AncestryRecord) -> Result<()> {
        self.ancestry
            .insert(ledger.as_bytes(), serde_json::to_vec(record)?)?;
        Ok(())
    }

    fn ledger_ids(&self) -> Result<Vec<String>> {
        let mut ids = Vec::new();
        for item in self.meta.iter() {
            let (raw, _) = item?;
            let id = std::str::from_utf8(&raw)
                .map_err(|_| StorageError::InvalidKey(hex::encode(&raw)))?;
            ids.push(id.to_string());
        }
        Ok(ids)
    }

    fn apply(&self, ledger: &str, batch: &WriteBatch) -> Result<()> {
        // Serialize up front; the transaction closure may run more than
        // once under contention.
        let mut checkpoints = Vec::with_capacity(batch.checkpoints.len());
        for (key, seq) in &batch.checkpoints {
            checkpoints.push((scoped_key(ledger, key), serde_json::to_vec(seq)?));
        }
        let mut markers = Vec::with_capacity(batch.markers.len());
        for (key, snapshot) in &batch.markers {
            markers.push((scoped_key(ledger, key), serde_json::to_vec(snapshot)?));
        }
        let mut allowances = Vec::with_capacity(batch.allowances.len());
        for ((owner, spender), amount) in &batch.allowances {
            let value = if *amount == 0 {
                None
            } else {
                Some(serde_json::to_vec(amount)?)
            };
            allowances.push((allowance_key(ledger, owner, spender), value));
        }
        let snapshots = batch
            .snapshots
            .as_ref()
            .map(serde_json::to_vec)
            .transpose()?;
        let ancestry = batch
            .ancestry
            .as_ref()
            .map(serde_json::to_vec)
            .transpose()?;
        let meta = batch.meta.as_ref().map(serde_json::to_vec).transpose()?;

        let result: std::result::Result<(), TransactionError<()>> = (
            &self.checkpoints,
            &self.markers,
            &self.allowances,
            &self.snapshots,
            &self.ancestry,
            &self.meta,
        )
            .transaction(|(cp, mk, al, sn, an, mt)| {
                for (key, value) in &checkpoints {
                    cp.insert(key.as_slice(), value.as_slice())?;
                }
                for (key, value) in &markers {
                    mk.insert(key.as_slice(), value.as_slice())?;
                }
                for (key, value) in &allowances {
                    match value {
                        Some(value) => al.insert(key.as_slice(), value.as_slice())?,
                        None => al.remove(key.as_slice())?,
                    };
                }
                if let Some(value) = &snapshots {
                    sn.insert(ledger.as_bytes(), value.as_slice())?;
                }
                if let Some(value) = &ancestry {
                    an.insert(ledger.as_bytes(), value.as_slice())?;
                }
                if let Some(value) = &meta {
                    mt.insert(ledger.as_bytes(), value.as_slice())?;
                }
                Ok(())
            });
        result.map_err(|err| match err {
            TransactionError::Storage(e) => StorageError::Database(e).into(),
            TransactionError::Abort(()) => anyhow::anyhow!("write batch aborted"),
        })
    }
}

/// In-memory testing backend
#[derive(Default)]
pub struct MemoryStore {
    checkpoints: RwLock<HashMap<String, HashMap<Address, Vec<Checkpoint>>>>,
    snapshots: RwLock<HashMap<String, Vec<Version>>>,
    markers: RwLock<HashMap<String, HashMap<Address, Version>>>,
    allowances: RwLock<HashMap<String, HashMap<(Address, Address), Amount>>>,
    meta: RwLock<HashMap<String, LedgerMeta>>,
    ancestry: RwLock<HashMap<String, AncestryRecord>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl LedgerStore for MemoryStore {
    fn get_checkpoints(&self, ledger: &str, key: &Address) -> Result<Vec<Checkpoint>> {
        Ok(self
            .checkpoints
            .read()
            .get(ledger)
            .and_then(|m| m.get(key))
            .cloned()
            .unwrap_or_default())
    }

    fn put_checkpoints(&self, ledger: &str, key: &Address, seq: &[Checkpoint]) -> Result<()> {
        self.checkpoints
            .write()
            .entry(ledger.to_string())
            .or_default()
            .insert(*key, seq.to_vec());
        Ok(())
    }

    fn checkpoint_keys(&self, ledger: &str) -> Result<Vec<Address>> {
        Ok(self
            .checkpoints
            .read()
            .get(ledger)
            .map(|m| m.keys().copied().collect())
            .unwrap_or_default())
    }

    fn get_snapshots(&self, ledger: &str) -> Result<Vec<Version>> {
        Ok(self
            .snapshots
            .read()
            .get(ledger)
            .cloned()
            .unwrap_or_default())
    }

    fn put_snapshots(&self, ledger: &str, declared: &[Version]) -> Result<()> {
        self.snapshots
            .write()
            .insert(ledger.to_string(), declared.to_vec());
        Ok(())
    }

    fn get_markers(&self, ledger: &str) -> Result<HashMap<Address, Version>> {
        Ok(self
            .markers
            .read()
            .get(ledger)
            .cloned()
            .unwrap_or_default())
    }

    fn put_marker(&self, ledger: &str, key: &Address, snapshot: Version) -> Result<()> {
        self.markers
            .write()
            .entry(ledger.to_string())
            .or_default()
            .insert(*key, snapshot);
        Ok(())
    }

    fn get_allowances(&self, ledger: &str) -> Result<HashMap<(Address, Address), Amount>> {
        Ok(self
            .allowances
            .read()
            .get(ledger)
            .cloned()
            .unwrap_or_default())
    }

    fn put_allowance(
        &self,
        ledger: &str,
        owner: &Address,
        spender: &Address,
        amount: Amount,
    ) -> Result<()> {
        let mut allowances = self.allowances.write();
        let table = allowances.entry(ledger.to_string()).or_default();
        if amount == 0 {
            table.remove(&(*owner, *spender));
        } else {
            table.insert((*owner, *spender), amount);
        }
        Ok(())
    }

    fn get_meta(&self, ledger: &str) -> Result<Option<LedgerMeta>> {
        Ok(self.meta.read().get(ledger).cloned())
    }

    fn put_meta(&self, ledger: &str, meta: &LedgerMeta) -> Result<()> {
        self.meta.write().insert(ledger.to_string(), meta.clone());
        Ok(())
    }

    fn get_ancestry(&self, ledger: &str) -> Result<Option<AncestryRecord>> {
        Ok(self.ancestry.read().get(ledger).cloned())
    }

    fn put_ancestry(&self, ledger: &str, record: &AncestryRecord) -> Result<()> {
        self.ancestry
            .write()
            .insert(ledger.to_string(), record.clone());
        Ok(())
    }

    fn ledger_ids(&self) -> Result<Vec<String>> {
        Ok(self.meta.read().keys().cloned().collect())
    }

    fn apply(&self, ledger: &str, batch: &WriteBatch) -> Result<()> {
        // All family locks are taken before the first write, so readers
        // never observe a half-applied batch.
        let mut checkpoints = self.checkpoints.write();
        let mut markers = self.markers.write();
        let mut allowances = self.allowances.write();
        let mut snapshots = self.snapshots.write();
        let mut ancestry = self.ancestry.write();
        let mut meta = self.meta.write();

        let per_key = checkpoints.entry(ledger.to_string()).or_default();
        for (key, seq) in &batch.checkpoints {
            per_key.insert(*key, seq.clone());
        }
        let per_key = markers.entry(ledger.to_string()).or_default();
        for (key, snapshot) in &batch.markers {
            per_key.insert(*key, *snapshot);
        }
        let table = allowances.entry(ledger.to_string()).or_default();
        for ((owner, spender), amount) in &batch.allowances {
            if *amount == 0 {
                table.remove(&(*owner, *spender));
            } else {
                table.insert((*owner, *spender), *amount);
            }
        }
        if let Some(declared) = &batch.snapshots {
            snapshots.insert(ledger.to_string(), declared.clone());
        }
        if let Some(record) = &batch.ancestry {
            ancestry.insert(ledger.to_string(), record.clone());
        }
        if let Some(record) = &batch.meta {
            meta.insert(ledger.to_string(), record.clone());
        }
        Ok(())
    }
}
