//! Ordered key-value store
//!
//! Thin wrapper around an embedded sled database. Adds what the record
//! stores need on top of the raw engine:
//!
//! - scoped read/write transactions; an uncommitted write transaction is
//!   discarded when dropped
//! - a prefix-bounded cursor that walks keys forwards or backwards
//! - `write_batch`, which splits a [`WriteSet`] over as many transactions
//!   as the per-transaction capacity requires, never splitting a record
//!   from its index entries
//! - best-effort background garbage collection
//!
//! # Batch commit contract
//! ```text
//! Ok(n)                         every chunk durable, n transactions
//! Err(e)                        nothing committed
//! Err(PartialCommit{committed}) chunks 1..=committed durable, the rest not
//! ```

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread;

use sled::IVec;
use tracing::{debug, error, info, warn};

use crate::config::StoreConfig;
use crate::error::{Result, StoreError};

/// Raw entry yielded by the engine iterator.
type RawEntry = sled::Result<(IVec, IVec)>;

/// Size limits of a single write transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TxnCapacity {
    pub max_entries: usize,
    pub max_bytes: usize,
}

impl TxnCapacity {
    pub fn from_config(config: &StoreConfig) -> Self {
        Self {
            max_entries: config.txn_max_entries.max(1),
            max_bytes: config.txn_max_bytes.max(1),
        }
    }

    fn admits(&self, entries: usize, bytes: usize) -> bool {
        entries <= self.max_entries && bytes <= self.max_bytes
    }
}

// ── Write sets ──────────────────────────────────────────────────────

/// Writes of one record: its primary write first, then its index entries.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RecordWrites {
    writes: Vec<(Vec<u8>, Vec<u8>)>,
    bytes: usize,
}

impl RecordWrites {
    fn push(&mut self, key: Vec<u8>, value: Vec<u8>) {
        self.bytes += key.len() + value.len();
        self.writes.push((key, value));
    }

    pub fn len(&self) -> usize {
        self.writes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.writes.is_empty()
    }

    pub fn keys(&self) -> impl Iterator<Item = &[u8]> {
        self.writes.iter().map(|(key, _)| key.as_slice())
    }
}

/// Ordered writes of a batch, grouped per record.
///
/// `write_batch` keeps every group inside one transaction, so an index
/// entry is never durable without the record it points at. Later writes
/// to the same key win.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WriteSet {
    records: Vec<RecordWrites>,
    entries: usize,
}

impl WriteSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start a new record with its primary write.
    pub fn record(&mut self, key: Vec<u8>, value: Vec<u8>) -> &mut Self {
        self.records.push(RecordWrites::default());
        self.push(key, value)
    }

    /// Add an index write to the current record. Starts a record of its
    /// own if there is none yet.
    pub fn index(&mut self, key: Vec<u8>, value: Vec<u8>) -> &mut Self {
        if self.records.is_empty() {
            self.records.push(RecordWrites::default());
        }
        self.push(key, value)
    }

    fn push(&mut self, key: Vec<u8>, value: Vec<u8>) -> &mut Self {
        if let Some(record) = self.records.last_mut() {
            record.push(key, value);
            self.entries += 1;
        }
        self
    }

    /// Number of writes across every record.
    pub fn len(&self) -> usize {
        self.entries
    }

    pub fn is_empty(&self) -> bool {
        self.entries == 0
    }

    pub fn records(&self) -> &[RecordWrites] {
        &self.records
    }

    /// Group records into transactions, in order, filling each one as far
    /// as `capacity` allows. A record that does not fit an empty
    /// transaction is rejected with `TxnTooBig`.
    pub fn chunks(self, capacity: TxnCapacity) -> Result<Vec<Vec<RecordWrites>>> {
        let mut chunks = Vec::new();
        let mut current: Vec<RecordWrites> = Vec::new();
        let (mut entries, mut bytes) = (0, 0);

        for record in self.records.into_iter().filter(|record| !record.is_empty()) {
            if !capacity.admits(record.len(), record.bytes) {
                return Err(StoreError::TxnTooBig {
                    entries: record.len(),
                    bytes: record.bytes,
                });
            }
            if !capacity.admits(entries + record.len(), bytes + record.bytes) {
                chunks.push(std::mem::take(&mut current));
                entries = 0;
                bytes = 0;
            }
            entries += record.len();
            bytes += record.bytes;
            current.push(record);
        }
        if !current.is_empty() {
            chunks.push(current);
        }
        Ok(chunks)
    }
}

/// Every write its own record. For raw keys with no index entries.
impl FromIterator<(Vec<u8>, Vec<u8>)> for WriteSet {
    fn from_iter<I: IntoIterator<Item = (Vec<u8>, Vec<u8>)>>(iter: I) -> Self {
        let mut set = WriteSet::new();
        for (key, value) in iter {
            set.record(key, value);
        }
        set
    }
}

// ── Store ───────────────────────────────────────────────────────────

/// Handle to one embedded database. Cheap to clone.
#[derive(Clone)]
pub struct OrderedStore {
    db: sled::Db,
    path: PathBuf,
    capacity: TxnCapacity,
    flush_every_write: bool,
    gc_running: Arc<AtomicBool>,
}

impl OrderedStore {
    /// Open (or create) the database at `path`.
    ///
    /// Fails if another handle in this process or another process holds
    /// the same directory.
    pub fn open(path: impl AsRef<Path>, config: &StoreConfig) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let db = sled::open(&path)?;
        debug!(path = %path.display(), "Opened ordered store");
        Ok(Self {
            db,
            path,
            capacity: TxnCapacity::from_config(config),
            flush_every_write: config.flush_every_write,
            gc_running: Arc::new(AtomicBool::new(false)),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn read_txn(&self) -> ReadTxn<'_> {
        ReadTxn { store: self }
    }

    pub fn write_txn(&self) -> WriteTxn<'_> {
        WriteTxn {
            store: self,
            batch: sled::Batch::default(),
            entries: 0,
            bytes: 0,
        }
    }

    /// Read a single key outside of an explicit transaction.
    pub fn get(&self, key: &[u8]) -> Result<Option<IVec>> {
        self.read_txn().get(key)
    }

    /// Write `set` using as many transactions as needed.
    ///
    /// Transactions are filled record by record and committed in the order
    /// they were filled. Returns the number of committed transactions.
    pub fn write_batch(&self, set: WriteSet) -> Result<usize> {
        let mut filled = Vec::new();
        // Nothing is committed until every transaction is staged, so a
        // staging failure still leaves nothing on disk.
        for chunk in set.chunks(self.capacity)? {
            let mut txn = self.write_txn();
            for record in &chunk {
                for (key, value) in &record.writes {
                    txn.set(key, value)?;
                }
            }
            filled.push(txn);
        }

        commit_in_order(filled, WriteTxn::commit)
    }

    /// Flush dirty pages to disk. Returns the number of bytes written.
    pub fn flush(&self) -> Result<usize> {
        Ok(self.db.flush()?)
    }

    /// Flush everything to disk. The database itself closes when the last
    /// handle is dropped.
    pub fn close(&self) -> Result<()> {
        let bytes = self.flush()?;
        debug!(path = %self.path.display(), bytes, "Flushed ordered store for close");
        Ok(())
    }

    /// Best-effort space reclamation.
    ///
    /// "Nothing to reclaim" and "already running" are not errors.
    pub fn garbage_collect(&self) -> Result<()> {
        if self.gc_running.swap(true, Ordering::AcqRel) {
            debug!(path = %self.path.display(), "Garbage collection already running");
            return Ok(());
        }

        let result = self.db.flush();
        self.gc_running.store(false, Ordering::Release);

        match result {
            Ok(0) => {
                debug!(path = %self.path.display(), "Garbage collection: nothing to reclaim");
                Ok(())
            }
            Ok(bytes) => {
                let size_on_disk = self.db.size_on_disk().unwrap_or_default();
                info!(
                    path = %self.path.display(),
                    bytes,
                    size_on_disk,
                    "Garbage collection flushed pages"
                );
                Ok(())
            }
            Err(e) => Err(e.into()),
        }
    }
}

/// Commit `txns` strictly in order.
///
/// On the first failure, reports how many transactions were already
/// durable. A failure of the very first transaction is returned unchanged.
pub(crate) fn commit_in_order<T, F>(txns: Vec<T>, mut commit: F) -> Result<usize>
where
    F: FnMut(T) -> Result<()>,
{
    let total = txns.len();
    for (committed, txn) in txns.into_iter().enumerate() {
        if let Err(source) = commit(txn) {
            if committed == 0 {
                warn!(total, error = %source, "Batch not committed; atomicity maintained");
                return Err(source);
            }
            error!(
                committed,
                total,
                error = %source,
                "Batch partially committed; atomicity lost"
            );
            return Err(StoreError::PartialCommit {
                committed,
                source: Box::new(source),
            });
        }
    }
    Ok(total)
}

// ── Transactions ────────────────────────────────────────────────────

/// Read view of the store.
pub struct ReadTxn<'a> {
    store: &'a OrderedStore,
}

impl<'a> ReadTxn<'a> {
    pub fn get(&self, key: &[u8]) -> Result<Option<IVec>> {
        Ok(self.store.db.get(key)?)
    }

    /// Read a key whose value is another key, then read that key.
    ///
    /// Returns the referenced key alongside its value.
    pub fn get_indirect(&self, index_key: &[u8]) -> Result<(IVec, IVec)> {
        let primary = self
            .get(index_key)?
            .ok_or_else(|| StoreError::not_found(index_key))?;
        let value = self
            .get(&primary)?
            .ok_or_else(|| StoreError::not_found(&primary))?;
        Ok((primary, value))
    }

    /// Open a cursor. It is unpositioned until the first `seek`.
    pub fn iterate(&self, descending: bool) -> Cursor<'a> {
        Cursor {
            tree: &self.store.db,
            descending,
            iter: None,
            current: None,
        }
    }
}

/// Write transaction with a bounded size. Dropping it discards every write.
pub struct WriteTxn<'a> {
    store: &'a OrderedStore,
    batch: sled::Batch,
    entries: usize,
    bytes: usize,
}

impl<'a> WriteTxn<'a> {
    /// Stage a write. Fails with `TxnTooBig` when the transaction is full;
    /// the staged writes are left untouched in that case.
    pub fn set(&mut self, key: &[u8], value: &[u8]) -> Result<()> {
        let bytes = self.bytes + key.len() + value.len();
        let entries = self.entries + 1;
        if !self.store.capacity.admits(entries, bytes) {
            return Err(StoreError::TxnTooBig { entries, bytes });
        }
        self.batch.insert(key, value);
        self.entries = entries;
        self.bytes = bytes;
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.entries
    }

    pub fn is_empty(&self) -> bool {
        self.entries == 0
    }

    /// Atomically apply every staged write.
    pub fn commit(self) -> Result<()> {
        self.store.db.apply_batch(self.batch)?;
        if self.store.flush_every_write {
            self.store.db.flush()?;
        }
        Ok(())
    }
}

// ── Cursor ──────────────────────────────────────────────────────────

/// Directional cursor over the key space.
pub struct Cursor<'a> {
    tree: &'a sled::Tree,
    descending: bool,
    iter: Option<Box<dyn Iterator<Item = RawEntry> + 'a>>,
    current: Option<(IVec, IVec)>,
}

impl<'a> Cursor<'a> {
    /// Position on the first key at or after `key` (ascending), or at or
    /// before `key` (descending).
    pub fn seek(&mut self, key: &[u8]) -> Result<()> {
        let iter: Box<dyn Iterator<Item = RawEntry> + 'a> = if self.descending {
            Box::new(self.tree.range(..=key.to_vec()).rev())
        } else {
            Box::new(self.tree.range(key.to_vec()..))
        };
        self.iter = Some(iter);
        self.next()
    }

    /// Advance to the next key in the cursor's direction.
    #[allow(clippy::should_implement_trait)]
    pub fn next(&mut self) -> Result<()> {
        self.current = match self.iter.as_mut().and_then(|iter| iter.next()) {
            Some(entry) => Some(entry?),
            None => None,
        };
        Ok(())
    }

    pub fn valid_for_prefix(&self, prefix: &[u8]) -> bool {
        self.current
            .as_ref()
            .map(|(key, _)| key.starts_with(prefix))
            .unwrap_or(false)
    }

    /// Current key and value, if positioned.
    pub fn entry(&self) -> Option<(&[u8], &[u8])> {
        self.current
            .as_ref()
            .map(|(key, value)| (key.as_ref(), value.as_ref()))
    }

    pub fn key(&self) -> Option<&[u8]> {
        self.current.as_ref().map(|(key, _)| key.as_ref())
    }
}

// ── Garbage collection trigger ──────────────────────────────────────

/// Counts successful batches and runs garbage collection in the
/// background every `every` batches.
pub struct GcTrigger {
    name: &'static str,
    every: u64,
    count: Arc<AtomicU64>,
}

impl GcTrigger {
    pub fn new(name: &'static str, every: u64) -> Self {
        Self {
            name,
            every: every.max(1),
            count: Arc::new(AtomicU64::new(0)),
        }
    }

    pub fn count(&self) -> u64 {
        self.count.load(Ordering::Acquire)
    }

    /// Record one batch. Returns whether a collection was started.
    ///
    /// The counter only resets once a collection succeeds, so a failed
    /// run is retried on the next batch.
    pub fn record_batch(&self, store: &OrderedStore) -> bool {
        let count = self.count.fetch_add(1, Ordering::AcqRel) + 1;
        if count < self.every {
            return false;
        }

        let store = store.clone();
        let counter = Arc::clone(&self.count);
        let name = self.name;
        let every = self.every;
        let spawned = thread::Builder::new()
            .name(format!("{name}-gc"))
            .spawn(move || {
                info!(store = name, attempt = count - every, "Value log garbage collection");
                match store.garbage_collect() {
                    Ok(()) => counter.store(0, Ordering::Release),
                    Err(e) => error!(store = name, error = %e, "Unexpected problem running garbage collection"),
                }
            });

        match spawned {
            Ok(_) => true,
            Err(e) => {
                error!(store = name, error = %e, "Failed to spawn garbage collection");
                false
            }
        }
    }
}
