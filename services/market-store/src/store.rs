//! Plumbing shared by the record stores
//!
//! Each record store (orders, trades, accounts) owns one `StoreCore`: its
//! database, the live configuration, a subscriber hub and the write lock
//! that keeps "commit, then notify" in one critical section, so a batch
//! delivered to subscribers is always fully committed.

use std::path::Path;
use std::sync::{Arc, Mutex, PoisonError, RwLock};

use tokio::sync::mpsc;
use tracing::{debug, error, info};

use crate::config::StoreConfig;
use crate::error::{Result, StoreError};
use crate::kv::{GcTrigger, OrderedStore, ReadTxn, WriteSet};
use crate::query::{decode, QueryContext};
use crate::subscription::SubscriptionHub;

/// Called when a write fails in a way that may leave the durable store
/// inconsistent. What to do about it (abort, alert, restart) is up to the
/// owning process.
pub type CriticalErrorHook = Arc<dyn Fn() + Send + Sync>;

/// Hook that does nothing, for callers that only want the returned error.
pub fn ignore_critical_errors() -> CriticalErrorHook {
    Arc::new(|| {})
}

pub(crate) struct StoreCore<T> {
    name: &'static str,
    kv: OrderedStore,
    config: RwLock<StoreConfig>,
    write_lock: Mutex<()>,
    hub: SubscriptionHub<mpsc::Sender<Vec<T>>>,
    gc: GcTrigger,
    on_critical_error: CriticalErrorHook,
}

impl<T: Clone> StoreCore<T> {
    pub(crate) fn open(
        name: &'static str,
        dir: impl AsRef<Path>,
        config: &StoreConfig,
        on_critical_error: CriticalErrorHook,
    ) -> Result<Self> {
        let kv = OrderedStore::open(dir, config)?;
        info!(store = name, path = %kv.path().display(), "Store opened");
        Ok(Self {
            name,
            kv,
            config: RwLock::new(config.clone()),
            write_lock: Mutex::new(()),
            hub: SubscriptionHub::new(name),
            gc: GcTrigger::new(name, config.gc_every_batches),
            on_critical_error,
        })
    }

    pub(crate) fn kv(&self) -> &OrderedStore {
        &self.kv
    }

    /// Derive the context a scan runs under: the caller's, bounded by the
    /// configured timeout.
    pub(crate) fn scan_context(&self, ctx: &QueryContext) -> QueryContext {
        let timeout = self.config.read().unwrap_or_else(PoisonError::into_inner).timeout;
        ctx.child_with_timeout(timeout)
    }

    pub(crate) fn reload_config(&self, config: StoreConfig) {
        info!(store = self.name, "Reloading configuration");
        let mut current = self.config.write().unwrap_or_else(PoisonError::into_inner);
        if current.timeout != config.timeout {
            info!(
                store = self.name,
                old = ?current.timeout,
                new = ?config.timeout,
                "Updating scan timeout"
            );
        }
        *current = config;
    }

    /// Persist `writes` and then notify subscribers with `batch`.
    ///
    /// `after_commit` runs between the two, still under the write lock.
    /// Storage failures are reported through the critical-error hook and
    /// returned; subscribers are not notified of a failed batch.
    pub(crate) fn commit<F>(&self, writes: WriteSet, batch: Vec<T>, after_commit: F) -> Result<usize>
    where
        F: FnOnce(&[T]),
    {
        let _guard = self.write_lock.lock().unwrap_or_else(PoisonError::into_inner);

        let entries = writes.len();
        let committed = match self.kv.write_batch(writes) {
            Ok(committed) => committed,
            Err(e) => {
                error!(store = self.name, records = batch.len(), error = %e, "Unable to write batch");
                if e.is_critical() {
                    (self.on_critical_error)();
                }
                return Err(e);
            }
        };
        debug!(store = self.name, records = batch.len(), entries, txns = committed, "Batch committed");

        self.gc.record_batch(&self.kv);
        after_commit(&batch);
        self.notify(batch);
        Ok(committed)
    }

    fn notify(&self, batch: Vec<T>) {
        if batch.is_empty() {
            return;
        }
        self.hub.notify(&batch);
    }

    pub(crate) fn subscribe(&self, sender: mpsc::Sender<Vec<T>>) -> u64 {
        self.hub.subscribe(sender)
    }

    pub(crate) fn unsubscribe(&self, id: u64) -> Result<()> {
        self.hub.unsubscribe(id)
    }

    pub(crate) fn subscriber_count(&self) -> usize {
        self.hub.len()
    }

    pub(crate) fn close(&self) -> Result<()> {
        let _guard = self.write_lock.lock().unwrap_or_else(PoisonError::into_inner);
        self.kv.close()?;
        info!(store = self.name, "Store closed");
        Ok(())
    }
}

impl<T: Clone + serde::de::DeserializeOwned> StoreCore<T> {
    /// Read one record stored directly under `key`.
    pub(crate) fn get_record(&self, key: &[u8]) -> Result<T> {
        let bytes = self.kv.get(key)?.ok_or_else(|| StoreError::not_found(key))?;
        self.decode_logged(key, &bytes)
    }

    /// Read the record an index entry points at.
    pub(crate) fn get_indexed(&self, index_key: &[u8]) -> Result<T> {
        let (primary, bytes) = self.kv.read_txn().get_indirect(index_key)?;
        self.decode_logged(&primary, &bytes)
    }

    fn decode_logged(&self, key: &[u8], bytes: &[u8]) -> Result<T> {
        decode(key, bytes).map_err(|e| {
            error!(store = self.name, error = %e, "Failed to decode stored record");
            e
        })
    }
}

/// Scan resolver for index entries: load and decode the primary record the
/// entry points at. A dangling entry is an error, not a skip.
pub(crate) fn follow_index<T: serde::de::DeserializeOwned>(
    txn: &ReadTxn<'_>,
    index_key: &[u8],
    primary: &[u8],
) -> Result<Option<T>> {
    let bytes = txn.get(primary)?.ok_or_else(|| {
        error!(
            index_key = %String::from_utf8_lossy(index_key),
            primary_key = %String::from_utf8_lossy(primary),
            "Index entry points at a missing record"
        );
        StoreError::not_found(primary)
    })?;
    decode(primary, &bytes).map(Some)
}

/// Scan resolver for keys that hold the record itself.
pub(crate) fn read_direct<T: serde::de::DeserializeOwned>(
    _txn: &ReadTxn<'_>,
    key: &[u8],
    value: &[u8],
) -> Result<Option<T>> {
    decode(key, value).map(Some)
}
