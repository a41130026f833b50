//! Query context and paginated prefix scans
//!
//! Every scan runs under a [`QueryContext`]: an optional deadline plus a
//! cancellation token. The context is checked on every step of a scan,
//! not only on entry, because a prefix can match an unbounded number of
//! keys.
//!
//! - deadline passed: the scan fails with `StoreError::Timeout`
//! - cancelled before the deadline: the scan returns an empty page

use std::time::{Duration, Instant};

use tokio_util::sync::CancellationToken;
use tracing::error;

use crate::error::{Result, StoreError};
use crate::keys::Prefix;
use crate::kv::{OrderedStore, ReadTxn};

/// Why a scan stopped early.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Interrupt {
    TimedOut,
    Cancelled,
}

/// Deadline and cancellation for one query.
#[derive(Debug, Clone, Default)]
pub struct QueryContext {
    deadline: Option<Instant>,
    cancel: CancellationToken,
}

impl QueryContext {
    /// A context that never times out and is never cancelled.
    pub fn background() -> Self {
        Self::default()
    }

    /// A context cancelled through `cancel`.
    pub fn with_cancel(cancel: CancellationToken) -> Self {
        Self {
            deadline: None,
            cancel,
        }
    }

    /// A context that expires `timeout` from now.
    pub fn with_timeout(timeout: Duration) -> Self {
        Self::background().child_with_timeout(timeout)
    }

    /// Same context, with an absolute deadline.
    pub fn with_deadline(mut self, deadline: Instant) -> Self {
        self.deadline = Some(match self.deadline {
            Some(current) => current.min(deadline),
            None => deadline,
        });
        self
    }

    /// Derive a child that expires after `timeout` or with its parent,
    /// whichever comes first. Cancelling the parent cancels the child.
    pub fn child_with_timeout(&self, timeout: Duration) -> Self {
        let child = Self {
            deadline: self.deadline,
            cancel: self.cancel.child_token(),
        };
        match Instant::now().checked_add(timeout) {
            Some(deadline) => child.with_deadline(deadline),
            None => child,
        }
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Check whether the query must stop now.
    pub fn interrupted(&self) -> Option<Interrupt> {
        if let Some(deadline) = self.deadline {
            if Instant::now() >= deadline {
                return Some(Interrupt::TimedOut);
            }
        }
        if self.cancel.is_cancelled() {
            return Some(Interrupt::Cancelled);
        }
        None
    }
}

/// Pagination for scans: drop `skip` matches, then collect up to `limit`
/// (`0` = unbounded). `descending` returns the most recently written
/// matches first.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Page {
    pub skip: u64,
    pub limit: u64,
    pub descending: bool,
}

impl Page {
    pub fn new(skip: u64, limit: u64, descending: bool) -> Self {
        Self {
            skip,
            limit,
            descending,
        }
    }

    /// Every match, oldest first.
    pub fn all() -> Self {
        Self::default()
    }
}

/// Scan the keys under `prefix` and resolve each one into a record.
///
/// `resolve` returns `Ok(None)` to filter an entry out; filtered entries do
/// not count towards `skip`. Records that fail to decode are logged and
/// skipped so one bad record does not fail the page.
pub(crate) fn scan<T, F>(
    store: &OrderedStore,
    ctx: &QueryContext,
    prefix: &Prefix,
    page: Page,
    store_name: &'static str,
    mut resolve: F,
) -> Result<Vec<T>>
where
    F: FnMut(&ReadTxn<'_>, &[u8], &[u8]) -> Result<Option<T>>,
{
    let txn = store.read_txn();
    let mut cursor = txn.iterate(page.descending);
    cursor.seek(&prefix.seek)?;

    let mut skip = page.skip;
    let mut result = Vec::new();

    while cursor.valid_for_prefix(&prefix.valid) {
        match ctx.interrupted() {
            Some(Interrupt::TimedOut) => return Err(StoreError::Timeout),
            Some(Interrupt::Cancelled) => return Ok(Vec::new()),
            None => {}
        }

        if let Some((key, value)) = cursor.entry() {
            match resolve(&txn, key, value) {
                Ok(Some(item)) => {
                    if skip > 0 {
                        skip -= 1;
                    } else {
                        result.push(item);
                        if page.limit != 0 && result.len() as u64 >= page.limit {
                            return Ok(result);
                        }
                    }
                }
                Ok(None) => {}
                Err(e @ StoreError::Serialization { .. }) => {
                    error!(store = store_name, error = %e, "Skipping unreadable record during scan");
                }
                Err(e) => {
                    error!(
                        store = store_name,
                        key = %String::from_utf8_lossy(key),
                        error = %e,
                        "Failed to resolve record during scan"
                    );
                    return Err(e);
                }
            }
        }

        cursor.next()?;
    }

    Ok(result)
}

/// Decode a stored record, tagging failures with their key.
pub(crate) fn decode<T: serde::de::DeserializeOwned>(key: &[u8], bytes: &[u8]) -> Result<T> {
    bincode::deserialize(bytes).map_err(|e| StoreError::serialization(key, e))
}

/// Encode a record for storage.
pub(crate) fn encode<T: serde::Serialize>(key: &[u8], record: &T) -> Result<Vec<u8>> {
    bincode::serialize(record).map_err(|e| StoreError::serialization(key, e))
}
