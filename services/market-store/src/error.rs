//! Error taxonomy for the stores
//!
//! - NotFound: expected, returned to the caller, never escalated.
//! - Validation: the caller sent something the store will not write or scan.
//! - Serialization: stored bytes could not be decoded.
//! - Storage engine: the durable store may now be inconsistent; stores route
//!   these through their critical-error hook in addition to returning them.
//! - Timeout: a scan ran past its deadline.

use thiserror::Error;
use types::errors::IdError;

/// Result alias used throughout the crate.
pub type Result<T> = std::result::Result<T, StoreError>;

#[derive(Error, Debug)]
pub enum StoreError {
    // ── Not found ───────────────────────────────────────────────────

    #[error("Not found: {0}")]
    NotFound(String),

    // ── Validation ──────────────────────────────────────────────────

    #[error("Trade {trade_id} has unspecified type")]
    UnspecifiedTradeType { trade_id: String },

    #[error("Account for asset {asset} has unspecified type")]
    UnspecifiedAccountType { asset: String },

    #[error("Invalid since timestamp {since}: must be epoch nanoseconds not earlier than {min}")]
    InvalidSince { since: i64, min: i64 },

    #[error("Invalid id: {0}")]
    InvalidId(#[from] IdError),

    // ── Serialization ───────────────────────────────────────────────

    #[error("Serialization error for key {key}: {source}")]
    Serialization {
        key: String,
        #[source]
        source: bincode::Error,
    },

    // ── Storage engine ──────────────────────────────────────────────

    #[error("Storage engine error: {0}")]
    Storage(#[from] sled::Error),

    #[error("Transaction too big: {entries} entries, {bytes} bytes")]
    TxnTooBig { entries: usize, bytes: usize },

    #[error("Batch partially committed: {committed} transaction(s) durable before failure: {source}")]
    PartialCommit {
        committed: usize,
        #[source]
        source: Box<StoreError>,
    },

    // ── Timeout / subscriptions ─────────────────────────────────────

    #[error("Timeout reached")]
    Timeout,

    #[error("Subscriber does not exist with id: {0}")]
    SubscriberNotFound(u64),
}

impl StoreError {
    /// Whether the error means the durable store may be inconsistent.
    pub fn is_critical(&self) -> bool {
        matches!(
            self,
            StoreError::Storage(_) | StoreError::TxnTooBig { .. } | StoreError::PartialCommit { .. }
        )
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, StoreError::NotFound(_))
    }

    pub(crate) fn not_found(key: &[u8]) -> Self {
        StoreError::NotFound(String::from_utf8_lossy(key).into_owned())
    }

    pub(crate) fn serialization(key: &[u8], source: bincode::Error) -> Self {
        StoreError::Serialization {
            key: String::from_utf8_lossy(key).into_owned(),
            source,
        }
    }
}
