//! Store configuration
//!
//! One `StoreConfig` is shared by every store; each store opens its own
//! database under a subdirectory of `dir`.

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Default scan timeout.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(5);

/// Number of successful batches between two garbage collection runs.
pub const DEFAULT_GC_EVERY_BATCHES: u64 = 300;

/// Earliest `since` accepted by candle queries: 2018-01-01T00:00:01Z in
/// Unix nanoseconds.
pub const DEFAULT_CANDLE_MIN_SINCE: i64 = 1_514_764_801_000_000_000;

/// Configuration for the market-data stores.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// Root directory for all store databases.
    pub dir: PathBuf,
    /// Timeout applied to every scan.
    pub timeout: Duration,
    /// Maximum number of writes held by one transaction.
    pub txn_max_entries: usize,
    /// Maximum key + value bytes held by one transaction.
    pub txn_max_bytes: usize,
    /// Successful batches between two garbage collection runs.
    pub gc_every_batches: u64,
    /// Buffer size for subscriber channels built by [`StoreConfig::channel`].
    pub channel_capacity: usize,
    /// Earliest `since` accepted by candle queries, Unix nanos.
    pub candle_min_since: i64,
    /// Flush to disk after every committed transaction.
    pub flush_every_write: bool,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            dir: PathBuf::from("./store"),
            timeout: DEFAULT_TIMEOUT,
            txn_max_entries: 10_000,
            txn_max_bytes: 4 * 1024 * 1024, // 4 MiB
            gc_every_batches: DEFAULT_GC_EVERY_BATCHES,
            channel_capacity: 1024,
            candle_min_since: DEFAULT_CANDLE_MIN_SINCE,
            flush_every_write: true,
        }
    }
}

impl StoreConfig {
    /// Create a config rooted at `dir` with defaults everywhere else.
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            ..Default::default()
        }
    }

    pub fn orders_dir(&self) -> PathBuf {
        self.dir.join("orders")
    }

    pub fn trades_dir(&self) -> PathBuf {
        self.dir.join("trades")
    }

    pub fn accounts_dir(&self) -> PathBuf {
        self.dir.join("accounts")
    }

    pub fn candles_dir(&self) -> PathBuf {
        self.dir.join("candles")
    }

    /// Bounded channel sized for subscriber delivery.
    pub fn channel<T>(&self) -> (tokio::sync::mpsc::Sender<T>, tokio::sync::mpsc::Receiver<T>) {
        tokio::sync::mpsc::channel(self.channel_capacity.max(1))
    }
}
