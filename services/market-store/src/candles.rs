//! Candle engine
//!
//! Trades are folded into a per-market buffer of candles, one bucket per
//! interval and bucket start. `generate_candles_from_buffer` then merges the
//! buffer into the durable store in a single batch:
//!
//! ```text
//! bucket not stored             → insert buffered candle, notify
//! bucket stored, volume != 0    → merge into stored candle, notify
//! bucket stored, volume == 0    → leave stored candle untouched
//! every bucket                  → LCM:<market>_I:<interval> points at it
//! ```
//!
//! A new buffer seeds the current bucket of every interval with a
//! zero-volume candle carrying the previous close, so quiet periods still
//! produce a flat candle.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::{Mutex, MutexGuard, PoisonError, RwLock};

use tokio::sync::mpsc;
use tracing::{debug, error, info};
use types::candle::{Candle, Interval};
use types::ids::{MarketId, TradeId};
use types::trade::Trade;

use crate::config::StoreConfig;
use crate::error::{Result, StoreError};
use crate::keys::{self, Prefix};
use crate::kv::{GcTrigger, OrderedStore, WriteSet};
use crate::query::{decode, encode, scan, Page, QueryContext};
use crate::store::{read_direct, CriticalErrorHook};
use crate::subscription::{try_deliver, SubscriptionHub};

const STORE_NAME: &str = "candles";

/// Position of a candle inside a buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BucketKey {
    pub timestamp: i64,
    pub interval: Interval,
}

impl BucketKey {
    pub fn new(interval: Interval, timestamp: i64) -> Self {
        Self {
            timestamp: interval.round(timestamp),
            interval,
        }
    }
}

/// Candles accumulated since the last `start_new_buffer`, oldest bucket
/// first.
pub type CandleBuffer = BTreeMap<BucketKey, Candle>;

/// A candle subscription: one market, one interval.
#[derive(Debug, Clone)]
pub struct CandleTransport {
    pub market: MarketId,
    pub interval: Interval,
    pub sender: mpsc::Sender<Candle>,
}

impl CandleTransport {
    pub fn new(market: MarketId, interval: Interval, sender: mpsc::Sender<Candle>) -> Self {
        Self {
            market,
            interval,
            sender,
        }
    }

    fn wants(&self, market: &MarketId, candle: &Candle) -> bool {
        &self.market == market && self.interval == candle.interval
    }
}

#[derive(Default)]
struct MarketBuffer {
    candles: CandleBuffer,
    trades: HashSet<TradeId>,
}

/// Bucket start of `timestamp` for every supported interval.
pub fn rounded_timestamps(timestamp: i64) -> BTreeMap<Interval, i64> {
    Interval::ALL
        .iter()
        .map(|interval| (*interval, interval.round(timestamp)))
        .collect()
}

/// Builds candles from trades and persists them.
pub struct CandleEngine {
    kv: OrderedStore,
    config: RwLock<StoreConfig>,
    buffers: Mutex<HashMap<MarketId, MarketBuffer>>,
    hub: SubscriptionHub<CandleTransport>,
    gc: GcTrigger,
    on_critical_error: CriticalErrorHook,
}

impl CandleEngine {
    /// Open the candle database under `config.candles_dir()`.
    pub fn open(config: &StoreConfig, on_critical_error: CriticalErrorHook) -> Result<Self> {
        let kv = OrderedStore::open(config.candles_dir(), config)?;
        info!(store = STORE_NAME, path = %kv.path().display(), "Store opened");
        Ok(Self {
            kv,
            config: RwLock::new(config.clone()),
            buffers: Mutex::new(HashMap::new()),
            hub: SubscriptionHub::new(STORE_NAME),
            gc: GcTrigger::new(STORE_NAME, config.gc_every_batches),
            on_critical_error,
        })
    }

    pub fn reload_config(&self, config: StoreConfig) {
        info!(store = STORE_NAME, "Reloading configuration");
        let mut current = self.config.write().unwrap_or_else(PoisonError::into_inner);
        if current.timeout != config.timeout {
            info!(
                store = STORE_NAME,
                old = ?current.timeout,
                new = ?config.timeout,
                "Updating scan timeout"
            );
        }
        *current = config;
    }

    fn buffers(&self) -> MutexGuard<'_, HashMap<MarketId, MarketBuffer>> {
        self.buffers.lock().unwrap_or_else(PoisonError::into_inner)
    }

    // ── Buffering ───────────────────────────────────────────────────

    /// Replace the buffer of `market` with one whose current bucket, for
    /// every interval, is a flat zero-volume candle at the previous close.
    pub fn start_new_buffer(&self, market: &MarketId, timestamp: i64) -> Result<()> {
        market.validate()?;
        let mut buffers = self.buffers();
        self.reset_buffer(&mut buffers, market, timestamp)
    }

    fn reset_buffer(
        &self,
        buffers: &mut HashMap<MarketId, MarketBuffer>,
        market: &MarketId,
        timestamp: i64,
    ) -> Result<()> {
        let previous = buffers.remove(market).unwrap_or_default();
        let mut next = MarketBuffer::default();

        for interval in Interval::ALL {
            let bucket = BucketKey::new(interval, timestamp);
            let mut last_close = previous
                .candles
                .get(&bucket)
                .map(|candle| candle.close)
                .unwrap_or(0);
            if last_close == 0 {
                last_close = self
                    .most_recent_candle(market, interval)?
                    .map(|candle| candle.close)
                    .unwrap_or(0);
            }
            next.candles
                .insert(bucket, Candle::new(bucket.timestamp, last_close, 0, interval));
        }

        debug!(market = %market, timestamp, "Started new candle buffer");
        buffers.insert(market.clone(), next);
        Ok(())
    }

    /// Fold one trade into every interval of its market's buffer.
    ///
    /// A trade id already folded into the current buffer is ignored.
    pub fn add_trade_to_buffer(&self, trade: &Trade) -> Result<()> {
        trade.market.validate()?;
        let mut buffers = self.buffers();
        if !buffers.contains_key(&trade.market) {
            info!(
                market = %trade.market,
                timestamp = trade.timestamp,
                "No candle buffer for market, starting one at trade time"
            );
            self.reset_buffer(&mut buffers, &trade.market, trade.timestamp)?;
        }

        let Some(buffer) = buffers.get_mut(&trade.market) else {
            return Ok(());
        };
        if !buffer.trades.insert(trade.id.clone()) {
            debug!(market = %trade.market, trade_id = %trade.id, "Trade already in candle buffer");
            return Ok(());
        }

        for interval in Interval::ALL {
            let bucket = BucketKey::new(interval, trade.timestamp);
            buffer
                .candles
                .entry(bucket)
                .and_modify(|candle| candle.apply_trade(trade.price, trade.size))
                .or_insert_with(|| Candle::new(bucket.timestamp, trade.price, trade.size, interval));
        }
        Ok(())
    }

    /// Copy of the current buffer of `market`, if any.
    pub fn buffer(&self, market: &MarketId) -> Option<CandleBuffer> {
        self.buffers().get(market).map(|buffer| buffer.candles.clone())
    }

    // ── Persistence ─────────────────────────────────────────────────

    /// Merge the current buffer of `market` into the store.
    ///
    /// The buffer itself is kept: it is what the next `start_new_buffer`
    /// takes its closing prices from.
    pub fn generate_candles_from_buffer(&self, market: &MarketId) -> Result<()> {
        let buffers = self.buffers();
        let Some(buffer) = buffers.get(market) else {
            debug!(market = %market, "No candle buffer to generate from");
            return Ok(());
        };
        self.write_buffer(market, &buffer.candles)
    }

    /// Merge an explicit buffer into the store.
    pub fn generate_candles(&self, market: &MarketId, buffer: &CandleBuffer) -> Result<()> {
        market.validate()?;
        let _guard = self.buffers();
        self.write_buffer(market, buffer)
    }

    fn write_buffer(&self, market: &MarketId, buffer: &CandleBuffer) -> Result<()> {
        let txn = self.kv.read_txn();
        let mut writes = WriteSet::new();
        let mut touched = Vec::new();

        for candle in buffer.values() {
            let key = keys::candle_key(market.as_str(), candle.interval, candle.timestamp);
            let updated = match txn.get(&key)? {
                None => Some(candle.clone()),
                Some(bytes) => {
                    let mut stored: Candle = match decode(&key, &bytes) {
                        Ok(stored) => stored,
                        Err(e) => {
                            error!(store = STORE_NAME, error = %e, "Failed to decode stored candle");
                            continue;
                        }
                    };
                    (candle.volume != 0).then(|| {
                        stored.merge(candle);
                        stored
                    })
                }
            };

            let pointer = keys::last_candle_key(market.as_str(), candle.interval);
            match updated {
                Some(updated) => {
                    writes
                        .record(key.clone(), encode(&key, &updated)?)
                        .index(pointer, key);
                    touched.push(updated);
                }
                // stored bucket left as is
                None => {
                    writes.record(pointer, key);
                }
            }
        }

        if writes.is_empty() {
            return Ok(());
        }
        let entries = writes.len();
        if let Err(e) = self.kv.write_batch(writes) {
            error!(store = STORE_NAME, market = %market, error = %e, "Unable to write candles");
            if e.is_critical() {
                (self.on_critical_error)();
            }
            return Err(e);
        }
        debug!(store = STORE_NAME, market = %market, entries, candles = touched.len(), "Candles committed");

        self.gc.record_batch(&self.kv);
        self.notify(market, &touched);
        Ok(())
    }

    fn notify(&self, market: &MarketId, candles: &[Candle]) {
        if candles.is_empty() {
            return;
        }
        let name = self.hub.name();
        self.hub.for_each(|id, transport| {
            for candle in candles.iter().filter(|candle| transport.wants(market, candle)) {
                try_deliver(name, id, &transport.sender, candle.clone());
            }
        });
    }

    // ── Queries ─────────────────────────────────────────────────────

    /// Candles of `market` and `interval` from the bucket containing
    /// `since` onwards, oldest first.
    pub fn get_candles(
        &self,
        ctx: &QueryContext,
        market: &MarketId,
        since: i64,
        interval: Interval,
    ) -> Result<Vec<Candle>> {
        let (timeout, min) = {
            let config = self.config.read().unwrap_or_else(PoisonError::into_inner);
            (config.timeout, config.candle_min_since)
        };
        if since < min {
            return Err(StoreError::InvalidSince { since, min });
        }

        let ctx = ctx.child_with_timeout(timeout);
        let prefix = Prefix {
            seek: keys::candle_key(market.as_str(), interval, interval.round(since)),
            valid: keys::candle_prefix(market.as_str(), interval, false).valid,
        };
        scan(&self.kv, &ctx, &prefix, Page::all(), STORE_NAME, read_direct)
    }

    /// The candle the last-candle pointer of `market` and `interval`
    /// refers to. NotFound until the first candle is generated.
    pub fn fetch_last_candle(&self, market: &MarketId, interval: Interval) -> Result<Candle> {
        let key = keys::last_candle_key(market.as_str(), interval);
        let (primary, bytes) = self.kv.read_txn().get_indirect(&key)?;
        decode(&primary, &bytes)
    }

    /// Latest stored candle: through the pointer when present, else the
    /// last key under the candle prefix.
    fn most_recent_candle(&self, market: &MarketId, interval: Interval) -> Result<Option<Candle>> {
        match self.fetch_last_candle(market, interval) {
            Ok(candle) => return Ok(Some(candle)),
            Err(e) if e.is_not_found() => {}
            Err(e) => {
                error!(store = STORE_NAME, market = %market, interval = %interval, error = %e, "Failed to fetch last candle");
            }
        }

        let prefix = keys::candle_prefix(market.as_str(), interval, true);
        let txn = self.kv.read_txn();
        let mut cursor = txn.iterate(true);
        cursor.seek(&prefix.seek)?;
        match cursor.entry() {
            Some((key, value)) if key.starts_with(&prefix.valid) => Ok(decode(key, value).ok()),
            _ => Ok(None),
        }
    }

    // ── Subscriptions ───────────────────────────────────────────────

    /// Receive every persisted candle of one market and interval. Delivery
    /// is lossy.
    pub fn subscribe(&self, transport: CandleTransport) -> u64 {
        self.hub.subscribe(transport)
    }

    pub fn unsubscribe(&self, id: u64) -> Result<()> {
        self.hub.unsubscribe(id)
    }

    pub fn subscriber_count(&self) -> usize {
        self.hub.len()
    }

    pub fn close(&self) -> Result<()> {
        let _guard = self.buffers();
        self.kv.close()?;
        info!(store = STORE_NAME, "Store closed");
        Ok(())
    }
}
