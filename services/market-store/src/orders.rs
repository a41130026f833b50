//! Order store
//!
//! Every order version is written once under its version key; every other
//! access path is an index entry holding that key:
//!
//! ```text
//! ID:<order>_V:<version>   → Order bytes
//! ID:<order>               → latest version key
//! M:<market>_ID:<order>    → latest version key
//! P:<party>_ID:<order>     → latest version key
//! R:<reference>            → latest version key
//! ```
//!
//! Committed batches also drive the in-memory [`DepthEngine`], so depth
//! only ever reflects orders that are durable.

use std::sync::Arc;

use tokio::sync::mpsc;
use tracing::debug;
use types::ids::{MarketId, OrderId, PartyId};
use types::order::Order;

use crate::config::StoreConfig;
use crate::depth::{accumulate, DepthEngine, DepthSnapshot, PriceLevel};
use crate::error::{Result, StoreError};
use crate::keys;
use crate::kv::WriteSet;
use crate::query::{encode, scan, Interrupt, Page, QueryContext};
use crate::store::{follow_index, read_direct, CriticalErrorHook, StoreCore};

const STORE_NAME: &str = "orders";

/// Persistent, indexed store of order versions.
pub struct OrderStore {
    core: StoreCore<Order>,
    depth: Arc<DepthEngine>,
}

impl OrderStore {
    /// Open the order database under `config.orders_dir()`.
    pub fn open(config: &StoreConfig, on_critical_error: CriticalErrorHook) -> Result<Self> {
        Ok(Self {
            core: StoreCore::open(STORE_NAME, config.orders_dir(), config, on_critical_error)?,
            depth: Arc::new(DepthEngine::new()),
        })
    }

    /// Depth maintained from committed orders.
    pub fn depth(&self) -> Arc<DepthEngine> {
        Arc::clone(&self.depth)
    }

    pub fn reload_config(&self, config: StoreConfig) {
        self.core.reload_config(config);
    }

    /// Persist a batch of order versions, update depth and notify
    /// subscribers.
    ///
    /// Versions of the same order must appear in increasing version order;
    /// the last one becomes the latest version for every index.
    pub fn save_batch(&self, orders: Vec<Order>) -> Result<()> {
        if orders.is_empty() {
            return Ok(());
        }

        let mut writes = WriteSet::new();
        for order in &orders {
            order.id.validate()?;
            order.market.validate()?;
            order.party.validate()?;

            let id = order.id.as_str();
            let primary = keys::order_version_key(id, order.version);
            writes
                .record(primary.clone(), encode(&primary, order)?)
                .index(keys::order_id_key(id), primary.clone())
                .index(keys::order_market_key(order.market.as_str(), id), primary.clone())
                .index(keys::order_party_key(order.party.as_str(), id), primary.clone());
            if !order.reference.is_empty() {
                writes.index(keys::order_reference_key(&order.reference), primary);
            }
        }

        let depth = &self.depth;
        self.core.commit(writes, orders, |committed| depth.update_batch(committed))?;
        Ok(())
    }

    /// Latest versions of the orders of `market`.
    pub fn get_by_market(&self, ctx: &QueryContext, market: &MarketId, page: Page) -> Result<Vec<Order>> {
        let ctx = self.core.scan_context(ctx);
        let prefix = keys::market_prefix(market.as_str(), page.descending);
        scan(self.core.kv(), &ctx, &prefix, page, STORE_NAME, follow_index)
    }

    /// Latest versions of the orders of `party`.
    pub fn get_by_party(&self, ctx: &QueryContext, party: &PartyId, page: Page) -> Result<Vec<Order>> {
        let ctx = self.core.scan_context(ctx);
        let prefix = keys::party_prefix(party.as_str(), page.descending);
        scan(self.core.kv(), &ctx, &prefix, page, STORE_NAME, follow_index)
    }

    pub fn get_by_market_and_id(&self, market: &MarketId, id: &OrderId) -> Result<Order> {
        self.core
            .get_indexed(&keys::order_market_key(market.as_str(), id.as_str()))
    }

    pub fn get_by_party_and_id(&self, party: &PartyId, id: &OrderId) -> Result<Order> {
        self.core
            .get_indexed(&keys::order_party_key(party.as_str(), id.as_str()))
    }

    pub fn get_by_reference(&self, reference: &str) -> Result<Order> {
        self.core.get_indexed(&keys::order_reference_key(reference))
    }

    /// One version of an order, or the latest one when `version` is `None`.
    pub fn get_by_order_id(&self, id: &OrderId, version: Option<u64>) -> Result<Order> {
        match version {
            Some(version) => self
                .core
                .get_record(&keys::order_version_key(id.as_str(), version)),
            None => self.core.get_indexed(&keys::order_id_key(id.as_str())),
        }
    }

    /// Every stored version of an order.
    pub fn get_all_versions_by_order_id(&self, ctx: &QueryContext, id: &OrderId, page: Page) -> Result<Vec<Order>> {
        let ctx = self.core.scan_context(ctx);
        let prefix = keys::order_version_prefix(id.as_str(), page.descending);
        scan(self.core.kv(), &ctx, &prefix, page, STORE_NAME, read_direct)
    }

    /// Depth of `market` with cumulative volume filled in, `limit` levels
    /// per side (`0` = all).
    pub fn get_market_depth(&self, ctx: &QueryContext, market: &MarketId, limit: usize) -> Result<DepthSnapshot> {
        let ctx = self.core.scan_context(ctx);
        let mut snapshot = self.depth.depth(market, limit);

        for side in [&mut snapshot.buy, &mut snapshot.sell] {
            match ctx.interrupted() {
                Some(Interrupt::TimedOut) => return Err(StoreError::Timeout),
                Some(Interrupt::Cancelled) => return Ok(DepthSnapshot::default()),
                None => accumulate(side),
            }
        }
        debug!(
            market = %market,
            buy_levels = snapshot.buy.len(),
            sell_levels = snapshot.sell.len(),
            "Market depth computed"
        );
        Ok(snapshot)
    }

    /// Best buy levels of `market`, without cumulative volume.
    pub fn buy_side(&self, market: &MarketId, limit: usize) -> Vec<PriceLevel> {
        self.depth.buy_side(market, limit)
    }

    /// Best sell levels of `market`, without cumulative volume.
    pub fn sell_side(&self, market: &MarketId, limit: usize) -> Vec<PriceLevel> {
        self.depth.sell_side(market, limit)
    }

    /// Receive every committed batch of orders. Delivery is lossy.
    pub fn subscribe(&self, sender: mpsc::Sender<Vec<Order>>) -> u64 {
        self.core.subscribe(sender)
    }

    pub fn unsubscribe(&self, id: u64) -> Result<()> {
        self.core.unsubscribe(id)
    }

    pub fn subscriber_count(&self) -> usize {
        self.core.subscriber_count()
    }

    pub fn close(&self) -> Result<()> {
        self.core.close()
    }
}
