//! Trade store
//!
//! ```text
//! M:<market>_ID:<trade>    → Trade bytes
//! ID:<trade>               → primary key
//! P:<buyer>_ID:<trade>     → primary key
//! P:<seller>_ID:<trade>    → primary key
//! O:<buy order>_ID:<trade> → primary key
//! O:<sell order>_ID:<trade>→ primary key
//! ```
//!
//! Party and order scans accept an optional market filter. It is checked
//! against the primary key held by the index entry, before the trade is
//! loaded and before `skip` is applied.

use tokio::sync::mpsc;
use types::ids::{MarketId, OrderId, PartyId, TradeId};
use types::trade::{Trade, TradeType};

use crate::config::StoreConfig;
use crate::error::{Result, StoreError};
use crate::keys::{self, Prefix};
use crate::kv::WriteSet;
use crate::query::{encode, scan, Page, QueryContext};
use crate::store::{follow_index, read_direct, CriticalErrorHook, StoreCore};

const STORE_NAME: &str = "trades";

/// Persistent, indexed store of trades.
pub struct TradeStore {
    core: StoreCore<Trade>,
}

impl TradeStore {
    /// Open the trade database under `config.trades_dir()`.
    pub fn open(config: &StoreConfig, on_critical_error: CriticalErrorHook) -> Result<Self> {
        Ok(Self {
            core: StoreCore::open(STORE_NAME, config.trades_dir(), config, on_critical_error)?,
        })
    }

    pub fn reload_config(&self, config: StoreConfig) {
        self.core.reload_config(config);
    }

    /// Persist a batch of trades and notify subscribers.
    ///
    /// The whole batch is rejected if any trade has an unspecified type.
    pub fn save_batch(&self, trades: Vec<Trade>) -> Result<()> {
        if trades.is_empty() {
            return Ok(());
        }

        let mut writes = WriteSet::new();
        for trade in &trades {
            if trade.trade_type == TradeType::Unspecified {
                return Err(StoreError::UnspecifiedTradeType {
                    trade_id: trade.id.to_string(),
                });
            }
            trade.id.validate()?;
            trade.market.validate()?;
            trade.buyer.validate()?;
            trade.seller.validate()?;

            let id = trade.id.as_str();
            let primary = keys::trade_market_key(trade.market.as_str(), id);
            writes
                .record(primary.clone(), encode(&primary, trade)?)
                .index(keys::trade_id_key(id), primary.clone())
                .index(keys::trade_party_key(trade.buyer.as_str(), id), primary.clone())
                .index(keys::trade_party_key(trade.seller.as_str(), id), primary.clone());
            // network trades have no order on one side
            for order in [&trade.buy_order, &trade.sell_order] {
                if order.as_str().is_empty() {
                    continue;
                }
                order.validate()?;
                writes.index(keys::trade_order_key(order.as_str(), id), primary.clone());
            }
        }

        self.core.commit(writes, trades, |_| {})?;
        Ok(())
    }

    pub fn get_by_market(&self, ctx: &QueryContext, market: &MarketId, page: Page) -> Result<Vec<Trade>> {
        let ctx = self.core.scan_context(ctx);
        let prefix = keys::market_prefix(market.as_str(), page.descending);
        scan(self.core.kv(), &ctx, &prefix, page, STORE_NAME, read_direct)
    }

    pub fn get_by_market_and_id(&self, market: &MarketId, id: &TradeId) -> Result<Trade> {
        self.core
            .get_record(&keys::trade_market_key(market.as_str(), id.as_str()))
    }

    pub fn get_by_id(&self, id: &TradeId) -> Result<Trade> {
        self.core.get_indexed(&keys::trade_id_key(id.as_str()))
    }

    /// Trades where `party` is buyer or seller, optionally in one market.
    pub fn get_by_party(
        &self,
        ctx: &QueryContext,
        party: &PartyId,
        page: Page,
        market: Option<&MarketId>,
    ) -> Result<Vec<Trade>> {
        let prefix = keys::party_prefix(party.as_str(), page.descending);
        self.scan_index(ctx, &prefix, page, market)
    }

    pub fn get_by_party_and_id(&self, party: &PartyId, id: &TradeId) -> Result<Trade> {
        self.core
            .get_indexed(&keys::trade_party_key(party.as_str(), id.as_str()))
    }

    /// Trades on either side of `order`, optionally in one market.
    pub fn get_by_order_id(
        &self,
        ctx: &QueryContext,
        order: &OrderId,
        page: Page,
        market: Option<&MarketId>,
    ) -> Result<Vec<Trade>> {
        let prefix = keys::order_prefix(order.as_str(), page.descending);
        self.scan_index(ctx, &prefix, page, market)
    }

    /// Price of the most recent trade in `market`.
    pub fn get_mark_price(&self, ctx: &QueryContext, market: &MarketId) -> Result<u64> {
        let recent = self.get_by_market(ctx, market, Page::new(0, 1, true))?;
        recent
            .first()
            .map(|trade| trade.price)
            .ok_or_else(|| StoreError::NotFound(format!("no trades in market {market}")))
    }

    fn scan_index(&self, ctx: &QueryContext, prefix: &Prefix, page: Page, market: Option<&MarketId>) -> Result<Vec<Trade>> {
        let ctx = self.core.scan_context(ctx);
        let filter = market.map(|m| keys::trade_market_filter(m.as_str()));
        scan(self.core.kv(), &ctx, prefix, page, STORE_NAME, |txn, key, primary| {
            match &filter {
                Some(filter) if !primary.starts_with(filter) => Ok(None),
                _ => follow_index(txn, key, primary),
            }
        })
    }

    /// Receive every committed batch of trades. Delivery is lossy.
    pub fn subscribe(&self, sender: mpsc::Sender<Vec<Trade>>) -> u64 {
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
