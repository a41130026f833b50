//! In-memory order book depth
//!
//! Maintains, per market, the aggregated price levels of resting orders
//! from a stream of order versions. Nothing here is persisted.
//!
//! Each level remembers the last known remaining size of every order at
//! its price, so an update applies only the difference instead of
//! re-aggregating the book:
//!
//! - order seen before at this price → `volume += new - old`
//! - order no longer resting → `volume -= old`, `count -= 1`
//! - level at zero volume or zero orders → removed
//!
//! Buy levels are kept best (highest) price first, sell levels best
//! (lowest) price first. Cumulative volume is left at zero here; readers
//! that need it compute it over the returned slice.

use std::collections::{BTreeMap, HashMap};
use std::sync::{PoisonError, RwLock};

use serde::{Deserialize, Serialize};
use tracing::trace;
use types::ids::{MarketId, OrderId};
use types::order::{Order, OrderStatus, OrderType, Side};

/// Aggregate of the resting orders at one price on one side.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PriceLevel {
    pub price: u64,
    /// Total remaining size at this price.
    pub volume: u64,
    pub number_of_orders: u64,
    /// Running total from the best price down to this level. Only filled
    /// in by readers that ask for it.
    pub cumulative_volume: u64,
}

#[derive(Debug, Clone)]
struct Level {
    summary: PriceLevel,
    /// Order id → last known remaining size.
    orders: BTreeMap<OrderId, u64>,
}

impl Level {
    fn new(order: &Order) -> Self {
        let mut orders = BTreeMap::new();
        orders.insert(order.id.clone(), order.remaining);
        Self {
            summary: PriceLevel {
                price: order.price,
                volume: order.remaining,
                number_of_orders: 1,
                cumulative_volume: 0,
            },
            orders,
        }
    }

    fn apply(&mut self, order: &Order, resting: bool) {
        let previous = self.orders.get(&order.id).copied();
        match (previous, resting) {
            (Some(last), true) => {
                self.summary.volume = self
                    .summary
                    .volume
                    .saturating_sub(last)
                    .saturating_add(order.remaining);
                self.orders.insert(order.id.clone(), order.remaining);
            }
            (Some(last), false) => {
                self.summary.volume = self.summary.volume.saturating_sub(last);
                self.summary.number_of_orders = self.summary.number_of_orders.saturating_sub(1);
                self.orders.remove(&order.id);
            }
            (None, true) => {
                self.summary.volume = self.summary.volume.saturating_add(order.remaining);
                self.summary.number_of_orders += 1;
                self.orders.insert(order.id.clone(), order.remaining);
            }
            (None, false) => {}
        }
    }

    fn is_empty(&self) -> bool {
        self.summary.number_of_orders == 0 || self.summary.volume == 0
    }
}

/// Whether the order is one that never rests on a book at all.
fn never_rests(order: &Order) -> bool {
    !order.time_in_force.can_rest()
        || order.status == OrderStatus::Rejected
        || order.order_type == OrderType::Network
}

/// Whether this version of the order still contributes to its level.
fn is_resting(order: &Order) -> bool {
    order.remaining > 0 && !order.status.is_terminal()
}

/// Depth of one market.
#[derive(Debug, Clone)]
pub struct MarketDepth {
    pub market: MarketId,
    buy: Vec<Level>,
    sell: Vec<Level>,
}

impl MarketDepth {
    pub fn new(market: MarketId) -> Self {
        Self {
            market,
            buy: Vec::new(),
            sell: Vec::new(),
        }
    }

    /// Apply one order version.
    pub fn update(&mut self, order: &Order) {
        if never_rests(order) {
            trace!(market = %self.market, order_id = %order.id, "Order never rests, ignored by depth");
            return;
        }

        let resting = is_resting(order);
        let (levels, position) = match order.side {
            Side::BUY => {
                let position = self.buy.binary_search_by(|l| order.price.cmp(&l.summary.price));
                (&mut self.buy, position)
            }
            Side::SELL => {
                let position = self.sell.binary_search_by(|l| l.summary.price.cmp(&order.price));
                (&mut self.sell, position)
            }
        };

        match position {
            Ok(idx) => {
                levels[idx].apply(order, resting);
                if levels[idx].is_empty() {
                    levels.remove(idx);
                }
            }
            Err(idx) if resting => levels.insert(idx, Level::new(order)),
            Err(_) => {}
        }
    }

    /// Up to `limit` buy levels, best first (`0` = all).
    pub fn buy_side(&self, limit: usize) -> Vec<PriceLevel> {
        summarize(&self.buy, limit)
    }

    /// Up to `limit` sell levels, best first (`0` = all).
    pub fn sell_side(&self, limit: usize) -> Vec<PriceLevel> {
        summarize(&self.sell, limit)
    }

    pub fn is_empty(&self) -> bool {
        self.buy.is_empty() && self.sell.is_empty()
    }
}

fn summarize(levels: &[Level], limit: usize) -> Vec<PriceLevel> {
    let take = if limit == 0 { levels.len() } else { limit };
    levels.iter().take(take).map(|l| l.summary.clone()).collect()
}

/// Both sides of one market's book at a point in time.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DepthSnapshot {
    pub market: MarketId,
    pub buy: Vec<PriceLevel>,
    pub sell: Vec<PriceLevel>,
}

impl DepthSnapshot {
    /// Fill in `cumulative_volume` on both sides.
    pub fn accumulate(&mut self) {
        accumulate(&mut self.buy);
        accumulate(&mut self.sell);
    }
}

/// Running total of volume from the best level outwards.
pub fn accumulate(levels: &mut [PriceLevel]) {
    let mut total = 0u64;
    for level in levels {
        total = total.saturating_add(level.volume);
        level.cumulative_volume = total;
    }
}

/// Depth for every market, shared between one writer and many readers.
#[derive(Debug, Default)]
pub struct DepthEngine {
    markets: RwLock<HashMap<MarketId, MarketDepth>>,
}

impl DepthEngine {
    pub fn new() -> Self {
        Self::default()
    }

    /// Apply one order version to its market's depth.
    pub fn update(&self, order: &Order) {
        let mut markets = self.markets.write().unwrap_or_else(PoisonError::into_inner);
        markets
            .entry(order.market.clone())
            .or_insert_with(|| MarketDepth::new(order.market.clone()))
            .update(order);
    }

    /// Apply a batch of order versions under one lock acquisition.
    pub fn update_batch<'a>(&self, orders: impl IntoIterator<Item = &'a Order>) {
        let mut markets = self.markets.write().unwrap_or_else(PoisonError::into_inner);
        for order in orders {
            markets
                .entry(order.market.clone())
                .or_insert_with(|| MarketDepth::new(order.market.clone()))
                .update(order);
        }
    }

    pub fn buy_side(&self, market: &MarketId, limit: usize) -> Vec<PriceLevel> {
        self.read(market, |depth| depth.buy_side(limit))
    }

    pub fn sell_side(&self, market: &MarketId, limit: usize) -> Vec<PriceLevel> {
        self.read(market, |depth| depth.sell_side(limit))
    }

    /// Both sides of `market`. An unknown market has an empty book.
    pub fn depth(&self, market: &MarketId, limit: usize) -> DepthSnapshot {
        let (buy, sell) = self.read(market, |depth| (depth.buy_side(limit), depth.sell_side(limit)));
        DepthSnapshot {
            market: market.clone(),
            buy,
            sell,
        }
    }

    fn read<R: Default>(&self, market: &MarketId, f: impl FnOnce(&MarketDepth) -> R) -> R {
        let markets = self.markets.read().unwrap_or_else(PoisonError::into_inner);
        markets.get(market).map(f).unwrap_or_default()
    }
}
