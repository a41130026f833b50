//! Order types
//!
//! An order is stored as a sequence of immutable versions. Every amendment
//! produces a new `Order` value with a higher `version`; past versions are
//! never rewritten.

use crate::ids::{MarketId, OrderId, PartyId};
use serde::{Deserialize, Serialize};

/// Order side (buyer or seller)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Side {
    /// Buy order (bid)
    #[default]
    BUY,
    /// Sell order (ask)
    SELL,
}

impl Side {
    /// Get the opposite side
    pub fn opposite(&self) -> Self {
        match self {
            Side::BUY => Side::SELL,
            Side::SELL => Side::BUY,
        }
    }
}

/// Time-in-force policy for orders
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum TimeInForce {
    /// Good-Till-Cancelled: rests until filled or cancelled
    #[default]
    GTC,
    /// Good-Till-Time: expires at `expires_at`
    GTT,
    /// Immediate-Or-Cancel: never rests on the book
    IOC,
    /// Fill-Or-Kill: never rests on the book
    FOK,
    /// Good-For-Auction
    GFA,
    /// Good-For-Normal trading
    GFN,
}

impl TimeInForce {
    /// Whether an order with this policy can ever rest on the book.
    pub fn can_rest(&self) -> bool {
        !matches!(self, TimeInForce::IOC | TimeInForce::FOK)
    }
}

/// Order type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum OrderType {
    #[default]
    Limit,
    Market,
    /// Synthetic order submitted by the network itself (e.g. close-outs)
    Network,
}

/// Order status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OrderStatus {
    /// Resting on the book, possibly after partial fills
    #[default]
    Active,
    Expired,
    Cancelled,
    Stopped,
    Filled,
    Rejected,
    /// Terminal: partially filled and then removed from the book
    PartiallyFilled,
}

impl OrderStatus {
    /// Check if status is terminal (no further transitions possible)
    pub fn is_terminal(&self) -> bool {
        !matches!(self, OrderStatus::Active)
    }
}

/// One version of an order
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Order {
    pub id: OrderId,
    pub market: MarketId,
    pub party: PartyId,
    pub side: Side,
    pub price: u64,
    pub size: u64,
    /// Quantity still open on the book
    pub remaining: u64,
    pub time_in_force: TimeInForce,
    pub order_type: OrderType,
    pub status: OrderStatus,
    /// Client-supplied reference, unique per order when non-empty
    pub reference: String,
    pub version: u64,
    pub created_at: i64, // Unix nanos
    pub updated_at: i64, // Unix nanos
    /// Expiry for GTT orders, Unix nanos
    pub expires_at: i64,
}

impl Order {
    /// Create the first version of a new active limit order.
    pub fn new(
        id: OrderId,
        market: MarketId,
        party: PartyId,
        side: Side,
        price: u64,
        size: u64,
        timestamp: i64,
    ) -> Self {
        Self {
            id,
            market,
            party,
            side,
            price,
            size,
            remaining: size,
            created_at: timestamp,
            updated_at: timestamp,
            version: 1,
            ..Default::default()
        }
    }

    /// Filled quantity so far.
    pub fn filled(&self) -> u64 {
        self.size.saturating_sub(self.remaining)
    }

    /// Build the next version of this order.
    pub fn amended(&self, timestamp: i64) -> Self {
        Self {
            version: self.version + 1,
            updated_at: timestamp,
            ..self.clone()
        }
    }
}
