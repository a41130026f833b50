//! Trade types

use crate::ids::{MarketId, OrderId, PartyId, TradeId};
use crate::order::Side;
use serde::{Deserialize, Serialize};

/// How the trade came about.
///
/// `Unspecified` is the zero value of the wire format and is never a valid
/// stored trade.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TradeType {
    #[default]
    Unspecified,
    /// Regular match between two parties
    Default,
    /// Network close-out where the distressed party had enough collateral
    NetworkCloseOutGood,
    /// Network close-out backed by the insurance pool
    NetworkCloseOutBad,
}

/// An executed trade
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Trade {
    pub id: TradeId,
    pub market: MarketId,
    pub price: u64,
    pub size: u64,
    pub buyer: PartyId,
    pub seller: PartyId,
    /// Side of the aggressive (taker) order
    pub aggressor: Side,
    pub buy_order: OrderId,
    pub sell_order: OrderId,
    pub timestamp: i64, // Unix nanos
    pub trade_type: TradeType,
}

impl Trade {
    /// Notional value of the trade.
    pub fn notional(&self) -> u128 {
        self.price as u128 * self.size as u128
    }

    /// Whether `party` is on either side of the trade.
    pub fn involves(&self, party: &PartyId) -> bool {
        &self.buyer == party || &self.seller == party
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_trade_notional() {
        let trade = Trade {
            price: 1_000_000,
            size: 5_000_000,
            ..Default::default()
        };
        assert_eq!(trade.notional(), 5_000_000_000_000);
    }

    #[test]
    fn test_trade_involves() {
        let trade = Trade {
            buyer: PartyId::new("partyA"),
            seller: PartyId::new("partyB"),
            ..Default::default()
        };
        assert!(trade.involves(&PartyId::new("partyA")));
        assert!(trade.involves(&PartyId::new("partyB")));
        assert!(!trade.involves(&PartyId::new("partyC")));
    }

    #[test]
    fn test_default_trade_type_is_unspecified() {
        assert_eq!(Trade::default().trade_type, TradeType::Unspecified);
    }
}
