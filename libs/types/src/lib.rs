//! Types library for the market-data store
//!
//! Core type definitions shared by the storage service and its callers.
//!
//! # Modules
//! - `ids`: Key-safe identifiers (MarketId, PartyId, OrderId, TradeId)
//! - `order`: Versioned order types
//! - `trade`: Trade execution types
//! - `account`: Account and balance types
//! - `candle`: OHLCV candles and intervals
//! - `errors`: Error taxonomy

// Public modules
pub mod ids;
pub mod order;
pub mod trade;
pub mod account;
pub mod candle;
pub mod errors;

// Library version constant
pub const LIB_VERSION: &str = "1.0.0";

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::ids::*;
    pub use crate::order::*;
    pub use crate::trade::*;
    pub use crate::account::*;
    pub use crate::candle::*;
    pub use crate::errors::*;
}
