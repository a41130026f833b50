//! Market Store Service
//!
//! Persistence and query layer of the market-data node:
//! - Indexed stores for order versions, trades and accounts
//! - Paginated, cancellable scans over every index
//! - Multi-interval OHLCV candles built from trade buffers
//! - In-memory market depth driven by committed orders
//! - Lossy, non-blocking subscriber fan-out after every commit
//!
//! # Architecture
//!
//! ```text
//!        Order / Trade / Account batches
//!                     │
//!     ┌───────────────┼───────────────┐
//!     │               │               │
//! ┌───▼────┐     ┌────▼───┐     ┌─────▼────┐
//! │ Orders │     │ Trades │     │ Accounts │   ← KeyCodec + StoreCore
//! └─┬───┬──┘     └────┬───┘     └─────┬────┘
//!   │   │             │               │
//!   │ ┌─▼─────┐       │               │
//!   │ │ Depth │       │               │
//!   │ └───────┘       │               │
//! ┌─▼─────────────────▼───────────────▼──┐
//! │   OrderedStore (sled, one per store) │
//! └──────────────────┬───────────────────┘
//!                    │ commit
//!          ┌─────────▼──────────┐
//!          │  SubscriptionHub   │  ← try_send, drop on full
//!          └────────────────────┘
//!
//! Trades ──► CandleEngine buffer ──► candles db ──► CandleTransport
//! ```

pub mod accounts;
pub mod candles;
pub mod config;
pub mod depth;
pub mod error;
pub mod keys;
pub mod kv;
pub mod orders;
pub mod query;
pub mod store;
pub mod subscription;
pub mod trades;

pub use accounts::AccountStore;
pub use candles::{rounded_timestamps, BucketKey, CandleBuffer, CandleEngine, CandleTransport};
pub use config::StoreConfig;
pub use depth::{DepthEngine, DepthSnapshot, MarketDepth, PriceLevel};
pub use error::{Result, StoreError};
pub use kv::{OrderedStore, RecordWrites, WriteSet};
pub use orders::OrderStore;
pub use query::{Interrupt, Page, QueryContext};
pub use store::{ignore_critical_errors, CriticalErrorHook};
pub use subscription::{Delivery, SubscriptionHub};
pub use trades::TradeStore;

// Service version
pub const SERVICE_VERSION: &str = "0.1.0";
