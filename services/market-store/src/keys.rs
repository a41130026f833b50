//! Key codec: storage key grammar
//!
//! Every key is ASCII with `_` and `:` as structural separators. Ids are
//! key-safe (see `types::ids`), so a prefix match never crosses into a
//! neighbouring id.
//!
//! ```text
//! ID:<order>_V:<version %012d>        order version (primary)
//! ID:<order>                          latest order version   → primary
//! M:<market>_ID:<order>               order by market        → primary
//! P:<party>_ID:<order>                order by party         → primary
//! R:<reference>                       order by reference     → primary
//!
//! M:<market>_ID:<trade>               trade (primary)
//! ID:<trade>                          trade by id            → primary
//! P:<party>_ID:<trade>                trade by buyer/seller  → primary
//! O:<order>_ID:<trade>                trade by buy/sell order → primary
//!
//! M:<market>_I:<interval>_T:<nanos %019d> candle (primary)
//! LCM:<market>_I:<interval>           last candle            → primary
//!
//! GP:<party>_A:<asset>                general account (primary)
//! MP:<party>_M:<market>_A:<asset>     margin account (primary)
//! IP:<market>_A:<asset>               insurance account (primary)
//! SP:<market>_A:<asset>               settlement account (primary)
//! M:<market>_ID:<account key>         account by market      → primary
//! A:<asset>_<party>_ID:<account key>  account by asset       → primary
//! ```
//!
//! Descending scans seek to the prefix followed by `0xFF`, which sorts
//! after every ASCII suffix; stored keys never carry that byte.

use types::account::AccountType;
use types::candle::Interval;

/// Byte appended to a seek key for reverse iteration.
pub const DESCENDING_SENTINEL: u8 = 0xFF;

/// Width of the zero-padded order version.
pub const VERSION_WIDTH: usize = 12;

/// Width of the zero-padded candle bucket timestamp; fits any
/// non-negative `i64`.
pub const TIMESTAMP_WIDTH: usize = 19;

/// A scan range: where to seek and which prefix keeps the cursor valid.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Prefix {
    pub seek: Vec<u8>,
    pub valid: Vec<u8>,
}

impl Prefix {
    /// Build a scan range from a raw prefix.
    pub fn new(valid: impl Into<Vec<u8>>, descending: bool) -> Self {
        let valid = valid.into();
        let mut seek = valid.clone();
        if descending {
            seek.push(DESCENDING_SENTINEL);
        }
        Self { seek, valid }
    }
}

/// `<kind>:<id>_`
pub fn prefix(kind: &str, id: &str, descending: bool) -> Prefix {
    Prefix::new(format!("{kind}:{id}_"), descending)
}

pub fn market_prefix(market: &str, descending: bool) -> Prefix {
    prefix("M", market, descending)
}

pub fn party_prefix(party: &str, descending: bool) -> Prefix {
    prefix("P", party, descending)
}

pub fn order_prefix(order: &str, descending: bool) -> Prefix {
    prefix("O", order, descending)
}

/// Prefix of every stored version of one order.
pub fn order_version_prefix(order: &str, descending: bool) -> Prefix {
    Prefix::new(format!("ID:{order}_V:"), descending)
}

// ── Orders ──────────────────────────────────────────────────────────

pub fn order_version_key(order: &str, version: u64) -> Vec<u8> {
    format!("ID:{order}_V:{version:0width$}", width = VERSION_WIDTH).into_bytes()
}

pub fn order_id_key(order: &str) -> Vec<u8> {
    format!("ID:{order}").into_bytes()
}

pub fn order_market_key(market: &str, order: &str) -> Vec<u8> {
    format!("M:{market}_ID:{order}").into_bytes()
}

pub fn order_party_key(party: &str, order: &str) -> Vec<u8> {
    format!("P:{party}_ID:{order}").into_bytes()
}

pub fn order_reference_key(reference: &str) -> Vec<u8> {
    format!("R:{reference}").into_bytes()
}

// ── Trades ──────────────────────────────────────────────────────────

pub fn trade_market_key(market: &str, trade: &str) -> Vec<u8> {
    format!("M:{market}_ID:{trade}").into_bytes()
}

pub fn trade_id_key(trade: &str) -> Vec<u8> {
    format!("ID:{trade}").into_bytes()
}

pub fn trade_party_key(party: &str, trade: &str) -> Vec<u8> {
    format!("P:{party}_ID:{trade}").into_bytes()
}

pub fn trade_order_key(order: &str, trade: &str) -> Vec<u8> {
    format!("O:{order}_ID:{trade}").into_bytes()
}

/// Leading bytes shared by every trade primary key of `market`.
pub fn trade_market_filter(market: &str) -> Vec<u8> {
    format!("M:{market}_").into_bytes()
}

// ── Candles ─────────────────────────────────────────────────────────

/// Byte order of candle keys follows bucket order for non-negative
/// timestamps.
pub fn candle_key(market: &str, interval: Interval, timestamp: i64) -> Vec<u8> {
    format!("M:{market}_I:{interval}_T:{timestamp:0width$}", width = TIMESTAMP_WIDTH).into_bytes()
}

pub fn candle_prefix(market: &str, interval: Interval, descending: bool) -> Prefix {
    Prefix::new(format!("M:{market}_I:{interval}_T:"), descending)
}

pub fn last_candle_key(market: &str, interval: Interval) -> Vec<u8> {
    format!("LCM:{market}_I:{interval}").into_bytes()
}

// ── Accounts ────────────────────────────────────────────────────────

/// Two-letter code that prefixes every account key of a type.
pub fn account_type_code(account_type: AccountType) -> &'static str {
    match account_type {
        AccountType::Margin => "MP",
        AccountType::Settlement => "SP",
        AccountType::Insurance => "IP",
        AccountType::General => "GP",
        AccountType::Unspecified => "ERR",
    }
}

pub fn account_general_key(party: &str, asset: &str) -> Vec<u8> {
    format!("{}:{party}_A:{asset}", account_type_code(AccountType::General)).into_bytes()
}

pub fn account_margin_key(party: &str, market: &str, asset: &str) -> Vec<u8> {
    format!(
        "{}:{party}_M:{market}_A:{asset}",
        account_type_code(AccountType::Margin)
    )
    .into_bytes()
}

pub fn account_insurance_key(market: &str, asset: &str) -> Vec<u8> {
    format!("{}:{market}_A:{asset}", account_type_code(AccountType::Insurance)).into_bytes()
}

pub fn account_settlement_key(market: &str, asset: &str) -> Vec<u8> {
    format!("{}:{market}_A:{asset}", account_type_code(AccountType::Settlement)).into_bytes()
}

/// Index entry for every account scoped to `market`.
pub fn account_market_key(market: &str, account_key: &[u8]) -> Vec<u8> {
    let mut key = format!("M:{market}_ID:").into_bytes();
    key.extend_from_slice(account_key);
    key
}

/// Index entry for every account holding `asset`.
pub fn account_asset_key(asset: &str, party: &str, account_key: &[u8]) -> Vec<u8> {
    let mut key = format!("A:{asset}_{party}_ID:").into_bytes();
    key.extend_from_slice(account_key);
    key
}

/// Accounts of one type scoped to `owner` (a party, or a market for
/// insurance and settlement accounts).
pub fn account_owner_prefix(account_type: AccountType, owner: &str, descending: bool) -> Prefix {
    prefix(account_type_code(account_type), owner, descending)
}

/// Margin accounts of `party` in `market`.
pub fn account_party_market_prefix(party: &str, market: &str, descending: bool) -> Prefix {
    Prefix::new(
        format!("{}:{party}_M:{market}_", account_type_code(AccountType::Margin)),
        descending,
    )
}

/// Asset index entries, optionally narrowed to one party.
pub fn account_asset_prefix(asset: &str, party: Option<&str>, descending: bool) -> Prefix {
    match party {
        Some(party) => Prefix::new(format!("A:{asset}_{party}_ID:"), descending),
        None => prefix("A", asset, descending),
    }
}
