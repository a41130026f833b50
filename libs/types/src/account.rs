//! Account types
//!
//! Accounts are scoped by type: general accounts belong to a party and an
//! asset, margin accounts to a party in a market, and insurance/settlement
//! accounts to a market.

use crate::ids::{MarketId, PartyId};
use serde::{Deserialize, Serialize};

/// Account type
///
/// `Unspecified` is the zero value of the wire format and is never a valid
/// stored account.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum AccountType {
    #[default]
    Unspecified,
    /// Party collateral not committed to any market
    General,
    /// Party collateral committed to one market
    Margin,
    /// Market insurance pool
    Insurance,
    /// Market settlement account
    Settlement,
}

/// Balance of one asset held in one account
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Account {
    /// Owning party; unused for insurance and settlement accounts
    pub owner: PartyId,
    /// Market scope; unused for general accounts
    pub market: MarketId,
    pub asset: String,
    pub balance: u64,
    pub account_type: AccountType,
}

impl Account {
    /// General account of `owner` for `asset`.
    pub fn general(owner: PartyId, asset: impl Into<String>, balance: u64) -> Self {
        Self {
            owner,
            asset: asset.into(),
            balance,
            account_type: AccountType::General,
            ..Default::default()
        }
    }

    /// Margin account of `owner` in `market` for `asset`.
    pub fn margin(
        owner: PartyId,
        market: MarketId,
        asset: impl Into<String>,
        balance: u64,
    ) -> Self {
        Self {
            owner,
            market,
            asset: asset.into(),
            balance,
            account_type: AccountType::Margin,
        }
    }

    /// Insurance pool of `market` for `asset`.
    pub fn insurance(market: MarketId, asset: impl Into<String>, balance: u64) -> Self {
        Self {
            market,
            asset: asset.into(),
            balance,
            account_type: AccountType::Insurance,
            ..Default::default()
        }
    }

    /// Settlement account of `market` for `asset`.
    pub fn settlement(market: MarketId, asset: impl Into<String>, balance: u64) -> Self {
        Self {
            market,
            asset: asset.into(),
            balance,
            account_type: AccountType::Settlement,
            ..Default::default()
        }
    }
}
