//! Account store
//!
//! Accounts are keyed by type, then by owner:
//!
//! ```text
//! GP:<party>_A:<asset>                 general     (primary)
//! MP:<party>_M:<market>_A:<asset>      margin      (primary)
//! IP:<market>_A:<asset>                insurance   (primary)
//! SP:<market>_A:<asset>                settlement  (primary)
//! M:<market>_ID:<primary>              every market-scoped account → primary
//! A:<asset>_<party>_ID:<primary>       every party-owned account   → primary
//! ```
//!
//! Saving an account overwrites its balance; there is no history.

use tokio::sync::mpsc;
use types::account::{Account, AccountType};
use types::ids::{validate_key_component, MarketId, PartyId};

use crate::config::StoreConfig;
use crate::error::{Result, StoreError};
use crate::keys;
use crate::kv::WriteSet;
use crate::query::{encode, scan, Page, QueryContext};
use crate::store::{follow_index, read_direct, CriticalErrorHook, StoreCore};

const STORE_NAME: &str = "accounts";

/// Primary key of an account, validating the components it embeds.
fn primary_key(account: &Account) -> Result<Vec<u8>> {
    validate_key_component("asset", &account.asset)?;
    let asset = account.asset.as_str();
    let key = match account.account_type {
        AccountType::General => {
            account.owner.validate()?;
            keys::account_general_key(account.owner.as_str(), asset)
        }
        AccountType::Margin => {
            account.owner.validate()?;
            account.market.validate()?;
            keys::account_margin_key(account.owner.as_str(), account.market.as_str(), asset)
        }
        AccountType::Insurance => {
            account.market.validate()?;
            keys::account_insurance_key(account.market.as_str(), asset)
        }
        AccountType::Settlement => {
            account.market.validate()?;
            keys::account_settlement_key(account.market.as_str(), asset)
        }
        AccountType::Unspecified => {
            return Err(StoreError::UnspecifiedAccountType {
                asset: account.asset.clone(),
            })
        }
    };
    Ok(key)
}

/// Persistent store of account balances.
pub struct AccountStore {
    core: StoreCore<Account>,
}

impl AccountStore {
    /// Open the account database under `config.accounts_dir()`.
    pub fn open(config: &StoreConfig, on_critical_error: CriticalErrorHook) -> Result<Self> {
        Ok(Self {
            core: StoreCore::open(STORE_NAME, config.accounts_dir(), config, on_critical_error)?,
        })
    }

    pub fn reload_config(&self, config: StoreConfig) {
        self.core.reload_config(config);
    }

    /// Persist a batch of accounts and notify subscribers.
    ///
    /// The whole batch is rejected if any account has an unspecified type.
    pub fn save_batch(&self, accounts: Vec<Account>) -> Result<()> {
        if accounts.is_empty() {
            return Ok(());
        }

        let mut writes = WriteSet::new();
        for account in &accounts {
            let primary = primary_key(account)?;
            writes.record(primary.clone(), encode(&primary, account)?);

            match account.account_type {
                AccountType::General => {
                    writes.index(
                        keys::account_asset_key(&account.asset, account.owner.as_str(), &primary),
                        primary,
                    );
                }
                AccountType::Margin => {
                    writes
                        .index(keys::account_market_key(account.market.as_str(), &primary), primary.clone())
                        .index(
                            keys::account_asset_key(&account.asset, account.owner.as_str(), &primary),
                            primary,
                        );
                }
                AccountType::Insurance | AccountType::Settlement => {
                    writes.index(keys::account_market_key(account.market.as_str(), &primary), primary);
                }
                AccountType::Unspecified => {}
            }
        }

        self.core.commit(writes, accounts, |_| {})?;
        Ok(())
    }

    pub fn get_general(&self, party: &PartyId, asset: &str) -> Result<Account> {
        self.core
            .get_record(&keys::account_general_key(party.as_str(), asset))
    }

    pub fn get_margin(&self, party: &PartyId, market: &MarketId, asset: &str) -> Result<Account> {
        self.core.get_record(&keys::account_margin_key(
            party.as_str(),
            market.as_str(),
            asset,
        ))
    }

    pub fn get_insurance(&self, market: &MarketId, asset: &str) -> Result<Account> {
        self.core
            .get_record(&keys::account_insurance_key(market.as_str(), asset))
    }

    pub fn get_settlement(&self, market: &MarketId, asset: &str) -> Result<Account> {
        self.core
            .get_record(&keys::account_settlement_key(market.as_str(), asset))
    }

    /// Accounts of one type owned by `party`.
    pub fn get_by_party(
        &self,
        ctx: &QueryContext,
        party: &PartyId,
        account_type: AccountType,
        page: Page,
    ) -> Result<Vec<Account>> {
        let ctx = self.core.scan_context(ctx);
        let prefix = keys::account_owner_prefix(account_type, party.as_str(), page.descending);
        scan(self.core.kv(), &ctx, &prefix, page, STORE_NAME, read_direct)
    }

    /// Margin accounts of `party` in `market`.
    pub fn get_by_party_and_market(
        &self,
        ctx: &QueryContext,
        party: &PartyId,
        market: &MarketId,
        page: Page,
    ) -> Result<Vec<Account>> {
        let ctx = self.core.scan_context(ctx);
        let prefix = keys::account_party_market_prefix(party.as_str(), market.as_str(), page.descending);
        scan(self.core.kv(), &ctx, &prefix, page, STORE_NAME, read_direct)
    }

    /// Every margin, insurance and settlement account of `market`.
    pub fn get_by_market(&self, ctx: &QueryContext, market: &MarketId, page: Page) -> Result<Vec<Account>> {
        let ctx = self.core.scan_context(ctx);
        let prefix = keys::market_prefix(market.as_str(), page.descending);
        scan(self.core.kv(), &ctx, &prefix, page, STORE_NAME, follow_index)
    }

    /// Every general and margin account holding `asset`, optionally for
    /// one party only.
    pub fn get_by_asset(
        &self,
        ctx: &QueryContext,
        asset: &str,
        party: Option<&PartyId>,
        page: Page,
    ) -> Result<Vec<Account>> {
        let ctx = self.core.scan_context(ctx);
        let prefix = keys::account_asset_prefix(asset, party.map(PartyId::as_str), page.descending);
        scan(self.core.kv(), &ctx, &prefix, page, STORE_NAME, follow_index)
    }

    /// Receive every committed batch of accounts. Delivery is lossy.
    pub fn subscribe(&self, sender: mpsc::Sender<Vec<Account>>) -> u64 {
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
