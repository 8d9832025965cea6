//! Wallet -> per-asset accounts, plus the balance cache.

use std::collections::HashMap;

use chrono::Utc;
use parking_lot::RwLock;
use rust_decimal::Decimal;
use tracing::{debug, info};

use crate::blockchain::traits::AssetAdapter;
use crate::core::{
    address_book::derive_address,
    domain::{AccountSpec, Address, AssetsAccount, SmartContract, Wallet},
    errors::WalletError,
    hd::{DerivationPath, HARDENED},
    identity,
    key_vault::KeyVault,
    locks::AccountLocks,
};
use crate::storage::WalletStorage;

type BalanceKey = (String, Option<String>);

/// Last-known balances keyed by (account, contract address). Entries never expire; they
/// are dropped only by [`BalanceCache::invalidate`].
#[derive(Default)]
pub struct BalanceCache {
    entries: RwLock<HashMap<BalanceKey, Decimal>>,
}

impl BalanceCache {
    pub fn new() -> Self {
        Self::default()
    }

    fn key(account_id: &str, contract: Option<&SmartContract>) -> BalanceKey {
        (account_id.to_string(), contract.map(|c| c.address.to_lowercase()))
    }

    pub fn get(&self, account_id: &str, contract: Option<&SmartContract>) -> Option<Decimal> {
        self.entries.read().get(&Self::key(account_id, contract)).copied()
    }

    pub fn insert(&self, account_id: &str, contract: Option<&SmartContract>, balance: Decimal) {
        self.entries.write().insert(Self::key(account_id, contract), balance);
    }

    /// Drops every cached value for the account, native and token.
    pub fn invalidate(&self, account_id: &str) {
        self.entries.write().retain(|(account, _), _| account != account_id);
    }
}

pub struct AccountRegistry<'a> {
    storage: &'a WalletStorage,
    locks: &'a AccountLocks,
    balances: &'a BalanceCache,
    vault: &'a KeyVault,
}

impl<'a> AccountRegistry<'a> {
    pub fn new(
        storage: &'a WalletStorage,
        locks: &'a AccountLocks,
        balances: &'a BalanceCache,
        vault: &'a KeyVault,
    ) -> Self {
        Self { storage, locks, balances, vault }
    }

    async fn load_wallet(&self, wallet_id: &str) -> Result<Wallet, WalletError> {
        self.storage
            .get_wallet(wallet_id)
            .await?
            .ok_or_else(|| WalletError::NotFound(format!("wallet {}", wallet_id)))
    }

    /// Creates the account and its first address. Creating the same
    /// (wallet, symbol, index) again returns the stored account and its first address.
    pub async fn create_account(
        &self,
        wallet_id: &str,
        password: &str,
        spec: &AccountSpec,
        adapter: &dyn AssetAdapter,
    ) -> Result<(AssetsAccount, Address), WalletError> {
        if spec.required < 1 {
            return Err(WalletError::Validation("required signatures must be at least 1".into()));
        }
        let symbol = spec.symbol.trim().to_uppercase();
        if !adapter.symbol().eq_ignore_ascii_case(&symbol) {
            return Err(WalletError::UnsupportedAsset(symbol));
        }

        let wallet = self.load_wallet(wallet_id).await?;
        let index = match spec.index {
            Some(index) => index,
            None => u32::try_from(wallet.account_index + 1)
                .map_err(|_| WalletError::Validation("account index overflow".into()))?,
        };
        if index >= HARDENED {
            return Err(WalletError::Derivation(format!("account index {} out of range", index)));
        }

        let key = self
            .storage
            .get_wallet_key(wallet_id)
            .await?
            .ok_or_else(|| WalletError::NotFound(format!("wallet {}", wallet_id)))?;
        let hd_path = DerivationPath::bip44_account(adapter.coin_type(), index).to_string();
        let xpub = {
            let material = self.vault.unlock(wallet_id, &key, password)?;
            material.extended_public_key(&hd_path)?
        };

        let account_id = identity::account_id(wallet_id, &symbol, index);
        let _guard = self.locks.acquire(&account_id).await;

        if let Some(existing) = self.storage.get_account(&account_id).await? {
            let first = self
                .storage
                .list_addresses(&account_id, 0, 1, false)
                .await?
                .into_iter()
                .next()
                .ok_or_else(|| WalletError::NotFound(format!("first address of {}", account_id)))?;
            debug!(account_id = %account_id, "account already exists");
            return Ok((existing, first));
        }

        let mut account = AssetsAccount {
            account_id: account_id.clone(),
            wallet_id: wallet_id.to_string(),
            symbol,
            alias: spec.alias.clone(),
            index,
            hd_path,
            public_key: xpub.encode(),
            required: spec.required,
            is_trust: spec.is_trust,
            balance: Decimal::ZERO,
            address_index: -1,
            pending_reorg: false,
            created_at: Utc::now(),
        };
        let first = derive_address(&account, &xpub, adapter, 0)?;
        account.address_index = 0;
        self.storage.insert_account(&account, &first).await?;

        info!(
            wallet_id = %wallet_id,
            account_id = %account_id,
            symbol = %account.symbol,
            index,
            "account created"
        );
        Ok((account, first))
    }

    pub async fn get_account(&self, account_id: &str) -> Result<AssetsAccount, WalletError> {
        self.storage
            .get_account(account_id)
            .await?
            .ok_or_else(|| WalletError::NotFound(format!("account {}", account_id)))
    }

    /// Accounts of `wallet_id` by index. `limit = -1` means all from `offset`.
    pub async fn list_accounts(
        &self,
        wallet_id: &str,
        offset: i64,
        limit: i64,
    ) -> Result<Vec<AssetsAccount>, WalletError> {
        if offset < 0 || limit < -1 {
            return Err(WalletError::Validation(format!(
                "invalid page offset={} limit={}",
                offset, limit
            )));
        }
        self.load_wallet(wallet_id).await?;
        Ok(self.storage.list_accounts(wallet_id, offset, limit).await?)
    }

    async fn account_addresses(&self, account_id: &str) -> Result<Vec<String>, WalletError> {
        Ok(self
            .storage
            .list_addresses(account_id, 0, -1, false)
            .await?
            .into_iter()
            .map(|a| a.address)
            .collect())
    }

    /// Native balance summed over the account's addresses; served from cache when present.
    pub async fn get_balance(
        &self,
        account: &AssetsAccount,
        adapter: &dyn AssetAdapter,
    ) -> Result<Decimal, WalletError> {
        if let Some(balance) = self.balances.get(&account.account_id, None) {
            return Ok(balance);
        }
        let addresses = self.account_addresses(&account.account_id).await?;
        let balance: Decimal = adapter
            .get_balances(&addresses)
            .await?
            .iter()
            .map(|b| b.balance)
            .sum();
        self.balances.insert(&account.account_id, None, balance);
        self.storage.update_account_balance(&account.account_id, balance).await?;
        debug!(account_id = %account.account_id, %balance, "balance fetched");
        Ok(balance)
    }

    pub async fn get_token_balance(
        &self,
        account: &AssetsAccount,
        adapter: &dyn AssetAdapter,
        contract: &SmartContract,
    ) -> Result<Decimal, WalletError> {
        if let Some(balance) = self.balances.get(&account.account_id, Some(contract)) {
            return Ok(balance);
        }
        let addresses = self.account_addresses(&account.account_id).await?;
        let balance: Decimal = adapter
            .get_token_balances(&addresses, contract)
            .await?
            .iter()
            .map(|b| b.balance)
            .sum();
        self.balances.insert(&account.account_id, Some(contract), balance);
        debug!(
            account_id = %account.account_id,
            contract = %contract.address,
            %balance,
            "token balance fetched"
        );
        Ok(balance)
    }

    pub fn invalidate_balance(&self, account_id: &str) {
        self.balances.invalidate(account_id);
    }

    pub async fn refresh_balance(
        &self,
        account: &AssetsAccount,
        adapter: &dyn AssetAdapter,
    ) -> Result<Decimal, WalletError> {
        self.invalidate_balance(&account.account_id);
        self.get_balance(account, adapter).await
    }
}
