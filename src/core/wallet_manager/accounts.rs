//! Assets accounts, addresses and balances

use rust_decimal::Decimal;
use tracing::debug;

use super::WalletManager;
use crate::core::{
    domain::{AccountSpec, Address, AssetsAccount, SmartContract},
    errors::WalletError,
};

impl WalletManager {
    /// Create an account for `spec.symbol` plus its first receiving address.
    ///
    /// Idempotent for an identical (wallet, symbol, index).
    pub async fn create_assets_account(
        &self,
        namespace: &str,
        wallet_id: &str,
        password: &str,
        spec: &AccountSpec,
    ) -> Result<(AssetsAccount, Address), WalletError> {
        let scope = self.scope(namespace).await?;
        let adapter = self.adapter(&spec.symbol)?;
        let result = scope
            .accounts(&self.vault)
            .create_account(wallet_id, password, spec, adapter.as_ref())
            .await;
        scope.settle(result)
    }

    /// `limit = -1` lists every account from `offset`.
    pub async fn get_assets_account_list(
        &self,
        namespace: &str,
        wallet_id: &str,
        offset: i64,
        limit: i64,
    ) -> Result<Vec<AssetsAccount>, WalletError> {
        let scope = self.scope(namespace).await?;
        let result = scope.accounts(&self.vault).list_accounts(wallet_id, offset, limit).await;
        scope.settle(result)
    }

    pub async fn get_assets_account_info(
        &self,
        namespace: &str,
        wallet_id: &str,
        account_id: &str,
    ) -> Result<AssetsAccount, WalletError> {
        let scope = self.scope(namespace).await?;
        let result = self.owned_account(&scope, wallet_id, account_id).await;
        scope.settle(result)
    }

    pub async fn create_address(
        &self,
        namespace: &str,
        wallet_id: &str,
        account_id: &str,
        count: u32,
    ) -> Result<Vec<Address>, WalletError> {
        let scope = self.scope(namespace).await?;
        let result = async {
            let account = self.owned_account(&scope, wallet_id, account_id).await?;
            let adapter = self.adapter(&account.symbol)?;
            scope
                .address_book()
                .create_addresses(account_id, adapter.as_ref(), count)
                .await
        }
        .await;
        scope.settle(result)
    }

    pub async fn get_address_list(
        &self,
        namespace: &str,
        wallet_id: &str,
        account_id: &str,
        offset: i64,
        limit: i64,
        watch_only: bool,
    ) -> Result<Vec<Address>, WalletError> {
        let scope = self.scope(namespace).await?;
        let result = async {
            self.owned_account(&scope, wallet_id, account_id).await?;
            scope
                .address_book()
                .list_addresses(account_id, offset, limit, watch_only)
                .await
        }
        .await;
        scope.settle(result)
    }

    pub async fn get_address(&self, namespace: &str, address: &str) -> Result<Address, WalletError> {
        let scope = self.scope(namespace).await?;
        let result = scope.address_book().get_address(address).await;
        scope.settle(result)
    }

    pub async fn mark_address_used(&self, namespace: &str, address: &str) -> Result<(), WalletError> {
        let scope = self.scope(namespace).await?;
        let result = scope.address_book().mark_address_used(address).await;
        scope.settle(result)
    }

    pub async fn set_address_watch_only(
        &self,
        namespace: &str,
        address: &str,
        watch_only: bool,
    ) -> Result<(), WalletError> {
        let scope = self.scope(namespace).await?;
        let result = scope.address_book().set_address_watch_only(address, watch_only).await;
        scope.settle(result)
    }

    /// While set, address allocation on the account fails with `AccountLocked`.
    pub async fn set_account_reorganizing(
        &self,
        namespace: &str,
        wallet_id: &str,
        account_id: &str,
        pending: bool,
    ) -> Result<(), WalletError> {
        let scope = self.scope(namespace).await?;
        let result = async {
            self.owned_account(&scope, wallet_id, account_id).await?;
            scope.address_book().set_account_reorganizing(account_id, pending).await
        }
        .await;
        scope.settle(result)
    }

    /// Last-known native balance; fetched from the adapter on a cache miss.
    pub async fn get_assets_account_balance(
        &self,
        namespace: &str,
        wallet_id: &str,
        account_id: &str,
    ) -> Result<Decimal, WalletError> {
        let scope = self.scope(namespace).await?;
        let result = async {
            let account = self.owned_account(&scope, wallet_id, account_id).await?;
            let adapter = self.adapter(&account.symbol)?;
            scope.accounts(&self.vault).get_balance(&account, adapter.as_ref()).await
        }
        .await;
        scope.settle(result)
    }

    pub async fn get_assets_account_token_balance(
        &self,
        namespace: &str,
        wallet_id: &str,
        account_id: &str,
        contract: &SmartContract,
    ) -> Result<Decimal, WalletError> {
        let scope = self.scope(namespace).await?;
        let result = async {
            let account = self.owned_account(&scope, wallet_id, account_id).await?;
            let adapter = self.adapter(&account.symbol)?;
            scope
                .accounts(&self.vault)
                .get_token_balance(&account, adapter.as_ref(), contract)
                .await
        }
        .await;
        scope.settle(result)
    }

    pub async fn refresh_assets_account_balance(
        &self,
        namespace: &str,
        wallet_id: &str,
        account_id: &str,
    ) -> Result<Decimal, WalletError> {
        let scope = self.scope(namespace).await?;
        let result = async {
            let account = self.owned_account(&scope, wallet_id, account_id).await?;
            let adapter = self.adapter(&account.symbol)?;
            scope.accounts(&self.vault).refresh_balance(&account, adapter.as_ref()).await
        }
        .await;
        scope.settle(result)
    }

    /// Drops cached native and token balances of the account.
    pub async fn invalidate_assets_account_balance(
        &self,
        namespace: &str,
        account_id: &str,
    ) -> Result<(), WalletError> {
        let scope = self.scope(namespace).await?;
        scope.accounts(&self.vault).invalidate_balance(account_id);
        debug!(namespace = %namespace, account_id = %account_id, "balance cache invalidated");
        Ok(())
    }
}
