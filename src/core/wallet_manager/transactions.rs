//! Transaction operations
//!
//! Thin wrappers routing each pipeline step to the account's adapter.

use std::sync::Arc;

use super::{NamespaceScope, WalletManager};
use crate::blockchain::traits::AssetAdapter;
use crate::core::{
    domain::{Confirmation, RawTransaction, TxStatus},
    errors::WalletError,
    pipeline::{SummaryRequest, SummaryResult, TransferRequest},
};

impl WalletManager {
    /// Adapter for the stored copy of `tx`, once that copy is known to belong to
    /// `wallet_id`. The caller's fields are never trusted for routing.
    async fn owned_transaction(
        &self,
        scope: &NamespaceScope,
        wallet_id: &str,
        tx: &RawTransaction,
    ) -> Result<Arc<dyn AssetAdapter>, WalletError> {
        let stored = scope.pipeline(&self.vault).get_transaction(&tx.id).await?;
        if stored.wallet_id != wallet_id {
            return Err(WalletError::Validation(format!(
                "transaction {} does not belong to wallet {}",
                tx.id, wallet_id
            )));
        }
        self.owned_account(scope, wallet_id, &stored.account_id).await?;
        self.adapter(&stored.symbol)
    }

    pub async fn create_transaction(
        &self,
        namespace: &str,
        wallet_id: &str,
        account_id: &str,
        request: &TransferRequest<'_>,
    ) -> Result<RawTransaction, WalletError> {
        let scope = self.scope(namespace).await?;
        let result = async {
            let account = self.owned_account(&scope, wallet_id, account_id).await?;
            let adapter = self.adapter(&account.symbol)?;
            scope
                .pipeline(&self.vault)
                .create_transaction(&account, adapter.as_ref(), request)
                .await
        }
        .await;
        scope.settle(result)
    }

    /// One transaction per address whose balance exceeds the minimum transfer.
    pub async fn create_summary_transaction(
        &self,
        namespace: &str,
        wallet_id: &str,
        account_id: &str,
        request: &SummaryRequest<'_>,
    ) -> Result<Vec<RawTransaction>, WalletError> {
        let scope = self.scope(namespace).await?;
        let result = async {
            let account = self.owned_account(&scope, wallet_id, account_id).await?;
            let adapter = self.adapter(&account.symbol)?;
            scope
                .pipeline(&self.vault)
                .create_summary_transaction(&account, adapter.as_ref(), request)
                .await
        }
        .await;
        scope.settle(result)
    }

    pub async fn create_summary_transaction_with_error(
        &self,
        namespace: &str,
        wallet_id: &str,
        account_id: &str,
        request: &SummaryRequest<'_>,
    ) -> Result<Vec<SummaryResult>, WalletError> {
        let scope = self.scope(namespace).await?;
        let result = async {
            let account = self.owned_account(&scope, wallet_id, account_id).await?;
            let adapter = self.adapter(&account.symbol)?;
            scope
                .pipeline(&self.vault)
                .create_summary_transaction_with_error(&account, adapter.as_ref(), request)
                .await
        }
        .await;
        scope.settle(result)
    }

    pub async fn sign_transaction(
        &self,
        namespace: &str,
        wallet_id: &str,
        tx: &mut RawTransaction,
        password: &str,
    ) -> Result<(), WalletError> {
        let scope = self.scope(namespace).await?;
        let result = async {
            let adapter = self.owned_transaction(&scope, wallet_id, tx).await?;
            scope
                .pipeline(&self.vault)
                .sign_transaction(tx, adapter.as_ref(), password)
                .await
        }
        .await;
        scope.settle(result)
    }

    pub async fn verify_transaction(
        &self,
        namespace: &str,
        wallet_id: &str,
        tx: &mut RawTransaction,
    ) -> Result<(), WalletError> {
        let scope = self.scope(namespace).await?;
        let result = async {
            let adapter = self.owned_transaction(&scope, wallet_id, tx).await?;
            scope
                .pipeline(&self.vault)
                .verify_transaction(tx, adapter.as_ref())
                .await
        }
        .await;
        scope.settle(result)
    }

    /// Broadcasts a verified transaction. The account's cached balances are dropped on
    /// success.
    pub async fn submit_transaction(
        &self,
        namespace: &str,
        wallet_id: &str,
        tx: &mut RawTransaction,
    ) -> Result<Confirmation, WalletError> {
        let scope = self.scope(namespace).await?;
        let result = async {
            let adapter = self.owned_transaction(&scope, wallet_id, tx).await?;
            let confirmation = scope
                .pipeline(&self.vault)
                .submit_transaction(tx, adapter.as_ref())
                .await?;
            scope.balances.invalidate(&tx.account_id);
            Ok::<_, WalletError>(confirmation)
        }
        .await;
        scope.settle(result)
    }

    pub async fn get_transaction(
        &self,
        namespace: &str,
        id: &str,
    ) -> Result<RawTransaction, WalletError> {
        let scope = self.scope(namespace).await?;
        let result = scope.pipeline(&self.vault).get_transaction(id).await;
        scope.settle(result)
    }

    /// Transactions of the account, oldest first, optionally filtered by status.
    pub async fn list_transactions(
        &self,
        namespace: &str,
        wallet_id: &str,
        account_id: &str,
        status: Option<TxStatus>,
    ) -> Result<Vec<RawTransaction>, WalletError> {
        let scope = self.scope(namespace).await?;
        let result = async {
            self.owned_account(&scope, wallet_id, account_id).await?;
            scope.pipeline(&self.vault).list_transactions(account_id, status).await
        }
        .await;
        scope.settle(result)
    }
}
