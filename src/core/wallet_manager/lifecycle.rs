//! Wallet lifecycle management
//!
//! Provides wallet creation, import, lookup and deletion

use chrono::Utc;
use tracing::{info, warn};

use super::WalletManager;
use crate::core::{
    domain::{NewWallet, Wallet},
    errors::WalletError,
    key_vault::{KeyVault, RootKey},
};
use crate::storage::WalletDeletion;

impl WalletManager {
    fn check_password(&self, password: &str) -> Result<(), WalletError> {
        let min = self.config.security.min_password_length;
        if password.chars().count() < min {
            return Err(WalletError::Validation(format!(
                "password must be at least {} characters",
                min
            )));
        }
        Ok(())
    }

    fn wallet_record(alias: &str, root: &RootKey) -> Wallet {
        Wallet {
            wallet_id: root.wallet_id.clone(),
            alias: alias.to_string(),
            is_trust: true,
            root_public_key: hex::encode(root.public_key),
            root_path: "m".to_string(),
            account_index: -1,
            created_at: Utc::now(),
        }
    }

    /// Create a new wallet from a fresh 24-word mnemonic.
    ///
    /// The mnemonic is returned exactly once and never stored.
    ///
    /// # Errors
    /// * `WalletError::Validation` - password too short
    /// * `WalletError::NamespaceClosed` - namespace was closed
    pub async fn create_wallet(
        &self,
        namespace: &str,
        alias: &str,
        password: &str,
    ) -> Result<NewWallet, WalletError> {
        self.check_password(password)?;
        let scope = self.scope(namespace).await?;

        let result = async {
            let (mnemonic, seed) = KeyVault::generate_mnemonic()?;
            let root = self.vault.derive_root_key(&seed, password)?;
            if scope.storage.get_wallet(&root.wallet_id).await?.is_some() {
                return Err(WalletError::Validation(format!(
                    "wallet {} already exists",
                    root.wallet_id
                )));
            }

            let wallet = Self::wallet_record(alias, &root);
            scope.storage.insert_wallet(&wallet, &root.encrypted).await?;
            info!(namespace = %namespace, wallet_id = %wallet.wallet_id, alias = %alias, "wallet created");
            Ok(NewWallet { wallet, mnemonic })
        }
        .await;
        scope.settle(result)
    }

    /// Recreate a wallet from its mnemonic. Importing a wallet that already exists in
    /// the namespace returns the stored record once `password` unlocks it.
    pub async fn import_wallet(
        &self,
        namespace: &str,
        alias: &str,
        password: &str,
        mnemonic: &str,
    ) -> Result<Wallet, WalletError> {
        self.check_password(password)?;
        let scope = self.scope(namespace).await?;

        let result = async {
            let seed = KeyVault::seed_from_mnemonic(mnemonic)?;
            let root = self.vault.derive_root_key(&seed, password)?;

            if let Some(existing) = scope.storage.get_wallet(&root.wallet_id).await? {
                let key = scope
                    .storage
                    .get_wallet_key(&root.wallet_id)
                    .await?
                    .ok_or_else(|| WalletError::NotFound(format!("wallet {}", root.wallet_id)))?;
                self.vault.unlock(&root.wallet_id, &key, password)?;
                info!(namespace = %namespace, wallet_id = %existing.wallet_id, "wallet already present");
                return Ok(existing);
            }

            let wallet = Self::wallet_record(alias, &root);
            scope.storage.insert_wallet(&wallet, &root.encrypted).await?;
            info!(namespace = %namespace, wallet_id = %wallet.wallet_id, "wallet imported");
            Ok::<_, WalletError>(wallet)
        }
        .await;
        scope.settle(result)
    }

    pub async fn get_wallet_info(&self, namespace: &str, wallet_id: &str) -> Result<Wallet, WalletError> {
        let scope = self.scope(namespace).await?;
        let result = async {
            scope
                .storage
                .get_wallet(wallet_id)
                .await?
                .ok_or_else(|| WalletError::NotFound(format!("wallet {}", wallet_id)))
        }
        .await;
        scope.settle(result)
    }

    /// All wallets of the namespace, oldest first.
    pub async fn get_wallet_list(&self, namespace: &str) -> Result<Vec<Wallet>, WalletError> {
        let scope = self.scope(namespace).await?;
        let result = scope.storage.list_wallets().await.map_err(WalletError::from);
        scope.settle(result)
    }

    /// Delete a wallet with all of its accounts, addresses and transactions.
    ///
    /// Every account lock of the wallet is held across the pending check and the
    /// deletes, so no pipeline step can interleave with them.
    ///
    /// # Errors
    /// * `WalletError::WrongPassword` - password does not unlock the wallet
    /// * `WalletError::WalletInUse` - a transaction is still built, signed or verified
    pub async fn delete_wallet(
        &self,
        namespace: &str,
        wallet_id: &str,
        password: &str,
    ) -> Result<(), WalletError> {
        let scope = self.scope(namespace).await?;
        let result = async {
            let key = scope
                .storage
                .get_wallet_key(wallet_id)
                .await?
                .ok_or_else(|| WalletError::NotFound(format!("wallet {}", wallet_id)))?;
            self.vault.unlock(wallet_id, &key, password)?;

            let account_ids: Vec<String> = scope
                .storage
                .list_accounts(wallet_id, 0, -1)
                .await?
                .into_iter()
                .map(|a| a.account_id)
                .collect();
            let _guards = scope.locks.acquire_all(&account_ids).await;

            match scope.storage.delete_wallet(wallet_id).await? {
                WalletDeletion::Pending(pending) => {
                    return Err(WalletError::WalletInUse(format!(
                        "wallet {} has {} pending transactions",
                        wallet_id, pending
                    )))
                }
                WalletDeletion::Missing => {
                    return Err(WalletError::NotFound(format!("wallet {}", wallet_id)))
                }
                WalletDeletion::Deleted => {}
            }
            for account_id in &account_ids {
                scope.balances.invalidate(account_id);
            }
            warn!(namespace = %namespace, wallet_id = %wallet_id, accounts = account_ids.len(), "wallet deleted");
            Ok(())
        }
        .await;
        scope.settle(result)
    }
}
