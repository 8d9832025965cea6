//! Wallet Manager façade
//!
//! Routes every call by application namespace and asset symbol.
//!
//! ## Module Structure
//! - `lifecycle` - wallet creation, import, listing and deletion
//! - `accounts` - assets accounts, addresses and balances
//! - `transactions` - create/sign/verify/submit and summary sweeps

pub mod accounts;
pub mod lifecycle;
pub mod transactions;

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use parking_lot::RwLock;
use tokio::sync::Mutex as AsyncMutex;
use tracing::info;

use crate::blockchain::{registry::AssetRegistry, traits::AssetAdapter};
use crate::core::{
    account_registry::{AccountRegistry, BalanceCache},
    address_book::AddressBook,
    config::WalletConfig,
    domain::AssetsAccount,
    errors::WalletError,
    key_vault::KeyVault,
    locks::AccountLocks,
    pipeline::TransactionPipeline,
};
use crate::storage::WalletStorage;

const MAX_NAMESPACE_LEN: usize = 64;

/// Storage handle and per-account state of one application namespace.
pub struct NamespaceScope {
    name: String,
    storage: WalletStorage,
    locks: AccountLocks,
    balances: BalanceCache,
}

impl NamespaceScope {
    fn new(name: &str, storage: WalletStorage) -> Self {
        Self {
            name: name.to_string(),
            storage,
            locks: AccountLocks::new(),
            balances: BalanceCache::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// A call that was holding this scope when the namespace closed reports
    /// `NamespaceClosed` rather than the pool's storage error.
    fn settle<T>(&self, result: Result<T, WalletError>) -> Result<T, WalletError> {
        match result {
            Err(WalletError::Storage(_)) if self.storage.is_closed() => {
                Err(WalletError::NamespaceClosed(self.name.clone()))
            }
            other => other,
        }
    }

    fn address_book(&self) -> AddressBook<'_> {
        AddressBook::new(&self.storage, &self.locks)
    }

    fn accounts<'a>(&'a self, vault: &'a KeyVault) -> AccountRegistry<'a> {
        AccountRegistry::new(&self.storage, &self.locks, &self.balances, vault)
    }

    fn pipeline<'a>(&'a self, vault: &'a KeyVault) -> TransactionPipeline<'a> {
        TransactionPipeline::new(&self.storage, &self.locks, vault)
    }
}

enum ScopeState {
    Open(Arc<NamespaceScope>),
    Closed,
}

/// Namespace names: 1..=64 chars of `[A-Za-z0-9_.-]`, not starting with `.`.
pub fn validate_namespace(name: &str) -> Result<(), WalletError> {
    let valid_chars = name
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '.'));
    if name.is_empty() || name.len() > MAX_NAMESPACE_LEN || name.starts_with('.') || !valid_chars {
        return Err(WalletError::Validation(format!("invalid namespace '{}'", name)));
    }
    Ok(())
}

/// wallet manager
///
/// Holds the read-only asset registry and one lazily opened storage scope per
/// application namespace.
pub struct WalletManager {
    config: WalletConfig,
    registry: Arc<AssetRegistry>,
    vault: KeyVault,
    scopes: RwLock<HashMap<String, ScopeState>>,
    /// Serializes database opens so a namespace is never opened twice.
    opening: AsyncMutex<()>,
}

impl WalletManager {
    /// # Errors
    /// `Config` when the configuration is invalid or a symbol listed in
    /// `support_assets` has no registered adapter.
    pub fn new(config: WalletConfig, registry: Arc<AssetRegistry>) -> Result<Self, WalletError> {
        config.validate()?;
        for symbol in &config.support_assets {
            if !registry.contains(symbol) {
                return Err(WalletError::Config(format!(
                    "support_assets lists {} but no adapter is registered",
                    symbol
                )));
            }
        }
        info!(
            data_dir = %config.data_dir.display(),
            assets = ?registry.symbols(),
            "wallet manager initialized"
        );
        Ok(Self {
            vault: KeyVault::new(config.security.pbkdf2_iterations),
            config,
            registry,
            scopes: RwLock::new(HashMap::new()),
            opening: AsyncMutex::new(()),
        })
    }

    pub fn config(&self) -> &WalletConfig {
        &self.config
    }

    /// Symbols with a registered adapter, ascending.
    pub fn supported_assets(&self) -> Vec<String> {
        self.registry.symbols()
    }

    fn db_path(&self, namespace: &str) -> PathBuf {
        self.config.data_dir.join(format!("{}.db", namespace))
    }

    fn adapter(&self, symbol: &str) -> Result<Arc<dyn AssetAdapter>, WalletError> {
        self.registry.get(symbol)
    }

    fn lookup(&self, namespace: &str) -> Result<Option<Arc<NamespaceScope>>, WalletError> {
        match self.scopes.read().get(namespace) {
            Some(ScopeState::Open(scope)) => Ok(Some(scope.clone())),
            Some(ScopeState::Closed) => Err(WalletError::NamespaceClosed(namespace.to_string())),
            None => Ok(None),
        }
    }

    async fn open_scope(&self, namespace: &str) -> Result<Arc<NamespaceScope>, WalletError> {
        let storage = WalletStorage::open(&self.db_path(namespace), &self.config.storage).await?;
        let scope = Arc::new(NamespaceScope::new(namespace, storage));
        self.scopes
            .write()
            .insert(namespace.to_string(), ScopeState::Open(scope.clone()));
        info!(namespace = %namespace, "namespace opened");
        Ok(scope)
    }

    /// Scope for `namespace`, opened on first use. Closed namespaces stay closed.
    async fn scope(&self, namespace: &str) -> Result<Arc<NamespaceScope>, WalletError> {
        validate_namespace(namespace)?;
        if let Some(scope) = self.lookup(namespace)? {
            return Ok(scope);
        }
        let _opening = self.opening.lock().await;
        if let Some(scope) = self.lookup(namespace)? {
            return Ok(scope);
        }
        self.open_scope(namespace).await
    }

    /// Opens `namespace`, reopening it if it was closed.
    pub async fn open_db(&self, namespace: &str) -> Result<(), WalletError> {
        validate_namespace(namespace)?;
        let _opening = self.opening.lock().await;
        if let Ok(Some(_)) = self.lookup(namespace) {
            return Ok(());
        }
        self.open_scope(namespace).await.map(|_| ())
    }

    /// Releases the namespace's storage. Later calls fail with `NamespaceClosed` until
    /// [`WalletManager::open_db`].
    pub async fn close_db(&self, namespace: &str) -> Result<(), WalletError> {
        validate_namespace(namespace)?;
        let _opening = self.opening.lock().await;
        let previous = self
            .scopes
            .write()
            .insert(namespace.to_string(), ScopeState::Closed);
        if let Some(ScopeState::Open(scope)) = previous {
            scope.storage.close().await;
            info!(namespace = %namespace, "namespace closed");
        }
        Ok(())
    }

    /// Loads `account_id` and checks it belongs to `wallet_id`.
    async fn owned_account(
        &self,
        scope: &NamespaceScope,
        wallet_id: &str,
        account_id: &str,
    ) -> Result<AssetsAccount, WalletError> {
        let account = scope.accounts(&self.vault).get_account(account_id).await?;
        if account.wallet_id != wallet_id {
            return Err(WalletError::NotFound(format!(
                "account {} in wallet {}",
                account_id, wallet_id
            )));
        }
        Ok(account)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_case::test_case;

    #[test_case("app", true ; "simple")]
    #[test_case("b.test-1_x", true ; "punctuation")]
    #[test_case("", false ; "empty")]
    #[test_case(".hidden", false ; "leading dot")]
    #[test_case("../etc", false ; "traversal")]
    #[test_case("a/b", false ; "slash")]
    #[test_case("with space", false ; "space")]
    fn namespace_names(name: &str, ok: bool) {
        assert_eq!(validate_namespace(name).is_ok(), ok);
    }

    #[test]
    fn test_namespace_length_limit() {
        assert!(validate_namespace(&"a".repeat(64)).is_ok());
        assert!(validate_namespace(&"a".repeat(65)).is_err());
    }

    #[test]
    fn test_unregistered_support_asset_is_config_error() {
        let config = WalletConfig {
            support_assets: vec!["BTC".into()],
            ..WalletConfig::default()
        };
        let result = WalletManager::new(config, Arc::new(AssetRegistry::new()));
        assert!(matches!(result, Err(WalletError::Config(_))));
    }

    #[tokio::test]
    async fn test_scope_held_across_close_reports_namespace_closed() {
        let dir = tempfile::tempdir().unwrap();
        let config = WalletConfig {
            data_dir: dir.path().to_path_buf(),
            ..WalletConfig::default()
        };
        let manager = WalletManager::new(config, Arc::new(AssetRegistry::new())).unwrap();
        let scope = manager.scope("app").await.unwrap();
        manager.close_db("app").await.unwrap();

        let raw = scope.address_book().get_address("0x01").await;
        assert!(matches!(raw, Err(WalletError::Storage(_))));
        match scope.settle(raw) {
            Err(WalletError::NamespaceClosed(name)) => assert_eq!(name, "app"),
            other => panic!("unexpected {:?}", other),
        }

        let not_found = Err::<(), _>(WalletError::NotFound("x".into()));
        assert!(matches!(scope.settle(not_found), Err(WalletError::NotFound(_))));
    }
}
