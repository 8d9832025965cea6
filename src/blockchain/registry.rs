use std::collections::BTreeMap;
use std::sync::Arc;

use tracing::info;

use crate::blockchain::traits::AssetAdapter;
use crate::core::errors::WalletError;

/// Symbol -> adapter table. Populated before the manager is built and shared read-only
/// behind an `Arc` afterwards.
#[derive(Default)]
pub struct AssetRegistry {
    adapters: BTreeMap<String, Arc<dyn AssetAdapter>>,
}

impl AssetRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `adapter` under `symbol`. A symbol can be registered once.
    pub fn register(
        &mut self,
        symbol: &str,
        adapter: Arc<dyn AssetAdapter>,
    ) -> Result<(), WalletError> {
        let key = symbol.trim().to_uppercase();
        if key.is_empty() {
            return Err(WalletError::Config("asset symbol must not be empty".into()));
        }
        if !adapter.symbol().eq_ignore_ascii_case(&key) {
            return Err(WalletError::Config(format!(
                "adapter reports symbol {} but was registered as {}",
                adapter.symbol(),
                key
            )));
        }
        if self.adapters.contains_key(&key) {
            return Err(WalletError::AssetAlreadyRegistered(key));
        }
        info!(symbol = %key, coin_type = adapter.coin_type(), "asset adapter registered");
        self.adapters.insert(key, adapter);
        Ok(())
    }

    pub fn get(&self, symbol: &str) -> Result<Arc<dyn AssetAdapter>, WalletError> {
        self.adapters
            .get(&symbol.trim().to_uppercase())
            .cloned()
            .ok_or_else(|| WalletError::UnsupportedAsset(symbol.to_string()))
    }

    pub fn contains(&self, symbol: &str) -> bool {
        self.adapters.contains_key(&symbol.trim().to_uppercase())
    }

    /// Registered symbols in ascending order.
    pub fn symbols(&self) -> Vec<String> {
        self.adapters.keys().cloned().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::blockchain::memory::MemoryLedgerAdapter;

    #[test]
    fn test_register_and_lookup_case_insensitive() {
        let mut registry = AssetRegistry::new();
        registry
            .register("fac", Arc::new(MemoryLedgerAdapter::new("FAC", 88)))
            .unwrap();
        assert!(registry.contains("FAC"));
        assert_eq!(registry.get("Fac").unwrap().coin_type(), 88);
        assert_eq!(registry.symbols(), vec!["FAC".to_string()]);
    }

    #[test]
    fn test_duplicate_symbol_rejected() {
        let mut registry = AssetRegistry::new();
        registry
            .register("ETH", Arc::new(MemoryLedgerAdapter::new("ETH", 60)))
            .unwrap();
        let err = registry
            .register("eth", Arc::new(MemoryLedgerAdapter::new("ETH", 60)))
            .unwrap_err();
        assert!(matches!(err, WalletError::AssetAlreadyRegistered(s) if s == "ETH"));
        // first registration stays in place
        assert_eq!(registry.symbols().len(), 1);
    }

    #[test]
    fn test_symbol_mismatch_is_config_error() {
        let mut registry = AssetRegistry::new();
        let err = registry
            .register("BTC", Arc::new(MemoryLedgerAdapter::new("ETH", 60)))
            .unwrap_err();
        assert!(matches!(err, WalletError::Config(_)));
    }

    #[test]
    fn test_unknown_symbol() {
        let registry = AssetRegistry::new();
        assert!(matches!(registry.get("DOGE"), Err(WalletError::UnsupportedAsset(_))));
    }
}
