// tests/util.rs
// Shared helpers for the integration tests

#![allow(dead_code)]

use std::path::Path;
use std::sync::Arc;

use hd_assets_wallet::blockchain::{AssetAdapter, AssetRegistry, MemoryLedgerAdapter};
use hd_assets_wallet::core::config::WalletConfig;
use hd_assets_wallet::core::{AccountSpec, Address, AssetsAccount, Wallet, WalletManager};
use tempfile::TempDir;

pub const NS: &str = "app";
pub const PASSWORD: &str = "correct-horse-battery";
pub const SYMBOL: &str = "FAC";
pub const COIN_TYPE: u32 = 88;
pub const RECEIVER: &str = "0x00000000000000000000000000000000000000aa";

pub struct TestEnv {
    pub dir: TempDir,
    pub ledger: Arc<MemoryLedgerAdapter>,
    pub manager: WalletManager,
}

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::new("debug"))
        .with_test_writer()
        .try_init();
}

/// Low PBKDF2 cost keeps the suites fast.
pub fn test_config(dir: &Path) -> WalletConfig {
    let mut config = WalletConfig {
        data_dir: dir.to_path_buf(),
        support_assets: vec![SYMBOL.to_string()],
        ..WalletConfig::default()
    };
    config.security.pbkdf2_iterations = 64;
    config
}

pub fn registry_with(adapters: Vec<Arc<dyn AssetAdapter>>) -> Arc<AssetRegistry> {
    let mut registry = AssetRegistry::new();
    for adapter in adapters {
        let symbol = adapter.symbol().to_string();
        registry.register(&symbol, adapter).unwrap();
    }
    Arc::new(registry)
}

/// Manager over a fresh temp dir with one in-memory ledger registered as `FAC`.
pub fn setup() -> TestEnv {
    init_tracing();
    let dir = tempfile::tempdir().unwrap();
    let ledger = Arc::new(MemoryLedgerAdapter::new(SYMBOL, COIN_TYPE));
    let manager = WalletManager::new(
        test_config(dir.path()),
        registry_with(vec![ledger.clone() as Arc<dyn AssetAdapter>]),
    )
    .unwrap();
    TestEnv { dir, ledger, manager }
}

/// Second manager over the same data dir and ledger.
pub fn reopen(env: &TestEnv) -> WalletManager {
    WalletManager::new(
        test_config(env.dir.path()),
        registry_with(vec![env.ledger.clone() as Arc<dyn AssetAdapter>]),
    )
    .unwrap()
}

pub async fn wallet_with_account(env: &TestEnv) -> (Wallet, AssetsAccount, Address) {
    let created = env.manager.create_wallet(NS, "main", PASSWORD).await.unwrap();
    let (account, first) = env
        .manager
        .create_assets_account(
            NS,
            &created.wallet.wallet_id,
            PASSWORD,
            &AccountSpec::new(SYMBOL, "savings"),
        )
        .await
        .unwrap();
    (created.wallet, account, first)
}
