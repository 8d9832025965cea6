use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use hd_assets_wallet::blockchain::{AssetRegistry, MemoryLedgerAdapter};
use hd_assets_wallet::cli::{Cli, Commands};
use hd_assets_wallet::core::config::WalletConfig;
use hd_assets_wallet::core::key_vault::KeyVault;
use hd_assets_wallet::core::WalletManager;
use hd_assets_wallet::security::SecretString;
use tracing::info;
use tracing_subscriber::{EnvFilter, FmtSubscriber};

/// SLIP-44 "testnet" coin type used by the in-memory demo ledgers.
const DEMO_COIN_TYPE: u32 = 1;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging()?;

    let config = match cli.config.as_deref() {
        Some(path) => WalletConfig::from_toml_file(path)?,
        None => {
            let mut config = WalletConfig::default();
            config.apply_env_overrides();
            config
        }
    };

    if let Commands::GenSeed { bits } = cli.command {
        let seed = KeyVault::generate_seed(bits)?;
        println!("{}", hex::encode(&*seed));
        return Ok(());
    }

    let manager = WalletManager::new(config.clone(), Arc::new(demo_registry(&config)?))?;
    let namespace = cli.namespace.as_str();

    match cli.command {
        Commands::GenSeed { .. } => {}
        Commands::CreateWallet { alias } => {
            let password = read_secret(&cli.password_env)?;
            let created = manager.create_wallet(namespace, &alias, &password).await?;
            info!(wallet_id = %created.wallet.wallet_id, "wallet created");
            println!("wallet_id: {}", created.wallet.wallet_id);
            println!("mnemonic (write it down, it is not stored): {}", created.mnemonic.as_str());
        }
        Commands::ImportWallet { alias } => {
            let password = read_secret(&cli.password_env)?;
            let mnemonic = read_secret("WALLET_MNEMONIC")?;
            let wallet = manager
                .import_wallet(namespace, &alias, &password, &mnemonic)
                .await?;
            println!("wallet_id: {}", wallet.wallet_id);
        }
        Commands::ListWallets => {
            for wallet in manager.get_wallet_list(namespace).await? {
                println!("{}\t{}\t{}", wallet.wallet_id, wallet.alias, wallet.created_at);
            }
        }
        Commands::WalletInfo { wallet_id } => {
            let wallet = manager.get_wallet_info(namespace, &wallet_id).await?;
            println!("{}", serde_json::to_string_pretty(&wallet)?);
        }
        Commands::SupportedAssets => {
            for symbol in manager.supported_assets() {
                println!("{}", symbol);
            }
        }
    }

    manager.close_db(namespace).await?;
    Ok(())
}

fn init_logging() -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    let subscriber = FmtSubscriber::builder()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .finish();

    tracing::subscriber::set_global_default(subscriber)?;
    Ok(())
}

/// One in-memory ledger per configured symbol.
fn demo_registry(config: &WalletConfig) -> Result<AssetRegistry> {
    let mut registry = AssetRegistry::new();
    for symbol in &config.support_assets {
        registry.register(symbol, Arc::new(MemoryLedgerAdapter::new(symbol, DEMO_COIN_TYPE)))?;
    }
    Ok(registry)
}

fn read_secret(var: &str) -> Result<SecretString> {
    let value = std::env::var(var).with_context(|| format!("environment variable {} is not set", var))?;
    Ok(SecretString::new(value))
}
