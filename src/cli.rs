use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// HD wallet manager CLI (library-facing definitions)
#[derive(Debug, Parser)]
#[command(name = "wallet-cli", about = "Multi-asset HD wallet manager", version)]
pub struct Cli {
    /// TOML configuration file; defaults apply when absent
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Application namespace (one database per namespace)
    #[arg(long, global = true, default_value = "default")]
    pub namespace: String,

    /// Environment variable holding the wallet password
    #[arg(long, global = true, default_value = "WALLET_PASSWORD")]
    pub password_env: String,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Print a random hex seed
    GenSeed {
        #[arg(long, default_value_t = 256)]
        bits: usize,
    },
    /// Create a wallet and print its mnemonic once
    CreateWallet {
        #[arg(long)]
        alias: String,
    },
    /// Recreate a wallet from the mnemonic in WALLET_MNEMONIC
    ImportWallet {
        #[arg(long)]
        alias: String,
    },
    ListWallets,
    WalletInfo {
        #[arg(long)]
        wallet_id: String,
    },
    /// List asset symbols with a registered adapter
    SupportedAssets,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_create_wallet_with_globals() {
        let cli = Cli::try_parse_from([
            "wallet-cli",
            "--namespace",
            "b",
            "create-wallet",
            "--alias",
            "savings",
        ])
        .unwrap();
        assert_eq!(cli.namespace, "b");
        assert_eq!(cli.password_env, "WALLET_PASSWORD");
        assert!(matches!(cli.command, Commands::CreateWallet { ref alias } if alias == "savings"));
    }

    #[test]
    fn test_gen_seed_default_bits() {
        let cli = Cli::try_parse_from(["wallet-cli", "gen-seed"]).unwrap();
        assert!(matches!(cli.command, Commands::GenSeed { bits: 256 }));
        assert_eq!(cli.namespace, "default");
    }

    #[test]
    fn test_unknown_command_fails() {
        assert!(Cli::try_parse_from(["wallet-cli", "transfer"]).is_err());
    }
}
