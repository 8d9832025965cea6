pub mod account_registry;
pub mod address_book;
pub mod config;
pub mod domain;
pub mod errors;
pub mod hd;
pub mod identity;
pub mod key_vault;
pub mod locks;
pub mod pipeline;
pub mod wallet_manager;

pub use domain::{
    AccountSpec, Address, AssetsAccount, Confirmation, NewWallet, RawTransaction,
    SmartContract, TxStatus, Wallet,
};
pub use errors::WalletError;
pub use pipeline::{SummaryRequest, SummaryResult, TransferRequest};
pub use wallet_manager::WalletManager;
