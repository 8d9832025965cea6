//! Multi-asset HD wallet manager.
//!
//! Wallets hold an encrypted BIP32 root key; per-asset accounts derive addresses from an
//! account-level extended public key; payments move through a persisted
//! create/sign/verify/submit pipeline routed to a chain adapter by asset symbol.

pub mod blockchain;
pub mod cli;
pub mod core;
pub mod crypto;
pub mod security;
pub mod storage;

pub use crate::blockchain::{AssetAdapter, AssetRegistry, MemoryLedgerAdapter};
pub use crate::core::config::WalletConfig;
pub use crate::core::{WalletError, WalletManager};
