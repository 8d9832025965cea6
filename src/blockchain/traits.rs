use async_trait::async_trait;

use crate::core::{
    domain::{
        AddressBalance, AssetsAccount, Confirmation, RawTransaction, SmartContract,
        TransactionSpec,
    },
    errors::WalletError,
    key_vault::KeyMaterial,
};

/// Chain-specific capability set behind one asset symbol.
///
/// The manager never looks inside `RawTransaction::raw_payload`; every chain rule lives
/// in the implementation.
#[async_trait]
pub trait AssetAdapter: Send + Sync {
    /// Upper-case asset symbol, e.g. `"ETH"`.
    fn symbol(&self) -> &str;

    /// BIP44 coin type used for account paths.
    fn coin_type(&self) -> u32;

    fn decimals(&self) -> u32;

    /// Encodes a compressed SEC1 public key as an address string.
    fn public_key_to_address(&self, public_key: &[u8]) -> Result<String, WalletError>;

    fn validate_address(&self, address: &str) -> bool;

    /// Builds an unsigned transaction and fills in the pending signature entries.
    ///
    /// # Errors
    /// `InsufficientBalance` or `InvalidRecipient`.
    async fn build_transaction(
        &self,
        account: &AssetsAccount,
        spec: &TransactionSpec,
    ) -> Result<RawTransaction, WalletError>;

    /// Attaches a signature to every pending entry.
    async fn sign_transaction(
        &self,
        tx: &mut RawTransaction,
        keys: &KeyMaterial,
    ) -> Result<(), WalletError>;

    /// `Ok(false)` when signatures do not check out; `MalformedTransaction` when the
    /// payload cannot be decoded.
    async fn verify_transaction(&self, tx: &RawTransaction) -> Result<bool, WalletError>;

    /// # Errors
    /// `Broadcast` (retryable) or `Rejected` (fatal).
    async fn submit_transaction(&self, tx: &RawTransaction) -> Result<Confirmation, WalletError>;

    async fn get_balances(&self, addresses: &[String]) -> Result<Vec<AddressBalance>, WalletError>;

    async fn get_token_balances(
        &self,
        addresses: &[String],
        contract: &SmartContract,
    ) -> Result<Vec<AddressBalance>, WalletError>;
}
