//! Address allocation under an account.
//!
//! Addresses derive from the account's extended public key along
//! `{account_path}/0/{index}`; indices are allocated contiguously under the account lock.

use chrono::Utc;
use tracing::{debug, info};

use crate::blockchain::traits::AssetAdapter;
use crate::core::{
    domain::{Address, AssetsAccount},
    errors::WalletError,
    hd::{ExtendedPublicKey, HARDENED},
    locks::AccountLocks,
};
use crate::storage::WalletStorage;

/// External (receiving) chain.
const RECEIVE_CHAIN: u32 = 0;

/// Derives the receiving address at `index` for `account`.
pub(crate) fn derive_address(
    account: &AssetsAccount,
    xpub: &ExtendedPublicKey,
    adapter: &dyn AssetAdapter,
    index: u32,
) -> Result<Address, WalletError> {
    let child = xpub.derive_indices(&[RECEIVE_CHAIN, index])?;
    let address = adapter.public_key_to_address(child.public_key())?;
    Ok(Address {
        address,
        account_id: account.account_id.clone(),
        symbol: account.symbol.clone(),
        index,
        hd_path: format!("{}/{}/{}", account.hd_path, RECEIVE_CHAIN, index),
        public_key: hex::encode(child.public_key()),
        is_change: false,
        is_used: false,
        watch_only: false,
        created_at: Utc::now(),
    })
}

pub struct AddressBook<'a> {
    storage: &'a WalletStorage,
    locks: &'a AccountLocks,
}

impl<'a> AddressBook<'a> {
    pub fn new(storage: &'a WalletStorage, locks: &'a AccountLocks) -> Self {
        Self { storage, locks }
    }

    async fn load_account(&self, account_id: &str) -> Result<AssetsAccount, WalletError> {
        self.storage
            .get_account(account_id)
            .await?
            .ok_or_else(|| WalletError::NotFound(format!("account {}", account_id)))
    }

    /// Allocates `count` addresses starting right after the last allocated index.
    ///
    /// # Errors
    /// `AccountLocked` while the account is being reorganized.
    pub async fn create_addresses(
        &self,
        account_id: &str,
        adapter: &dyn AssetAdapter,
        count: u32,
    ) -> Result<Vec<Address>, WalletError> {
        if count == 0 {
            return Err(WalletError::Validation("address count must be at least 1".into()));
        }
        let _guard = self.locks.acquire(account_id).await;

        let account = self.load_account(account_id).await?;
        if account.pending_reorg {
            return Err(WalletError::AccountLocked(account_id.to_string()));
        }
        let start = account.address_index + 1;
        let last = start + i64::from(count) - 1;
        if last >= i64::from(HARDENED) {
            return Err(WalletError::Derivation(format!(
                "address index {} out of range for account {}",
                last, account_id
            )));
        }

        let xpub = ExtendedPublicKey::decode(&account.public_key)?;
        let addresses = (start..=last)
            .map(|index| derive_address(&account, &xpub, adapter, index as u32))
            .collect::<Result<Vec<_>, _>>()?;

        self.storage
            .append_addresses(account_id, account.address_index, &addresses)
            .await?;

        info!(
            account_id = %account_id,
            symbol = %account.symbol,
            first = start,
            count,
            "addresses allocated"
        );
        Ok(addresses)
    }

    /// Ordered by index. `limit = -1` returns all remaining from `offset`; an offset past
    /// the end yields an empty list.
    pub async fn list_addresses(
        &self,
        account_id: &str,
        offset: i64,
        limit: i64,
        watch_only: bool,
    ) -> Result<Vec<Address>, WalletError> {
        if offset < 0 {
            return Err(WalletError::Validation(format!("offset must not be negative: {}", offset)));
        }
        if limit < -1 {
            return Err(WalletError::Validation(format!("limit must be -1 or more: {}", limit)));
        }
        self.load_account(account_id).await?;
        let addresses = self
            .storage
            .list_addresses(account_id, offset, limit, watch_only)
            .await?;
        debug!(account_id = %account_id, offset, limit, found = addresses.len(), "address list");
        Ok(addresses)
    }

    pub async fn get_address(&self, address: &str) -> Result<Address, WalletError> {
        self.storage
            .get_address(address)
            .await?
            .ok_or_else(|| WalletError::NotFound(format!("address {}", address)))
    }

    pub async fn mark_address_used(&self, address: &str) -> Result<(), WalletError> {
        if !self.storage.mark_address_used(address).await? {
            return Err(WalletError::NotFound(format!("address {}", address)));
        }
        Ok(())
    }

    pub async fn set_address_watch_only(
        &self,
        address: &str,
        watch_only: bool,
    ) -> Result<(), WalletError> {
        if !self.storage.set_address_watch_only(address, watch_only).await? {
            return Err(WalletError::NotFound(format!("address {}", address)));
        }
        Ok(())
    }

    /// Sets or clears the reorganization lock. Waits for in-flight allocations.
    pub async fn set_account_reorganizing(
        &self,
        account_id: &str,
        pending: bool,
    ) -> Result<(), WalletError> {
        let _guard = self.locks.acquire(account_id).await;
        if !self.storage.set_account_reorg(account_id, pending).await? {
            return Err(WalletError::NotFound(format!("account {}", account_id)));
        }
        info!(account_id = %account_id, pending, "account reorganization flag changed");
        Ok(())
    }
}
