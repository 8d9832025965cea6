use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

use anyhow::{anyhow, Result};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sqlx::sqlite::{
    SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions, SqliteRow,
    SqliteSynchronous,
};
use sqlx::Row;
use tracing::{debug, info, warn};

use crate::core::config::StorageConfig;
use crate::core::domain::{Address, AssetsAccount, RawTransaction, TxStatus, Wallet};
use crate::core::key_vault::EncryptedRootKey;

/// Outcome of [`WalletStorage::delete_wallet`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WalletDeletion {
    Deleted,
    Missing,
    /// Nothing was removed; this many transactions are built, signed or verified.
    Pending(i64),
}

/// SQLite store for one application namespace.
#[derive(Debug, Clone)]
pub struct WalletStorage {
    pool: SqlitePool,
}

impl WalletStorage {
    /// Opens (creating if missing) the database file at `path`.
    pub async fn open(path: &Path, config: &StorageConfig) -> Result<Self> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                if let Err(e) = std::fs::create_dir_all(parent) {
                    warn!("Failed to create database dir {:?}: {}", parent, e);
                }
            }
        }

        let connect_options = SqliteConnectOptions::new()
            .filename(path)
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .synchronous(SqliteSynchronous::Normal)
            .busy_timeout(Duration::from_secs(config.busy_timeout_secs))
            .foreign_keys(true);

        let pool = SqlitePoolOptions::new()
            .max_connections(config.max_connections)
            .acquire_timeout(Duration::from_secs(config.busy_timeout_secs))
            .connect_with(connect_options)
            .await
            .map_err(|e| anyhow!("Failed to open database {}: {}", path.display(), e))?;

        let storage = Self { pool };
        storage.initialize_schema().await?;
        info!(db = %path.display(), "[storage] namespace database ready");
        Ok(storage)
    }

    /// Closes the pool; later queries fail.
    pub async fn close(&self) {
        self.pool.close().await;
    }

    pub fn is_closed(&self) -> bool {
        self.pool.is_closed()
    }

    async fn initialize_schema(&self) -> Result<()> {
        debug!("Initializing database schema");

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS wallets (
                wallet_id TEXT PRIMARY KEY,
                alias TEXT NOT NULL,
                is_trust BOOLEAN NOT NULL,
                root_public_key TEXT NOT NULL,
                root_path TEXT NOT NULL,
                account_index INTEGER NOT NULL,
                ciphertext BLOB NOT NULL,
                salt BLOB NOT NULL,
                nonce BLOB NOT NULL,
                kdf_iterations INTEGER NOT NULL,
                created_at DATETIME NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await
        .map_err(|e| anyhow!("Failed to create wallets table: {}", e))?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS accounts (
                account_id TEXT PRIMARY KEY,
                wallet_id TEXT NOT NULL,
                symbol TEXT NOT NULL,
                alias TEXT NOT NULL,
                account_index INTEGER NOT NULL,
                hd_path TEXT NOT NULL,
                public_key TEXT NOT NULL,
                required INTEGER NOT NULL,
                is_trust BOOLEAN NOT NULL,
                balance TEXT NOT NULL,
                address_index INTEGER NOT NULL,
                pending_reorg BOOLEAN NOT NULL DEFAULT 0,
                created_at DATETIME NOT NULL,
                UNIQUE (wallet_id, symbol, account_index),
                FOREIGN KEY (wallet_id) REFERENCES wallets (wallet_id)
            )
            "#,
        )
        .execute(&self.pool)
        .await
        .map_err(|e| anyhow!("Failed to create accounts table: {}", e))?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS addresses (
                address TEXT PRIMARY KEY,
                account_id TEXT NOT NULL,
                symbol TEXT NOT NULL,
                address_index INTEGER NOT NULL,
                hd_path TEXT NOT NULL,
                public_key TEXT NOT NULL,
                is_change BOOLEAN NOT NULL,
                is_used BOOLEAN NOT NULL DEFAULT 0,
                watch_only BOOLEAN NOT NULL DEFAULT 0,
                created_at DATETIME NOT NULL,
                UNIQUE (account_id, address_index),
                FOREIGN KEY (account_id) REFERENCES accounts (account_id)
            )
            "#,
        )
        .execute(&self.pool)
        .await
        .map_err(|e| anyhow!("Failed to create addresses table: {}", e))?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS transactions (
                id TEXT PRIMARY KEY,
                wallet_id TEXT NOT NULL,
                account_id TEXT NOT NULL,
                status TEXT NOT NULL,
                body TEXT NOT NULL,
                created_at DATETIME NOT NULL,
                updated_at DATETIME NOT NULL,
                FOREIGN KEY (account_id) REFERENCES accounts (account_id)
            )
            "#,
        )
        .execute(&self.pool)
        .await
        .map_err(|e| anyhow!("Failed to create transactions table: {}", e))?;

        sqlx::query("CREATE INDEX IF NOT EXISTS idx_tx_account ON transactions (account_id, created_at)")
            .execute(&self.pool)
            .await
            .map_err(|e| anyhow!("Failed to create transactions index: {}", e))?;

        Ok(())
    }

    // ---- wallets ----

    pub async fn insert_wallet(&self, wallet: &Wallet, key: &EncryptedRootKey) -> Result<()> {
        debug!(wallet_id = %wallet.wallet_id, "Storing wallet");
        sqlx::query(
            r#"
            INSERT INTO wallets (wallet_id, alias, is_trust, root_public_key, root_path,
                                 account_index, ciphertext, salt, nonce, kdf_iterations, created_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)
            "#,
        )
        .bind(&wallet.wallet_id)
        .bind(&wallet.alias)
        .bind(wallet.is_trust)
        .bind(&wallet.root_public_key)
        .bind(&wallet.root_path)
        .bind(wallet.account_index)
        .bind(&key.ciphertext)
        .bind(&key.salt)
        .bind(&key.nonce)
        .bind(key.iterations)
        .bind(wallet.created_at)
        .execute(&self.pool)
        .await
        .map_err(|e| anyhow!("Failed to store wallet: {}", e))?;
        Ok(())
    }

    pub async fn get_wallet(&self, wallet_id: &str) -> Result<Option<Wallet>> {
        let row = sqlx::query("SELECT * FROM wallets WHERE wallet_id = ?1")
            .bind(wallet_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| anyhow!("Failed to load wallet: {}", e))?;
        Ok(row.as_ref().map(wallet_from_row))
    }

    pub async fn get_wallet_key(&self, wallet_id: &str) -> Result<Option<EncryptedRootKey>> {
        let row = sqlx::query(
            "SELECT ciphertext, salt, nonce, kdf_iterations FROM wallets WHERE wallet_id = ?1",
        )
        .bind(wallet_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| anyhow!("Failed to load wallet key: {}", e))?;
        Ok(row.map(|row| EncryptedRootKey {
            ciphertext: row.get("ciphertext"),
            salt: row.get("salt"),
            nonce: row.get("nonce"),
            iterations: row.get("kdf_iterations"),
        }))
    }

    pub async fn list_wallets(&self) -> Result<Vec<Wallet>> {
        let rows = sqlx::query("SELECT * FROM wallets ORDER BY created_at ASC, wallet_id ASC")
            .fetch_all(&self.pool)
            .await
            .map_err(|e| anyhow!("Failed to list wallets: {}", e))?;
        Ok(rows.iter().map(wallet_from_row).collect())
    }

    /// Removes the wallet with every account, address and transaction under it.
    ///
    /// The pending check runs inside the same transaction as the deletes, so a record
    /// built concurrently either blocks the deletion or is never removed by it.
    pub async fn delete_wallet(&self, wallet_id: &str) -> Result<WalletDeletion> {
        let mut tx = self.pool.begin().await.map_err(|e| anyhow!("Failed to begin: {}", e))?;
        let row = sqlx::query(
            r#"
            SELECT COUNT(*) AS n FROM transactions
            WHERE wallet_id = ?1 AND status IN ('built', 'signed', 'verified')
            "#,
        )
        .bind(wallet_id)
        .fetch_one(&mut *tx)
        .await
        .map_err(|e| anyhow!("Failed to count pending transactions: {}", e))?;
        let pending: i64 = row.get("n");
        if pending > 0 {
            tx.rollback()
                .await
                .map_err(|e| anyhow!("Failed to roll back wallet deletion: {}", e))?;
            return Ok(WalletDeletion::Pending(pending));
        }

        sqlx::query("DELETE FROM transactions WHERE wallet_id = ?1")
            .bind(wallet_id)
            .execute(&mut *tx)
            .await
            .map_err(|e| anyhow!("Failed to delete transactions: {}", e))?;
        sqlx::query(
            "DELETE FROM addresses WHERE account_id IN (SELECT account_id FROM accounts WHERE wallet_id = ?1)",
        )
        .bind(wallet_id)
        .execute(&mut *tx)
        .await
        .map_err(|e| anyhow!("Failed to delete addresses: {}", e))?;
        sqlx::query("DELETE FROM accounts WHERE wallet_id = ?1")
            .bind(wallet_id)
            .execute(&mut *tx)
            .await
            .map_err(|e| anyhow!("Failed to delete accounts: {}", e))?;
        let result = sqlx::query("DELETE FROM wallets WHERE wallet_id = ?1")
            .bind(wallet_id)
            .execute(&mut *tx)
            .await
            .map_err(|e| anyhow!("Failed to delete wallet: {}", e))?;
        tx.commit().await.map_err(|e| anyhow!("Failed to commit wallet deletion: {}", e))?;
        if result.rows_affected() > 0 {
            Ok(WalletDeletion::Deleted)
        } else {
            Ok(WalletDeletion::Missing)
        }
    }

    // ---- accounts ----

    /// Inserts the account with its first address and raises the wallet's account index.
    pub async fn insert_account(&self, account: &AssetsAccount, first: &Address) -> Result<()> {
        let mut tx = self.pool.begin().await.map_err(|e| anyhow!("Failed to begin: {}", e))?;
        sqlx::query(
            r#"
            INSERT INTO accounts (account_id, wallet_id, symbol, alias, account_index, hd_path,
                                  public_key, required, is_trust, balance, address_index,
                                  pending_reorg, created_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)
            "#,
        )
        .bind(&account.account_id)
        .bind(&account.wallet_id)
        .bind(&account.symbol)
        .bind(&account.alias)
        .bind(account.index)
        .bind(&account.hd_path)
        .bind(&account.public_key)
        .bind(account.required)
        .bind(account.is_trust)
        .bind(account.balance.to_string())
        .bind(account.address_index)
        .bind(account.pending_reorg)
        .bind(account.created_at)
        .execute(&mut *tx)
        .await
        .map_err(|e| anyhow!("Failed to store account: {}", e))?;

        insert_address(&mut tx, first).await?;

        sqlx::query("UPDATE wallets SET account_index = MAX(account_index, ?1) WHERE wallet_id = ?2")
            .bind(i64::from(account.index))
            .bind(&account.wallet_id)
            .execute(&mut *tx)
            .await
            .map_err(|e| anyhow!("Failed to update wallet account index: {}", e))?;

        tx.commit().await.map_err(|e| anyhow!("Failed to commit account: {}", e))?;
        Ok(())
    }

    pub async fn get_account(&self, account_id: &str) -> Result<Option<AssetsAccount>> {
        let row = sqlx::query("SELECT * FROM accounts WHERE account_id = ?1")
            .bind(account_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| anyhow!("Failed to load account: {}", e))?;
        row.as_ref().map(account_from_row).transpose()
    }

    /// `limit < 0` returns everything from `offset`.
    pub async fn list_accounts(
        &self,
        wallet_id: &str,
        offset: i64,
        limit: i64,
    ) -> Result<Vec<AssetsAccount>> {
        let rows = sqlx::query(
            r#"
            SELECT * FROM accounts WHERE wallet_id = ?1
            ORDER BY account_index ASC, symbol ASC
            LIMIT ?2 OFFSET ?3
            "#,
        )
        .bind(wallet_id)
        .bind(limit)
        .bind(offset)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| anyhow!("Failed to list accounts: {}", e))?;
        rows.iter().map(account_from_row).collect()
    }

    pub async fn update_account_balance(&self, account_id: &str, balance: Decimal) -> Result<()> {
        sqlx::query("UPDATE accounts SET balance = ?1 WHERE account_id = ?2")
            .bind(balance.to_string())
            .bind(account_id)
            .execute(&self.pool)
            .await
            .map_err(|e| anyhow!("Failed to update account balance: {}", e))?;
        Ok(())
    }

    pub async fn set_account_reorg(&self, account_id: &str, pending: bool) -> Result<bool> {
        let result = sqlx::query("UPDATE accounts SET pending_reorg = ?1 WHERE account_id = ?2")
            .bind(pending)
            .bind(account_id)
            .execute(&self.pool)
            .await
            .map_err(|e| anyhow!("Failed to update account reorg flag: {}", e))?;
        Ok(result.rows_affected() > 0)
    }

    // ---- addresses ----

    /// Appends `addresses` and advances `address_index` from `expected_last` in one
    /// transaction. Fails if another writer moved the index first.
    pub async fn append_addresses(
        &self,
        account_id: &str,
        expected_last: i64,
        addresses: &[Address],
    ) -> Result<()> {
        let Some(last) = addresses.last() else {
            return Ok(());
        };
        let mut tx = self.pool.begin().await.map_err(|e| anyhow!("Failed to begin: {}", e))?;
        let result = sqlx::query(
            "UPDATE accounts SET address_index = ?1 WHERE account_id = ?2 AND address_index = ?3",
        )
        .bind(i64::from(last.index))
        .bind(account_id)
        .bind(expected_last)
        .execute(&mut *tx)
        .await
        .map_err(|e| anyhow!("Failed to advance address index: {}", e))?;
        if result.rows_affected() == 0 {
            return Err(anyhow!(
                "address index of {} moved concurrently (expected {})",
                account_id,
                expected_last
            ));
        }
        for address in addresses {
            insert_address(&mut tx, address).await?;
        }
        tx.commit().await.map_err(|e| anyhow!("Failed to commit addresses: {}", e))?;
        Ok(())
    }

    pub async fn get_address(&self, address: &str) -> Result<Option<Address>> {
        let row = sqlx::query("SELECT * FROM addresses WHERE address = ?1")
            .bind(address)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| anyhow!("Failed to load address: {}", e))?;
        Ok(row.as_ref().map(address_from_row))
    }

    /// Ordered by index. `limit < 0` returns everything from `offset`.
    pub async fn list_addresses(
        &self,
        account_id: &str,
        offset: i64,
        limit: i64,
        watch_only: bool,
    ) -> Result<Vec<Address>> {
        let sql = if watch_only {
            r#"
            SELECT * FROM addresses WHERE account_id = ?1 AND watch_only = 1
            ORDER BY address_index ASC LIMIT ?2 OFFSET ?3
            "#
        } else {
            r#"
            SELECT * FROM addresses WHERE account_id = ?1
            ORDER BY address_index ASC LIMIT ?2 OFFSET ?3
            "#
        };
        let rows = sqlx::query(sql)
            .bind(account_id)
            .bind(limit)
            .bind(offset)
            .fetch_all(&self.pool)
            .await
            .map_err(|e| anyhow!("Failed to list addresses: {}", e))?;
        Ok(rows.iter().map(address_from_row).collect())
    }

    pub async fn mark_address_used(&self, address: &str) -> Result<bool> {
        let result = sqlx::query("UPDATE addresses SET is_used = 1 WHERE address = ?1")
            .bind(address)
            .execute(&self.pool)
            .await
            .map_err(|e| anyhow!("Failed to mark address used: {}", e))?;
        Ok(result.rows_affected() > 0)
    }

    pub async fn set_address_watch_only(&self, address: &str, watch_only: bool) -> Result<bool> {
        let result = sqlx::query("UPDATE addresses SET watch_only = ?1 WHERE address = ?2")
            .bind(watch_only)
            .bind(address)
            .execute(&self.pool)
            .await
            .map_err(|e| anyhow!("Failed to update watch flag: {}", e))?;
        Ok(result.rows_affected() > 0)
    }

    // ---- transactions ----

    pub async fn insert_transaction(&self, tx: &RawTransaction) -> Result<()> {
        let body = serde_json::to_string(tx)?;
        sqlx::query(
            r#"
            INSERT INTO transactions (id, wallet_id, account_id, status, body, created_at, updated_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
            "#,
        )
        .bind(&tx.id)
        .bind(&tx.wallet_id)
        .bind(&tx.account_id)
        .bind(tx.status.as_str())
        .bind(body)
        .bind(tx.created_at)
        .bind(tx.updated_at)
        .execute(&self.pool)
        .await
        .map_err(|e| anyhow!("Failed to store transaction: {}", e))?;
        Ok(())
    }

    pub async fn update_transaction(&self, tx: &RawTransaction) -> Result<()> {
        let body = serde_json::to_string(tx)?;
        let result = sqlx::query(
            "UPDATE transactions SET status = ?1, body = ?2, updated_at = ?3 WHERE id = ?4",
        )
        .bind(tx.status.as_str())
        .bind(body)
        .bind(tx.updated_at)
        .bind(&tx.id)
        .execute(&self.pool)
        .await
        .map_err(|e| anyhow!("Failed to update transaction: {}", e))?;
        if result.rows_affected() == 0 {
            return Err(anyhow!("Transaction not found: {}", tx.id));
        }
        Ok(())
    }

    pub async fn get_transaction(&self, id: &str) -> Result<Option<RawTransaction>> {
        let row = sqlx::query("SELECT body FROM transactions WHERE id = ?1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| anyhow!("Failed to load transaction: {}", e))?;
        row.map(|row| {
            let body: String = row.get("body");
            serde_json::from_str(&body).map_err(|e| anyhow!("Corrupt transaction {}: {}", id, e))
        })
        .transpose()
    }

    pub async fn list_transactions(
        &self,
        account_id: &str,
        status: Option<TxStatus>,
    ) -> Result<Vec<RawTransaction>> {
        let rows = match status {
            Some(status) => {
                sqlx::query(
                    "SELECT body FROM transactions WHERE account_id = ?1 AND status = ?2 ORDER BY created_at ASC, id ASC",
                )
                .bind(account_id)
                .bind(status.as_str())
                .fetch_all(&self.pool)
                .await
            }
            None => {
                sqlx::query(
                    "SELECT body FROM transactions WHERE account_id = ?1 ORDER BY created_at ASC, id ASC",
                )
                .bind(account_id)
                .fetch_all(&self.pool)
                .await
            }
        }
        .map_err(|e| anyhow!("Failed to list transactions: {}", e))?;

        rows.iter()
            .map(|row| {
                let body: String = row.get("body");
                serde_json::from_str(&body).map_err(|e| anyhow!("Corrupt transaction: {}", e))
            })
            .collect()
    }
}

async fn insert_address(
    tx: &mut sqlx::Transaction<'_, sqlx::Sqlite>,
    address: &Address,
) -> Result<()> {
    sqlx::query(
        r#"
        INSERT INTO addresses (address, account_id, symbol, address_index, hd_path, public_key,
                               is_change, is_used, watch_only, created_at)
        VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)
        "#,
    )
    .bind(&address.address)
    .bind(&address.account_id)
    .bind(&address.symbol)
    .bind(address.index)
    .bind(&address.hd_path)
    .bind(&address.public_key)
    .bind(address.is_change)
    .bind(address.is_used)
    .bind(address.watch_only)
    .bind(address.created_at)
    .execute(&mut **tx)
    .await
    .map_err(|e| anyhow!("Failed to store address {}: {}", address.address, e))?;
    Ok(())
}

fn wallet_from_row(row: &SqliteRow) -> Wallet {
    Wallet {
        wallet_id: row.get("wallet_id"),
        alias: row.get("alias"),
        is_trust: row.get("is_trust"),
        root_public_key: row.get("root_public_key"),
        root_path: row.get("root_path"),
        account_index: row.get("account_index"),
        created_at: row.get::<DateTime<Utc>, _>("created_at"),
    }
}

fn account_from_row(row: &SqliteRow) -> Result<AssetsAccount> {
    let balance: String = row.get("balance");
    Ok(AssetsAccount {
        account_id: row.get("account_id"),
        wallet_id: row.get("wallet_id"),
        symbol: row.get("symbol"),
        alias: row.get("alias"),
        index: row.get("account_index"),
        hd_path: row.get("hd_path"),
        public_key: row.get("public_key"),
        required: row.get("required"),
        is_trust: row.get("is_trust"),
        balance: Decimal::from_str(&balance)
            .map_err(|e| anyhow!("Corrupt balance '{}': {}", balance, e))?,
        address_index: row.get("address_index"),
        pending_reorg: row.get("pending_reorg"),
        created_at: row.get::<DateTime<Utc>, _>("created_at"),
    })
}

fn address_from_row(row: &SqliteRow) -> Address {
    Address {
        address: row.get("address"),
        account_id: row.get("account_id"),
        symbol: row.get("symbol"),
        index: row.get("address_index"),
        hd_path: row.get("hd_path"),
        public_key: row.get("public_key"),
        is_change: row.get("is_change"),
        is_used: row.get("is_used"),
        watch_only: row.get("watch_only"),
        created_at: row.get::<DateTime<Utc>, _>("created_at"),
    }
}
