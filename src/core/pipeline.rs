//! Create -> Sign -> Verify -> Submit.
//!
//! The stored record is authoritative. Each transition reloads it by id under the
//! account lock, applies exactly one adapter call to a working copy, persists the new
//! state and only then hands it back to the caller. Failed adapter calls leave both the
//! stored record and the caller's value at the last state reached.

use std::collections::HashMap;

use chrono::Utc;
use rust_decimal::Decimal;
use tracing::{info, warn};

use crate::blockchain::traits::AssetAdapter;
use crate::core::{
    domain::{
        parse_amount, parse_non_negative, parse_optional, AssetsAccount, Confirmation,
        RawTransaction, Recipient, SmartContract, SourceAddress, TransactionSpec, TxStatus,
    },
    errors::WalletError,
    key_vault::KeyVault,
    locks::AccountLocks,
};
use crate::storage::WalletStorage;

/// A single payment. Amounts are decimal strings; an empty `fee_rate` selects the
/// adapter default.
#[derive(Debug, Clone, Copy)]
pub struct TransferRequest<'r> {
    pub amount: &'r str,
    pub to: &'r str,
    pub fee_rate: &'r str,
    pub memo: &'r str,
    pub contract: Option<&'r SmartContract>,
}

impl<'r> TransferRequest<'r> {
    pub fn new(amount: &'r str, to: &'r str) -> Self {
        Self { amount, to, fee_rate: "", memo: "", contract: None }
    }

    pub fn fee_rate(mut self, fee_rate: &'r str) -> Self {
        self.fee_rate = fee_rate;
        self
    }

    pub fn memo(mut self, memo: &'r str) -> Self {
        self.memo = memo;
        self
    }

    pub fn contract(mut self, contract: &'r SmartContract) -> Self {
        self.contract = Some(contract);
        self
    }
}

/// Sweep of `[start, start + limit)` into `summary_address`. Empty `min_transfer` and
/// `retained_balance` mean zero; `limit = -1` scans to the end.
#[derive(Debug, Clone, Copy)]
pub struct SummaryRequest<'r> {
    pub summary_address: &'r str,
    pub min_transfer: &'r str,
    pub retained_balance: &'r str,
    pub fee_rate: &'r str,
    pub start: i64,
    pub limit: i64,
    pub contract: Option<&'r SmartContract>,
}

impl<'r> SummaryRequest<'r> {
    pub fn new(summary_address: &'r str) -> Self {
        Self {
            summary_address,
            min_transfer: "",
            retained_balance: "",
            fee_rate: "",
            start: 0,
            limit: -1,
            contract: None,
        }
    }

    pub fn thresholds(mut self, min_transfer: &'r str, retained_balance: &'r str) -> Self {
        self.min_transfer = min_transfer;
        self.retained_balance = retained_balance;
        self
    }

    pub fn fee_rate(mut self, fee_rate: &'r str) -> Self {
        self.fee_rate = fee_rate;
        self
    }

    pub fn range(mut self, start: i64, limit: i64) -> Self {
        self.start = start;
        self.limit = limit;
        self
    }

    pub fn contract(mut self, contract: &'r SmartContract) -> Self {
        self.contract = Some(contract);
        self
    }
}

/// Outcome for one qualifying address of a summary sweep.
#[derive(Debug)]
pub struct SummaryResult {
    pub address: String,
    pub amount: Decimal,
    pub result: Result<RawTransaction, WalletError>,
}

pub struct TransactionPipeline<'a> {
    storage: &'a WalletStorage,
    locks: &'a AccountLocks,
    vault: &'a KeyVault,
}

impl<'a> TransactionPipeline<'a> {
    pub fn new(storage: &'a WalletStorage, locks: &'a AccountLocks, vault: &'a KeyVault) -> Self {
        Self { storage, locks, vault }
    }

    async fn load(&self, id: &str) -> Result<RawTransaction, WalletError> {
        self.storage
            .get_transaction(id)
            .await?
            .ok_or_else(|| WalletError::NotFound(format!("transaction {}", id)))
    }

    /// Reloads the caller's record; the stored copy must agree on wallet, account and
    /// asset.
    async fn reload(&self, tx: &RawTransaction) -> Result<RawTransaction, WalletError> {
        let current = self.load(&tx.id).await?;
        if current.account_id != tx.account_id
            || current.wallet_id != tx.wallet_id
            || current.symbol != tx.symbol
        {
            return Err(WalletError::Validation(format!(
                "transaction {} belongs to {} account {} of wallet {}",
                tx.id, current.symbol, current.account_id, current.wallet_id
            )));
        }
        Ok(current)
    }

    fn expect_status(tx: &RawTransaction, expected: TxStatus, op: &str) -> Result<(), WalletError> {
        if tx.status != expected {
            return Err(WalletError::Sequence(format!(
                "cannot {} transaction {} in state {} (expected {})",
                op, tx.id, tx.status, expected
            )));
        }
        Ok(())
    }

    /// Adapter output must belong to the account it was built for.
    fn accept_built(account: &AssetsAccount, mut tx: RawTransaction) -> Result<RawTransaction, WalletError> {
        if tx.id.is_empty()
            || tx.account_id != account.account_id
            || tx.wallet_id != account.wallet_id
        {
            return Err(WalletError::MalformedTransaction(format!(
                "adapter returned a transaction for another account ({})",
                tx.account_id
            )));
        }
        tx.status = TxStatus::Built;
        tx.tx_id.clear();
        tx.failure_reason = None;
        tx.submitted_at = None;
        Ok(tx)
    }

    async fn build_and_store(
        &self,
        account: &AssetsAccount,
        adapter: &dyn AssetAdapter,
        spec: &TransactionSpec,
    ) -> Result<RawTransaction, WalletError> {
        let built = adapter.build_transaction(account, spec).await?;
        let tx = Self::accept_built(account, built)?;
        self.storage.insert_transaction(&tx).await?;
        Ok(tx)
    }

    async fn sources(&self, account_id: &str) -> Result<Vec<SourceAddress>, WalletError> {
        Ok(self
            .storage
            .list_addresses(account_id, 0, -1, false)
            .await?
            .iter()
            .map(SourceAddress::from)
            .collect())
    }

    /// Builds and persists one payment. No balance is debited until submit.
    pub async fn create_transaction(
        &self,
        account: &AssetsAccount,
        adapter: &dyn AssetAdapter,
        request: &TransferRequest<'_>,
    ) -> Result<RawTransaction, WalletError> {
        let amount = parse_amount(request.amount, "amount")?;
        let fee_rate = parse_optional(request.fee_rate, "feeRate")?;
        if !adapter.validate_address(request.to) {
            return Err(WalletError::InvalidRecipient(request.to.to_string()));
        }

        let _guard = self.locks.acquire(&account.account_id).await;
        let spec = TransactionSpec {
            from: self.sources(&account.account_id).await?,
            to: vec![Recipient { address: request.to.to_string(), amount }],
            fee_rate,
            memo: request.memo.to_string(),
            contract: request.contract.cloned(),
        };
        let tx = self.build_and_store(account, adapter, &spec).await?;
        info!(
            account_id = %account.account_id,
            symbol = %account.symbol,
            tx = %tx.id,
            %amount,
            "transaction built"
        );
        Ok(tx)
    }

    /// One entry per qualifying address, each either built or failed independently.
    /// Nothing already built is rolled back.
    pub async fn create_summary_transaction_with_error(
        &self,
        account: &AssetsAccount,
        adapter: &dyn AssetAdapter,
        request: &SummaryRequest<'_>,
    ) -> Result<Vec<SummaryResult>, WalletError> {
        let min_transfer = parse_non_negative(request.min_transfer, "minTransfer")?;
        let retained = parse_non_negative(request.retained_balance, "retainedBalance")?;
        let fee_rate = parse_optional(request.fee_rate, "feeRate")?;
        if !adapter.validate_address(request.summary_address) {
            return Err(WalletError::InvalidRecipient(request.summary_address.to_string()));
        }
        if request.start < 0 || request.limit < -1 {
            return Err(WalletError::Validation(format!(
                "invalid scan range start={} limit={}",
                request.start, request.limit
            )));
        }

        let candidates: Vec<SourceAddress> = self
            .storage
            .list_addresses(&account.account_id, request.start, request.limit, false)
            .await?
            .iter()
            .filter(|a| !a.address.eq_ignore_ascii_case(request.summary_address))
            .map(SourceAddress::from)
            .collect();
        let addresses: Vec<String> = candidates.iter().map(|c| c.address.clone()).collect();
        let balances = match request.contract {
            Some(contract) => adapter.get_token_balances(&addresses, contract).await?,
            None => adapter.get_balances(&addresses).await?,
        };

        let balances: HashMap<String, Decimal> =
            balances.into_iter().map(|b| (b.address, b.balance)).collect();

        let _guard = self.locks.acquire(&account.account_id).await;
        let mut results = Vec::new();
        for source in candidates {
            let balance = balances.get(&source.address).copied().unwrap_or(Decimal::ZERO);
            let amount = balance - retained;
            if balance <= min_transfer || amount <= Decimal::ZERO {
                continue;
            }
            let spec = TransactionSpec {
                from: vec![source.clone()],
                to: vec![Recipient { address: request.summary_address.to_string(), amount }],
                fee_rate,
                memo: String::new(),
                contract: request.contract.cloned(),
            };
            let result = self.build_and_store(account, adapter, &spec).await;
            results.push(SummaryResult { address: source.address, amount, result });
        }

        let built = results.iter().filter(|r| r.result.is_ok()).count();
        info!(
            account_id = %account.account_id,
            summary_address = %request.summary_address,
            qualifying = results.len(),
            built,
            "summary transactions built"
        );
        Ok(results)
    }

    /// Successfully built sweeps only; per-address failures are logged.
    pub async fn create_summary_transaction(
        &self,
        account: &AssetsAccount,
        adapter: &dyn AssetAdapter,
        request: &SummaryRequest<'_>,
    ) -> Result<Vec<RawTransaction>, WalletError> {
        let results = self
            .create_summary_transaction_with_error(account, adapter, request)
            .await?;
        let mut built = Vec::with_capacity(results.len());
        for entry in results {
            match entry.result {
                Ok(tx) => built.push(tx),
                Err(e) => warn!(
                    account_id = %account.account_id,
                    address = %entry.address,
                    error = %e,
                    "summary transaction skipped"
                ),
            }
        }
        Ok(built)
    }

    /// Built -> Signed. The root key is unwrapped only for the adapter call.
    pub async fn sign_transaction(
        &self,
        tx: &mut RawTransaction,
        adapter: &dyn AssetAdapter,
        password: &str,
    ) -> Result<(), WalletError> {
        let _guard = self.locks.acquire(&tx.account_id).await;
        let current = self.reload(tx).await?;
        Self::expect_status(&current, TxStatus::Built, "sign")?;

        let key = self
            .storage
            .get_wallet_key(&current.wallet_id)
            .await?
            .ok_or_else(|| WalletError::NotFound(format!("wallet {}", current.wallet_id)))?;

        let mut working = current.clone();
        let signed = {
            let material = self.vault.unlock(&current.wallet_id, &key, password);
            match material {
                Ok(material) => adapter.sign_transaction(&mut working, &material).await,
                Err(e) => Err(e),
            }
        };
        if let Err(e) = signed {
            *tx = current;
            return Err(e);
        }

        working.status = TxStatus::Signed;
        working.updated_at = Utc::now();
        self.storage.update_transaction(&working).await?;
        info!(tx = %working.id, account_id = %working.account_id, "transaction signed");
        *tx = working;
        Ok(())
    }

    /// Signed -> Verified. A negative verdict keeps the record `Signed`.
    pub async fn verify_transaction(
        &self,
        tx: &mut RawTransaction,
        adapter: &dyn AssetAdapter,
    ) -> Result<(), WalletError> {
        let _guard = self.locks.acquire(&tx.account_id).await;
        let current = self.reload(tx).await?;
        Self::expect_status(&current, TxStatus::Signed, "verify")?;

        match adapter.verify_transaction(&current).await {
            Ok(true) => {}
            Ok(false) => {
                let id = current.id.clone();
                *tx = current;
                return Err(WalletError::VerificationFailed(id));
            }
            Err(e) => {
                *tx = current;
                return Err(e);
            }
        }

        let mut working = current;
        working.status = TxStatus::Verified;
        working.updated_at = Utc::now();
        self.storage.update_transaction(&working).await?;
        info!(tx = %working.id, account_id = %working.account_id, "transaction verified");
        *tx = working;
        Ok(())
    }

    /// Verified -> Submitted. Only a rejection moves the record to `Failed`; broadcast
    /// errors leave it `Verified` for a retry.
    pub async fn submit_transaction(
        &self,
        tx: &mut RawTransaction,
        adapter: &dyn AssetAdapter,
    ) -> Result<Confirmation, WalletError> {
        let _guard = self.locks.acquire(&tx.account_id).await;
        let current = self.reload(tx).await?;
        Self::expect_status(&current, TxStatus::Verified, "submit")?;

        let mut working = current.clone();
        let now = Utc::now();
        match adapter.submit_transaction(&current).await {
            Ok(confirmation) => {
                working.tx_id = confirmation.tx_id.clone();
                working.fee = confirmation.fee;
                working.status = TxStatus::Submitted;
                working.submitted_at = Some(now);
                working.updated_at = now;
                self.storage.update_transaction(&working).await?;
                for address in &working.from {
                    self.storage.mark_address_used(address).await?;
                }
                info!(
                    tx = %working.id,
                    tx_id = %working.tx_id,
                    account_id = %working.account_id,
                    "transaction submitted"
                );
                *tx = working;
                Ok(confirmation)
            }
            Err(WalletError::Rejected(reason)) => {
                working.status = TxStatus::Failed;
                working.failure_reason = Some(reason.clone());
                working.updated_at = now;
                self.storage.update_transaction(&working).await?;
                warn!(tx = %working.id, reason = %reason, "transaction rejected");
                *tx = working;
                Err(WalletError::Rejected(reason))
            }
            Err(e) => {
                warn!(tx = %current.id, error = %e, retryable = e.is_retryable(), "submit failed");
                *tx = current;
                Err(e)
            }
        }
    }

    pub async fn get_transaction(&self, id: &str) -> Result<RawTransaction, WalletError> {
        self.load(id).await
    }

    pub async fn list_transactions(
        &self,
        account_id: &str,
        status: Option<TxStatus>,
    ) -> Result<Vec<RawTransaction>, WalletError> {
        Ok(self.storage.list_transactions(account_id, status).await?)
    }
}
