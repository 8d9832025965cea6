//! In-process account-model ledger.
//!
//! Balances live in memory, addresses are Ethereum-style (`0x` + last 20 bytes of the
//! Keccak-256 of the uncompressed public key) and signatures are checked for real. Used
//! by the CLI demo and the test suites.

use std::collections::{HashMap, HashSet};

use async_trait::async_trait;
use k256::elliptic_curve::sec1::ToEncodedPoint;
use k256::PublicKey;
use parking_lot::Mutex;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use sha3::Keccak256;
use tracing::{debug, info, warn};

use crate::blockchain::traits::AssetAdapter;
use crate::core::{
    domain::{
        AddressBalance, AssetsAccount, Confirmation, KeySignature, RawTransaction,
        Recipient, SmartContract, SourceAddress, TransactionSpec,
    },
    errors::WalletError,
    key_vault::{KeyMaterial, KeyVault},
};

/// Failure the next `submit_transaction` call will report.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubmitFailure {
    Broadcast,
    Rejected,
}

#[derive(Debug, Serialize, Deserialize)]
struct LedgerPayload {
    symbol: String,
    from: String,
    to: Vec<Recipient>,
    fee: Decimal,
    memo: String,
    contract: Option<String>,
    nonce: String,
}

#[derive(Default)]
struct LedgerState {
    balances: HashMap<String, Decimal>,
    /// (contract, address) -> balance
    token_balances: HashMap<(String, String), Decimal>,
    submitted: HashSet<String>,
    next_failure: Option<SubmitFailure>,
}

impl LedgerState {
    fn balance(&self, address: &str) -> Decimal {
        self.balances.get(&address.to_lowercase()).copied().unwrap_or(Decimal::ZERO)
    }

    fn token_balance(&self, contract: &str, address: &str) -> Decimal {
        self.token_balances
            .get(&(contract.to_lowercase(), address.to_lowercase()))
            .copied()
            .unwrap_or(Decimal::ZERO)
    }

    fn can_pay(&self, address: &str, amount: Decimal, fee: Decimal, contract: Option<&str>) -> bool {
        match contract {
            Some(c) => self.token_balance(c, address) >= amount && self.balance(address) >= fee,
            None => self.balance(address) >= amount + fee,
        }
    }

    fn credit(&mut self, address: &str, amount: Decimal, contract: Option<&str>) {
        let entry = match contract {
            Some(c) => self
                .token_balances
                .entry((c.to_lowercase(), address.to_lowercase()))
                .or_insert(Decimal::ZERO),
            None => self.balances.entry(address.to_lowercase()).or_insert(Decimal::ZERO),
        };
        *entry += amount;
    }
}

pub struct MemoryLedgerAdapter {
    symbol: String,
    coin_type: u32,
    decimals: u32,
    default_fee: Decimal,
    state: Mutex<LedgerState>,
}

impl MemoryLedgerAdapter {
    pub fn new(symbol: &str, coin_type: u32) -> Self {
        Self {
            symbol: symbol.to_uppercase(),
            coin_type,
            decimals: 18,
            default_fee: Decimal::ZERO,
            state: Mutex::new(LedgerState::default()),
        }
    }

    pub fn with_decimals(mut self, decimals: u32) -> Self {
        self.decimals = decimals;
        self
    }

    /// Flat fee charged when the caller gives no fee rate.
    pub fn with_default_fee(mut self, fee: Decimal) -> Self {
        self.default_fee = fee;
        self
    }

    pub fn set_balance(&self, address: &str, amount: Decimal) {
        self.state.lock().balances.insert(address.to_lowercase(), amount);
    }

    pub fn set_token_balance(&self, contract: &str, address: &str, amount: Decimal) {
        self.state
            .lock()
            .token_balances
            .insert((contract.to_lowercase(), address.to_lowercase()), amount);
    }

    pub fn balance_of(&self, address: &str) -> Decimal {
        self.state.lock().balance(address)
    }

    pub fn token_balance_of(&self, contract: &str, address: &str) -> Decimal {
        self.state.lock().token_balance(contract, address)
    }

    pub fn fail_next_submit(&self, failure: SubmitFailure) {
        self.state.lock().next_failure = Some(failure);
    }

    pub fn submitted_count(&self) -> usize {
        self.state.lock().submitted.len()
    }

    fn decode_payload(tx: &RawTransaction) -> Result<(Vec<u8>, LedgerPayload), WalletError> {
        let bytes = hex::decode(&tx.raw_payload).map_err(|e| {
            WalletError::MalformedTransaction(format!("payload of {} is not hex: {}", tx.id, e))
        })?;
        let payload = serde_json::from_slice(&bytes).map_err(|e| {
            WalletError::MalformedTransaction(format!("payload of {} does not decode: {}", tx.id, e))
        })?;
        Ok((bytes, payload))
    }

    fn signature_valid(&self, sig: &KeySignature, expected_message: &str, from: &str) -> bool {
        if !sig.is_signed() || sig.message != expected_message || sig.address != from {
            return false;
        }
        let (Ok(public_key), Ok(message), Ok(signature)) = (
            hex::decode(&sig.public_key),
            hex::decode(&sig.message),
            hex::decode(&sig.signature),
        ) else {
            return false;
        };
        match self.public_key_to_address(&public_key) {
            Ok(address) if address == sig.address => {}
            _ => return false,
        }
        KeyVault::verify_signature(&public_key, &message, &signature)
    }
}

#[async_trait]
impl AssetAdapter for MemoryLedgerAdapter {
    fn symbol(&self) -> &str {
        &self.symbol
    }

    fn coin_type(&self) -> u32 {
        self.coin_type
    }

    fn decimals(&self) -> u32 {
        self.decimals
    }

    fn public_key_to_address(&self, public_key: &[u8]) -> Result<String, WalletError> {
        let key = PublicKey::from_sec1_bytes(public_key)
            .map_err(|_| WalletError::Derivation("invalid secp256k1 public key".into()))?;
        let uncompressed = key.to_encoded_point(false);
        let hash = Keccak256::digest(&uncompressed.as_bytes()[1..]);
        Ok(format!("0x{}", hex::encode(&hash[12..])))
    }

    fn validate_address(&self, address: &str) -> bool {
        address
            .strip_prefix("0x")
            .map(|h| h.len() == 40 && h.chars().all(|c| c.is_ascii_hexdigit()))
            .unwrap_or(false)
    }

    async fn build_transaction(
        &self,
        account: &AssetsAccount,
        spec: &TransactionSpec,
    ) -> Result<RawTransaction, WalletError> {
        if spec.to.is_empty() {
            return Err(WalletError::InvalidRecipient("no recipients".into()));
        }
        for recipient in &spec.to {
            if !self.validate_address(&recipient.address) {
                return Err(WalletError::InvalidRecipient(recipient.address.clone()));
            }
            if recipient.amount <= Decimal::ZERO {
                return Err(WalletError::InvalidAmount(recipient.amount.to_string()));
            }
        }

        let fee = spec.fee_rate.unwrap_or(self.default_fee);
        let total = spec.total_amount();
        let contract = spec.contract.as_ref().map(|c| c.address.as_str());
        let source: Option<SourceAddress> = {
            let state = self.state.lock();
            spec.from
                .iter()
                .find(|s| state.can_pay(&s.address, total, fee, contract))
                .cloned()
        };
        let source = source.ok_or_else(|| {
            WalletError::InsufficientBalance(format!(
                "no address of account {} covers {} {} plus fee {}",
                account.account_id, total, self.symbol, fee
            ))
        })?;

        let mut tx = RawTransaction::new(account, spec);
        let payload = LedgerPayload {
            symbol: self.symbol.clone(),
            from: source.address.clone(),
            to: spec.to.clone(),
            fee,
            memo: spec.memo.clone(),
            contract: contract.map(str::to_string),
            nonce: tx.id.clone(),
        };
        let bytes = serde_json::to_vec(&payload)?;
        let message = Sha256::digest(&bytes);

        tx.from = vec![source.address.clone()];
        tx.fee = fee;
        tx.raw_payload = hex::encode(&bytes);
        tx.signatures.insert(
            account.account_id.clone(),
            vec![KeySignature {
                address: source.address,
                hd_path: source.hd_path,
                public_key: source.public_key,
                message: hex::encode(message),
                signature: String::new(),
            }],
        );
        debug!(symbol = %self.symbol, tx = %tx.id, from = %payload.from, "ledger transaction built");
        Ok(tx)
    }

    async fn sign_transaction(
        &self,
        tx: &mut RawTransaction,
        keys: &KeyMaterial,
    ) -> Result<(), WalletError> {
        for sig in tx.signatures.values_mut().flatten() {
            let message = hex::decode(&sig.message)
                .map_err(|e| WalletError::Signing(format!("message is not hex: {}", e)))?;
            let derived = hex::encode(keys.public_key(&sig.hd_path)?);
            if derived != sig.public_key {
                return Err(WalletError::Signing(format!(
                    "key at {} does not match address {}",
                    sig.hd_path, sig.address
                )));
            }
            sig.signature = hex::encode(keys.sign(&sig.hd_path, &message)?);
        }
        Ok(())
    }

    async fn verify_transaction(&self, tx: &RawTransaction) -> Result<bool, WalletError> {
        let (bytes, payload) = Self::decode_payload(tx)?;
        if payload.symbol != self.symbol || tx.from.first() != Some(&payload.from) {
            return Ok(false);
        }
        let expected = hex::encode(Sha256::digest(&bytes));
        let mut entries = tx.signature_entries().peekable();
        if entries.peek().is_none() {
            return Ok(false);
        }
        Ok(entries.all(|sig| self.signature_valid(sig, &expected, &payload.from)))
    }

    async fn submit_transaction(&self, tx: &RawTransaction) -> Result<Confirmation, WalletError> {
        let injected = self.state.lock().next_failure.take();
        match injected {
            Some(SubmitFailure::Broadcast) => {
                warn!(tx = %tx.id, "injected broadcast failure");
                return Err(WalletError::Broadcast("node unreachable".into()));
            }
            Some(SubmitFailure::Rejected) => {
                warn!(tx = %tx.id, "injected rejection");
                return Err(WalletError::Rejected("transaction refused by ledger".into()));
            }
            None => {}
        }

        if !self.verify_transaction(tx).await? {
            return Err(WalletError::Rejected(format!("invalid signatures on {}", tx.id)));
        }
        let (bytes, payload) = Self::decode_payload(tx)?;
        let mut hasher = Sha256::new();
        hasher.update(&bytes);
        for sig in tx.signature_entries() {
            hasher.update(sig.signature.as_bytes());
        }
        let tx_id = hex::encode(hasher.finalize());

        let total: Decimal = payload.to.iter().map(|r| r.amount).sum();
        let contract = payload.contract.as_deref();
        let mut state = self.state.lock();
        if state.submitted.contains(&tx_id) {
            return Err(WalletError::Rejected(format!("{} already known", tx_id)));
        }
        if !state.can_pay(&payload.from, total, payload.fee, contract) {
            return Err(WalletError::Rejected(format!(
                "insufficient funds at {} for {}",
                payload.from, total
            )));
        }
        state.credit(&payload.from, -payload.fee, None);
        state.credit(&payload.from, -total, contract);
        for recipient in &payload.to {
            state.credit(&recipient.address, recipient.amount, contract);
        }
        state.submitted.insert(tx_id.clone());
        info!(symbol = %self.symbol, tx = %tx.id, tx_id = %tx_id, "ledger transaction applied");
        Ok(Confirmation { tx_id, fee: payload.fee })
    }

    async fn get_balances(&self, addresses: &[String]) -> Result<Vec<AddressBalance>, WalletError> {
        let state = self.state.lock();
        Ok(addresses
            .iter()
            .map(|a| AddressBalance { address: a.clone(), balance: state.balance(a) })
            .collect())
    }

    async fn get_token_balances(
        &self,
        addresses: &[String],
        contract: &SmartContract,
    ) -> Result<Vec<AddressBalance>, WalletError> {
        let state = self.state.lock();
        Ok(addresses
            .iter()
            .map(|a| AddressBalance {
                address: a.clone(),
                balance: state.token_balance(&contract.address, a),
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use std::str::FromStr;

    const RECEIVER: &str = "0x00000000000000000000000000000000000000aa";

    struct Fixture {
        adapter: MemoryLedgerAdapter,
        account: AssetsAccount,
        keys: KeyMaterial,
        source: SourceAddress,
    }

    fn fixture() -> Fixture {
        let vault = KeyVault::new(16);
        let seed = KeyVault::generate_seed(256).unwrap();
        let root = vault.derive_root_key(&seed, "pw-123456").unwrap();
        let keys = vault.unlock(&root.wallet_id, &root.encrypted, "pw-123456").unwrap();
        let adapter = MemoryLedgerAdapter::new("FAC", 88);
        let path = "m/44'/88'/0'/0/0";
        let public_key = keys.public_key(path).unwrap();
        let address = adapter.public_key_to_address(&public_key).unwrap();
        let account = AssetsAccount {
            account_id: "ACC".into(),
            wallet_id: root.wallet_id.clone(),
            symbol: "FAC".into(),
            alias: "main".into(),
            index: 0,
            hd_path: "m/44'/88'/0'".into(),
            public_key: String::new(),
            required: 1,
            is_trust: true,
            balance: Decimal::ZERO,
            address_index: 0,
            pending_reorg: false,
            created_at: Utc::now(),
        };
        Fixture {
            adapter,
            account,
            keys,
            source: SourceAddress {
                address,
                hd_path: path.into(),
                public_key: hex::encode(public_key),
            },
        }
    }

    fn spec(f: &Fixture, amount: &str) -> TransactionSpec {
        TransactionSpec {
            from: vec![f.source.clone()],
            to: vec![Recipient {
                address: RECEIVER.into(),
                amount: Decimal::from_str(amount).unwrap(),
            }],
            fee_rate: None,
            memo: "test".into(),
            contract: None,
        }
    }

    #[test]
    fn test_address_format() {
        let f = fixture();
        assert!(f.adapter.validate_address(&f.source.address));
        assert_eq!(f.source.address.len(), 42);
        assert!(!f.adapter.validate_address("0x123"));
        assert!(!f.adapter.validate_address("abc"));
    }

    #[tokio::test]
    async fn test_full_flow_moves_funds() {
        let f = fixture();
        f.adapter.set_balance(&f.source.address, Decimal::from(10));
        let mut tx = f.adapter.build_transaction(&f.account, &spec(&f, "3")).await.unwrap();
        assert!(!f.adapter.verify_transaction(&tx).await.unwrap());

        f.adapter.sign_transaction(&mut tx, &f.keys).await.unwrap();
        assert!(f.adapter.verify_transaction(&tx).await.unwrap());

        let confirmation = f.adapter.submit_transaction(&tx).await.unwrap();
        assert_eq!(confirmation.tx_id.len(), 64);
        assert_eq!(f.adapter.balance_of(&f.source.address), Decimal::from(7));
        assert_eq!(f.adapter.balance_of(RECEIVER), Decimal::from(3));

        let again = f.adapter.submit_transaction(&tx).await.unwrap_err();
        assert!(matches!(again, WalletError::Rejected(_)));
    }

    #[tokio::test]
    async fn test_tampered_payload_fails_verification() {
        let f = fixture();
        f.adapter.set_balance(&f.source.address, Decimal::from(10));
        let mut tx = f.adapter.build_transaction(&f.account, &spec(&f, "1")).await.unwrap();
        f.adapter.sign_transaction(&mut tx, &f.keys).await.unwrap();

        let mut payload: LedgerPayload =
            serde_json::from_slice(&hex::decode(&tx.raw_payload).unwrap()).unwrap();
        payload.to[0].amount = Decimal::from(9);
        tx.raw_payload = hex::encode(serde_json::to_vec(&payload).unwrap());
        assert!(!f.adapter.verify_transaction(&tx).await.unwrap());

        tx.raw_payload = "zz".into();
        assert!(matches!(
            f.adapter.verify_transaction(&tx).await,
            Err(WalletError::MalformedTransaction(_))
        ));
    }

    #[tokio::test]
    async fn test_build_errors() {
        let f = fixture();
        let err = f.adapter.build_transaction(&f.account, &spec(&f, "1")).await.unwrap_err();
        assert!(matches!(err, WalletError::InsufficientBalance(_)));

        f.adapter.set_balance(&f.source.address, Decimal::from(10));
        let mut bad = spec(&f, "1");
        bad.to[0].address = "nope".into();
        let err = f.adapter.build_transaction(&f.account, &bad).await.unwrap_err();
        assert!(matches!(err, WalletError::InvalidRecipient(_)));
    }

    #[tokio::test]
    async fn test_token_transfer_uses_token_balance() {
        let f = fixture();
        let contract = SmartContract {
            address: "0x00000000000000000000000000000000000000c0".into(),
            symbol: "FAC".into(),
            name: "Test Token".into(),
            token: "TT".into(),
            decimals: 6,
        };
        f.adapter.set_token_balance(&contract.address, &f.source.address, Decimal::from(50));
        let mut s = spec(&f, "20");
        s.contract = Some(contract.clone());
        let mut tx = f.adapter.build_transaction(&f.account, &s).await.unwrap();
        f.adapter.sign_transaction(&mut tx, &f.keys).await.unwrap();
        f.adapter.submit_transaction(&tx).await.unwrap();

        assert_eq!(f.adapter.token_balance_of(&contract.address, RECEIVER), Decimal::from(20));
        let balances = f
            .adapter
            .get_token_balances(&[f.source.address.clone()], &contract)
            .await
            .unwrap();
        assert_eq!(balances[0].balance, Decimal::from(30));
    }

    #[tokio::test]
    async fn test_injected_failures_are_one_shot() {
        let f = fixture();
        f.adapter.set_balance(&f.source.address, Decimal::from(10));
        let mut tx = f.adapter.build_transaction(&f.account, &spec(&f, "1")).await.unwrap();
        f.adapter.sign_transaction(&mut tx, &f.keys).await.unwrap();

        f.adapter.fail_next_submit(SubmitFailure::Broadcast);
        let err = f.adapter.submit_transaction(&tx).await.unwrap_err();
        assert!(err.is_retryable());
        assert_eq!(f.adapter.submitted_count(), 0);

        f.adapter.submit_transaction(&tx).await.unwrap();
        assert_eq!(f.adapter.submitted_count(), 1);
    }
}
