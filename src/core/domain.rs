use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;
use zeroize::Zeroizing;

use crate::core::errors::WalletError;

/// HD wallet metadata. Encrypted root key material is stored next to it but never
/// carried on this struct.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Wallet {
    pub wallet_id: String,
    pub alias: String,
    pub is_trust: bool,
    /// Compressed secp256k1 root public key, hex.
    pub root_public_key: String,
    pub root_path: String,
    /// Highest account index allocated so far, `-1` if none.
    pub account_index: i64,
    pub created_at: DateTime<Utc>,
}

/// Returned once by wallet creation; the phrase is the only backup of the root key.
pub struct NewWallet {
    pub wallet: Wallet,
    pub mnemonic: Zeroizing<String>,
}

impl fmt::Debug for NewWallet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NewWallet")
            .field("wallet", &self.wallet)
            .field("mnemonic", &"<redacted>")
            .finish()
    }
}

/// Per-asset account under a wallet.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AssetsAccount {
    pub account_id: String,
    pub wallet_id: String,
    pub symbol: String,
    pub alias: String,
    pub index: u32,
    pub hd_path: String,
    /// Account-level extended public key, `hex(pubkey33 || chain_code32)`.
    pub public_key: String,
    /// Multisig threshold; 1 is single-sig.
    pub required: u32,
    pub is_trust: bool,
    /// Last-known native balance.
    pub balance: Decimal,
    /// Last allocated address index, `-1` if none.
    pub address_index: i64,
    pub pending_reorg: bool,
    pub created_at: DateTime<Utc>,
}

/// Parameters for account creation.
#[derive(Debug, Clone)]
pub struct AccountSpec {
    pub symbol: String,
    pub alias: String,
    /// `None` takes the next free index for the wallet.
    pub index: Option<u32>,
    pub required: u32,
    pub is_trust: bool,
}

impl AccountSpec {
    pub fn new(symbol: impl Into<String>, alias: impl Into<String>) -> Self {
        Self {
            symbol: symbol.into(),
            alias: alias.into(),
            index: None,
            required: 1,
            is_trust: true,
        }
    }

    pub fn with_index(mut self, index: u32) -> Self {
        self.index = Some(index);
        self
    }

    pub fn with_required(mut self, required: u32) -> Self {
        self.required = required;
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Address {
    pub address: String,
    pub account_id: String,
    pub symbol: String,
    pub index: u32,
    pub hd_path: String,
    /// Compressed public key, hex.
    pub public_key: String,
    pub is_change: bool,
    pub is_used: bool,
    pub watch_only: bool,
    pub created_at: DateTime<Utc>,
}

/// Token contract on an account-model chain.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SmartContract {
    pub address: String,
    pub symbol: String,
    pub name: String,
    pub token: String,
    pub decimals: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TxStatus {
    Built,
    Signed,
    Verified,
    Submitted,
    Failed,
}

impl TxStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TxStatus::Built => "built",
            TxStatus::Signed => "signed",
            TxStatus::Verified => "verified",
            TxStatus::Submitted => "submitted",
            TxStatus::Failed => "failed",
        }
    }

    /// Not yet submitted and not failed.
    pub fn is_pending(&self) -> bool {
        matches!(self, TxStatus::Built | TxStatus::Signed | TxStatus::Verified)
    }
}

impl fmt::Display for TxStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TxStatus {
    type Err = WalletError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "built" => Ok(TxStatus::Built),
            "signed" => Ok(TxStatus::Signed),
            "verified" => Ok(TxStatus::Verified),
            "submitted" => Ok(TxStatus::Submitted),
            "failed" => Ok(TxStatus::Failed),
            other => Err(WalletError::Serialization(format!("unknown tx status '{}'", other))),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Recipient {
    pub address: String,
    pub amount: Decimal,
}

/// A candidate source address offered to the adapter.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceAddress {
    pub address: String,
    pub hd_path: String,
    pub public_key: String,
}

impl From<&Address> for SourceAddress {
    fn from(addr: &Address) -> Self {
        Self {
            address: addr.address.clone(),
            hd_path: addr.hd_path.clone(),
            public_key: addr.public_key.clone(),
        }
    }
}

/// One required signature. `message` is filled by the adapter at build time,
/// `signature` by signing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeySignature {
    pub address: String,
    pub hd_path: String,
    pub public_key: String,
    /// Hex-encoded bytes to sign.
    pub message: String,
    /// Hex-encoded signature, empty until signed.
    #[serde(default)]
    pub signature: String,
}

impl KeySignature {
    pub fn is_signed(&self) -> bool {
        !self.signature.is_empty()
    }
}

/// Input to `AssetAdapter::build_transaction`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransactionSpec {
    pub from: Vec<SourceAddress>,
    pub to: Vec<Recipient>,
    /// `None` lets the adapter pick its default.
    pub fee_rate: Option<Decimal>,
    pub memo: String,
    pub contract: Option<SmartContract>,
}

impl TransactionSpec {
    pub fn total_amount(&self) -> Decimal {
        self.to.iter().map(|r| r.amount).sum()
    }
}

/// A payment moving through Built -> Signed -> Verified -> Submitted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawTransaction {
    pub id: String,
    /// Network transaction id, empty until submitted.
    pub tx_id: String,
    pub wallet_id: String,
    pub account_id: String,
    pub symbol: String,
    pub required: u32,
    pub from: Vec<String>,
    pub to: Vec<Recipient>,
    pub fee_rate: Option<Decimal>,
    pub fee: Decimal,
    pub memo: String,
    pub contract: Option<SmartContract>,
    /// Adapter-owned payload, hex. Never interpreted by the manager.
    pub raw_payload: String,
    /// Account id -> signatures required from that account.
    pub signatures: BTreeMap<String, Vec<KeySignature>>,
    pub status: TxStatus,
    pub failure_reason: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub submitted_at: Option<DateTime<Utc>>,
}

impl RawTransaction {
    /// Fresh `Built` record for `account`. Adapters fill in the source, fee, payload and
    /// pending signatures.
    pub fn new(account: &AssetsAccount, spec: &TransactionSpec) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4().to_string(),
            tx_id: String::new(),
            wallet_id: account.wallet_id.clone(),
            account_id: account.account_id.clone(),
            symbol: account.symbol.clone(),
            required: account.required,
            from: Vec::new(),
            to: spec.to.clone(),
            fee_rate: spec.fee_rate,
            fee: Decimal::ZERO,
            memo: spec.memo.clone(),
            contract: spec.contract.clone(),
            raw_payload: String::new(),
            signatures: BTreeMap::new(),
            status: TxStatus::Built,
            failure_reason: None,
            created_at: now,
            updated_at: now,
            submitted_at: None,
        }
    }

    pub fn total_amount(&self) -> Decimal {
        self.to.iter().map(|r| r.amount).sum()
    }

    pub fn signature_entries(&self) -> impl Iterator<Item = &KeySignature> {
        self.signatures.values().flatten()
    }

    pub fn is_fully_signed(&self) -> bool {
        let mut entries = self.signature_entries().peekable();
        entries.peek().is_some() && entries.all(KeySignature::is_signed)
    }
}

/// Handle returned by a successful broadcast.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Confirmation {
    pub tx_id: String,
    pub fee: Decimal,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AddressBalance {
    pub address: String,
    pub balance: Decimal,
}

/// Amount that must be strictly positive.
pub fn parse_amount(value: &str, field: &str) -> Result<Decimal, WalletError> {
    let amount = parse_decimal(value, field)?;
    if amount <= Decimal::ZERO {
        return Err(WalletError::InvalidAmount(format!("{} must be greater than zero", field)));
    }
    Ok(amount)
}

/// Non-negative amount; an empty string is zero.
pub fn parse_non_negative(value: &str, field: &str) -> Result<Decimal, WalletError> {
    if value.trim().is_empty() {
        return Ok(Decimal::ZERO);
    }
    let amount = parse_decimal(value, field)?;
    if amount < Decimal::ZERO {
        return Err(WalletError::InvalidAmount(format!("{} must not be negative", field)));
    }
    Ok(amount)
}

/// Optional non-negative amount; an empty string is `None`.
pub fn parse_optional(value: &str, field: &str) -> Result<Option<Decimal>, WalletError> {
    if value.trim().is_empty() {
        return Ok(None);
    }
    parse_non_negative(value, field).map(Some)
}

fn parse_decimal(value: &str, field: &str) -> Result<Decimal, WalletError> {
    Decimal::from_str(value.trim())
        .map_err(|_| WalletError::InvalidAmount(format!("{} is not a decimal: '{}'", field, value)))
}
