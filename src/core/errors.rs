use thiserror::Error;

/// Error type shared by every wallet manager operation.
#[derive(Debug, Error)]
pub enum WalletError {
    /// Seed generation was asked for an unsupported bit length.
    #[error("Entropy error: {0}")]
    Entropy(String),

    /// The supplied password does not unlock the wallet's root key.
    #[error("Wrong password for wallet {0}")]
    WrongPassword(String),

    /// Malformed derivation path or an invalid derived child key.
    #[error("Key derivation error: {0}")]
    Derivation(String),

    /// The account has a pending reorganization and refuses address allocation.
    #[error("Account locked: {0}")]
    AccountLocked(String),

    /// Generic input validation failure.
    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Invalid amount: {0}")]
    InvalidAmount(String),

    #[error("Invalid recipient: {0}")]
    InvalidRecipient(String),

    #[error("Insufficient balance: {0}")]
    InsufficientBalance(String),

    /// A pipeline transition was attempted out of order.
    #[error("Sequence error: {0}")]
    Sequence(String),

    #[error("Signing failed: {0}")]
    Signing(String),

    #[error("Malformed transaction: {0}")]
    MalformedTransaction(String),

    /// The adapter inspected the signed transaction and refused it.
    #[error("Verification failed: {0}")]
    VerificationFailed(String),

    /// Broadcast did not reach the network. Safe to retry.
    #[error("Broadcast error: {0}")]
    Broadcast(String),

    /// The network refused the transaction. Retrying will not help.
    #[error("Transaction rejected: {0}")]
    Rejected(String),

    #[error("Namespace closed: {0}")]
    NamespaceClosed(String),

    #[error("Asset already registered: {0}")]
    AssetAlreadyRegistered(String),

    #[error("Unsupported asset: {0}")]
    UnsupportedAsset(String),

    #[error("Not found: {0}")]
    NotFound(String),

    /// The wallet still has transactions in flight.
    #[error("Wallet in use: {0}")]
    WalletInUse(String),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Crypto error: {0}")]
    Crypto(String),

    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl WalletError {
    /// Errors that callers may retry as-is.
    pub fn is_retryable(&self) -> bool {
        matches!(self, WalletError::Broadcast(_))
    }

    /// Consistency and configuration failures that indicate a programming or deployment error.
    pub fn is_critical(&self) -> bool {
        matches!(
            self,
            WalletError::NamespaceClosed(_)
                | WalletError::AssetAlreadyRegistered(_)
                | WalletError::Config(_)
                | WalletError::Crypto(_)
        )
    }
}

impl From<sqlx::Error> for WalletError {
    fn from(err: sqlx::Error) -> Self {
        WalletError::Storage(err.to_string())
    }
}

impl From<serde_json::Error> for WalletError {
    fn from(err: serde_json::Error) -> Self {
        WalletError::Serialization(err.to_string())
    }
}

impl From<std::io::Error> for WalletError {
    fn from(err: std::io::Error) -> Self {
        WalletError::Storage(err.to_string())
    }
}

impl From<anyhow::Error> for WalletError {
    fn from(err: anyhow::Error) -> Self {
        WalletError::Storage(err.to_string())
    }
}
