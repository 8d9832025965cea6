//! Deterministic wallet and account identifiers.
//!
//! Both ids are pure functions of their inputs, so re-creating an existing account
//! resolves to the same primary key.

use sha2::{Digest, Sha256};

const WALLET_ID_VERSION: u8 = 0x57;

/// `base58(version || sha256(root_pubkey)[..20] || checksum4)`
pub fn wallet_id(root_public_key: &[u8]) -> String {
    let digest = Sha256::digest(root_public_key);
    let mut payload = Vec::with_capacity(25);
    payload.push(WALLET_ID_VERSION);
    payload.extend_from_slice(&digest[..20]);
    let checksum = Sha256::digest(Sha256::digest(&payload));
    payload.extend_from_slice(&checksum[..4]);
    bs58::encode(payload).into_string()
}

/// Checks encoding, version byte and checksum.
pub fn is_valid_wallet_id(id: &str) -> bool {
    let Ok(bytes) = bs58::decode(id).into_vec() else {
        return false;
    };
    if bytes.len() != 25 || bytes[0] != WALLET_ID_VERSION {
        return false;
    }
    let checksum = Sha256::digest(Sha256::digest(&bytes[..21]));
    bytes[21..] == checksum[..4]
}

/// `base58(sha256(wallet_id || 0 || SYMBOL || 0 || index_be))`
pub fn account_id(wallet_id: &str, symbol: &str, index: u32) -> String {
    let mut hasher = Sha256::new();
    hasher.update(wallet_id.as_bytes());
    hasher.update([0u8]);
    hasher.update(symbol.to_uppercase().as_bytes());
    hasher.update([0u8]);
    hasher.update(index.to_be_bytes());
    bs58::encode(hasher.finalize()).into_string()
}
