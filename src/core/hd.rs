//! BIP32 hierarchical-deterministic key derivation
//!
//! Path format: m/44'/coin_type'/account'/change/address_index
//!
//! Private keys support hardened and normal child derivation. Extended public keys
//! support normal derivation only, which is what lets address allocation run without
//! the wallet password once an account exists.

use std::fmt;
use std::str::FromStr;

use hmac::{Hmac, Mac};
use k256::elliptic_curve::sec1::ToEncodedPoint;
use k256::{NonZeroScalar, ProjectivePoint, PublicKey, SecretKey};
use sha2::Sha512;
use zeroize::Zeroizing;

use crate::core::errors::WalletError;

type HmacSha512 = Hmac<Sha512>;

/// Offset marking a hardened child index.
pub const HARDENED: u32 = 0x8000_0000;

/// BIP44 purpose level.
pub const BIP44_PURPOSE: u32 = 44;

/// Parsed BIP32 path such as `m/44'/60'/0'/0/3`.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct DerivationPath(Vec<u32>);

impl DerivationPath {
    /// The root path `m`.
    pub fn master() -> Self {
        Self(Vec::new())
    }

    /// Account-level path `m/44'/coin_type'/account'`.
    pub fn bip44_account(coin_type: u32, account: u32) -> Self {
        Self(vec![
            BIP44_PURPOSE | HARDENED,
            coin_type | HARDENED,
            account | HARDENED,
        ])
    }

    pub fn child(&self, index: u32) -> Self {
        let mut indices = self.0.clone();
        indices.push(index);
        Self(indices)
    }

    pub fn indices(&self) -> &[u32] {
        &self.0
    }

    /// Indices of `self` that follow `prefix`, if `prefix` is a prefix of `self`.
    pub fn strip_prefix(&self, prefix: &DerivationPath) -> Option<&[u32]> {
        self.0.strip_prefix(prefix.0.as_slice())
    }
}

impl FromStr for DerivationPath {
    type Err = WalletError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut parts = s.trim().split('/');
        if parts.next() != Some("m") {
            return Err(WalletError::Derivation(format!("path must start with 'm': {}", s)));
        }
        let mut indices = Vec::new();
        for part in parts {
            let (digits, hardened) = match part.strip_suffix('\'').or_else(|| part.strip_suffix('h')) {
                Some(d) => (d, true),
                None => (part, false),
            };
            let index: u32 = digits
                .parse()
                .map_err(|_| WalletError::Derivation(format!("invalid path component '{}' in {}", part, s)))?;
            if index >= HARDENED {
                return Err(WalletError::Derivation(format!("index out of range in {}", s)));
            }
            indices.push(if hardened { index | HARDENED } else { index });
        }
        Ok(Self(indices))
    }
}

impl fmt::Display for DerivationPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "m")?;
        for index in &self.0 {
            if index & HARDENED != 0 {
                write!(f, "/{}'", index & !HARDENED)?;
            } else {
                write!(f, "/{}", index)?;
            }
        }
        Ok(())
    }
}

fn hmac_sha512(chain_code: &[u8], parts: &[&[u8]]) -> Result<Zeroizing<[u8; 64]>, WalletError> {
    let mut mac = HmacSha512::new_from_slice(chain_code)
        .map_err(|e| WalletError::Crypto(format!("HMAC initialization failed: {}", e)))?;
    for part in parts {
        mac.update(part);
    }
    let mut out = Zeroizing::new([0u8; 64]);
    out.copy_from_slice(&mac.finalize().into_bytes());
    Ok(out)
}

fn split_output(out: &[u8; 64]) -> (Zeroizing<[u8; 32]>, Zeroizing<[u8; 32]>) {
    let mut left = Zeroizing::new([0u8; 32]);
    let mut right = Zeroizing::new([0u8; 32]);
    left.copy_from_slice(&out[..32]);
    right.copy_from_slice(&out[32..]);
    (left, right)
}

/// Extended private key. Both halves are wiped on drop.
#[derive(Clone)]
pub struct ExtendedPrivateKey {
    key: Zeroizing<[u8; 32]>,
    chain_code: Zeroizing<[u8; 32]>,
}

impl fmt::Debug for ExtendedPrivateKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("ExtendedPrivateKey(<redacted>)")
    }
}

impl ExtendedPrivateKey {
    /// Master key from a seed: HMAC-SHA512("Bitcoin seed", seed).
    pub fn from_seed(seed: &[u8]) -> Result<Self, WalletError> {
        if seed.len() < 16 || seed.len() > 64 {
            return Err(WalletError::Derivation(format!(
                "seed length must be 16..=64 bytes, got {}",
                seed.len()
            )));
        }
        let out = hmac_sha512(b"Bitcoin seed", &[seed])?;
        let (key, chain_code) = split_output(&out);
        SecretKey::from_slice(&key[..])
            .map_err(|_| WalletError::Derivation("seed produced an invalid master key".into()))?;
        Ok(Self { key, chain_code })
    }

    /// Rebuild from the 64-byte `key || chain_code` encoding.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, WalletError> {
        if bytes.len() != 64 {
            return Err(WalletError::Crypto(format!(
                "extended key must be 64 bytes, got {}",
                bytes.len()
            )));
        }
        let mut key = Zeroizing::new([0u8; 32]);
        let mut chain_code = Zeroizing::new([0u8; 32]);
        key.copy_from_slice(&bytes[..32]);
        chain_code.copy_from_slice(&bytes[32..]);
        SecretKey::from_slice(&key[..])
            .map_err(|_| WalletError::Crypto("stored key is not a valid secp256k1 scalar".into()))?;
        Ok(Self { key, chain_code })
    }

    pub fn to_bytes(&self) -> Zeroizing<Vec<u8>> {
        let mut out = Zeroizing::new(Vec::with_capacity(64));
        out.extend_from_slice(&self.key[..]);
        out.extend_from_slice(&self.chain_code[..]);
        out
    }

    pub fn secret_key(&self) -> Result<SecretKey, WalletError> {
        SecretKey::from_slice(&self.key[..])
            .map_err(|_| WalletError::Derivation("invalid private key".into()))
    }

    /// Compressed SEC1 public key.
    pub fn public_key(&self) -> Result<[u8; 33], WalletError> {
        let point = self.secret_key()?.public_key().to_encoded_point(true);
        let mut out = [0u8; 33];
        out.copy_from_slice(point.as_bytes());
        Ok(out)
    }

    pub fn to_extended_public(&self) -> Result<ExtendedPublicKey, WalletError> {
        Ok(ExtendedPublicKey {
            key: self.public_key()?,
            chain_code: *self.chain_code,
        })
    }

    pub fn derive_child(&self, index: u32) -> Result<Self, WalletError> {
        let out = if index & HARDENED != 0 {
            hmac_sha512(&self.chain_code[..], &[&[0u8], &self.key[..], &index.to_be_bytes()])?
        } else {
            let public = self.public_key()?;
            hmac_sha512(&self.chain_code[..], &[&public, &index.to_be_bytes()])?
        };
        let (tweak_bytes, chain_code) = split_output(&out);
        let tweak = SecretKey::from_slice(&tweak_bytes[..])
            .map_err(|_| WalletError::Derivation(format!("invalid child tweak at index {}", index)))?;
        let parent = self.secret_key()?;
        let sum = *tweak.to_nonzero_scalar() + *parent.to_nonzero_scalar();
        let child: NonZeroScalar = Option::from(NonZeroScalar::new(sum))
            .ok_or_else(|| WalletError::Derivation(format!("zero child key at index {}", index)))?;
        let mut key = Zeroizing::new([0u8; 32]);
        key.copy_from_slice(&SecretKey::from(child).to_bytes());
        Ok(Self { key, chain_code })
    }

    pub fn derive_path(&self, path: &DerivationPath) -> Result<Self, WalletError> {
        let mut current = self.clone();
        for index in path.indices() {
            current = current.derive_child(*index)?;
        }
        Ok(current)
    }
}

/// Extended public key used for password-free address derivation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExtendedPublicKey {
    key: [u8; 33],
    chain_code: [u8; 32],
}

impl ExtendedPublicKey {
    pub fn public_key(&self) -> &[u8; 33] {
        &self.key
    }

    /// Normal (non-hardened) child derivation.
    pub fn derive_child(&self, index: u32) -> Result<Self, WalletError> {
        if index & HARDENED != 0 {
            return Err(WalletError::Derivation(
                "hardened derivation requires the private key".into(),
            ));
        }
        let out = hmac_sha512(&self.chain_code, &[&self.key, &index.to_be_bytes()])?;
        let (tweak_bytes, chain_code) = split_output(&out);
        let tweak = SecretKey::from_slice(&tweak_bytes[..])
            .map_err(|_| WalletError::Derivation(format!("invalid child tweak at index {}", index)))?;
        let parent = PublicKey::from_sec1_bytes(&self.key)
            .map_err(|_| WalletError::Derivation("invalid parent public key".into()))?;
        let point = ProjectivePoint::GENERATOR * *tweak.to_nonzero_scalar() + parent.to_projective();
        let child = PublicKey::from_affine(k256::elliptic_curve::group::Curve::to_affine(&point))
            .map_err(|_| WalletError::Derivation(format!("point at infinity at index {}", index)))?;
        let mut key = [0u8; 33];
        key.copy_from_slice(child.to_encoded_point(true).as_bytes());
        Ok(Self { key, chain_code: *chain_code })
    }

    pub fn derive_indices(&self, indices: &[u32]) -> Result<Self, WalletError> {
        let mut current = self.clone();
        for index in indices {
            current = current.derive_child(*index)?;
        }
        Ok(current)
    }

    /// `hex(pubkey33 || chain_code32)`
    pub fn encode(&self) -> String {
        let mut bytes = Vec::with_capacity(65);
        bytes.extend_from_slice(&self.key);
        bytes.extend_from_slice(&self.chain_code);
        hex::encode(bytes)
    }

    pub fn decode(encoded: &str) -> Result<Self, WalletError> {
        let bytes = hex::decode(encoded)
            .map_err(|e| WalletError::Derivation(format!("invalid extended public key: {}", e)))?;
        if bytes.len() != 65 {
            return Err(WalletError::Derivation(format!(
                "extended public key must be 65 bytes, got {}",
                bytes.len()
            )));
        }
        PublicKey::from_sec1_bytes(&bytes[..33])
            .map_err(|_| WalletError::Derivation("invalid public key point".into()))?;
        let mut key = [0u8; 33];
        let mut chain_code = [0u8; 32];
        key.copy_from_slice(&bytes[..33]);
        chain_code.copy_from_slice(&bytes[33..]);
        Ok(Self { key, chain_code })
    }
}
