//! Root key custody.
//!
//! The BIP32 master key is wrapped with AES-256-GCM under a PBKDF2-derived key and only
//! ever unwrapped into a [`KeyMaterial`], which wipes itself on drop. The wallet id is
//! bound to the ciphertext as associated data, so a key blob cannot be replayed under
//! another wallet.

use std::fmt;

use aes_gcm::aead::{Aead, Payload};
use aes_gcm::{Aes256Gcm, KeyInit, Nonce};
use bip39::{Language, Mnemonic};
use k256::ecdsa::signature::{Signer, Verifier};
use k256::ecdsa::{Signature, SigningKey, VerifyingKey};
use rand::RngCore;
use serde::{Deserialize, Serialize};
use tracing::debug;
use zeroize::Zeroizing;

use crate::core::errors::WalletError;
use crate::core::hd::{DerivationPath, ExtendedPrivateKey, ExtendedPublicKey};
use crate::core::identity;
use crate::crypto::kdf::{KeyDerivation, SALT_LENGTH};
use crate::security::secret::{redact, vec_to_secret, SecretString, SecretVec};

pub const MIN_SEED_BITS: usize = 128;
pub const MAX_SEED_BITS: usize = 512;
/// Entropy used for new wallets: a 24-word mnemonic.
pub const MNEMONIC_ENTROPY_BITS: usize = 256;

const NONCE_LENGTH: usize = 12;

/// Root key as stored at rest.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EncryptedRootKey {
    pub ciphertext: Vec<u8>,
    pub salt: Vec<u8>,
    pub nonce: Vec<u8>,
    pub iterations: u32,
}

/// Output of [`KeyVault::derive_root_key`].
#[derive(Debug, Clone)]
pub struct RootKey {
    pub wallet_id: String,
    /// Compressed master public key.
    pub public_key: [u8; 33],
    pub encrypted: EncryptedRootKey,
}

/// Unwrapped master key, valid for the duration of one call.
pub struct KeyMaterial {
    wallet_id: String,
    master: ExtendedPrivateKey,
}

impl fmt::Debug for KeyMaterial {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KeyMaterial")
            .field("wallet_id", &self.wallet_id)
            .field("master", &"<redacted>")
            .finish()
    }
}

impl KeyMaterial {
    pub fn wallet_id(&self) -> &str {
        &self.wallet_id
    }

    fn derive(&self, path: &str) -> Result<ExtendedPrivateKey, WalletError> {
        let path: DerivationPath = path.parse()?;
        self.master.derive_path(&path)
    }

    /// ECDSA secp256k1 over SHA-256(payload); 64-byte compact signature.
    pub fn sign(&self, path: &str, payload: &[u8]) -> Result<Vec<u8>, WalletError> {
        let child = self.derive(path)?;
        let signing_key = SigningKey::from(child.secret_key()?);
        let signature: Signature = signing_key
            .try_sign(payload)
            .map_err(|e| WalletError::Signing(format!("ECDSA signing failed at {}: {}", path, e)))?;
        Ok(signature.to_bytes().to_vec())
    }

    pub fn public_key(&self, path: &str) -> Result<[u8; 33], WalletError> {
        self.derive(path)?.public_key()
    }

    pub fn extended_public_key(&self, path: &str) -> Result<ExtendedPublicKey, WalletError> {
        self.derive(path)?.to_extended_public()
    }
}

/// Key generation, wrapping and signing.
#[derive(Debug, Clone)]
pub struct KeyVault {
    kdf: KeyDerivation,
    iterations: u32,
}

impl KeyVault {
    pub fn new(pbkdf2_iterations: u32) -> Self {
        Self {
            kdf: KeyDerivation::pbkdf2(pbkdf2_iterations),
            iterations: pbkdf2_iterations,
        }
    }

    /// Random seed of `bit_length` bits from the OS CSPRNG.
    pub fn generate_seed(bit_length: usize) -> Result<SecretVec, WalletError> {
        if !(MIN_SEED_BITS..=MAX_SEED_BITS).contains(&bit_length) || bit_length % 8 != 0 {
            return Err(WalletError::Entropy(format!(
                "seed length must be a multiple of 8 in {}..={} bits, got {}",
                MIN_SEED_BITS, MAX_SEED_BITS, bit_length
            )));
        }
        let mut seed = vec_to_secret(vec![0u8; bit_length / 8]);
        rand::rngs::OsRng.fill_bytes(&mut seed);
        debug!(seed = %redact(&seed), "generated seed");
        Ok(seed)
    }

    /// Fresh English mnemonic and its BIP39 seed (empty passphrase).
    pub fn generate_mnemonic() -> Result<(SecretString, SecretVec), WalletError> {
        let entropy = Self::generate_seed(MNEMONIC_ENTROPY_BITS)?;
        let mnemonic = Mnemonic::from_entropy_in(Language::English, &entropy)
            .map_err(|e| WalletError::Entropy(format!("mnemonic generation failed: {}", e)))?;
        let seed = vec_to_secret(mnemonic.to_seed("").to_vec());
        Ok((Zeroizing::new(mnemonic.to_string()), seed))
    }

    pub fn seed_from_mnemonic(phrase: &str) -> Result<SecretVec, WalletError> {
        let mnemonic = Mnemonic::parse_in_normalized(Language::English, phrase.trim())
            .map_err(|e| WalletError::Validation(format!("invalid mnemonic: {}", e)))?;
        Ok(vec_to_secret(mnemonic.to_seed("").to_vec()))
    }

    /// BIP32 master key from `seed`, wrapped under `password`.
    pub fn derive_root_key(&self, seed: &[u8], password: &str) -> Result<RootKey, WalletError> {
        let master = ExtendedPrivateKey::from_seed(seed)?;
        let public_key = master.public_key()?;
        let wallet_id = identity::wallet_id(&public_key);

        let salt = KeyDerivation::generate_salt(SALT_LENGTH);
        let mut nonce = [0u8; NONCE_LENGTH];
        rand::rngs::OsRng.fill_bytes(&mut nonce);

        let cipher = self.cipher(password, &salt)?;
        let plaintext = master.to_bytes();
        let ciphertext = cipher
            .encrypt(
                Nonce::from_slice(&nonce),
                Payload { msg: &plaintext, aad: wallet_id.as_bytes() },
            )
            .map_err(|_| WalletError::Crypto("failed to encrypt root key".into()))?;

        debug!(wallet_id = %wallet_id, "root key derived and wrapped");
        Ok(RootKey {
            wallet_id,
            public_key,
            encrypted: EncryptedRootKey {
                ciphertext,
                salt,
                nonce: nonce.to_vec(),
                iterations: self.iterations,
            },
        })
    }

    /// Unwraps the root key. A GCM tag mismatch is reported as a wrong password.
    pub fn unlock(
        &self,
        wallet_id: &str,
        encrypted: &EncryptedRootKey,
        password: &str,
    ) -> Result<KeyMaterial, WalletError> {
        if encrypted.nonce.len() != NONCE_LENGTH {
            return Err(WalletError::Crypto(format!(
                "stored nonce must be {} bytes, got {}",
                NONCE_LENGTH,
                encrypted.nonce.len()
            )));
        }
        let kdf = KeyDerivation::pbkdf2(encrypted.iterations);
        let key = kdf.derive_key(password.as_bytes(), &encrypted.salt, 32)?;
        let cipher = Aes256Gcm::new_from_slice(&key)
            .map_err(|_| WalletError::Crypto("failed to create AES cipher".into()))?;
        let plaintext = cipher
            .decrypt(
                Nonce::from_slice(&encrypted.nonce),
                Payload { msg: &encrypted.ciphertext, aad: wallet_id.as_bytes() },
            )
            .map(Zeroizing::new)
            .map_err(|_| WalletError::WrongPassword(wallet_id.to_string()))?;

        let master = ExtendedPrivateKey::from_bytes(&plaintext)?;
        if identity::wallet_id(&master.public_key()?) != wallet_id {
            return Err(WalletError::Crypto(format!(
                "root key does not match wallet {}",
                wallet_id
            )));
        }
        Ok(KeyMaterial { wallet_id: wallet_id.to_string(), master })
    }

    /// Unlock, sign once, wipe. The stored key is never touched.
    pub fn sign(
        &self,
        wallet_id: &str,
        encrypted: &EncryptedRootKey,
        password: &str,
        path: &str,
        payload: &[u8],
    ) -> Result<Vec<u8>, WalletError> {
        let material = self.unlock(wallet_id, encrypted, password)?;
        material.sign(path, payload)
    }

    /// Stateless check of a compact signature against a SEC1 public key.
    pub fn verify_signature(public_key: &[u8], payload: &[u8], signature: &[u8]) -> bool {
        let Ok(verifying_key) = VerifyingKey::from_sec1_bytes(public_key) else {
            return false;
        };
        let Ok(signature) = Signature::from_slice(signature) else {
            return false;
        };
        verifying_key.verify(payload, &signature).is_ok()
    }

    fn cipher(&self, password: &str, salt: &[u8]) -> Result<Aes256Gcm, WalletError> {
        let key = self.kdf.derive_key(password.as_bytes(), salt, 32)?;
        Aes256Gcm::new_from_slice(&key)
            .map_err(|_| WalletError::Crypto("failed to create AES cipher".into()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    const PATH: &str = "m/44'/60'/0'/0/0";

    fn vault() -> KeyVault {
        KeyVault::new(64)
    }

    #[test]
    fn test_seed_lengths() {
        assert_eq!(KeyVault::generate_seed(256).unwrap().len(), 32);
        assert_eq!(KeyVault::generate_seed(128).unwrap().len(), 16);
        assert_eq!(KeyVault::generate_seed(512).unwrap().len(), 64);
        for bad in [0, 64, 127, 130, 520] {
            assert!(matches!(KeyVault::generate_seed(bad), Err(WalletError::Entropy(_))));
        }
    }

    #[test]
    fn test_unlock_and_wrong_password() {
        let seed = KeyVault::generate_seed(256).unwrap();
        let root = vault().derive_root_key(&seed, "correct horse").unwrap();
        assert!(identity::is_valid_wallet_id(&root.wallet_id));

        let material = vault().unlock(&root.wallet_id, &root.encrypted, "correct horse").unwrap();
        assert_eq!(material.public_key("m").unwrap(), root.public_key);

        let err = vault().unlock(&root.wallet_id, &root.encrypted, "wrong").unwrap_err();
        assert!(matches!(err, WalletError::WrongPassword(_)));
    }

    #[test]
    fn test_ciphertext_bound_to_wallet_id() {
        let seed = KeyVault::generate_seed(256).unwrap();
        let root = vault().derive_root_key(&seed, "pw-123456").unwrap();
        let err = vault().unlock("other", &root.encrypted, "pw-123456").unwrap_err();
        assert!(matches!(err, WalletError::WrongPassword(_)));
    }

    #[test]
    fn test_sign_and_verify() {
        let seed = KeyVault::generate_seed(256).unwrap();
        let root = vault().derive_root_key(&seed, "pw-123456").unwrap();
        let sig = vault()
            .sign(&root.wallet_id, &root.encrypted, "pw-123456", PATH, b"payload")
            .unwrap();
        assert_eq!(sig.len(), 64);

        let material = vault().unlock(&root.wallet_id, &root.encrypted, "pw-123456").unwrap();
        let pk = material.public_key(PATH).unwrap();
        assert!(KeyVault::verify_signature(&pk, b"payload", &sig));
        assert!(!KeyVault::verify_signature(&pk, b"tampered", &sig));
        assert!(!KeyVault::verify_signature(&[0u8; 33], b"payload", &sig));
    }

    #[test]
    fn test_bad_path_is_derivation_error() {
        let seed = KeyVault::generate_seed(256).unwrap();
        let root = vault().derive_root_key(&seed, "pw-123456").unwrap();
        let err = vault()
            .sign(&root.wallet_id, &root.encrypted, "pw-123456", "44/0", b"x")
            .unwrap_err();
        assert!(matches!(err, WalletError::Derivation(_)));
    }

    #[test]
    fn test_mnemonic_reproduces_wallet_id() {
        let (phrase, seed) = KeyVault::generate_mnemonic().unwrap();
        assert_eq!(phrase.split_whitespace().count(), 24);
        let first = vault().derive_root_key(&seed, "a-password").unwrap();

        let reseed = KeyVault::seed_from_mnemonic(&phrase).unwrap();
        let second = vault().derive_root_key(&reseed, "another-password").unwrap();
        assert_eq!(first.wallet_id, second.wallet_id);

        assert!(KeyVault::seed_from_mnemonic("not a real mnemonic").is_err());
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(8))]

        #[test]
        fn prop_signing_never_mutates_root_key(seed in proptest::collection::vec(any::<u8>(), 16..=64)) {
            let v = vault();
            let root = v.derive_root_key(&seed, "pw-123456").unwrap();
            let before = root.encrypted.clone();
            let first = v.sign(&root.wallet_id, &root.encrypted, "pw-123456", PATH, b"m").unwrap();
            let second = v.sign(&root.wallet_id, &root.encrypted, "pw-123456", PATH, b"m").unwrap();
            prop_assert_eq!(&root.encrypted, &before);
            // RFC6979 signatures are deterministic
            prop_assert_eq!(first, second);
        }
    }
}
