use pbkdf2::pbkdf2_hmac;
use sha2::Sha256;
use tracing::debug;
use zeroize::Zeroizing;

use crate::core::errors::WalletError;

/// Length of the random salt generated for each wrapped root key.
pub const SALT_LENGTH: usize = 32;

#[derive(Debug, Clone, PartialEq)]
pub enum KDFAlgorithm {
    PBKDF2 { iterations: u32 },
}

/// Password-based key derivation used to wrap wallet root keys.
#[derive(Debug, Clone)]
pub struct KeyDerivation {
    algorithm: KDFAlgorithm,
}

impl KeyDerivation {
    pub fn new(algorithm: KDFAlgorithm) -> Self {
        Self { algorithm }
    }

    pub fn pbkdf2(iterations: u32) -> Self {
        Self::new(KDFAlgorithm::PBKDF2 { iterations })
    }

    pub fn derive_key(
        &self,
        password: &[u8],
        salt: &[u8],
        key_length: usize,
    ) -> Result<Zeroizing<Vec<u8>>, WalletError> {
        if salt.is_empty() {
            return Err(WalletError::Crypto("KDF salt must not be empty".into()));
        }
        match &self.algorithm {
            KDFAlgorithm::PBKDF2 { iterations } => {
                if *iterations == 0 {
                    return Err(WalletError::Crypto("PBKDF2 iterations must be positive".into()));
                }
                debug!(iterations, key_length, "deriving PBKDF2 key");
                let mut key = Zeroizing::new(vec![0u8; key_length]);
                pbkdf2_hmac::<Sha256>(password, salt, *iterations, &mut key);
                Ok(key)
            }
        }
    }

    pub fn generate_salt(length: usize) -> Vec<u8> {
        use rand::RngCore;
        let mut salt = vec![0u8; length];
        rand::rngs::OsRng.fill_bytes(&mut salt);
        salt
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pbkdf2_rfc6070_style_vector() {
        // PBKDF2-HMAC-SHA256, P="password", S="salt", c=1, dkLen=32
        let kdf = KeyDerivation::pbkdf2(1);
        let key = kdf.derive_key(b"password", b"salt", 32).unwrap();
        assert_eq!(
            hex::encode(&*key),
            "120fb6cffcf8b32c43e7225256c4f837a86548c92ccc35480805987cb70be17b"
        );
    }

    #[test]
    fn test_deterministic_and_salted() {
        let kdf = KeyDerivation::pbkdf2(10);
        let a = kdf.derive_key(b"pw", b"salt-a", 32).unwrap();
        let b = kdf.derive_key(b"pw", b"salt-a", 32).unwrap();
        let c = kdf.derive_key(b"pw", b"salt-b", 32).unwrap();
        assert_eq!(*a, *b);
        assert_ne!(*a, *c);
    }

    #[test]
    fn test_rejects_empty_salt_and_zero_iterations() {
        assert!(KeyDerivation::pbkdf2(10).derive_key(b"pw", b"", 32).is_err());
        assert!(KeyDerivation::pbkdf2(0).derive_key(b"pw", b"s", 32).is_err());
    }

    #[test]
    fn test_generate_salt_length() {
        let salt = KeyDerivation::generate_salt(SALT_LENGTH);
        assert_eq!(salt.len(), SALT_LENGTH);
        assert_ne!(salt, KeyDerivation::generate_salt(SALT_LENGTH));
    }
}
