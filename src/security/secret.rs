//! Small helpers and aliases for secret buffers that must be zeroized on drop.
use zeroize::Zeroizing;

/// Secret byte buffer, zeroed when dropped.
pub type SecretVec = Zeroizing<Vec<u8>>;

/// Secret string such as a mnemonic phrase, zeroed when dropped.
pub type SecretString = Zeroizing<String>;

pub fn vec_to_secret(v: Vec<u8>) -> SecretVec {
    Zeroizing::new(v)
}

/// Redacted rendering for log lines: keeps only the length.
pub fn redact(secret: &[u8]) -> String {
    format!("<redacted:{} bytes>", secret.len())
}
