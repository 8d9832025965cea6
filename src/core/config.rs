use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::core::errors::WalletError;

/// Security configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SecurityConfig {
    /// PBKDF2 iteration count used to wrap wallet root keys
    #[serde(default = "SecurityConfig::default_pbkdf2_iterations")]
    pub pbkdf2_iterations: u32,

    /// Minimum accepted wallet password length
    #[serde(default = "SecurityConfig::default_min_password_length")]
    pub min_password_length: usize,
}

impl SecurityConfig {
    fn default_pbkdf2_iterations() -> u32 { 100_000 }
    fn default_min_password_length() -> usize { 8 }
}

impl Default for SecurityConfig {
    fn default() -> Self {
        Self {
            pbkdf2_iterations: Self::default_pbkdf2_iterations(),
            min_password_length: Self::default_min_password_length(),
        }
    }
}

/// Storage configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    #[serde(default = "StorageConfig::default_max_connections")]
    pub max_connections: u32,
    #[serde(default = "StorageConfig::default_busy_timeout_secs")]
    pub busy_timeout_secs: u64,
}

impl StorageConfig {
    fn default_max_connections() -> u32 { 5 }
    fn default_busy_timeout_secs() -> u64 { 30 }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            max_connections: Self::default_max_connections(),
            busy_timeout_secs: Self::default_busy_timeout_secs(),
        }
    }
}

/// wallet manager configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WalletConfig {
    /// Directory holding one database per application namespace
    #[serde(default = "WalletConfig::default_data_dir")]
    pub data_dir: PathBuf,

    /// Asset symbols that must have an adapter registered at startup
    #[serde(default)]
    pub support_assets: Vec<String>,

    #[serde(default)]
    pub storage: StorageConfig,

    #[serde(default)]
    pub security: SecurityConfig,
}

impl WalletConfig {
    fn default_data_dir() -> PathBuf {
        PathBuf::from("./data")
    }

    /// Parse a TOML document.
    pub fn from_toml_str(content: &str) -> Result<Self, WalletError> {
        toml::from_str(content).map_err(|e| WalletError::Config(format!("Invalid config: {}", e)))
    }

    /// Load a TOML file and apply environment overrides.
    pub fn from_toml_file(path: impl AsRef<Path>) -> Result<Self, WalletError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| {
            WalletError::Config(format!("Failed to read {}: {}", path.display(), e))
        })?;
        let mut config = Self::from_toml_str(&content)?;
        config.apply_env_overrides();
        Ok(config)
    }

    /// `WALLET_DATA_DIR` replaces `data_dir` when set.
    pub fn apply_env_overrides(&mut self) {
        if let Ok(dir) = std::env::var("WALLET_DATA_DIR") {
            if !dir.trim().is_empty() {
                self.data_dir = PathBuf::from(dir);
            }
        }
    }

    pub fn validate(&self) -> Result<(), WalletError> {
        if self.security.pbkdf2_iterations == 0 {
            return Err(WalletError::Config("pbkdf2_iterations must be positive".into()));
        }
        if self.storage.max_connections == 0 {
            return Err(WalletError::Config("max_connections must be positive".into()));
        }
        Ok(())
    }
}

impl Default for WalletConfig {
    fn default() -> Self {
        Self {
            data_dir: Self::default_data_dir(),
            support_assets: Vec::new(),
            storage: StorageConfig::default(),
            security: SecurityConfig::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_from_empty_toml() {
        let cfg = WalletConfig::from_toml_str("").unwrap();
        assert_eq!(cfg.data_dir, PathBuf::from("./data"));
        assert_eq!(cfg.security.pbkdf2_iterations, 100_000);
        assert_eq!(cfg.storage.max_connections, 5);
        assert!(cfg.support_assets.is_empty());
    }

    #[test]
    fn test_partial_sections() {
        let cfg = WalletConfig::from_toml_str(
            r#"
            data_dir = "/var/lib/wallets"
            support_assets = ["FAC", "ETH"]

            [security]
            pbkdf2_iterations = 2048
            "#,
        )
        .unwrap();
        assert_eq!(cfg.data_dir, PathBuf::from("/var/lib/wallets"));
        assert_eq!(cfg.support_assets, vec!["FAC".to_string(), "ETH".to_string()]);
        assert_eq!(cfg.security.pbkdf2_iterations, 2048);
        assert_eq!(cfg.security.min_password_length, 8);
    }

    #[test]
    fn test_validate_rejects_zero_iterations() {
        let mut cfg = WalletConfig::default();
        cfg.security.pbkdf2_iterations = 0;
        assert!(matches!(cfg.validate(), Err(WalletError::Config(_))));
    }

    #[test]
    fn test_bad_toml_is_config_error() {
        let err = WalletConfig::from_toml_str("data_dir = [").unwrap_err();
        assert!(matches!(err, WalletError::Config(_)));
    }
}
