//! Configuration module for ObsiLock.

use serde::Deserialize;
use std::path::Path;

use crate::crypto::{MasterKey, TokenSigner};
use crate::{ObsiLockError, Result};

/// Database configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    /// Path to the SQLite database file.
    #[serde(default = "default_db_path")]
    pub path: String,
}

fn default_db_path() -> String {
    "data/obsilock.db".to_string()
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: default_db_path(),
        }
    }
}

/// Blob storage configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct StorageConfig {
    /// Path to the encrypted blob directory.
    #[serde(default = "default_storage_path")]
    pub path: String,
}

fn default_storage_path() -> String {
    "data/blobs".to_string()
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            path: default_storage_path(),
        }
    }
}

/// Quota and upload limits.
#[derive(Debug, Clone, Deserialize)]
pub struct QuotaConfig {
    /// Default per-user quota in bytes.
    #[serde(default = "default_quota_total")]
    pub default_total_bytes: i64,
    /// Maximum size of a single upload in megabytes.
    #[serde(default = "default_max_file_size")]
    pub max_file_size_mb: u64,
}

fn default_quota_total() -> i64 {
    1024 * 1024 * 1024 // 1 GiB
}

fn default_max_file_size() -> u64 {
    100
}

impl QuotaConfig {
    /// Maximum upload size in bytes.
    pub fn max_file_size_bytes(&self) -> u64 {
        self.max_file_size_mb * 1024 * 1024
    }
}

impl Default for QuotaConfig {
    fn default() -> Self {
        Self {
            default_total_bytes: default_quota_total(),
            max_file_size_mb: default_max_file_size(),
        }
    }
}

/// Key material configuration.
///
/// Both secrets are mandatory for a running instance and are usually injected
/// through the environment rather than written into config.toml.
#[derive(Debug, Clone, Deserialize, Default)]
pub struct SecurityConfig {
    /// Base64 encryption master key.
    #[serde(default)]
    pub master_key: String,
    /// Share token signing secret (at least 32 bytes).
    #[serde(default)]
    pub hmac_secret: String,
}

impl SecurityConfig {
    /// Decode the configured master key.
    pub fn master_key(&self) -> Result<MasterKey> {
        if self.master_key.is_empty() {
            return Err(ObsiLockError::Config(
                "master_key is not set. Set it in config.toml or via the \
                 OBSILOCK_MASTER_KEY environment variable."
                    .to_string(),
            ));
        }
        MasterKey::from_base64(&self.master_key)
    }

    /// Build the share token signer from the configured secret.
    pub fn token_signer(&self) -> Result<TokenSigner> {
        if self.hmac_secret.is_empty() {
            return Err(ObsiLockError::Config(
                "hmac_secret is not set. Set it in config.toml or via the \
                 OBSILOCK_HMAC_SECRET environment variable."
                    .to_string(),
            ));
        }
        TokenSigner::new(&self.hmac_secret)
    }
}

/// Logging configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error).
    #[serde(default = "default_log_level")]
    pub level: String,
    /// Path to the log file.
    #[serde(default = "default_log_file")]
    pub file: String,
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_file() -> String {
    "logs/obsilock.log".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            file: default_log_file(),
        }
    }
}

/// Main configuration structure.
#[derive(Debug, Clone, Deserialize, Default)]
pub struct Config {
    /// Database configuration.
    #[serde(default)]
    pub database: DatabaseConfig,
    /// Blob storage configuration.
    #[serde(default)]
    pub storage: StorageConfig,
    /// Quota and upload limits.
    #[serde(default)]
    pub quota: QuotaConfig,
    /// Key material.
    #[serde(default)]
    pub security: SecurityConfig,
    /// Logging configuration.
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl Config {
    /// Load configuration from a TOML file.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path.as_ref()).map_err(ObsiLockError::Io)?;
        Self::parse(&content)
    }

    /// Load configuration from a TOML file and apply environment variable overrides.
    pub fn load_with_env<P: AsRef<Path>>(path: P) -> Result<Self> {
        let mut config = Self::load(path)?;
        config.apply_env_overrides();
        Ok(config)
    }

    /// Parse configuration from a TOML string.
    pub fn parse(s: &str) -> Result<Self> {
        toml::from_str(s)
            .map_err(|e| ObsiLockError::Validation(format!("config parse error: {e}")))
    }

    /// Apply environment variable overrides to the configuration.
    ///
    /// Supported environment variables:
    /// - `OBSILOCK_MASTER_KEY`: Override the base64 master key
    /// - `OBSILOCK_HMAC_SECRET`: Override the share token signing secret
    pub fn apply_env_overrides(&mut self) {
        if let Ok(master_key) = std::env::var("OBSILOCK_MASTER_KEY") {
            if !master_key.is_empty() {
                self.security.master_key = master_key;
            }
        }
        if let Ok(hmac_secret) = std::env::var("OBSILOCK_HMAC_SECRET") {
            if !hmac_secret.is_empty() {
                self.security.hmac_secret = hmac_secret;
            }
        }
    }

    /// Validate the configuration.
    ///
    /// Checks that both secrets are present and well-formed, and that the
    /// limits are sane. Called once at startup so a misconfigured instance
    /// fails before accepting any work.
    pub fn validate(&self) -> Result<()> {
        self.security.master_key()?;
        self.security.token_signer()?;

        if self.quota.default_total_bytes <= 0 {
            return Err(ObsiLockError::Validation(
                "quota.default_total_bytes must be positive".to_string(),
            ));
        }
        if self.quota.max_file_size_mb == 0 {
            return Err(ObsiLockError::Validation(
                "quota.max_file_size_mb must be positive".to_string(),
            ));
        }
        Ok(())
    }
}
