//! VaultFS configuration
//!
//! Loaded from environment variables, falling back to compile-time defaults.

use crate::capability::DEFAULT_CAPS_PER_FILE;
use crate::erasure::ErasureConfig;
use crate::error::{Result, VaultError};
use crate::DEFAULT_CHUNK_SIZE;

/// Sharing log configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SharingConfig {
    /// Records per sharing file before a new file is started
    pub caps_per_file: u64,
}

impl Default for SharingConfig {
    fn default() -> Self {
        Self {
            caps_per_file: DEFAULT_CAPS_PER_FILE,
        }
    }
}

impl SharingConfig {
    pub fn new(caps_per_file: u64) -> Result<Self> {
        if caps_per_file == 0 {
            return Err(VaultError::Configuration(
                "caps_per_file must be > 0".to_string(),
            ));
        }
        Ok(Self { caps_per_file })
    }
}

/// Top-level configuration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VaultConfig {
    /// Maximum plaintext bytes per chunk
    pub chunk_size: usize,

    /// Reed-Solomon shard counts
    pub erasure: ErasureConfig,

    /// Sharing log layout
    pub sharing: SharingConfig,
}

impl Default for VaultConfig {
    fn default() -> Self {
        Self {
            chunk_size: DEFAULT_CHUNK_SIZE,
            erasure: ErasureConfig::default(),
            sharing: SharingConfig::default(),
        }
    }
}

impl VaultConfig {
    /// Create configuration from environment variables
    ///
    /// - `VAULTFS_CHUNK_SIZE`
    /// - `ERASURE_DATA_SHARDS` / `ERASURE_PARITY_SHARDS`
    /// - `VAULTFS_CAPS_PER_FILE`
    pub fn from_env() -> Result<Self> {
        let defaults = Self::default();

        let chunk_size = env_or("VAULTFS_CHUNK_SIZE", defaults.chunk_size)?;
        let data_shards = env_or("ERASURE_DATA_SHARDS", defaults.erasure.data_shards)?;
        let parity_shards = env_or("ERASURE_PARITY_SHARDS", defaults.erasure.parity_shards)?;
        let caps_per_file = env_or("VAULTFS_CAPS_PER_FILE", defaults.sharing.caps_per_file)?;

        let config = Self::default()
            .with_chunk_size(chunk_size)?
            .with_erasure(ErasureConfig::new(data_shards, parity_shards)?)
            .with_sharing(SharingConfig::new(caps_per_file)?);
        Ok(config)
    }

    pub fn with_chunk_size(mut self, chunk_size: usize) -> Result<Self> {
        if chunk_size == 0 {
            return Err(VaultError::Configuration(
                "chunk_size must be > 0".to_string(),
            ));
        }
        self.chunk_size = chunk_size;
        Ok(self)
    }

    pub fn with_erasure(mut self, erasure: ErasureConfig) -> Self {
        self.erasure = erasure;
        self
    }

    pub fn with_sharing(mut self, sharing: SharingConfig) -> Self {
        self.sharing = sharing;
        self
    }
}

fn env_or<T: std::str::FromStr>(name: &str, default: T) -> Result<T> {
    match std::env::var(name) {
        Ok(value) => value.parse().map_err(|_| {
            VaultError::Configuration(format!("Invalid value for {}: {}", name, value))
        }),
        Err(_) => Ok(default),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = VaultConfig::default();
        assert_eq!(config.chunk_size, 5 * 1024 * 1024);
        assert_eq!(config.sharing.caps_per_file, 10_000);
        assert_eq!(config.erasure.total_shards(), 14);
    }

    #[test]
    fn test_builders_validate() {
        assert!(VaultConfig::default().with_chunk_size(0).is_err());
        assert!(SharingConfig::new(0).is_err());
        let config = VaultConfig::default().with_chunk_size(1024).unwrap();
        assert_eq!(config.chunk_size, 1024);
    }

    #[test]
    fn test_from_env() {
        std::env::set_var("VAULTFS_CHUNK_SIZE", "4096");
        std::env::set_var("ERASURE_DATA_SHARDS", "6");
        std::env::set_var("ERASURE_PARITY_SHARDS", "3");
        let config = VaultConfig::from_env().unwrap();
        assert_eq!(config.chunk_size, 4096);
        assert_eq!(config.erasure, ErasureConfig::new(6, 3).unwrap());
        assert_eq!(config.sharing, SharingConfig::default());

        std::env::set_var("ERASURE_PARITY_SHARDS", "0");
        assert!(matches!(VaultConfig::from_env(), Err(VaultError::Configuration(_))));

        for name in ["VAULTFS_CHUNK_SIZE", "ERASURE_DATA_SHARDS", "ERASURE_PARITY_SHARDS"] {
            std::env::remove_var(name);
        }
        assert_eq!(VaultConfig::from_env().unwrap(), VaultConfig::default());
    }

    #[test]
    fn test_env_or() {
        std::env::set_var("VAULTFS_TEST_ENV_OR", "17");
        assert_eq!(env_or("VAULTFS_TEST_ENV_OR", 3usize).unwrap(), 17);
        std::env::set_var("VAULTFS_TEST_ENV_OR", "many");
        assert!(env_or("VAULTFS_TEST_ENV_OR", 3usize).is_err());
        std::env::remove_var("VAULTFS_TEST_ENV_OR");
        assert_eq!(env_or("VAULTFS_TEST_ENV_OR", 3usize).unwrap(), 3);
    }
}
