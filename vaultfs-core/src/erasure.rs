//! Fragmenters
//!
//! An encrypted chunk is cut into fragments before upload. The policy lives
//! behind the [`Fragmenter`] trait:
//! - [`ErasureFragmenter`]: Reed-Solomon (k data + m parity shards), any k of
//!   the k+m fragments reconstruct the chunk
//! - [`SplitFragmenter`]: plain split, no redundancy

use crate::error::{Result, VaultError};
use crate::{DATA_SHARDS, PARITY_SHARDS};
use bytes::Bytes;
use rayon::prelude::*;
use reed_solomon_erasure::galois_8::ReedSolomon;
use serde::{Deserialize, Serialize};

/// Inputs above this size are sharded on the rayon pool
const PARALLEL_THRESHOLD: usize = 1024 * 1024;

/// Splits encrypted chunks into independently stored fragments
pub trait Fragmenter: Send + Sync {
    /// Cut `input` into fragments, in order
    fn split(&self, input: &[u8]) -> Result<Vec<Bytes>>;

    /// Rebuild the input from fragments; missing fragments are `None`
    fn recombine(&self, fragments: Vec<Option<Bytes>>, original_size: usize) -> Result<Bytes>;

    /// Stored bytes per input byte
    fn redundancy_factor(&self) -> f64;
}

/// Reed-Solomon shard layout used when fragmenting a chunk
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErasureConfig {
    /// Fragments needed to rebuild a chunk
    pub data_shards: usize,
    /// Redundant fragments
    pub parity_shards: usize,
}

impl Default for ErasureConfig {
    fn default() -> Self {
        Self {
            data_shards: DATA_SHARDS,
            parity_shards: PARITY_SHARDS,
        }
    }
}

impl ErasureConfig {
    /// Validated shard layout
    pub fn new(data_shards: usize, parity_shards: usize) -> Result<Self> {
        if data_shards == 0 {
            return Err(VaultError::Configuration(
                "data_shards must be > 0".to_string(),
            ));
        }
        if parity_shards == 0 {
            return Err(VaultError::Configuration(
                "parity_shards must be > 0".to_string(),
            ));
        }
        Ok(Self {
            data_shards,
            parity_shards,
        })
    }

    /// Fragments written per chunk
    pub fn total_shards(&self) -> usize {
        self.data_shards + self.parity_shards
    }

    /// Maximum number of lost fragments that can be tolerated
    pub fn max_failures(&self) -> usize {
        self.parity_shards
    }
}

/// Reed-Solomon fragmenter
pub struct ErasureFragmenter {
    config: ErasureConfig,
    encoder: ReedSolomon,
}

impl ErasureFragmenter {
    /// Create a fragmenter with the default configuration (10, 4)
    pub fn new() -> Result<Self> {
        Self::with_config(ErasureConfig::default())
    }

    /// Create a fragmenter with a custom configuration
    pub fn with_config(config: ErasureConfig) -> Result<Self> {
        let encoder = ReedSolomon::new(config.data_shards, config.parity_shards)?;
        Ok(Self { config, encoder })
    }

    pub fn config(&self) -> &ErasureConfig {
        &self.config
    }

    fn shard_size(&self, data_size: usize) -> usize {
        data_size.div_ceil(self.config.data_shards)
    }
}

impl Fragmenter for ErasureFragmenter {
    fn split(&self, input: &[u8]) -> Result<Vec<Bytes>> {
        if input.is_empty() {
            return Ok(Vec::new());
        }
        let shard_size = self.shard_size(input.len());

        // zero-pad the last data shard
        let mut padded = input.to_vec();
        padded.resize(shard_size * self.config.data_shards, 0);

        let mut shards: Vec<Vec<u8>> = if padded.len() > PARALLEL_THRESHOLD {
            padded.par_chunks(shard_size).map(|c| c.to_vec()).collect()
        } else {
            padded.chunks(shard_size).map(|c| c.to_vec()).collect()
        };
        shards.extend((0..self.config.parity_shards).map(|_| vec![0u8; shard_size]));

        // Fills in the parity shards
        self.encoder.encode(&mut shards)?;

        Ok(shards.into_iter().map(Bytes::from).collect())
    }

    fn recombine(&self, fragments: Vec<Option<Bytes>>, original_size: usize) -> Result<Bytes> {
        if original_size == 0 {
            return Ok(Bytes::new());
        }
        let total_shards = self.config.total_shards();
        if fragments.len() != total_shards {
            return Err(VaultError::FragmentCountMismatch {
                expected: total_shards,
                actual: fragments.len(),
            });
        }

        let available = fragments.iter().filter(|s| s.is_some()).count();
        if available < self.config.data_shards {
            return Err(VaultError::InsufficientFragments {
                available,
                required: self.config.data_shards,
            });
        }

        let mut shards: Vec<Option<Vec<u8>>> = fragments
            .into_iter()
            .map(|opt| opt.map(|s| s.to_vec()))
            .collect();

        // rebuild
        self.encoder.reconstruct(&mut shards)?;

        let mut result = Vec::with_capacity(original_size);
        for shard in shards.into_iter().take(self.config.data_shards) {
            let shard =
                shard.ok_or_else(|| VaultError::Internal("Reconstruction failed".to_string()))?;
            result.extend_from_slice(&shard);
        }

        result.truncate(original_size);
        Ok(Bytes::from(result))
    }

    fn redundancy_factor(&self) -> f64 {
        self.config.total_shards() as f64 / self.config.data_shards as f64
    }
}

/// Fragmenter that only splits, for single-replica stores
#[derive(Debug, Clone, Copy)]
pub struct SplitFragmenter {
    fragment_size: usize,
}

impl SplitFragmenter {
    pub const DEFAULT_FRAGMENT_SIZE: usize = 128 * 1024;

    pub fn new(fragment_size: usize) -> Result<Self> {
        if fragment_size == 0 {
            return Err(VaultError::Configuration(
                "fragment_size must be > 0".to_string(),
            ));
        }
        Ok(Self { fragment_size })
    }
}

impl Default for SplitFragmenter {
    fn default() -> Self {
        Self {
            fragment_size: Self::DEFAULT_FRAGMENT_SIZE,
        }
    }
}

impl Fragmenter for SplitFragmenter {
    fn split(&self, input: &[u8]) -> Result<Vec<Bytes>> {
        Ok(input
            .chunks(self.fragment_size)
            .map(Bytes::copy_from_slice)
            .collect())
    }

    fn recombine(&self, fragments: Vec<Option<Bytes>>, original_size: usize) -> Result<Bytes> {
        let mut result = Vec::with_capacity(original_size);
        let total = fragments.len();
        for fragment in fragments {
            let fragment = fragment.ok_or(VaultError::InsufficientFragments {
                available: total - 1,
                required: total,
            })?;
            result.extend_from_slice(&fragment);
        }
        if result.len() != original_size {
            return Err(VaultError::FragmentCountMismatch {
                expected: original_size,
                actual: result.len(),
            });
        }
        Ok(Bytes::from(result))
    }

    fn redundancy_factor(&self) -> f64 {
        1.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_layout() {
        let config = ErasureConfig::default();
        assert_eq!(config.data_shards, 10);
        assert_eq!(config.parity_shards, 4);
        assert_eq!(config.total_shards(), 14);
        assert_eq!(config.max_failures(), 4);
        assert!(ErasureConfig::new(0, 2).is_err());
    }

    #[test]
    fn test_split_recombine() {
        let fragmenter = ErasureFragmenter::new().unwrap();
        let original = b"Hello, VaultFS!";

        let fragments = fragmenter.split(original).unwrap();
        assert_eq!(fragments.len(), 14);

        let all: Vec<Option<Bytes>> = fragments.into_iter().map(Some).collect();
        let decoded = fragmenter.recombine(all, original.len()).unwrap();
        assert_eq!(decoded.as_ref(), original);
    }

    #[test]
    fn test_recombine_with_missing_fragments() {
        let fragmenter = ErasureFragmenter::new().unwrap();
        let original: Vec<u8> = (0..2 * 1024 * 1024).map(|i| (i % 251) as u8).collect();

        let mut fragments: Vec<Option<Bytes>> = fragmenter
            .split(&original)
            .unwrap()
            .into_iter()
            .map(Some)
            .collect();
        fragments[0] = None;
        fragments[5] = None;
        fragments[10] = None;
        fragments[13] = None;

        let decoded = fragmenter.recombine(fragments, original.len()).unwrap();
        assert_eq!(decoded.as_ref(), original.as_slice());
    }

    #[test]
    fn test_too_many_missing_fragments() {
        let fragmenter = ErasureFragmenter::new().unwrap();
        let original = b"chunk plaintext";

        let mut fragments: Vec<Option<Bytes>> = fragmenter
            .split(original)
            .unwrap()
            .into_iter()
            .map(Some)
            .collect();
        for fragment in fragments.iter_mut().take(5) {
            *fragment = None;
        }

        let result = fragmenter.recombine(fragments, original.len());
        assert!(matches!(
            result,
            Err(VaultError::InsufficientFragments { .. })
        ));
    }

    #[test]
    fn test_small_layout_roundtrip() {
        let config = ErasureConfig::new(3, 2).unwrap();
        let fragmenter = ErasureFragmenter::with_config(config).unwrap();
        assert!((fragmenter.redundancy_factor() - 5.0 / 3.0).abs() < 1e-9);

        let original = b"three plus two fragments";
        let fragments = fragmenter.split(original).unwrap();
        assert_eq!(fragments.len(), 5);
    }

    #[test]
    fn test_split_fragmenter() {
        let fragmenter = SplitFragmenter::new(4).unwrap();
        let fragments = fragmenter.split(b"abcdefghij").unwrap();
        assert_eq!(fragments.len(), 3);

        let all = fragments.into_iter().map(Some).collect();
        assert_eq!(fragmenter.recombine(all, 10).unwrap().as_ref(), b"abcdefghij");
        assert_eq!(fragmenter.redundancy_factor(), 1.0);
    }
}
