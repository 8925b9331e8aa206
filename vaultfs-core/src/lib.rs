//! VaultFS Core Library
//!
//! Core abstractions for the VaultFS encrypted file store.
//! This crate provides:
//! - Identities, locations and capabilities (with their fixed-size records)
//! - Cryptographic primitives (Blake3 hashing, AES-GCM encryption)
//! - Chunks, fragments and the fragmenters that produce them
//! - Chunk metadata blobs and file properties
//! - Configuration and error handling

pub mod capability;
pub mod chunk;
pub mod config;
pub mod crypto;
pub mod erasure;
pub mod error;
pub mod identity;
pub mod location;
pub mod metadata;
pub mod props;

pub use capability::{
    AbsoluteCapability, Capability, CapabilityKind, RecordFormat, WritableAbsoluteCapability,
};
pub use chunk::{chunk_count, Chunk, EncryptedChunk, Fragment, LocatedChunk};
pub use config::{SharingConfig, VaultConfig};
pub use crypto::{ContentHash, EncryptedData, SymmetricKey};
pub use erasure::{ErasureConfig, ErasureFragmenter, Fragmenter, SplitFragmenter};
pub use error::{Result, VaultError};
pub use identity::{PublicKeyHash, SigningKeyPair};
pub use location::{Location, MapKey};
pub use metadata::{ChunkMetadata, ChunkRetriever, ParentLink};
pub use props::FileProperties;

/// Default erasure coding configuration
/// - 10 data shards: minimum required to reconstruct
/// - 4 parity shards: can tolerate 4 lost fragments
///
/// Override at runtime via ERASURE_DATA_SHARDS / ERASURE_PARITY_SHARDS env vars.
pub const DATA_SHARDS: usize = 10;
pub const PARITY_SHARDS: usize = 4;

/// Maximum plaintext bytes per chunk unless configured otherwise
pub const DEFAULT_CHUNK_SIZE: usize = 5 * 1024 * 1024; // 5 MB
