//! Error types for VaultFS
//!
//! Provides a unified error type for all VaultFS operations.

use thiserror::Error;

/// Result type alias for VaultFS operations
pub type Result<T> = std::result::Result<T, VaultError>;

/// Unified error type for VaultFS
#[derive(Error, Debug)]
pub enum VaultError {
    // ===== Erasure Coding Errors =====
    #[error("Erasure coding error: {0}")]
    ErasureCoding(String),

    #[error("Insufficient fragments: have {available}, need {required}")]
    InsufficientFragments { available: usize, required: usize },

    #[error("Fragment count mismatch: expected {expected}, got {actual}")]
    FragmentCountMismatch { expected: usize, actual: usize },

    // ===== Cryptography Errors =====
    #[error("Encryption error: {0}")]
    Encryption(String),

    #[error("Decryption error: {0}")]
    Decryption(String),

    #[error("Invalid key length: expected {expected}, got {actual}")]
    InvalidKeyLength { expected: usize, actual: usize },

    #[error("Hash verification failed")]
    HashVerificationFailed,

    // ===== Capability Errors =====
    #[error("Unexpected capability length: expected {expected}, got {actual}")]
    InvalidRecordLength { expected: usize, actual: usize },

    #[error("Invalid capability record: {0}")]
    InvalidCapability(String),

    // ===== Chunk / Location Errors =====
    #[error("Chunk too large: {size} bytes (max: {max})")]
    ChunkTooLarge { size: usize, max: usize },

    #[error("Expected {expected} chunk locations, got {actual}")]
    InvalidLocations { expected: usize, actual: usize },

    #[error("Location mismatch: {0}")]
    LocationMismatch(String),

    #[error("Chunk not found: {0}")]
    ChunkNotFound(String),

    #[error("Hash precondition failed at {location}")]
    HashMismatch { location: String },

    // ===== File Tree Errors =====
    #[error("Can only add link to a writable directory: {0}")]
    NotWritableDirectory(String),

    #[error("Not a directory: {0}")]
    NotADirectory(String),

    #[error("File already exists: {0}")]
    FileExists(String),

    #[error("Write offset {offset} is beyond end of file ({size} bytes)")]
    InvalidOffset { offset: u64, size: u64 },

    #[error("File no longer exists: {0}")]
    FileVanished(String),

    #[error("Permission denied: {0}")]
    PermissionDenied(String),

    // ===== Storage Errors =====
    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Unknown storage transaction: {0}")]
    UnknownTransaction(String),

    // ===== Network Errors =====
    #[error("Network error: {0}")]
    Network(String),

    // ===== I/O Errors =====
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    // ===== Serialization Errors =====
    #[error("Serialization error: {0}")]
    Serialization(String),

    // ===== Configuration Errors =====
    #[error("Configuration error: {0}")]
    Configuration(String),

    // ===== Generic Errors =====
    #[error("Internal error: {0}")]
    Internal(String),
}

impl VaultError {
    /// Validation errors are raised before any I/O and are never retried.
    pub fn is_validation(&self) -> bool {
        matches!(
            self,
            VaultError::InvalidRecordLength { .. }
                | VaultError::InvalidCapability(_)
                | VaultError::InvalidLocations { .. }
                | VaultError::LocationMismatch(_)
                | VaultError::NotWritableDirectory(_)
                | VaultError::InvalidOffset { .. }
                | VaultError::ChunkTooLarge { .. }
                | VaultError::Configuration(_)
        )
    }
}

impl From<reed_solomon_erasure::Error> for VaultError {
    fn from(err: reed_solomon_erasure::Error) -> Self {
        VaultError::ErasureCoding(err.to_string())
    }
}

impl From<bincode::Error> for VaultError {
    fn from(err: bincode::Error) -> Self {
        VaultError::Serialization(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = VaultError::InvalidRecordLength {
            expected: 162,
            actual: 201,
        };
        assert_eq!(
            err.to_string(),
            "Unexpected capability length: expected 162, got 201"
        );
    }

    #[test]
    fn test_error_from_io() {
        let io_err = std::io::Error::new(std::io::ErrorKind::UnexpectedEof, "short read");
        let err: VaultError = io_err.into();
        assert!(matches!(err, VaultError::Io(_)));
    }

    #[test]
    fn test_validation_classification() {
        assert!(VaultError::LocationMismatch("owner".into()).is_validation());
        assert!(!VaultError::Network("timeout".into()).is_validation());
        assert!(!VaultError::FileVanished("/a/b".into()).is_validation());
    }
}
