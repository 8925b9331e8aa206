//! Cryptographic primitives for VaultFS
//!
//! Provides:
//! - Blake3 content hashing (fragments, metadata blobs, file versions)
//! - AES-256-GCM encryption (authenticated encryption)
//! - One-way key derivation from a file's base key

use crate::error::{Result, VaultError};
use crate::location::MapKey;
use aes_gcm::{
    aead::{Aead, KeyInit, OsRng},
    Aes256Gcm, Nonce,
};
use serde::{Deserialize, Serialize};
use std::fmt;

/// AES-256-GCM key size (32 bytes)
pub const KEY_SIZE: usize = 32;

/// AES-GCM nonce size (12 bytes / 96 bits)
pub const NONCE_SIZE: usize = 12;

/// AES-GCM authentication tag size (16 bytes)
pub const TAG_SIZE: usize = 16;

const CHUNK_KEY_CONTEXT: &str = "vaultfs 2024-06 chunk key";
const NAME_KEY_CONTEXT: &str = "vaultfs 2024-06 name key";

/// Blake3 digest of a fragment, metadata blob or whole file
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct ContentHash(blake3::Hash);

impl ContentHash {
    /// Hash `data` on the calling thread
    pub fn compute(data: &[u8]) -> Self {
        Self(blake3::hash(data))
    }

    /// Create from raw digest bytes
    pub fn from_bytes(bytes: [u8; 32]) -> Self {
        Self(blake3::Hash::from_bytes(bytes))
    }

    /// Get the raw hash bytes
    pub fn as_bytes(&self) -> &[u8; 32] {
        self.0.as_bytes()
    }

    /// Lowercase hex form, used in log lines
    pub fn to_hex(&self) -> String {
        self.0.to_hex().to_string()
    }

    /// True when `data` hashes to this digest
    pub fn verify(&self, data: &[u8]) -> bool {
        let computed = Self::compute(data);
        self == &computed
    }
}

impl fmt::Debug for ContentHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ContentHash({}..)", &self.to_hex()[..12])
    }
}

impl fmt::Display for ContentHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}

impl Serialize for ContentHash {
    fn serialize<S>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_bytes(self.as_bytes())
    }
}

impl<'de> Deserialize<'de> for ContentHash {
    fn deserialize<D>(deserializer: D) -> std::result::Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let bytes: Vec<u8> = Deserialize::deserialize(deserializer)?;
        if bytes.len() != 32 {
            return Err(serde::de::Error::custom("content hash must be 32 bytes"));
        }
        let mut arr = [0u8; 32];
        arr.copy_from_slice(&bytes);
        Ok(Self(blake3::Hash::from_bytes(arr)))
    }
}

/// AES-256-GCM symmetric key
///
/// A file's base key doubles as the root of its per-chunk keys and of its
/// name key; both are derived one-way so neither reveals the base key.
#[derive(Clone, PartialEq, Eq)]
pub struct SymmetricKey([u8; KEY_SIZE]);

impl SymmetricKey {
    /// Fresh key from the OS RNG
    pub fn generate() -> Self {
        use rand::RngCore;
        let mut key = [0u8; KEY_SIZE];
        OsRng.fill_bytes(&mut key);
        Self(key)
    }

    /// Create from raw bytes
    pub fn from_bytes(bytes: [u8; KEY_SIZE]) -> Self {
        Self(bytes)
    }

    /// Create from a slice (validates length)
    pub fn from_slice(slice: &[u8]) -> Result<Self> {
        if slice.len() != KEY_SIZE {
            return Err(VaultError::InvalidKeyLength {
                expected: KEY_SIZE,
                actual: slice.len(),
            });
        }
        let mut key = [0u8; KEY_SIZE];
        key.copy_from_slice(slice);
        Ok(Self(key))
    }

    /// Get the raw key bytes
    pub fn as_bytes(&self) -> &[u8; KEY_SIZE] {
        &self.0
    }

    /// Fresh random nonce for one encryption under this key
    pub fn create_nonce(&self) -> [u8; NONCE_SIZE] {
        use rand::RngCore;
        let mut nonce = [0u8; NONCE_SIZE];
        OsRng.fill_bytes(&mut nonce);
        nonce
    }

    /// Key encrypting the chunk stored under `map_key`
    pub fn derive_chunk_key(&self, map_key: &MapKey) -> SymmetricKey {
        let mut material = [0u8; KEY_SIZE * 2];
        material[..KEY_SIZE].copy_from_slice(&self.0);
        material[KEY_SIZE..].copy_from_slice(map_key.as_bytes());
        let key = Self(blake3::derive_key(CHUNK_KEY_CONTEXT, &material));
        material.iter_mut().for_each(|b| *b = 0);
        key
    }

    /// Key protecting file properties and the parent link
    pub fn derive_name_key(&self) -> SymmetricKey {
        Self(blake3::derive_key(NAME_KEY_CONTEXT, &self.0))
    }
}

impl fmt::Debug for SymmetricKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SymmetricKey([REDACTED])")
    }
}

impl Drop for SymmetricKey {
    fn drop(&mut self) {
        // wipe
        self.0.iter_mut().for_each(|b| *b = 0);
    }
}

impl Serialize for SymmetricKey {
    fn serialize<S>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_bytes(&self.0)
    }
}

impl<'de> Deserialize<'de> for SymmetricKey {
    fn deserialize<D>(deserializer: D) -> std::result::Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let bytes: Vec<u8> = Deserialize::deserialize(deserializer)?;
        SymmetricKey::from_slice(&bytes).map_err(serde::de::Error::custom)
    }
}

/// Nonce plus authenticated ciphertext
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EncryptedData {
    /// Random per call unless supplied through [`encrypt_with_nonce`]
    pub nonce: [u8; NONCE_SIZE],
    /// Ciphertext followed by the GCM tag
    pub ciphertext: Vec<u8>,
}

impl EncryptedData {
    /// Stored size including the nonce
    pub fn len(&self) -> usize {
        self.ciphertext.len() + NONCE_SIZE
    }

    /// Check if empty
    pub fn is_empty(&self) -> bool {
        self.ciphertext.is_empty()
    }

    /// Encrypt a serializable value
    pub fn seal<T: Serialize>(value: &T, key: &SymmetricKey) -> Result<Self> {
        let plaintext = bincode::serialize(value)?;
        encrypt(&plaintext, key)
    }

    /// Decrypt and deserialize a value sealed with [`EncryptedData::seal`]
    pub fn open<T: serde::de::DeserializeOwned>(&self, key: &SymmetricKey) -> Result<T> {
        let plaintext = decrypt(self, key)?;
        Ok(bincode::deserialize(&plaintext)?)
    }
}

/// Encrypt data using AES-256-GCM with a random nonce
pub fn encrypt(plaintext: &[u8], key: &SymmetricKey) -> Result<EncryptedData> {
    encrypt_with_nonce(plaintext, key, key.create_nonce())
}

/// Encrypt data using AES-256-GCM with a caller-supplied nonce
pub fn encrypt_with_nonce(
    plaintext: &[u8],
    key: &SymmetricKey,
    nonce_bytes: [u8; NONCE_SIZE],
) -> Result<EncryptedData> {
    let nonce = Nonce::from_slice(&nonce_bytes);

    let cipher = Aes256Gcm::new_from_slice(key.as_bytes())
        .map_err(|e| VaultError::Encryption(e.to_string()))?;

    let ciphertext = cipher
        .encrypt(nonce, plaintext)
        .map_err(|e| VaultError::Encryption(e.to_string()))?;

    Ok(EncryptedData {
        nonce: nonce_bytes,
        ciphertext,
    })
}

/// Decrypt data using AES-256-GCM
pub fn decrypt(encrypted: &EncryptedData, key: &SymmetricKey) -> Result<Vec<u8>> {
    let nonce = Nonce::from_slice(&encrypted.nonce);

    let cipher = Aes256Gcm::new_from_slice(key.as_bytes())
        .map_err(|e| VaultError::Decryption(e.to_string()))?;

    let plaintext = cipher
        .decrypt(nonce, encrypted.ciphertext.as_slice())
        .map_err(|_| VaultError::Decryption("Authentication failed".to_string()))?;

    Ok(plaintext)
}
