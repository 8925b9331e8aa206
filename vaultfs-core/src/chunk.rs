//! Chunk types
//!
//! Chunks are the unit of encryption and upload. A file of length `L` is
//! stored as `max(1, ceil(L / chunk_size))` chunks; an empty file still has
//! one, empty, chunk.

use crate::crypto::{
    decrypt, encrypt_with_nonce, ContentHash, EncryptedData, SymmetricKey, NONCE_SIZE,
};
use crate::erasure::Fragmenter;
use crate::error::{Result, VaultError};
use crate::location::{Location, MapKey};
use bytes::Bytes;
use std::fmt;

/// Number of chunks a file of `length` bytes occupies
pub fn chunk_count(length: u64, chunk_size: usize) -> u64 {
    if length == 0 {
        1
    } else {
        length.div_ceil(chunk_size as u64)
    }
}

/// Plaintext length of chunk `index`
pub fn chunk_length(index: u64, length: u64, chunk_size: usize) -> usize {
    let position = index * chunk_size as u64;
    length.saturating_sub(position).min(chunk_size as u64) as usize
}

/// One independently stored, content-addressed piece of an encrypted chunk
#[derive(Clone, PartialEq, Eq)]
pub struct Fragment {
    pub hash: ContentHash,
    pub data: Bytes,
}

impl Fragment {
    pub fn new(data: Bytes) -> Self {
        Self {
            hash: ContentHash::compute(&data),
            data,
        }
    }

    pub fn size(&self) -> usize {
        self.data.len()
    }
}

impl fmt::Debug for Fragment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Fragment({:?}, {} bytes)", self.hash, self.data.len())
    }
}

/// Plaintext chunk bound to its key, nonce and map key
#[derive(Clone)]
pub struct Chunk {
    data: Bytes,
    key: SymmetricKey,
    map_key: MapKey,
    nonce: [u8; NONCE_SIZE],
}

impl Chunk {
    /// Bind `data` to the chunk key derived from `base_key` and `map_key`
    pub fn new(
        data: impl Into<Bytes>,
        base_key: &SymmetricKey,
        map_key: MapKey,
        max_size: usize,
    ) -> Result<Self> {
        let data: Bytes = data.into();

        if data.len() > max_size {
            return Err(VaultError::ChunkTooLarge {
                size: data.len(),
                max: max_size,
            });
        }

        let key = base_key.derive_chunk_key(&map_key);
        let nonce = key.create_nonce();
        Ok(Self {
            data,
            key,
            map_key,
            nonce,
        })
    }

    pub fn data(&self) -> &Bytes {
        &self.data
    }

    pub fn key(&self) -> &SymmetricKey {
        &self.key
    }

    pub fn map_key(&self) -> MapKey {
        self.map_key
    }

    pub fn nonce(&self) -> [u8; NONCE_SIZE] {
        self.nonce
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn encrypt(&self) -> Result<EncryptedChunk> {
        let encrypted = encrypt_with_nonce(&self.data, &self.key, self.nonce)?;
        Ok(EncryptedChunk {
            ciphertext: Bytes::from(encrypted.ciphertext),
        })
    }
}

impl fmt::Debug for Chunk {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Chunk({:?}, {} bytes)", self.map_key, self.data.len())
    }
}

/// AES-GCM ciphertext of a chunk (authentication tag appended)
#[derive(Clone, Debug)]
pub struct EncryptedChunk {
    ciphertext: Bytes,
}

impl EncryptedChunk {
    pub fn from_ciphertext(ciphertext: Bytes) -> Self {
        Self { ciphertext }
    }

    pub fn len(&self) -> usize {
        self.ciphertext.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ciphertext.is_empty()
    }

    pub fn generate_fragments(&self, fragmenter: &dyn Fragmenter) -> Result<Vec<Fragment>> {
        Ok(fragmenter
            .split(&self.ciphertext)?
            .into_iter()
            .map(Fragment::new)
            .collect())
    }

    pub fn decrypt(&self, key: &SymmetricKey, nonce: [u8; NONCE_SIZE]) -> Result<Bytes> {
        let sealed = EncryptedData {
            nonce,
            ciphertext: self.ciphertext.to_vec(),
        };
        decrypt(&sealed, key).map(Bytes::from)
    }
}

/// A chunk together with where it goes and what it replaces
#[derive(Clone, Debug)]
pub struct LocatedChunk {
    pub location: Location,
    /// Hash the writer believes currently occupies `location`
    pub existing_hash: Option<ContentHash>,
    pub chunk: Chunk,
}

impl LocatedChunk {
    pub fn new(location: Location, existing_hash: Option<ContentHash>, chunk: Chunk) -> Self {
        Self {
            location,
            existing_hash,
            chunk,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::erasure::ErasureFragmenter;

    const MIB: usize = 1024 * 1024;

    #[test]
    fn test_chunk_count() {
        assert_eq!(chunk_count(0, MIB), 1);
        assert_eq!(chunk_count(1, MIB), 1);
        assert_eq!(chunk_count(MIB as u64, MIB), 1);
        assert_eq!(chunk_count(MIB as u64 + 1, MIB), 2);
        assert_eq!(chunk_count(5 * MIB as u64, MIB), 5);
    }

    #[test]
    fn test_chunk_length() {
        let length = 2 * MIB as u64 + 10;
        assert_eq!(chunk_length(0, length, MIB), MIB);
        assert_eq!(chunk_length(1, length, MIB), MIB);
        assert_eq!(chunk_length(2, length, MIB), 10);
        assert_eq!(chunk_length(0, 0, MIB), 0);
    }

    #[test]
    fn test_chunk_too_large() {
        let key = SymmetricKey::generate();
        let result = Chunk::new(vec![0u8; 11], &key, MapKey::random(), 10);
        assert!(matches!(result, Err(VaultError::ChunkTooLarge { .. })));
    }

    #[test]
    fn test_encrypt_fragment_decrypt() {
        let base = SymmetricKey::generate();
        let data = Bytes::from_static(b"chunk contents");
        let chunk = Chunk::new(data, &base, MapKey::random(), MIB).unwrap();
        let encrypted = chunk.encrypt().unwrap();

        let fragmenter = ErasureFragmenter::new().unwrap();
        let fragments = encrypted.generate_fragments(&fragmenter).unwrap();
        assert_eq!(fragments.len(), 14);
        assert!(fragments.iter().all(|f| f.hash.verify(&f.data)));

        let rebuilt = fragmenter
            .recombine(fragments.into_iter().map(|f| Some(f.data)).collect(), encrypted.len())
            .unwrap();
        let plain = EncryptedChunk::from_ciphertext(rebuilt)
            .decrypt(&base.derive_chunk_key(&chunk.map_key()), chunk.nonce())
            .unwrap();
        assert_eq!(plain.as_ref(), b"chunk contents");
    }

    #[test]
    fn test_empty_chunk_still_encrypts() {
        let base = SymmetricKey::generate();
        let chunk = Chunk::new(Bytes::new(), &base, MapKey::random(), MIB).unwrap();
        let encrypted = chunk.encrypt().unwrap();
        assert_eq!(encrypted.len(), crate::crypto::TAG_SIZE);
        assert!(encrypted.decrypt(chunk.key(), chunk.nonce()).unwrap().is_empty());
    }
}
