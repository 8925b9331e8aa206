//! Chunk metadata blobs
//!
//! The blob stored at a chunk's [`Location`]. It never holds plaintext: file
//! properties and the parent link are sealed under the file's name key, and
//! the pointer to the next chunk is sealed under the chunk key.

use crate::crypto::{ContentHash, EncryptedData, SymmetricKey, NONCE_SIZE};
use crate::error::Result;
use crate::location::{Location, MapKey};
use crate::props::FileProperties;
use serde::{Deserialize, Serialize};

/// Current blob format version
pub const METADATA_VERSION: u8 = 1;

/// Where a file's parent lives, and the parent's name key
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParentLink {
    pub location: Location,
    pub name_key: SymmetricKey,
}

/// Everything needed to fetch and decrypt one chunk
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChunkRetriever {
    pub nonce: [u8; NONCE_SIZE],
    pub fragment_hashes: Vec<ContentHash>,
    pub ciphertext_len: u64,
    /// Map key of the next chunk, sealed under this chunk's key
    pub next_chunk: EncryptedData,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChunkMetadata {
    pub version: u8,
    /// First chunk only
    pub properties: Option<EncryptedData>,
    /// First chunk only; absent on user roots
    pub parent: Option<EncryptedData>,
    pub retriever: ChunkRetriever,
}

impl ChunkMetadata {
    /// Build the blob for one chunk. `properties` is given for the first chunk
    /// of a file only.
    #[allow(clippy::too_many_arguments)]
    pub fn create(
        base_key: &SymmetricKey,
        chunk_key: &SymmetricKey,
        properties: Option<&FileProperties>,
        parent: Option<&ParentLink>,
        nonce: [u8; NONCE_SIZE],
        fragment_hashes: Vec<ContentHash>,
        ciphertext_len: u64,
        next_chunk: &MapKey,
    ) -> Result<Self> {
        let name_key = base_key.derive_name_key();
        let (properties, parent) = match properties {
            Some(props) => (
                Some(EncryptedData::seal(props, &name_key)?),
                parent
                    .map(|link| EncryptedData::seal(link, &name_key))
                    .transpose()?,
            ),
            None => (None, None),
        };
        Ok(Self {
            version: METADATA_VERSION,
            properties,
            parent,
            retriever: ChunkRetriever {
                nonce,
                fragment_hashes,
                ciphertext_len,
                next_chunk: EncryptedData::seal(next_chunk, chunk_key)?,
            },
        })
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        Ok(bincode::serialize(self)?)
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        Ok(bincode::deserialize(bytes)?)
    }

    /// Hash used as the optimistic-concurrency token for this location
    pub fn hash(&self) -> Result<ContentHash> {
        Ok(ContentHash::compute(&self.to_bytes()?))
    }

    pub fn is_first_chunk(&self) -> bool {
        self.properties.is_some()
    }

    pub fn properties(&self, name_key: &SymmetricKey) -> Result<Option<FileProperties>> {
        self.properties
            .as_ref()
            .map(|sealed| sealed.open(name_key))
            .transpose()
    }

    pub fn parent_link(&self, name_key: &SymmetricKey) -> Result<Option<ParentLink>> {
        self.parent
            .as_ref()
            .map(|sealed| sealed.open(name_key))
            .transpose()
    }

    pub fn next_map_key(&self, chunk_key: &SymmetricKey) -> Result<MapKey> {
        self.retriever.next_chunk.open(chunk_key)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::identity::SigningKeyPair;

    #[test]
    fn test_sealed_fields() {
        let base = SymmetricKey::generate();
        let map_key = MapKey::random();
        let chunk_key = base.derive_chunk_key(&map_key);
        let next = MapKey::random();
        let signer = SigningKeyPair::generate();
        let parent = ParentLink {
            location: Location::new(signer.public_hash(), signer.public_hash(), MapKey::random()),
            name_key: SymmetricKey::generate(),
        };
        let props = FileProperties::file("a.txt", "text/plain", 3);

        let meta = ChunkMetadata::create(
            &base,
            &chunk_key,
            Some(&props),
            Some(&parent),
            chunk_key.create_nonce(),
            vec![ContentHash::compute(b"fragment")],
            19,
            &next,
        )
        .unwrap();

        let name_key = base.derive_name_key();
        assert_eq!(meta.properties(&name_key).unwrap(), Some(props));
        assert_eq!(meta.parent_link(&name_key).unwrap(), Some(parent));
        assert_eq!(meta.next_map_key(&chunk_key).unwrap(), next);
        assert!(meta.properties(&base).is_err());

        let bytes = meta.to_bytes().unwrap();
        let decoded = ChunkMetadata::from_bytes(&bytes).unwrap();
        assert_eq!(decoded, meta);
        assert_eq!(decoded.hash().unwrap(), meta.hash().unwrap());
    }

    #[test]
    fn test_later_chunks_carry_no_properties() {
        let base = SymmetricKey::generate();
        let chunk_key = base.derive_chunk_key(&MapKey::random());
        let meta = ChunkMetadata::create(
            &base,
            &chunk_key,
            None,
            None,
            chunk_key.create_nonce(),
            Vec::new(),
            16,
            &MapKey::random(),
        )
        .unwrap();
        assert!(!meta.is_first_chunk());
        assert_eq!(meta.properties(&base.derive_name_key()).unwrap(), None);
    }
}
