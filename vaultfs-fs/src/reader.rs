//! Chunk chain reader
//!
//! Reads a file by walking its chain of metadata blobs. Seeking only touches
//! metadata: fragments are downloaded for the chunks that overlap the
//! requested range and nothing else.

use bytes::{Bytes, BytesMut};
use std::sync::Arc;
use tracing::debug;
use vaultfs_core::capability::AbsoluteCapability;
use vaultfs_core::chunk::EncryptedChunk;
use vaultfs_core::crypto::{SymmetricKey, TAG_SIZE};
use vaultfs_core::erasure::Fragmenter;
use vaultfs_core::error::{Result, VaultError};
use vaultfs_core::location::Location;
use vaultfs_core::metadata::ChunkMetadata;
use vaultfs_core::props::FileProperties;
use vaultfs_storage::network::NetworkAccess;

/// Seekable reader over one file
pub struct FileReader {
    network: Arc<dyn NetworkAccess>,
    fragmenter: Arc<dyn Fragmenter>,
    base_key: SymmetricKey,
    first: Location,
    properties: FileProperties,
}

impl FileReader {
    /// Open the file `capability` points at
    pub async fn open(
        network: Arc<dyn NetworkAccess>,
        fragmenter: Arc<dyn Fragmenter>,
        capability: &AbsoluteCapability,
    ) -> Result<Self> {
        let first = capability.location;
        let metadata = network
            .get_metadata(&first)
            .await?
            .ok_or_else(|| VaultError::ChunkNotFound(first.to_string()))?;
        let properties = metadata
            .properties(&capability.read_key.derive_name_key())?
            .ok_or_else(|| {
                VaultError::InvalidCapability(format!("{} is not the start of a file", first))
            })?;

        Ok(Self {
            network,
            fragmenter,
            base_key: capability.read_key.clone(),
            first,
            properties,
        })
    }

    pub fn size(&self) -> u64 {
        self.properties.size
    }

    pub fn properties(&self) -> &FileProperties {
        &self.properties
    }

    /// The whole file
    pub async fn read_all(&self) -> Result<Bytes> {
        self.read_range(0, self.size()).await
    }

    /// Up to `len` bytes starting at `offset`; short only at end of file
    pub async fn read_range(&self, offset: u64, len: u64) -> Result<Bytes> {
        let end = offset.saturating_add(len).min(self.size());
        if offset >= end {
            return Ok(Bytes::new());
        }

        let mut out = BytesMut::with_capacity((end - offset) as usize);
        let mut location = self.first;
        let mut chunk_start = 0u64;

        while chunk_start < end {
            let metadata = self.metadata_at(&location).await?;
            let chunk_key = self.base_key.derive_chunk_key(&location.map_key);
            let chunk_len = metadata
                .retriever
                .ciphertext_len
                .saturating_sub(TAG_SIZE as u64);
            let chunk_end = chunk_start + chunk_len;

            if chunk_end > offset {
                let plaintext = self.read_chunk(&metadata, &chunk_key).await?;
                let from = offset.saturating_sub(chunk_start) as usize;
                let to = (end.min(chunk_end) - chunk_start) as usize;
                out.extend_from_slice(&plaintext[from..to]);
            }

            if chunk_len == 0 {
                break;
            }
            chunk_start = chunk_end;
            location = location.with_map_key(metadata.next_map_key(&chunk_key)?);
        }

        if (out.len() as u64) < end - offset {
            return Err(VaultError::ChunkNotFound(format!(
                "file ended after {} of {} bytes",
                offset + out.len() as u64,
                end
            )));
        }
        Ok(out.freeze())
    }

    /// Locations of every chunk, followed by the terminal location
    pub async fn chain(&self) -> Result<Vec<Location>> {
        let mut locations = vec![self.first];
        let mut location = self.first;
        let mut covered = 0u64;

        loop {
            let metadata = self.metadata_at(&location).await?;
            let chunk_key = self.base_key.derive_chunk_key(&location.map_key);
            covered += (metadata.retriever.ciphertext_len as usize).saturating_sub(TAG_SIZE) as u64;
            location = location.with_map_key(metadata.next_map_key(&chunk_key)?);
            locations.push(location);
            if covered >= self.size() {
                return Ok(locations);
            }
        }
    }

    async fn metadata_at(&self, location: &Location) -> Result<ChunkMetadata> {
        self.network
            .get_metadata(location)
            .await?
            .ok_or_else(|| VaultError::ChunkNotFound(location.to_string()))
    }

    async fn read_chunk(
        &self,
        metadata: &ChunkMetadata,
        chunk_key: &SymmetricKey,
    ) -> Result<Bytes> {
        let retriever = &metadata.retriever;
        let fragments = self
            .network
            .download_fragments(&retriever.fragment_hashes)
            .await?;
        debug!(
            fragments = fragments.len(),
            missing = fragments.iter().filter(|f| f.is_none()).count(),
            "Downloaded chunk fragments"
        );

        let ciphertext = self
            .fragmenter
            .recombine(fragments, retriever.ciphertext_len as usize)?;
        EncryptedChunk::from_ciphertext(ciphertext).decrypt(chunk_key, retriever.nonce)
    }
}
