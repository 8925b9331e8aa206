//! Chunk encoder and uploader
//!
//! Turns a byte stream into a linked chain of encrypted, fragmented chunks.
//! Two stages run concurrently in the calling task:
//!
//! - encode: read chunk `i`, encrypt it and split it into fragments
//! - upload: write chunk `i`'s fragments, then its metadata blob, inside one
//!   storage transaction
//!
//! A channel of capacity one sits between them, so at most one encoded chunk
//! waits while the previous one uploads. Chunks are confirmed strictly in
//! order and any failure aborts the whole upload.

use bytes::Bytes;
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::sync::mpsc;
use tracing::{debug, info};
use vaultfs_core::chunk::{chunk_count, chunk_length, Chunk, Fragment, LocatedChunk};
use vaultfs_core::crypto::{ContentHash, SymmetricKey};
use vaultfs_core::erasure::Fragmenter;
use vaultfs_core::error::{Result, VaultError};
use vaultfs_core::identity::{PublicKeyHash, SigningKeyPair};
use vaultfs_core::location::Location;
use vaultfs_core::metadata::{ChunkMetadata, ParentLink};
use vaultfs_core::props::{FileProperties, DEFAULT_MIME_TYPE};
use vaultfs_storage::network::{with_transaction, NetworkAccess};

/// Receives the plaintext byte count of every confirmed chunk
pub type ProgressSink = Arc<dyn Fn(u64) + Send + Sync>;

/// A chunk ready to be written
struct EncodedChunk {
    located: LocatedChunk,
    ciphertext_len: usize,
    fragments: Vec<Fragment>,
}

pub struct FileUploader {
    name: String,
    length: u64,
    chunk_size: usize,
    nchunks: u64,
    base_key: SymmetricKey,
    props: FileProperties,
    parent: Option<ParentLink>,
    progress: Option<ProgressSink>,
    fragmenter: Arc<dyn Fragmenter>,
    locations: Vec<Location>,
    existing_hashes: Vec<Option<ContentHash>>,
}

impl FileUploader {
    /// Prepare an upload of `length` bytes in chunks of `chunk_size`
    ///
    /// `locations` must hold one entry per chunk plus one for the terminal
    /// pointer of the last chunk. Without `base_key` a fresh one is
    /// generated; without `props` plain file properties are used.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        name: impl Into<String>,
        length: u64,
        chunk_size: usize,
        base_key: Option<SymmetricKey>,
        parent: Option<ParentLink>,
        props: Option<FileProperties>,
        progress: Option<ProgressSink>,
        fragmenter: Arc<dyn Fragmenter>,
        locations: Vec<Location>,
    ) -> Result<Self> {
        if chunk_size == 0 {
            return Err(VaultError::Configuration("chunk_size must be > 0".to_string()));
        }
        let name = name.into();
        let props =
            props.unwrap_or_else(|| FileProperties::file(name.clone(), DEFAULT_MIME_TYPE, length));
        let existing_hashes = vec![None; locations.len()];

        let uploader = Self {
            name,
            length,
            chunk_size,
            nchunks: chunk_count(length, chunk_size),
            base_key: base_key.unwrap_or_else(SymmetricKey::generate),
            props,
            parent,
            progress,
            fragmenter,
            locations,
            existing_hashes,
        };
        uploader.validate()?;
        Ok(uploader)
    }

    /// Hashes currently occupying each location, for overwriting in place
    pub fn with_existing_hashes(
        mut self,
        existing_hashes: Vec<Option<ContentHash>>,
    ) -> Result<Self> {
        if existing_hashes.len() != self.locations.len() {
            return Err(VaultError::InvalidLocations {
                expected: self.locations.len(),
                actual: existing_hashes.len(),
            });
        }
        self.existing_hashes = existing_hashes;
        Ok(self)
    }

    fn validate(&self) -> Result<()> {
        let expected = self.nchunks as usize + 1;
        if self.locations.len() != expected {
            return Err(VaultError::InvalidLocations {
                expected,
                actual: self.locations.len(),
            });
        }
        Ok(())
    }

    pub fn base_key(&self) -> &SymmetricKey {
        &self.base_key
    }

    pub fn chunk_count(&self) -> u64 {
        self.nchunks
    }

    pub fn locations(&self) -> &[Location] {
        &self.locations
    }

    /// Encode and upload every chunk read from `reader`
    ///
    /// Returns the metadata hash of each chunk in order.
    pub async fn upload<R>(
        &self,
        network: &dyn NetworkAccess,
        owner: PublicKeyHash,
        writer: &SigningKeyPair,
        reader: R,
    ) -> Result<Vec<ContentHash>>
    where
        R: AsyncRead + Unpin + Send,
    {
        for location in &self.locations {
            if location.owner != owner || location.writer != writer.public_hash() {
                return Err(VaultError::LocationMismatch(format!(
                    "trying to write {} to the wrong signing key space",
                    location
                )));
            }
        }

        let start = std::time::Instant::now();
        let (tx, rx) = mpsc::channel(1);
        let (_, hashes) = tokio::try_join!(
            self.encode_stage(reader, tx),
            self.upload_stage(network, writer, rx)
        )?;

        info!(
            name = %self.name,
            chunks = self.nchunks,
            bytes = self.length,
            elapsed_ms = start.elapsed().as_millis() as u64,
            "File encryption, erasure coding and upload complete"
        );
        Ok(hashes)
    }

    async fn encode_stage<R>(&self, mut reader: R, tx: mpsc::Sender<EncodedChunk>) -> Result<()>
    where
        R: AsyncRead + Unpin + Send,
    {
        for index in 0..self.nchunks {
            let mut data = vec![0u8; chunk_length(index, self.length, self.chunk_size)];
            reader.read_exact(&mut data).await?;

            let position = index as usize;
            let location = self.locations[position];
            let chunk = Chunk::new(
                Bytes::from(data),
                &self.base_key,
                location.map_key,
                self.chunk_size,
            )?;
            let located = LocatedChunk::new(location, self.existing_hashes[position], chunk);

            let fragmenter = Arc::clone(&self.fragmenter);
            let encoded =
                tokio::task::spawn_blocking(move || encode_chunk(located, fragmenter.as_ref()))
                    .await
                    .map_err(|e| VaultError::Internal(format!("Encode task failed: {}", e)))??;

            // The upload stage only hangs up after failing, and its error wins
            if tx.send(encoded).await.is_err() {
                break;
            }
        }
        Ok(())
    }

    async fn upload_stage(
        &self,
        network: &dyn NetworkAccess,
        writer: &SigningKeyPair,
        mut rx: mpsc::Receiver<EncodedChunk>,
    ) -> Result<Vec<ContentHash>> {
        let mut hashes = Vec::with_capacity(self.nchunks as usize);

        while let Some(encoded) = rx.recv().await {
            let index = hashes.len();
            let plaintext_len = encoded.located.chunk.len() as u64;
            let next = self.locations[index + 1];
            let hash = self.upload_chunk(network, writer, encoded, &next, index == 0).await?;

            debug!(name = %self.name, chunk = index, hash = %hash, "Chunk confirmed");
            if let Some(progress) = &self.progress {
                progress(plaintext_len);
            }
            hashes.push(hash);
        }

        if hashes.len() as u64 != self.nchunks {
            return Err(VaultError::Internal(format!(
                "Encoder stopped after {} of {} chunks",
                hashes.len(),
                self.nchunks
            )));
        }
        Ok(hashes)
    }

    async fn upload_chunk(
        &self,
        network: &dyn NetworkAccess,
        writer: &SigningKeyPair,
        encoded: EncodedChunk,
        next: &Location,
        is_first: bool,
    ) -> Result<ContentHash> {
        let EncodedChunk {
            located,
            ciphertext_len,
            fragments,
        } = encoded;
        let location = located.location;
        debug!(location = %location, fragments = fragments.len(), "Uploading chunk");

        with_transaction(network, &location.owner, |tid| async move {
            let fragment_hashes = network
                .upload_fragments(fragments, &location.owner, writer, tid)
                .await?;

            let (props, parent) = if is_first {
                (Some(&self.props), self.parent.as_ref())
            } else {
                (None, None)
            };
            let metadata = ChunkMetadata::create(
                &self.base_key,
                located.chunk.key(),
                props,
                parent,
                located.chunk.nonce(),
                fragment_hashes,
                ciphertext_len as u64,
                &next.map_key,
            )?;

            network
                .upload_chunk(
                    metadata,
                    &location.owner,
                    location.map_key,
                    located.existing_hash,
                    writer,
                    tid,
                )
                .await
        })
        .await
    }
}

fn encode_chunk(located: LocatedChunk, fragmenter: &dyn Fragmenter) -> Result<EncodedChunk> {
    let encrypted = located.chunk.encrypt()?;
    let fragments = encrypted.generate_fragments(fragmenter)?;
    Ok(EncodedChunk {
        located,
        ciphertext_len: encrypted.len(),
        fragments,
    })
}
