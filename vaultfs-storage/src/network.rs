//! Network access trait
//!
//! Defines the block store interface the file layer writes through. Every
//! write is tagged with a storage transaction so that blocks written by an
//! unfinished upload stay pinned until the transaction closes.

use bytes::Bytes;
use futures::future::BoxFuture;
use std::fmt;
use std::future::Future;
use uuid::Uuid;
use vaultfs_core::chunk::Fragment;
use vaultfs_core::crypto::ContentHash;
use vaultfs_core::error::Result;
use vaultfs_core::identity::{PublicKeyHash, SigningKeyPair};
use vaultfs_core::location::{Location, MapKey};
use vaultfs_core::metadata::ChunkMetadata;

/// Identifier of an open storage transaction
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct TransactionId(Uuid);

impl TransactionId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for TransactionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for TransactionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "TransactionId({})", self.0)
    }
}

impl fmt::Display for TransactionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Network statistics
#[derive(Debug, Clone, Default)]
pub struct NetworkStats {
    /// Locations currently holding a metadata blob
    pub metadata_count: u64,

    /// Distinct fragments stored
    pub fragment_count: u64,

    /// Total bytes used by fragments
    pub fragment_bytes: u64,

    /// Transactions started but not yet closed
    pub open_transactions: u64,

    /// Number of metadata reads
    pub reads: u64,

    /// Number of metadata writes
    pub writes: u64,

    /// Number of metadata deletes
    pub deletes: u64,
}

/// Async block store
///
/// All implementations must be Send + Sync for use in async contexts.
pub trait NetworkAccess: Send + Sync {
    /// Open a transaction scoped to `owner`
    fn start_transaction<'a>(
        &'a self,
        owner: &'a PublicKeyHash,
    ) -> BoxFuture<'a, Result<TransactionId>>;

    /// Close a transaction, unpinning everything written under it
    fn close_transaction<'a>(
        &'a self,
        owner: &'a PublicKeyHash,
        tid: TransactionId,
    ) -> BoxFuture<'a, Result<()>>;

    /// Metadata blob at `location`, if any
    fn get_metadata<'a>(
        &'a self,
        location: &'a Location,
    ) -> BoxFuture<'a, Result<Option<ChunkMetadata>>>;

    /// Store fragments and return their hashes in input order
    fn upload_fragments<'a>(
        &'a self,
        fragments: Vec<Fragment>,
        owner: &'a PublicKeyHash,
        writer: &'a SigningKeyPair,
        tid: TransactionId,
    ) -> BoxFuture<'a, Result<Vec<ContentHash>>>;

    /// Fetch fragments by hash; missing fragments come back as `None`
    fn download_fragments<'a>(
        &'a self,
        hashes: &'a [ContentHash],
    ) -> BoxFuture<'a, Result<Vec<Option<Bytes>>>>;

    /// Write a metadata blob at `(owner, writer, map_key)`
    ///
    /// `expected` is the hash the caller believes currently occupies the
    /// location (`None` for an empty slot). A different current hash fails
    /// with `HashMismatch`. Returns the hash of the new blob.
    fn upload_chunk<'a>(
        &'a self,
        metadata: ChunkMetadata,
        owner: &'a PublicKeyHash,
        map_key: MapKey,
        expected: Option<ContentHash>,
        writer: &'a SigningKeyPair,
        tid: TransactionId,
    ) -> BoxFuture<'a, Result<ContentHash>>;

    /// Remove the metadata blob at `(owner, writer, map_key)`
    ///
    /// `existing` must be the blob currently stored there.
    fn delete_chunk<'a>(
        &'a self,
        existing: &'a ChunkMetadata,
        owner: &'a PublicKeyHash,
        map_key: MapKey,
        writer: &'a SigningKeyPair,
        tid: TransactionId,
    ) -> BoxFuture<'a, Result<()>>;

    /// Get network statistics
    fn stats<'a>(&'a self) -> BoxFuture<'a, Result<NetworkStats>>;
}

/// Run `f` inside a storage transaction for `owner`
///
/// The transaction is closed whether or not `f` succeeds. The error from `f`
/// takes precedence over an error closing the transaction.
pub async fn with_transaction<T, F, Fut>(
    network: &dyn NetworkAccess,
    owner: &PublicKeyHash,
    f: F,
) -> Result<T>
where
    F: FnOnce(TransactionId) -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let tid = network.start_transaction(owner).await?;
    let result = f(tid).await;
    let closed = network.close_transaction(owner, tid).await;
    let value = result?;
    closed?;
    Ok(value)
}
