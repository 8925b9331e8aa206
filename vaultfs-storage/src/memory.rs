//! In-memory network
//!
//! Used for testing and development. Not persistent. Enforces the same
//! write rules a real block store does: signed writes, hash preconditions
//! and open transactions.

use crate::network::{NetworkAccess, NetworkStats, TransactionId};
use bytes::Bytes;
use futures::future::BoxFuture;
use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::{debug, warn};
use vaultfs_core::chunk::Fragment;
use vaultfs_core::crypto::ContentHash;
use vaultfs_core::error::{Result, VaultError};
use vaultfs_core::identity::{verify_signature, PublicKeyHash, SigningKeyPair};
use vaultfs_core::location::{Location, MapKey};
use vaultfs_core::metadata::ChunkMetadata;

struct StoredBlob {
    metadata: ChunkMetadata,
    hash: ContentHash,
}

/// In-memory network
pub struct MemoryNetwork {
    /// Metadata blobs by location
    metadata: RwLock<HashMap<Location, StoredBlob>>,

    /// Content-addressed fragment storage
    fragments: RwLock<HashMap<ContentHash, Bytes>>,

    /// Open transactions and their owners
    transactions: RwLock<HashMap<TransactionId, PublicKeyHash>>,

    /// Metadata writes allowed before writes start failing (None = unlimited)
    write_budget: Mutex<Option<u64>>,

    /// Current bytes used by fragments
    fragment_bytes: AtomicU64,

    /// Operation counters
    reads: AtomicU64,
    writes: AtomicU64,
    deletes: AtomicU64,
}

impl MemoryNetwork {
    /// Create a new in-memory network
    pub fn new() -> Self {
        Self {
            metadata: RwLock::new(HashMap::new()),
            fragments: RwLock::new(HashMap::new()),
            transactions: RwLock::new(HashMap::new()),
            write_budget: Mutex::new(None),
            fragment_bytes: AtomicU64::new(0),
            reads: AtomicU64::new(0),
            writes: AtomicU64::new(0),
            deletes: AtomicU64::new(0),
        }
    }

    /// Let the next `writes` metadata uploads succeed, then fail every
    /// following one with a network error
    pub fn fail_writes_after(&self, writes: u64) {
        *self.write_budget.lock() = Some(writes);
    }

    /// Remove any write limit set by [`fail_writes_after`](Self::fail_writes_after)
    pub fn clear_write_limit(&self) {
        *self.write_budget.lock() = None;
    }

    /// Drop the metadata at `location` without any checks, as if another
    /// client had removed it
    pub fn remove_metadata(&self, location: &Location) -> bool {
        self.metadata.write().remove(location).is_some()
    }

    /// Whether `location` currently holds a metadata blob
    pub fn has_metadata(&self, location: &Location) -> bool {
        self.metadata.read().contains_key(location)
    }

    fn check_transaction(&self, owner: &PublicKeyHash, tid: TransactionId) -> Result<()> {
        match self.transactions.read().get(&tid) {
            Some(open_for) if open_for == owner => Ok(()),
            _ => Err(VaultError::UnknownTransaction(tid.to_string())),
        }
    }

    fn take_write_budget(&self) -> Result<()> {
        let mut budget = self.write_budget.lock();
        if let Some(remaining) = budget.as_mut() {
            if *remaining == 0 {
                return Err(VaultError::Network("write rejected: connection lost".to_string()));
            }
            *remaining -= 1;
        }
        Ok(())
    }

    /// Check that `writer` signed `bytes` and owns `location`'s key space
    fn authorize(location: &Location, writer: &SigningKeyPair, bytes: &[u8]) -> Result<()> {
        let signature = writer.sign(bytes);
        verify_signature(&location.writer, &writer.verifying_key(), bytes, &signature)
    }

    fn put_metadata(
        &self,
        metadata: ChunkMetadata,
        location: Location,
        expected: Option<ContentHash>,
        writer: &SigningKeyPair,
    ) -> Result<ContentHash> {
        let bytes = metadata.to_bytes()?;
        Self::authorize(&location, writer, &bytes)?;
        self.take_write_budget()?;

        let hash = ContentHash::compute(&bytes);
        let mut blobs = self.metadata.write();
        let current = blobs.get(&location).map(|blob| blob.hash);
        if current != expected {
            warn!(location = %location, "Metadata hash precondition failed");
            return Err(VaultError::HashMismatch {
                location: location.to_string(),
            });
        }

        blobs.insert(location, StoredBlob { metadata, hash });
        self.writes.fetch_add(1, Ordering::Relaxed);
        debug!(location = %location, hash = %hash, "Stored metadata");
        Ok(hash)
    }

    fn remove_checked(
        &self,
        existing: &ChunkMetadata,
        location: Location,
        writer: &SigningKeyPair,
    ) -> Result<()> {
        let bytes = existing.to_bytes()?;
        Self::authorize(&location, writer, &bytes)?;

        let expected = ContentHash::compute(&bytes);
        let mut blobs = self.metadata.write();
        match blobs.get(&location) {
            None => {
                debug!(location = %location, "Delete of empty location");
                Ok(())
            }
            Some(blob) if blob.hash != expected => Err(VaultError::HashMismatch {
                location: location.to_string(),
            }),
            Some(_) => {
                blobs.remove(&location);
                self.deletes.fetch_add(1, Ordering::Relaxed);
                debug!(location = %location, "Deleted metadata");
                Ok(())
            }
        }
    }
}

impl Default for MemoryNetwork {
    fn default() -> Self {
        Self::new()
    }
}

impl NetworkAccess for MemoryNetwork {
    fn start_transaction<'a>(
        &'a self,
        owner: &'a PublicKeyHash,
    ) -> BoxFuture<'a, Result<TransactionId>> {
        Box::pin(async move {
            let tid = TransactionId::new();
            self.transactions.write().insert(tid, *owner);
            debug!(tid = %tid, owner = %owner, "Started transaction");
            Ok(tid)
        })
    }

    fn close_transaction<'a>(
        &'a self,
        owner: &'a PublicKeyHash,
        tid: TransactionId,
    ) -> BoxFuture<'a, Result<()>> {
        Box::pin(async move {
            self.check_transaction(owner, tid)?;
            self.transactions.write().remove(&tid);
            debug!(tid = %tid, "Closed transaction");
            Ok(())
        })
    }

    fn get_metadata<'a>(
        &'a self,
        location: &'a Location,
    ) -> BoxFuture<'a, Result<Option<ChunkMetadata>>> {
        Box::pin(async move {
            self.reads.fetch_add(1, Ordering::Relaxed);
            Ok(self
                .metadata
                .read()
                .get(location)
                .map(|blob| blob.metadata.clone()))
        })
    }

    fn upload_fragments<'a>(
        &'a self,
        fragments: Vec<Fragment>,
        owner: &'a PublicKeyHash,
        writer: &'a SigningKeyPair,
        tid: TransactionId,
    ) -> BoxFuture<'a, Result<Vec<ContentHash>>> {
        Box::pin(async move {
            self.check_transaction(owner, tid)?;

            let mut stored = self.fragments.write();
            let mut hashes = Vec::with_capacity(fragments.len());
            for fragment in fragments {
                if !fragment.hash.verify(&fragment.data) {
                    return Err(VaultError::HashVerificationFailed);
                }
                if !stored.contains_key(&fragment.hash) {
                    self.fragment_bytes
                        .fetch_add(fragment.data.len() as u64, Ordering::SeqCst);
                    stored.insert(fragment.hash, fragment.data);
                }
                hashes.push(fragment.hash);
            }

            debug!(
                count = hashes.len(),
                writer = %writer.public_hash(),
                tid = %tid,
                "Stored fragments"
            );
            Ok(hashes)
        })
    }

    fn download_fragments<'a>(
        &'a self,
        hashes: &'a [ContentHash],
    ) -> BoxFuture<'a, Result<Vec<Option<Bytes>>>> {
        Box::pin(async move {
            let stored = self.fragments.read();
            Ok(hashes.iter().map(|hash| stored.get(hash).cloned()).collect())
        })
    }

    fn upload_chunk<'a>(
        &'a self,
        metadata: ChunkMetadata,
        owner: &'a PublicKeyHash,
        map_key: MapKey,
        expected: Option<ContentHash>,
        writer: &'a SigningKeyPair,
        tid: TransactionId,
    ) -> BoxFuture<'a, Result<ContentHash>> {
        Box::pin(async move {
            self.check_transaction(owner, tid)?;
            let location = Location::new(*owner, writer.public_hash(), map_key);
            self.put_metadata(metadata, location, expected, writer)
        })
    }

    fn delete_chunk<'a>(
        &'a self,
        existing: &'a ChunkMetadata,
        owner: &'a PublicKeyHash,
        map_key: MapKey,
        writer: &'a SigningKeyPair,
        tid: TransactionId,
    ) -> BoxFuture<'a, Result<()>> {
        Box::pin(async move {
            self.check_transaction(owner, tid)?;
            let location = Location::new(*owner, writer.public_hash(), map_key);
            self.remove_checked(existing, location, writer)
        })
    }

    fn stats<'a>(&'a self) -> BoxFuture<'a, Result<NetworkStats>> {
        Box::pin(async move {
            Ok(NetworkStats {
                metadata_count: self.metadata.read().len() as u64,
                fragment_count: self.fragments.read().len() as u64,
                fragment_bytes: self.fragment_bytes.load(Ordering::SeqCst),
                open_transactions: self.transactions.read().len() as u64,
                reads: self.reads.load(Ordering::Relaxed),
                writes: self.writes.load(Ordering::Relaxed),
                deletes: self.deletes.load(Ordering::Relaxed),
            })
        })
    }
}
