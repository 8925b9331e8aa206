//! Upload transaction ledger
//!
//! Before a file's chunks are written, a [`FileUploadTransaction`] naming every
//! location the upload may touch is registered in a [`TransactionStore`]. If
//! the upload fails, or the process dies part way through, clearing the
//! transaction deletes whatever reached the network so no orphaned chunks
//! remain.

pub mod store;

pub use store::{recover_pending, MemoryTransactionStore, SledTransactionStore, TransactionStore};

use futures::future::try_join_all;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};
use vaultfs_core::crypto::ContentHash;
use vaultfs_core::error::{Result, VaultError};
use vaultfs_core::identity::{PublicKeyHash, SigningKeyPair};
use vaultfs_core::location::{Location, MapKey};
use vaultfs_storage::network::{with_transaction, NetworkAccess};

/// Record of one in-flight file upload
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileUploadTransaction {
    start_time_millis: i64,
    path: String,
    file_hash: ContentHash,
    owner: PublicKeyHash,
    writer: SigningKeyPair,
    locations: Vec<Location>,
}

/// Serialized form: locations collapse to their map keys since owner and
/// writer are shared by all of them
#[derive(Serialize, Deserialize)]
struct TransactionRecord {
    start_time_millis: i64,
    path: String,
    file_hash: ContentHash,
    owner: PublicKeyHash,
    writer: SigningKeyPair,
    map_keys: Vec<MapKey>,
}

impl FileUploadTransaction {
    /// Create a transaction over `locations`, all of which must share one
    /// owner and be writable by `writer`
    pub fn new(
        start_time_millis: i64,
        path: impl Into<String>,
        file_hash: ContentHash,
        writer: SigningKeyPair,
        locations: Vec<Location>,
    ) -> Result<Self> {
        let owner = Self::ensure_valid(&locations, &writer)?;
        Ok(Self {
            start_time_millis,
            path: path.into(),
            file_hash,
            owner,
            writer,
            locations,
        })
    }

    fn ensure_valid(locations: &[Location], writer: &SigningKeyPair) -> Result<PublicKeyHash> {
        let first = locations.first().ok_or_else(|| {
            VaultError::LocationMismatch("transaction must cover at least one location".to_string())
        })?;

        if locations.iter().any(|l| l.owner != first.owner) {
            return Err(VaultError::LocationMismatch(
                "all locations for transaction must have the same owner".to_string(),
            ));
        }
        if locations.iter().any(|l| l.writer != first.writer) {
            return Err(VaultError::LocationMismatch(
                "all locations for transaction must have the same writer".to_string(),
            ));
        }
        if first.writer != writer.public_hash() {
            return Err(VaultError::LocationMismatch(
                "transaction locations must belong to the supplied signing pair".to_string(),
            ));
        }
        Ok(first.owner)
    }

    /// Ledger key: stable for the lifetime of the record
    pub fn name(&self) -> String {
        let mut hasher = blake3::Hasher::new();
        hasher.update(&self.start_time_millis.to_be_bytes());
        hasher.update(self.path.as_bytes());
        hasher.finalize().to_hex().to_string()
    }

    pub fn start_time_millis(&self) -> i64 {
        self.start_time_millis
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn file_hash(&self) -> &ContentHash {
        &self.file_hash
    }

    pub fn owner(&self) -> &PublicKeyHash {
        &self.owner
    }

    pub fn locations(&self) -> &[Location] {
        &self.locations
    }

    /// Delete the metadata at every location
    ///
    /// Each location is cleared in its own storage transaction and all run
    /// concurrently. A location with no metadata counts as cleared. Returns
    /// how many locations actually held data. Safe to call repeatedly.
    pub async fn clear(&self, network: &dyn NetworkAccess) -> Result<usize> {
        let cleared = try_join_all(
            self.locations
                .iter()
                .map(|location| self.clear_location(network, location)),
        )
        .await?;

        let removed = cleared.into_iter().filter(|held| *held).count();
        info!(
            path = %self.path,
            locations = self.locations.len(),
            removed,
            "Cleared upload transaction"
        );
        Ok(removed)
    }

    async fn clear_location(
        &self,
        network: &dyn NetworkAccess,
        location: &Location,
    ) -> Result<bool> {
        with_transaction(network, &location.owner, |tid| async move {
            match network.get_metadata(location).await? {
                None => Ok(false),
                Some(metadata) => {
                    network
                        .delete_chunk(
                            &metadata,
                            &location.owner,
                            location.map_key,
                            &self.writer,
                            tid,
                        )
                        .await?;
                    debug!(location = %location, "Removed chunk left by upload");
                    Ok(true)
                }
            }
        })
        .await
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        let record = TransactionRecord {
            start_time_millis: self.start_time_millis,
            path: self.path.clone(),
            file_hash: self.file_hash,
            owner: self.owner,
            writer: self.writer.clone(),
            map_keys: self.locations.iter().map(|l| l.map_key).collect(),
        };
        Ok(bincode::serialize(&record)?)
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        let record: TransactionRecord = bincode::deserialize(bytes)?;
        let writer_hash = record.writer.public_hash();
        let locations = record
            .map_keys
            .into_iter()
            .map(|map_key| Location::new(record.owner, writer_hash, map_key))
            .collect();
        Self::new(
            record.start_time_millis,
            record.path,
            record.file_hash,
            record.writer,
            locations,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_util::upload_blob;
    use proptest::prelude::*;
    use vaultfs_storage::MemoryNetwork;

    fn transaction(writer: &SigningKeyPair, count: usize) -> FileUploadTransaction {
        let locations = Location::allocate(writer.public_hash(), writer.public_hash(), count);
        FileUploadTransaction::new(
            1_700_000_000_000,
            "/alice/notes.txt",
            ContentHash::compute(b"notes"),
            writer.clone(),
            locations,
        )
        .unwrap()
    }

    #[test]
    fn test_validation() {
        let writer = SigningKeyPair::generate();
        let other = SigningKeyPair::generate();
        let hash = ContentHash::compute(b"x");

        // Empty
        assert!(FileUploadTransaction::new(0, "/a", hash, writer.clone(), Vec::new()).is_err());

        // Mixed owners
        let mut locations = Location::allocate(writer.public_hash(), writer.public_hash(), 2);
        locations.push(Location::new(other.public_hash(), writer.public_hash(), MapKey::random()));
        let err = FileUploadTransaction::new(0, "/a", hash, writer.clone(), locations).unwrap_err();
        assert!(err.is_validation());

        // Mixed writers
        let mut locations = Location::allocate(writer.public_hash(), writer.public_hash(), 2);
        locations.push(Location::new(writer.public_hash(), other.public_hash(), MapKey::random()));
        assert!(FileUploadTransaction::new(0, "/a", hash, writer.clone(), locations).is_err());

        // Writer is not the signing pair
        let locations = Location::allocate(writer.public_hash(), other.public_hash(), 2);
        assert!(FileUploadTransaction::new(0, "/a", hash, writer, locations).is_err());
    }

    #[test]
    fn test_name_is_stable() {
        let writer = SigningKeyPair::generate();
        let tx = transaction(&writer, 3);
        let decoded = FileUploadTransaction::from_bytes(&tx.to_bytes().unwrap()).unwrap();
        assert_eq!(tx.name(), decoded.name());
    }

    #[tokio::test]
    async fn test_clear_is_idempotent() {
        let network = MemoryNetwork::new();
        let writer = SigningKeyPair::generate();
        let tx = transaction(&writer, 4);

        for location in &tx.locations()[..2] {
            upload_blob(&network, &writer, location).await;
        }

        assert_eq!(tx.clear(&network).await.unwrap(), 2);
        for location in tx.locations() {
            assert!(!network.has_metadata(location));
        }

        // Second clear finds nothing and still succeeds
        assert_eq!(tx.clear(&network).await.unwrap(), 0);
        assert_eq!(network.stats().await.unwrap().open_transactions, 0);
    }

    proptest! {
        #[test]
        fn prop_record_roundtrip(
            start in any::<i64>(),
            path in "/[a-z]{1,8}(/[a-z0-9._]{1,12}){0,4}",
            count in 1usize..20,
            content in prop::collection::vec(any::<u8>(), 0..64),
        ) {
            let writer = SigningKeyPair::generate();
            let locations = Location::allocate(writer.public_hash(), writer.public_hash(), count);
            let tx = FileUploadTransaction::new(
                start,
                path,
                ContentHash::compute(&content),
                writer,
                locations,
            ).unwrap();

            let decoded = FileUploadTransaction::from_bytes(&tx.to_bytes().unwrap()).unwrap();
            prop_assert_eq!(decoded, tx);
        }
    }
}
