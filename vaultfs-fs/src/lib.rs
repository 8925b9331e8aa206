//! VaultFS file layer
//!
//! Everything above the block store:
//! - `uploader`: chunk encoding and upload pipeline
//! - `reader`: reading files back from their chunk chains
//! - `transaction`: upload transaction ledger and crash recovery
//! - `tree`: directories and files addressed by capabilities
//! - `capability_store`: sharing logs and their resolution cache

pub mod capability_store;
pub mod reader;
pub mod transaction;
pub mod tree;
pub mod uploader;

pub use capability_store::{
    CapabilitiesFromUser, CapabilityStore, CapabilityWithPath, CAPABILITY_CACHE_DIR,
};
pub use reader::FileReader;
pub use transaction::{
    recover_pending, FileUploadTransaction, MemoryTransactionStore, SledTransactionStore,
    TransactionStore,
};
pub use tree::{EntryPoint, FileHandle, FileTree, NetworkFileTree};
pub use uploader::{FileUploader, ProgressSink};

#[cfg(test)]
pub(crate) mod test_util {
    use vaultfs_core::crypto::SymmetricKey;
    use vaultfs_core::identity::SigningKeyPair;
    use vaultfs_core::location::{Location, MapKey};
    use vaultfs_core::metadata::ChunkMetadata;
    use vaultfs_storage::{with_transaction, MemoryNetwork, NetworkAccess};

    /// Store a small metadata blob at `location`
    pub async fn upload_blob(
        network: &MemoryNetwork,
        writer: &SigningKeyPair,
        location: &Location,
    ) {
        let base = SymmetricKey::generate();
        let chunk_key = base.derive_chunk_key(&location.map_key);
        let metadata = ChunkMetadata::create(
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

        with_transaction(network, &location.owner, |tid| {
            network.upload_chunk(metadata, &location.owner, location.map_key, None, writer, tid)
        })
        .await
        .unwrap();
    }
}
