//! Upload transaction stores
//!
//! Where pending [`FileUploadTransaction`]s are kept between registering an
//! upload and completing it. Sled provides the durable store; records survive
//! a crash and are picked up by [`recover_pending`] on the next start.

use super::FileUploadTransaction;
use parking_lot::RwLock;
use std::collections::BTreeMap;
use std::path::Path;
use tracing::{debug, info, warn};
use vaultfs_core::error::{Result, VaultError};
use vaultfs_storage::network::NetworkAccess;

/// Ledger of uploads that have started but not finished
pub trait TransactionStore: Send + Sync {
    /// Record an upload before any of its chunks are written
    fn register(&self, transaction: &FileUploadTransaction) -> Result<()>;

    /// Forget a finished (or cleared) upload; returns whether it was known
    fn complete(&self, name: &str) -> Result<bool>;

    /// All registered, uncompleted uploads
    fn pending(&self) -> Result<Vec<FileUploadTransaction>>;
}

/// In-memory ledger (for testing)
#[derive(Default)]
pub struct MemoryTransactionStore {
    transactions: RwLock<BTreeMap<String, FileUploadTransaction>>,
}

impl MemoryTransactionStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl TransactionStore for MemoryTransactionStore {
    fn register(&self, transaction: &FileUploadTransaction) -> Result<()> {
        self.transactions
            .write()
            .insert(transaction.name(), transaction.clone());
        Ok(())
    }

    fn complete(&self, name: &str) -> Result<bool> {
        Ok(self.transactions.write().remove(name).is_some())
    }

    fn pending(&self) -> Result<Vec<FileUploadTransaction>> {
        Ok(self.transactions.read().values().cloned().collect())
    }
}

/// Sled-backed ledger
pub struct SledTransactionStore {
    db: sled::Db,
    tree: sled::Tree,
}

impl SledTransactionStore {
    const TREE: &'static str = "upload_transactions";

    /// Open or create a ledger
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        info!(path = ?path.as_ref(), "Opening Sled transaction store");

        let db = sled::open(path.as_ref())
            .map_err(|e| VaultError::Storage(format!("Failed to open Sled: {}", e)))?;
        Self::with_db(db)
    }

    /// Open an in-memory ledger (for testing)
    pub fn open_temporary() -> Result<Self> {
        let config = sled::Config::new().temporary(true);
        let db = config
            .open()
            .map_err(|e| VaultError::Storage(format!("Failed to open Sled: {}", e)))?;
        Self::with_db(db)
    }

    fn with_db(db: sled::Db) -> Result<Self> {
        let tree = db
            .open_tree(Self::TREE)
            .map_err(|e| VaultError::Storage(e.to_string()))?;
        Ok(Self { db, tree })
    }

    /// Flush to disk
    pub fn flush(&self) -> Result<()> {
        self.db
            .flush()
            .map_err(|e| VaultError::Storage(e.to_string()))?;
        Ok(())
    }
}

impl TransactionStore for SledTransactionStore {
    fn register(&self, transaction: &FileUploadTransaction) -> Result<()> {
        let encoded = transaction.to_bytes()?;
        self.tree
            .insert(transaction.name().as_bytes(), encoded)
            .map_err(|e| VaultError::Storage(e.to_string()))?;

        // The record must be on disk before the first chunk is
        self.flush()?;
        debug!(
            name = %transaction.name(),
            path = %transaction.path(),
            "Registered upload transaction"
        );
        Ok(())
    }

    fn complete(&self, name: &str) -> Result<bool> {
        let removed = self
            .tree
            .remove(name.as_bytes())
            .map_err(|e| VaultError::Storage(e.to_string()))?;
        Ok(removed.is_some())
    }

    fn pending(&self) -> Result<Vec<FileUploadTransaction>> {
        let mut transactions = Vec::new();

        for item in self.tree.iter() {
            let (_, value) = item.map_err(|e| VaultError::Storage(e.to_string()))?;
            transactions.push(FileUploadTransaction::from_bytes(&value)?);
        }

        Ok(transactions)
    }
}

/// Clear and complete every pending upload
///
/// Run once at startup, before new uploads begin. Returns the number of
/// transactions rolled back.
pub async fn recover_pending(
    store: &dyn TransactionStore,
    network: &dyn NetworkAccess,
) -> Result<usize> {
    let pending = store.pending()?;
    if pending.is_empty() {
        return Ok(0);
    }

    warn!(count = pending.len(), "Rolling back interrupted uploads");
    for transaction in &pending {
        transaction.clear(network).await?;
        store.complete(&transaction.name())?;
    }
    Ok(pending.len())
}
