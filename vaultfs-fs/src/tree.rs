//! File tree
//!
//! Files and directories addressed by capabilities. A directory is a file
//! whose content is the bincode list of its children's read capabilities; a
//! child written by the directory's own signer is writable through it.
//! Every file's first chunk carries a link to its parent, sealed under the
//! file's name key, which is how paths are recovered.

use bytes::Bytes;
use futures::future::{try_join_all, BoxFuture};
use std::future::Future;
use std::sync::Arc;
use tracing::{debug, info, warn};
use vaultfs_core::capability::{AbsoluteCapability, Capability, WritableAbsoluteCapability};
use vaultfs_core::chunk::chunk_count;
use vaultfs_core::config::VaultConfig;
use vaultfs_core::crypto::{ContentHash, SymmetricKey};
use vaultfs_core::erasure::{ErasureFragmenter, Fragmenter};
use vaultfs_core::error::{Result, VaultError};
use vaultfs_core::identity::{PublicKeyHash, SigningKeyPair};
use vaultfs_core::location::Location;
use vaultfs_core::metadata::ParentLink;
use vaultfs_core::props::{FileProperties, DEFAULT_MIME_TYPE};
use vaultfs_storage::network::NetworkAccess;

use crate::reader::FileReader;
use crate::transaction::{FileUploadTransaction, TransactionStore};
use crate::uploader::FileUploader;

/// A file or directory as seen through one capability
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FileHandle {
    capability: Capability,
    properties: FileProperties,
}

impl FileHandle {
    pub fn new(capability: Capability, properties: FileProperties) -> Self {
        Self {
            capability,
            properties,
        }
    }

    pub fn name(&self) -> &str {
        &self.properties.name
    }

    pub fn size(&self) -> u64 {
        self.properties.size
    }

    pub fn is_directory(&self) -> bool {
        self.properties.is_directory
    }

    pub fn is_writable(&self) -> bool {
        self.capability.signer().is_some()
    }

    pub fn properties(&self) -> &FileProperties {
        &self.properties
    }

    pub fn capability(&self) -> &Capability {
        &self.capability
    }

    pub fn location(&self) -> &Location {
        self.capability.location()
    }

    pub fn owner(&self) -> &PublicKeyHash {
        &self.location().owner
    }

    pub fn read_capability(&self) -> AbsoluteCapability {
        self.capability.read_only()
    }

    pub fn writable_capability(&self) -> Option<WritableAbsoluteCapability> {
        match &self.capability {
            Capability::Write(cap) => Some(cap.clone()),
            Capability::Read(_) => None,
        }
    }

    /// The same file without write access
    pub fn read_only(&self) -> FileHandle {
        FileHandle::new(Capability::Read(self.read_capability()), self.properties.clone())
    }

    fn signer(&self) -> Option<&SigningKeyPair> {
        self.capability.signer()
    }

    fn read_key(&self) -> &SymmetricKey {
        &self.capability.absolute().read_key
    }
}

/// A capability received from another user, with the name of its owner
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct EntryPoint {
    pub capability: Capability,
    pub owner_name: String,
}

impl EntryPoint {
    pub fn new(capability: Capability, owner_name: impl Into<String>) -> Self {
        Self {
            capability,
            owner_name: owner_name.into(),
        }
    }
}

/// Directory and file operations
pub trait FileTree: Send + Sync {
    /// Children of `dir` whose metadata still exists
    fn get_children<'a>(&'a self, dir: &'a FileHandle) -> BoxFuture<'a, Result<Vec<FileHandle>>>;

    fn get_child<'a>(
        &'a self,
        dir: &'a FileHandle,
        name: &'a str,
    ) -> BoxFuture<'a, Result<Option<FileHandle>>>;

    fn mkdir<'a>(
        &'a self,
        parent: &'a FileHandle,
        name: &'a str,
        hidden: bool,
    ) -> BoxFuture<'a, Result<FileHandle>>;

    /// Write `data` at `offset` into the child `name`, creating it if absent
    ///
    /// The file keeps its key and locations, so existing capabilities to it
    /// stay valid. `offset` may not exceed the current size.
    fn upload_file_section<'a>(
        &'a self,
        parent: &'a FileHandle,
        name: &'a str,
        data: Bytes,
        offset: u64,
    ) -> BoxFuture<'a, Result<FileHandle>>;

    /// Replace the child `name` with a new file holding `data`
    fn upload_or_overwrite_file<'a>(
        &'a self,
        parent: &'a FileHandle,
        name: &'a str,
        data: Bytes,
    ) -> BoxFuture<'a, Result<FileHandle>>;

    fn open_reader<'a>(&'a self, file: &'a FileHandle) -> BoxFuture<'a, Result<FileReader>>;

    /// Resolve a received capability; `None` if nothing is stored there
    fn retrieve_entry_point<'a>(
        &'a self,
        entry: &'a EntryPoint,
    ) -> BoxFuture<'a, Result<Option<FileHandle>>>;

    /// Absolute path, fails with `FileVanished` if the file or an ancestor is gone
    fn get_path<'a>(&'a self, file: &'a FileHandle) -> BoxFuture<'a, Result<String>>;

    /// Unlink `child` from `parent` and delete its chunks (recursively for directories)
    fn delete<'a>(
        &'a self,
        parent: &'a FileHandle,
        child: &'a FileHandle,
    ) -> BoxFuture<'a, Result<()>>;
}

/// File tree whose whole state lives in a [`NetworkAccess`]
pub struct NetworkFileTree {
    network: Arc<dyn NetworkAccess>,
    fragmenter: Arc<dyn Fragmenter>,
    transactions: Arc<dyn TransactionStore>,
    chunk_size: usize,
}

impl NetworkFileTree {
    pub fn new(
        network: Arc<dyn NetworkAccess>,
        fragmenter: Arc<dyn Fragmenter>,
        transactions: Arc<dyn TransactionStore>,
        config: &VaultConfig,
    ) -> Self {
        Self {
            network,
            fragmenter,
            transactions,
            chunk_size: config.chunk_size,
        }
    }

    /// Tree fragmenting chunks with the Reed-Solomon layout in `config`
    pub fn from_config(
        network: Arc<dyn NetworkAccess>,
        transactions: Arc<dyn TransactionStore>,
        config: &VaultConfig,
    ) -> Result<Self> {
        let fragmenter = ErasureFragmenter::with_config(config.erasure)?;
        debug!(
            data_shards = config.erasure.data_shards,
            parity_shards = config.erasure.parity_shards,
            chunk_size = config.chunk_size,
            "Configured file tree"
        );
        Ok(Self::new(network, Arc::new(fragmenter), transactions, config))
    }

    pub fn network(&self) -> &Arc<dyn NetworkAccess> {
        &self.network
    }

    /// Create the root directory of a user
    pub async fn create_root(&self, username: &str, signer: &SigningKeyPair) -> Result<FileHandle> {
        let owner = signer.public_hash();
        let content = encode_listing(&[])?;
        let props = FileProperties::directory(username).with_size(content.len() as u64);
        let path = format!("/{}", username);

        let (uploader, transaction, handle) =
            self.prepare_new(path, owner, signer, None, props, &content)?;
        let upload = uploader.upload(self.network.as_ref(), owner, signer, &content[..]);
        self.tracked(Some(transaction), upload).await?;
        info!(user = %username, owner = %owner, "Created user root");
        Ok(handle)
    }

    async fn handle_for(&self, capability: Capability) -> Result<Option<FileHandle>> {
        let Some(metadata) = self.network.get_metadata(capability.location()).await? else {
            return Ok(None);
        };
        let name_key = capability.absolute().read_key.derive_name_key();
        let properties = metadata.properties(&name_key)?.ok_or_else(|| {
            VaultError::InvalidCapability(format!(
                "{} is not the start of a file",
                capability.location()
            ))
        })?;
        Ok(Some(FileHandle::new(capability, properties)))
    }

    /// A child is writable through `dir` if `dir`'s signer wrote it
    fn child_capability(dir: &FileHandle, child: AbsoluteCapability) -> Capability {
        match dir.signer() {
            Some(signer) if signer.public_hash() == child.location.writer => {
                Capability::Write(WritableAbsoluteCapability {
                    capability: child,
                    signer: signer.clone(),
                })
            }
            _ => Capability::Read(child),
        }
    }

    fn writable_dir<'h>(dir: &'h FileHandle) -> Result<&'h SigningKeyPair> {
        if !dir.is_directory() {
            return Err(VaultError::NotADirectory(dir.name().to_string()));
        }
        dir.signer()
            .ok_or_else(|| VaultError::NotWritableDirectory(dir.name().to_string()))
    }

    async fn read_listing(&self, dir: &FileHandle) -> Result<Vec<AbsoluteCapability>> {
        if !dir.is_directory() {
            return Err(VaultError::NotADirectory(dir.name().to_string()));
        }
        let content = self.open_reader(dir).await?.read_all().await?;
        Ok(bincode::deserialize(&content)?)
    }

    async fn write_listing(
        &self,
        dir: &FileHandle,
        listing: &[AbsoluteCapability],
    ) -> Result<FileHandle> {
        let content = encode_listing(listing)?;
        let props = dir.properties.with_size(content.len() as u64);
        self.rewrite_in_place(dir, content, props).await
    }

    /// Upload `content` as a brand new file and link it into `parent`
    async fn create_child(
        &self,
        parent: &FileHandle,
        props: FileProperties,
        content: Bytes,
    ) -> Result<FileHandle> {
        let signer = Self::writable_dir(parent)?;
        let mut listing = self.read_listing(parent).await?;
        let existing = try_join_all(
            listing
                .iter()
                .map(|cap| self.handle_for(Capability::Read(cap.clone()))),
        )
        .await?;
        if existing.iter().flatten().any(|child| child.name() == props.name) {
            return Err(VaultError::FileExists(props.name));
        }

        let path = self.child_path(parent, &props.name).await?;
        let link = ParentLink {
            location: *parent.location(),
            name_key: parent.read_key().derive_name_key(),
        };
        let owner = *parent.owner();
        let (uploader, transaction, child) =
            self.prepare_new(path, owner, signer, Some(link), props, &content)?;
        listing.push(child.read_capability());

        // The child stays pending until the parent lists it
        self.tracked(Some(transaction), async {
            uploader
                .upload(self.network.as_ref(), owner, signer, &content[..])
                .await?;
            self.write_listing(parent, &listing).await
        })
        .await?;
        Ok(child)
    }

    /// Uploader and ledger record for a new file at fresh locations with a
    /// fresh key, and the handle it will have once uploaded
    fn prepare_new(
        &self,
        path: String,
        owner: PublicKeyHash,
        signer: &SigningKeyPair,
        parent: Option<ParentLink>,
        props: FileProperties,
        content: &Bytes,
    ) -> Result<(FileUploader, FileUploadTransaction, FileHandle)> {
        let count = chunk_count(content.len() as u64, self.chunk_size) as usize + 1;
        let locations = Location::allocate(owner, signer.public_hash(), count);
        let uploader = FileUploader::new(
            props.name.clone(),
            content.len() as u64,
            self.chunk_size,
            None,
            parent,
            Some(props.clone()),
            None,
            Arc::clone(&self.fragmenter),
            locations.clone(),
        )?;

        let transaction = FileUploadTransaction::new(
            chrono::Utc::now().timestamp_millis(),
            path,
            ContentHash::compute(content),
            signer.clone(),
            locations.clone(),
        )?;

        let capability = WritableAbsoluteCapability::new(
            locations[0],
            uploader.base_key().clone(),
            signer.clone(),
        )?;
        Ok((uploader, transaction, FileHandle::new(Capability::Write(capability), props)))
    }

    /// Replace the content of an existing file, keeping its key and chain
    ///
    /// Existing chunks are overwritten with their current hashes as
    /// precondition. Growth continues the chain at the old terminal location;
    /// shrinking deletes the chunks past the new end.
    async fn rewrite_in_place(
        &self,
        file: &FileHandle,
        content: Bytes,
        props: FileProperties,
    ) -> Result<FileHandle> {
        let signer = file
            .signer()
            .ok_or_else(|| VaultError::PermissionDenied(format!("{} is read only", file.name())))?;
        let name_key = file.read_key().derive_name_key();
        let first = self
            .network
            .get_metadata(file.location())
            .await?
            .ok_or_else(|| VaultError::FileVanished(file.name().to_string()))?;
        let parent = first.parent_link(&name_key)?;

        let chain = self.open_reader(file).await?.chain().await?;
        let old_count = chain.len() - 1;
        let new_count = chunk_count(content.len() as u64, self.chunk_size) as usize;
        let (locations, stale) = if new_count >= old_count {
            let mut locations = chain;
            locations.extend(Location::allocate(
                *file.owner(),
                signer.public_hash(),
                new_count - old_count,
            ));
            (locations, Vec::new())
        } else {
            (chain[..=new_count].to_vec(), chain[new_count..old_count].to_vec())
        };

        let rewritten = old_count.min(new_count);
        let existing = try_join_all(locations.iter().enumerate().map(
            |(index, location)| async move {
                if index < rewritten {
                    self.current_hash(location).await.map(Some)
                } else {
                    Ok(None)
                }
            },
        ))
        .await?;

        let path = self.get_path(file).await?;
        let file_hash = ContentHash::compute(&content);
        let transaction = if new_count >= old_count {
            Some(FileUploadTransaction::new(
                chrono::Utc::now().timestamp_millis(),
                path.clone(),
                file_hash,
                signer.clone(),
                locations[old_count..].to_vec(),
            )?)
        } else {
            None
        };

        let uploader = FileUploader::new(
            props.name.clone(),
            content.len() as u64,
            self.chunk_size,
            Some(file.read_key().clone()),
            parent,
            Some(props.clone()),
            None,
            Arc::clone(&self.fragmenter),
            locations,
        )?
        .with_existing_hashes(existing)?;
        let upload = uploader.upload(self.network.as_ref(), *file.owner(), signer, &content[..]);
        self.tracked(transaction, upload).await?;

        if !stale.is_empty() {
            let removed = self.discard(path, signer, stale).await?;
            debug!(file = %file.name(), removed, "Trimmed chunks past end of file");
        }

        Ok(FileHandle::new(file.capability.clone(), props))
    }

    /// Run `work` with `transaction` registered in the ledger
    ///
    /// On failure the transaction is cleared at once; if that fails too the
    /// record stays pending for [`recover_pending`](crate::transaction::recover_pending).
    async fn tracked<T, F>(&self, transaction: Option<FileUploadTransaction>, work: F) -> Result<T>
    where
        F: Future<Output = Result<T>>,
    {
        let Some(transaction) = transaction else {
            return work.await;
        };

        self.transactions.register(&transaction)?;
        match work.await {
            Ok(value) => {
                self.transactions.complete(&transaction.name())?;
                Ok(value)
            }
            Err(err) => {
                match transaction.clear(self.network.as_ref()).await {
                    Ok(_) => {
                        self.transactions.complete(&transaction.name())?;
                    }
                    Err(clear_err) => {
                        warn!(
                            path = %transaction.path(),
                            error = %clear_err,
                            "Failed to roll back upload, leaving it for recovery"
                        );
                    }
                }
                Err(err)
            }
        }
    }

    async fn current_hash(&self, location: &Location) -> Result<ContentHash> {
        self.network
            .get_metadata(location)
            .await?
            .ok_or_else(|| VaultError::FileVanished(location.to_string()))?
            .hash()
    }

    async fn child_path(&self, parent: &FileHandle, name: &str) -> Result<String> {
        Ok(format!("{}/{}", self.get_path(parent).await?, name))
    }

    /// Delete whatever is stored at `locations`; returns how many held data
    async fn discard(
        &self,
        path: String,
        signer: &SigningKeyPair,
        locations: Vec<Location>,
    ) -> Result<usize> {
        let file_hash = ContentHash::compute(path.as_bytes());
        let started = chrono::Utc::now().timestamp_millis();
        FileUploadTransaction::new(started, path, file_hash, signer.clone(), locations)?
            .clear(self.network.as_ref())
            .await
    }

    /// Every location of `file`'s chain, including the terminal one
    async fn chain_of(&self, file: &FileHandle) -> Result<Vec<Location>> {
        self.open_reader(file).await?.chain().await
    }
}

fn encode_listing(listing: &[AbsoluteCapability]) -> Result<Bytes> {
    Ok(Bytes::from(bincode::serialize(listing)?))
}

impl FileTree for NetworkFileTree {
    fn get_children<'a>(&'a self, dir: &'a FileHandle) -> BoxFuture<'a, Result<Vec<FileHandle>>> {
        Box::pin(async move {
            let listing = self.read_listing(dir).await?;
            let children = try_join_all(
                listing
                    .into_iter()
                    .map(|cap| self.handle_for(Self::child_capability(dir, cap))),
            )
            .await?;
            Ok(children.into_iter().flatten().collect())
        })
    }

    fn get_child<'a>(
        &'a self,
        dir: &'a FileHandle,
        name: &'a str,
    ) -> BoxFuture<'a, Result<Option<FileHandle>>> {
        Box::pin(async move {
            Ok(self
                .get_children(dir)
                .await?
                .into_iter()
                .find(|child| child.name() == name))
        })
    }

    fn mkdir<'a>(
        &'a self,
        parent: &'a FileHandle,
        name: &'a str,
        hidden: bool,
    ) -> BoxFuture<'a, Result<FileHandle>> {
        Box::pin(async move {
            let content = encode_listing(&[])?;
            let props = FileProperties::directory(name)
                .hidden(hidden)
                .with_size(content.len() as u64);
            let dir = self.create_child(parent, props, content).await?;
            debug!(name = %name, hidden, "Created directory");
            Ok(dir)
        })
    }

    fn upload_file_section<'a>(
        &'a self,
        parent: &'a FileHandle,
        name: &'a str,
        data: Bytes,
        offset: u64,
    ) -> BoxFuture<'a, Result<FileHandle>> {
        Box::pin(async move {
            Self::writable_dir(parent)?;
            let Some(file) = self.get_child(parent, name).await? else {
                if offset != 0 {
                    return Err(VaultError::InvalidOffset { offset, size: 0 });
                }
                let props = FileProperties::file(name, DEFAULT_MIME_TYPE, data.len() as u64);
                return self.create_child(parent, props, data).await;
            };

            if file.is_directory() {
                return Err(VaultError::FileExists(name.to_string()));
            }
            if offset > file.size() {
                return Err(VaultError::InvalidOffset {
                    offset,
                    size: file.size(),
                });
            }

            let current = self.open_reader(&file).await?.read_all().await?;
            let start = offset as usize;
            let end = start + data.len();
            let mut content = Vec::with_capacity(current.len().max(end));
            content.extend_from_slice(&current[..start]);
            content.extend_from_slice(&data);
            if end < current.len() {
                content.extend_from_slice(&current[end..]);
            }

            let props = file.properties.with_size(content.len() as u64);
            self.rewrite_in_place(&file, Bytes::from(content), props).await
        })
    }

    fn upload_or_overwrite_file<'a>(
        &'a self,
        parent: &'a FileHandle,
        name: &'a str,
        data: Bytes,
    ) -> BoxFuture<'a, Result<FileHandle>> {
        Box::pin(async move {
            let signer = Self::writable_dir(parent)?;
            let props = FileProperties::file(name, DEFAULT_MIME_TYPE, data.len() as u64);
            let Some(old) = self.get_child(parent, name).await? else {
                return self.create_child(parent, props, data).await;
            };
            if old.is_directory() {
                return Err(VaultError::FileExists(name.to_string()));
            }

            let path = self.child_path(parent, name).await?;
            let link = ParentLink {
                location: *parent.location(),
                name_key: parent.read_key().derive_name_key(),
            };
            let owner = *parent.owner();
            let (uploader, transaction, replacement) =
                self.prepare_new(path.clone(), owner, signer, Some(link), props, &data)?;

            let mut listing = self.read_listing(parent).await?;
            listing.retain(|cap| cap.location != *old.location());
            listing.push(replacement.read_capability());
            self.tracked(Some(transaction), async {
                uploader
                    .upload(self.network.as_ref(), owner, signer, &data[..])
                    .await?;
                self.write_listing(parent, &listing).await
            })
            .await?;

            if let Some(old_signer) = old.signer() {
                let chain = self.chain_of(&old).await?;
                self.discard(path, old_signer, chain).await?;
            }
            Ok(replacement)
        })
    }

    fn open_reader<'a>(&'a self, file: &'a FileHandle) -> BoxFuture<'a, Result<FileReader>> {
        Box::pin(async move {
            FileReader::open(
                Arc::clone(&self.network),
                Arc::clone(&self.fragmenter),
                &file.read_capability(),
            )
            .await
        })
    }

    fn retrieve_entry_point<'a>(
        &'a self,
        entry: &'a EntryPoint,
    ) -> BoxFuture<'a, Result<Option<FileHandle>>> {
        Box::pin(async move { self.handle_for(entry.capability.clone()).await })
    }

    fn get_path<'a>(&'a self, file: &'a FileHandle) -> BoxFuture<'a, Result<String>> {
        Box::pin(async move {
            let mut names = Vec::new();
            let mut location = *file.location();
            let mut name_key = file.read_key().derive_name_key();

            loop {
                let metadata = self
                    .network
                    .get_metadata(&location)
                    .await?
                    .ok_or_else(|| VaultError::FileVanished(location.to_string()))?;
                let props = metadata.properties(&name_key)?.ok_or_else(|| {
                    VaultError::InvalidCapability(format!(
                        "{} is not the start of a file",
                        location
                    ))
                })?;
                names.push(props.name);

                match metadata.parent_link(&name_key)? {
                    Some(link) => {
                        location = link.location;
                        name_key = link.name_key;
                    }
                    None => break,
                }
            }

            names.reverse();
            Ok(format!("/{}", names.join("/")))
        })
    }

    fn delete<'a>(
        &'a self,
        parent: &'a FileHandle,
        child: &'a FileHandle,
    ) -> BoxFuture<'a, Result<()>> {
        Box::pin(async move {
            Self::writable_dir(parent)?;
            let signer = child.signer().ok_or_else(|| {
                VaultError::PermissionDenied(format!("{} is read only", child.name()))
            })?;

            let mut listing = self.read_listing(parent).await?;
            let before = listing.len();
            listing.retain(|cap| cap.location != *child.location());
            if listing.len() == before {
                return Err(VaultError::FileVanished(child.name().to_string()));
            }

            if child.is_directory() {
                for grandchild in self.get_children(child).await? {
                    self.delete(child, &grandchild).await?;
                }
            }

            let path = self.child_path(parent, child.name()).await?;
            let chain = self.chain_of(child).await?;
            self.write_listing(parent, &listing).await?;

            let removed = self.discard(path.clone(), signer, chain).await?;
            info!(path = %path, chunks = removed, "Deleted");
            Ok(())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transaction::MemoryTransactionStore;
    use vaultfs_core::erasure::ErasureConfig;
    use vaultfs_storage::MemoryNetwork;

    const CHUNK: usize = 1024;

    struct Fixture {
        network: Arc<MemoryNetwork>,
        transactions: Arc<MemoryTransactionStore>,
        tree: NetworkFileTree,
        signer: SigningKeyPair,
    }

    fn fixture() -> Fixture {
        let network = Arc::new(MemoryNetwork::new());
        let transactions = Arc::new(MemoryTransactionStore::new());
        let config = VaultConfig::default().with_chunk_size(CHUNK).unwrap();
        let tree =
            NetworkFileTree::from_config(network.clone(), transactions.clone(), &config).unwrap();
        Fixture {
            network,
            transactions,
            tree,
            signer: SigningKeyPair::generate(),
        }
    }

    fn content(size: usize, seed: u8) -> Bytes {
        Bytes::from((0..size).map(|i| (i % 251) as u8 ^ seed).collect::<Vec<_>>())
    }

    async fn read(tree: &NetworkFileTree, file: &FileHandle) -> Bytes {
        tree.open_reader(file).await.unwrap().read_all().await.unwrap()
    }

    #[tokio::test]
    async fn test_mkdir_and_children() {
        let f = fixture();
        let root = f.tree.create_root("alice", &f.signer).await.unwrap();
        assert!(root.is_directory());
        assert!(root.is_writable());
        assert!(f.tree.get_children(&root).await.unwrap().is_empty());

        let docs = f.tree.mkdir(&root, "docs", false).await.unwrap();
        let cache = f.tree.mkdir(&root, ".cache", true).await.unwrap();
        assert!(cache.properties().is_hidden);

        let mut names: Vec<_> = f
            .tree
            .get_children(&root)
            .await
            .unwrap()
            .iter()
            .map(|c| c.name().to_string())
            .collect();
        names.sort();
        assert_eq!(names, vec![".cache", "docs"]);

        // Writable through the parent's signer
        let child = f.tree.get_child(&root, "docs").await.unwrap().unwrap();
        assert!(child.is_writable());
        assert_eq!(child.location(), docs.location());

        let err = f.tree.mkdir(&root, "docs", false).await.unwrap_err();
        assert!(matches!(err, VaultError::FileExists(_)));
        assert!(f.transactions.pending().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_erasure_layout_from_config() {
        let network = Arc::new(MemoryNetwork::new());
        let config = VaultConfig::default()
            .with_chunk_size(CHUNK)
            .unwrap()
            .with_erasure(ErasureConfig::new(3, 2).unwrap());
        let tree = NetworkFileTree::from_config(
            network.clone(),
            Arc::new(MemoryTransactionStore::new()),
            &config,
        )
        .unwrap();

        let root = tree.create_root("alice", &SigningKeyPair::generate()).await.unwrap();
        let data = content(2 * CHUNK, 3);
        let file = tree
            .upload_or_overwrite_file(&root, "layout.bin", data.clone())
            .await
            .unwrap();

        let metadata = network.get_metadata(file.location()).await.unwrap().unwrap();
        assert_eq!(metadata.retriever.fragment_hashes.len(), 5);
        assert_eq!(read(&tree, &file).await, data);
    }

    #[tokio::test]
    async fn test_read_only_parent_cannot_add() {
        let f = fixture();
        let root = f.tree.create_root("alice", &f.signer).await.unwrap();
        let docs = f.tree.mkdir(&root, "docs", false).await.unwrap();

        let err = f.tree.mkdir(&root.read_only(), "more", false).await.unwrap_err();
        assert!(matches!(err, VaultError::NotWritableDirectory(_)));

        let children = f.tree.get_children(&root.read_only()).await.unwrap();
        assert!(children.iter().all(|c| !c.is_writable()));

        let file = f
            .tree
            .upload_or_overwrite_file(&docs, "a.txt", Bytes::from_static(b"a"))
            .await
            .unwrap();
        let err = f.tree.mkdir(&file, "nested", false).await.unwrap_err();
        assert!(matches!(err, VaultError::NotADirectory(_)));
    }

    #[tokio::test]
    async fn test_get_path() {
        let f = fixture();
        let root = f.tree.create_root("alice", &f.signer).await.unwrap();
        let docs = f.tree.mkdir(&root, "docs", false).await.unwrap();
        let file = f
            .tree
            .upload_or_overwrite_file(&docs, "notes.txt", content(10, 0))
            .await
            .unwrap();

        assert_eq!(f.tree.get_path(&root).await.unwrap(), "/alice");
        assert_eq!(f.tree.get_path(&file).await.unwrap(), "/alice/docs/notes.txt");

        // Read-only handles resolve too
        assert_eq!(
            f.tree.get_path(&file.read_only()).await.unwrap(),
            "/alice/docs/notes.txt"
        );

        assert!(f.network.remove_metadata(docs.location()));
        let err = f.tree.get_path(&file).await.unwrap_err();
        assert!(matches!(err, VaultError::FileVanished(_)));
    }

    #[tokio::test]
    async fn test_overwrite_replaces_file() {
        let f = fixture();
        let root = f.tree.create_root("alice", &f.signer).await.unwrap();
        let first = f
            .tree
            .upload_or_overwrite_file(&root, "data.bin", content(3 * CHUNK, 1))
            .await
            .unwrap();
        let old_chain = f.tree.chain_of(&first).await.unwrap();

        let second = f
            .tree
            .upload_or_overwrite_file(&root, "data.bin", content(CHUNK / 2, 2))
            .await
            .unwrap();
        assert_eq!(read(&f.tree, &second).await, content(CHUNK / 2, 2));
        assert_ne!(first.location(), second.location());

        let children = f.tree.get_children(&root).await.unwrap();
        assert_eq!(children.len(), 1);
        assert_eq!(children[0].size(), (CHUNK / 2) as u64);

        for location in &old_chain {
            assert!(!f.network.has_metadata(location));
        }
    }

    #[tokio::test]
    async fn test_section_write_in_place() {
        let f = fixture();
        let root = f.tree.create_root("alice", &f.signer).await.unwrap();
        let log = f
            .tree
            .upload_file_section(&root, "log", content(CHUNK + 10, 3), 0)
            .await
            .unwrap();
        let before = f.tree.chain_of(&log).await.unwrap();
        assert_eq!(before.len(), 3);

        // Append, growing into a third chunk
        let appended = f
            .tree
            .upload_file_section(&root, "log", content(CHUNK, 4), log.size())
            .await
            .unwrap();
        assert_eq!(appended.location(), log.location());
        assert_eq!(appended.size(), (2 * CHUNK + 10) as u64);

        let after = f.tree.chain_of(&appended).await.unwrap();
        assert_eq!(after.len(), 4);
        assert_eq!(&after[..3], &before[..]);

        let mut expected = content(CHUNK + 10, 3).to_vec();
        expected.extend_from_slice(&content(CHUNK, 4));
        assert_eq!(read(&f.tree, &appended).await, Bytes::from(expected.clone()));

        // Overwrite in the middle
        f.tree
            .upload_file_section(&root, "log", Bytes::from_static(b"XYZ"), 5)
            .await
            .unwrap();
        expected[5..8].copy_from_slice(b"XYZ");
        let current = f.tree.get_child(&root, "log").await.unwrap().unwrap();
        assert_eq!(read(&f.tree, &current).await, Bytes::from(expected));

        // A capability taken before the writes still sees the new content
        assert_eq!(
            read(&f.tree, &log.read_only()).await.len() as u64,
            current.size()
        );
        assert!(f.transactions.pending().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_section_offset_past_end() {
        let f = fixture();
        let root = f.tree.create_root("alice", &f.signer).await.unwrap();

        let err = f
            .tree
            .upload_file_section(&root, "new", content(4, 0), 1)
            .await
            .unwrap_err();
        assert!(matches!(err, VaultError::InvalidOffset { offset: 1, size: 0 }));

        f.tree
            .upload_file_section(&root, "new", content(4, 0), 0)
            .await
            .unwrap();
        let err = f
            .tree
            .upload_file_section(&root, "new", content(4, 0), 5)
            .await
            .unwrap_err();
        assert!(matches!(err, VaultError::InvalidOffset { offset: 5, size: 4 }));
    }

    #[tokio::test]
    async fn test_listing_shrinks() {
        let f = fixture();
        let root = f.tree.create_root("alice", &f.signer).await.unwrap();

        // Enough children for the listing to span several chunks
        let mut children = Vec::new();
        for i in 0..12 {
            children.push(f.tree.mkdir(&root, &format!("d{}", i), false).await.unwrap());
        }
        let root = f.tree.refresh(&root).await;
        let grown = f.tree.chain_of(&root).await.unwrap();
        assert!(grown.len() > 2);

        for child in &children {
            f.tree.delete(&root, child).await.unwrap();
        }
        let root = f.tree.refresh(&root).await;
        let shrunk = f.tree.chain_of(&root).await.unwrap();
        assert_eq!(shrunk.len(), 2);
        for location in &grown[1..grown.len() - 1] {
            assert!(!f.network.has_metadata(location));
        }
        assert!(f.tree.get_children(&root).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_delete_directory_recursively() {
        let f = fixture();
        let root = f.tree.create_root("alice", &f.signer).await.unwrap();
        let docs = f.tree.mkdir(&root, "docs", false).await.unwrap();
        let file = f
            .tree
            .upload_or_overwrite_file(&docs, "big.bin", content(3 * CHUNK, 5))
            .await
            .unwrap();
        let file_chain = f.tree.chain_of(&file).await.unwrap();
        let before = f.network.stats().await.unwrap().metadata_count;

        f.tree.delete(&root, &docs).await.unwrap();

        assert!(f.tree.get_children(&root).await.unwrap().is_empty());
        assert!(!f.network.has_metadata(docs.location()));
        for location in &file_chain {
            assert!(!f.network.has_metadata(location));
        }
        assert!(f.network.stats().await.unwrap().metadata_count < before);

        let err = f.tree.delete(&root, &docs).await.unwrap_err();
        assert!(matches!(err, VaultError::FileVanished(_)));
    }

    #[tokio::test]
    async fn test_entry_point() {
        let f = fixture();
        let root = f.tree.create_root("alice", &f.signer).await.unwrap();
        let file = f
            .tree
            .upload_or_overwrite_file(&root, "shared.txt", content(20, 6))
            .await
            .unwrap();

        let entry = EntryPoint::new(Capability::Read(file.read_capability()), "alice");
        let handle = f.tree.retrieve_entry_point(&entry).await.unwrap().unwrap();
        assert_eq!(handle.name(), "shared.txt");
        assert!(!handle.is_writable());

        f.tree.delete(&root, &file).await.unwrap();
        assert!(f.tree.retrieve_entry_point(&entry).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_failed_upload_is_rolled_back() {
        let f = fixture();
        let root = f.tree.create_root("alice", &f.signer).await.unwrap();
        let before = f.network.stats().await.unwrap().metadata_count;

        f.network.fail_writes_after(2);
        let result = f
            .tree
            .upload_or_overwrite_file(&root, "doomed.bin", content(5 * CHUNK, 7))
            .await;
        assert!(result.is_err());
        f.network.clear_write_limit();

        assert_eq!(f.network.stats().await.unwrap().metadata_count, before);
        assert!(f.transactions.pending().unwrap().is_empty());
        assert!(f.tree.get_children(&root).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_unlisted_child_is_rolled_back() {
        let f = fixture();
        let root = f.tree.create_root("alice", &f.signer).await.unwrap();
        let before = f.network.stats().await.unwrap().metadata_count;

        // All three chunks of the child land, the parent listing write does not
        f.network.fail_writes_after(3);
        let result = f
            .tree
            .upload_or_overwrite_file(&root, "orphan.bin", content(3 * CHUNK, 9))
            .await;
        assert!(result.is_err());
        f.network.clear_write_limit();

        assert_eq!(f.network.stats().await.unwrap().metadata_count, before);
        assert!(f.transactions.pending().unwrap().is_empty());
        assert!(f.tree.get_children(&root).await.unwrap().is_empty());
    }

    impl NetworkFileTree {
        /// Re-resolve a handle so its properties reflect the latest write
        async fn refresh(&self, root: &FileHandle) -> FileHandle {
            self.handle_for(root.capability().clone()).await.unwrap().unwrap()
        }
    }
}
