//! Capability sharing log and resolution cache
//!
//! Each one-way sharing relationship has a directory owned by the sharer,
//! e.g. `/alice/sharing/bob/`. In it, two append-only logs of fixed-size
//! capability records (one for read grants, one for edit grants) are kept as
//! numbered segment files of at most `caps_per_file` records each:
//!
//! ```text
//! sharing.r.0  sharing.r.1  ...   read-only capabilities, 162 bytes each
//! sharing.w.0  sharing.w.1  ...   writable capabilities, 201 bytes each
//! ```
//!
//! Record `k` of a log lives in segment `k / caps_per_file` at byte offset
//! `(k % caps_per_file) * record_size`.
//!
//! The recipient resolves each record to the current path of its target and
//! keeps the result, together with how many records were consumed, in
//! `/<recipient>/.capabilitycache/<sharer>.r.` (or `.w.`), so later logins
//! only read what was appended since.
//!
//! Appending is list, pick tail, check room, extend. Two sessions of the same
//! sharer appending to one log at the same time can both extend the same tail
//! at the same offset; the second write is rejected by the metadata hash
//! precondition or, if the writes interleave differently, one record is lost.
//! Appends are not serialized here.

use bytes::Bytes;
use futures::future::try_join_all;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, info};
use vaultfs_core::capability::{Capability, RecordFormat, WritableAbsoluteCapability};
use vaultfs_core::config::SharingConfig;
use vaultfs_core::error::{Result, VaultError};

use crate::tree::{EntryPoint, FileHandle, FileTree};

/// Hidden directory in the recipient's home holding resolution caches
pub const CAPABILITY_CACHE_DIR: &str = ".capabilitycache";

/// A resolved capability and the path its target had when resolved
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CapabilityWithPath {
    pub path: String,
    pub capability: Capability,
}

/// Everything one user has shared with another, up to a cursor
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CapabilitiesFromUser {
    /// Raw log records consumed, resolved or not
    pub records_read: u64,
    pub capabilities: Vec<CapabilityWithPath>,
}

impl CapabilitiesFromUser {
    pub fn new(records_read: u64, capabilities: Vec<CapabilityWithPath>) -> Self {
        Self {
            records_read,
            capabilities,
        }
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        Ok(bincode::serialize(self)?)
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        Ok(bincode::deserialize(bytes)?)
    }
}

/// Reads and writes sharing logs through a [`FileTree`]
pub struct CapabilityStore {
    tree: Arc<dyn FileTree>,
    config: SharingConfig,
}

impl CapabilityStore {
    pub fn new(tree: Arc<dyn FileTree>, config: SharingConfig) -> Self {
        Self { tree, config }
    }

    pub fn config(&self) -> &SharingConfig {
        &self.config
    }

    // ===== Write path =====

    /// Grant read access to `capability`'s target
    pub async fn add_read_only_sharing_link(
        &self,
        shared_dir: &FileHandle,
        capability: &Capability,
    ) -> Result<FileHandle> {
        let read_only = Capability::Read(capability.read_only());
        self.append(shared_dir, &read_only, RecordFormat::READ).await
    }

    /// Grant edit access to `capability`'s target
    pub async fn add_edit_sharing_link(
        &self,
        shared_dir: &FileHandle,
        capability: &WritableAbsoluteCapability,
    ) -> Result<FileHandle> {
        let writable = Capability::Write(capability.clone());
        self.append(shared_dir, &writable, RecordFormat::WRITE).await
    }

    /// Append one record to the log of `format` in `shared_dir`
    ///
    /// Returns the segment file the record was written to.
    pub async fn append(
        &self,
        shared_dir: &FileHandle,
        capability: &Capability,
        format: RecordFormat,
    ) -> Result<FileHandle> {
        if !shared_dir.is_directory() || !shared_dir.is_writable() {
            return Err(VaultError::NotWritableDirectory(shared_dir.name().to_string()));
        }

        let record = Bytes::from(format.encode(capability)?);
        let segments = self.segments(shared_dir, format).await?;
        let max_size = format.file_max_size(self.config.caps_per_file);

        match segments.last() {
            Some((_, tail)) if tail.size() + format.record_size as u64 <= max_size => {
                debug!(segment = %tail.name(), offset = tail.size(), "Appending capability record");
                self.tree
                    .upload_file_section(shared_dir, tail.name(), record, tail.size())
                    .await
            }
            last => {
                let index = last.map_or(0, |(index, _)| index + 1);
                let name = format.file_name(index);
                info!(segment = %name, "Starting new sharing segment");
                self.tree.upload_file_section(shared_dir, &name, record, 0).await
            }
        }
    }

    // ===== Read path =====

    /// Read-only capabilities `sharer_name` has shared through `shared_dir`
    pub async fn load_read_access_sharing_links(
        &self,
        home: &FileHandle,
        shared_dir: &FileHandle,
        sharer_name: &str,
        save_cache: bool,
    ) -> Result<CapabilitiesFromUser> {
        self.load_sharing_links(home, shared_dir, sharer_name, RecordFormat::READ, save_cache)
            .await
    }

    /// Writable capabilities `sharer_name` has shared through `shared_dir`
    pub async fn load_write_access_sharing_links(
        &self,
        home: &FileHandle,
        shared_dir: &FileHandle,
        sharer_name: &str,
        save_cache: bool,
    ) -> Result<CapabilitiesFromUser> {
        self.load_sharing_links(home, shared_dir, sharer_name, RecordFormat::WRITE, save_cache)
            .await
    }

    /// All capabilities in the log, resolved
    ///
    /// Without a cache every record is read. With one, only records past its
    /// cursor are read and appended to the cached list; if the log has not
    /// grown the cache is returned as is.
    pub async fn load_sharing_links(
        &self,
        home: &FileHandle,
        shared_dir: &FileHandle,
        sharer_name: &str,
        format: RecordFormat,
        save_cache: bool,
    ) -> Result<CapabilitiesFromUser> {
        let segments = self.segments(shared_dir, format).await?;
        let total = total_records(&segments, format);

        let result = match self.read_cache(home, sharer_name, format).await? {
            None => {
                let capabilities = self.scan(&segments, 0, sharer_name, format).await?;
                debug!(
                    sharer = %sharer_name,
                    total,
                    resolved = capabilities.len(),
                    "Full sharing log scan"
                );
                let result = CapabilitiesFromUser::new(total, capabilities);
                if save_cache && !result.capabilities.is_empty() {
                    self.save_cache(home, sharer_name, format, &result).await?;
                }
                result
            }
            Some(cache) if cache.records_read == total => {
                debug!(sharer = %sharer_name, total, "Capability cache is current");
                cache
            }
            Some(cache) => {
                let mut capabilities = cache.capabilities;
                let new = self
                    .scan(&segments, cache.records_read, sharer_name, format)
                    .await?;
                debug!(
                    sharer = %sharer_name,
                    from = cache.records_read,
                    total,
                    resolved = new.len(),
                    "Resumed sharing log scan"
                );
                capabilities.extend(new);
                let result = CapabilitiesFromUser::new(total, capabilities);
                if save_cache {
                    self.save_cache(home, sharer_name, format, &result).await?;
                }
                result
            }
        };
        Ok(result)
    }

    /// Capabilities from record `index` onwards, ignoring any cache
    ///
    /// For callers that track their own cursor. The returned cursor is the
    /// absolute record count of the log. With `save_cache` set, the result is
    /// appended to the cache only when `index` is where the cache stopped;
    /// any other index would leave records the cursor claims were consumed.
    pub async fn load_sharing_links_from_index(
        &self,
        home: &FileHandle,
        shared_dir: &FileHandle,
        sharer_name: &str,
        format: RecordFormat,
        index: u64,
        save_cache: bool,
    ) -> Result<CapabilitiesFromUser> {
        let segments = self.segments(shared_dir, format).await?;
        let total = total_records(&segments, format);
        let capabilities = self.scan(&segments, index, sharer_name, format).await?;

        let result = CapabilitiesFromUser::new(total, capabilities);
        if save_cache && total > index {
            let cached = self
                .read_cache(home, sharer_name, format)
                .await?
                .unwrap_or_default();
            if cached.records_read == index {
                let mut merged = cached.capabilities;
                merged.extend(result.capabilities.iter().cloned());
                let updated = CapabilitiesFromUser::new(total, merged);
                self.save_cache(home, sharer_name, format, &updated).await?;
            } else {
                debug!(
                    sharer = %sharer_name,
                    index,
                    cursor = cached.records_read,
                    "Cache cursor does not match index, cache left as is"
                );
            }
        }
        Ok(result)
    }

    /// Number of records in a log, without reading any of them
    pub async fn capability_count(
        &self,
        shared_dir: &FileHandle,
        format: RecordFormat,
    ) -> Result<u64> {
        let segments = self.segments(shared_dir, format).await?;
        Ok(total_records(&segments, format))
    }

    pub async fn read_only_capability_count(&self, shared_dir: &FileHandle) -> Result<u64> {
        self.capability_count(shared_dir, RecordFormat::READ).await
    }

    pub async fn editable_capability_count(&self, shared_dir: &FileHandle) -> Result<u64> {
        self.capability_count(shared_dir, RecordFormat::WRITE).await
    }

    /// Segment files of one log, by index
    ///
    /// Children with the log's prefix but no numeric suffix are not segments
    /// and are skipped.
    async fn segments(
        &self,
        shared_dir: &FileHandle,
        format: RecordFormat,
    ) -> Result<Vec<(u64, FileHandle)>> {
        let mut segments: Vec<_> = self
            .tree
            .get_children(shared_dir)
            .await?
            .into_iter()
            .filter_map(|child| format.file_index(child.name()).map(|index| (index, child)))
            .collect();
        segments.sort_by_key(|(index, _)| *index);
        Ok(segments)
    }

    /// Resolve every record from `start` to the end of the log
    async fn scan(
        &self,
        segments: &[(u64, FileHandle)],
        start: u64,
        sharer_name: &str,
        format: RecordFormat,
    ) -> Result<Vec<CapabilityWithPath>> {
        let caps_per_file = self.config.caps_per_file;
        let first = (start / caps_per_file) as usize;
        let offset = start % caps_per_file;

        let mut resolved = Vec::new();
        for (position, (_, segment)) in segments.iter().enumerate().skip(first) {
            let from = if position == first { offset } else { 0 };
            resolved.extend(self.read_sharing_file(segment, from, sharer_name, format).await?);
        }
        Ok(resolved)
    }

    /// Resolve the records of one segment from record `from` onwards, in order
    async fn read_sharing_file(
        &self,
        segment: &FileHandle,
        from: u64,
        sharer_name: &str,
        format: RecordFormat,
    ) -> Result<Vec<CapabilityWithPath>> {
        let record_size = format.record_size as u64;
        let count = segment.size() / record_size;
        if from >= count {
            return Ok(Vec::new());
        }

        let reader = self.tree.open_reader(segment).await?;
        let bytes = reader
            .read_range(from * record_size, (count - from) * record_size)
            .await?;

        let resolved = try_join_all(
            bytes
                .chunks_exact(format.record_size)
                .map(|record| self.resolve(record, sharer_name, format)),
        )
        .await?;
        Ok(resolved.into_iter().flatten().collect())
    }

    /// Resolve one record to its target's current path
    ///
    /// A target that cannot be found is a soft miss. A target found whose
    /// path then cannot be computed fails with `FileVanished`.
    async fn resolve(
        &self,
        record: &[u8],
        sharer_name: &str,
        format: RecordFormat,
    ) -> Result<Option<CapabilityWithPath>> {
        let capability = format.decode(record)?;
        let entry = EntryPoint::new(capability, sharer_name);

        let Some(file) = self.tree.retrieve_entry_point(&entry).await? else {
            debug!(location = %entry.capability.location(), "Shared file not found");
            return Ok(None);
        };
        let path = self.tree.get_path(&file).await?;
        Ok(Some(CapabilityWithPath {
            path,
            capability: entry.capability,
        }))
    }

    async fn read_cache(
        &self,
        home: &FileHandle,
        sharer_name: &str,
        format: RecordFormat,
    ) -> Result<Option<CapabilitiesFromUser>> {
        let Some(cache_dir) = self.tree.get_child(home, CAPABILITY_CACHE_DIR).await? else {
            return Ok(None);
        };
        let Some(file) = self
            .tree
            .get_child(&cache_dir, &format.cache_file_name(sharer_name))
            .await?
        else {
            return Ok(None);
        };

        let bytes = self.tree.open_reader(&file).await?.read_all().await?;
        CapabilitiesFromUser::from_bytes(&bytes).map(Some)
    }

    async fn save_cache(
        &self,
        home: &FileHandle,
        sharer_name: &str,
        format: RecordFormat,
        capabilities: &CapabilitiesFromUser,
    ) -> Result<()> {
        let cache_dir = match self.tree.get_child(home, CAPABILITY_CACHE_DIR).await? {
            Some(dir) => dir,
            None => self.tree.mkdir(home, CAPABILITY_CACHE_DIR, true).await?,
        };

        let name = format.cache_file_name(sharer_name);
        self.tree
            .upload_or_overwrite_file(&cache_dir, &name, Bytes::from(capabilities.to_bytes()?))
            .await?;
        debug!(cache = %name, records_read = capabilities.records_read, "Saved capability cache");
        Ok(())
    }
}

fn total_records(segments: &[(u64, FileHandle)], format: RecordFormat) -> u64 {
    segments.iter().map(|(_, segment)| segment.size()).sum::<u64>() / format.record_size as u64
}
