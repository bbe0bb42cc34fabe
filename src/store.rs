//! The metadata store contract.
//!
//! [`MetadataStore`] is the operation set every backing implementation
//! exposes: [`RemoteStore`](crate::client::RemoteStore) speaks to a metadata
//! service over HTTP, [`LocalStore`](crate::mock::LocalStore) is the
//! in-process stand-in. The process entry point builds one handle with
//! [`open_store`] and passes it to whatever needs it.
//!
//! Reads return `Option` or an empty `Vec` for logical absence. A mutation
//! that addresses an entity the store does not hold fails with
//! [`StoreError::TargetMissing`]; removes are the exception and succeed when
//! the target is already gone.
//!
//! A failed mutation may or may not have been applied (see
//! [`StoreError::outcome_unknown`]). Callers re-read before retrying.

#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]

use crate::client::RemoteStore;
use crate::config::{BackendKind, StoreConfig};
use crate::convert;
use crate::error::Result;
use crate::mock::LocalStore;
use crate::model::{
    Block, ChangedFields, DirectoryEntry, EntryAttrs, FileEntry, Lease, NamespaceEntry, Snapshot,
};
use crate::oracle::TimestampOracle;
use crate::types::{BlockId, EntryId, FileHeader, GenerationStamp, PermissionWord};
use async_trait::async_trait;
use std::sync::Arc;
use tracing::info;

/// Inputs of [`MetadataStore::create_file`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CreateFile {
    pub parent_id: EntryId,
    pub id: EntryId,
    pub name: String,
    pub permission: PermissionWord,
    pub modification_time: u64,
    pub access_time: u64,
    pub header: FileHeader,
    /// Set when the file is created open for writing.
    pub lease: Option<Lease>,
}

impl CreateFile {
    pub fn into_entry(self) -> FileEntry {
        FileEntry {
            attrs: EntryAttrs {
                id: self.id,
                parent_id: self.parent_id,
                name: self.name.into_bytes(),
                permission: self.permission,
                modification_time: self.modification_time,
                access_time: self.access_time,
                header: self.header,
            },
            blocks: Vec::new(),
            lease: self.lease,
        }
    }
}

/// Inputs of [`MetadataStore::mkdir`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MakeDirectory {
    pub parent_id: EntryId,
    pub id: EntryId,
    pub name: String,
    pub permission: PermissionWord,
    pub modification_time: u64,
    pub access_time: u64,
}

impl MakeDirectory {
    pub fn into_entry(self) -> DirectoryEntry {
        DirectoryEntry {
            attrs: EntryAttrs {
                id: self.id,
                parent_id: self.parent_id,
                name: self.name.into_bytes(),
                permission: self.permission,
                modification_time: self.modification_time,
                access_time: self.access_time,
                header: FileHeader::EMPTY,
            },
            children: None,
        }
    }
}

/// Storage contract for namespace entries and block metadata.
///
/// Every store is also the oracle for the ids it is asked to persist.
#[async_trait]
pub trait MetadataStore: TimestampOracle {
    /// Upsert a file record by id. No sibling-name uniqueness check.
    async fn create_file(&self, request: CreateFile) -> Result<FileEntry>;

    /// Upsert a directory record by id.
    async fn mkdir(&self, request: MakeDirectory) -> Result<DirectoryEntry>;

    /// Look up one named child of a directory.
    async fn get_child(&self, directory: EntryId, name: &str) -> Result<Option<NamespaceEntry>>;

    /// List the children of a directory.
    async fn get_children(&self, directory: EntryId) -> Result<Vec<NamespaceEntry>>;

    async fn get_file(&self, id: EntryId) -> Result<Option<FileEntry>>;

    async fn get_directory(&self, id: EntryId) -> Result<Option<DirectoryEntry>>;

    /// Block at position `index` of a file.
    async fn get_block(&self, file: EntryId, index: u64) -> Result<Option<Block>>;

    /// Append a block at the next free position of a file.
    async fn add_block(
        &self,
        file: EntryId,
        block: BlockId,
        generation_stamp: GenerationStamp,
    ) -> Result<Block>;

    /// Upsert a block of a file by block id.
    async fn update_block(&self, file: EntryId, block: Block) -> Result<Block>;

    /// Upsert several blocks, one call per block.
    ///
    /// On failure the blocks before the failing one may have been stored.
    async fn update_blocks(&self, file: EntryId, blocks: Vec<Block>) -> Result<Vec<Block>> {
        let mut updated = Vec::with_capacity(blocks.len());
        for block in blocks {
            updated.push(self.update_block(file, block).await?);
        }
        Ok(updated)
    }

    /// Drop every block at position `count` or later.
    async fn truncate_blocks(&self, file: EntryId, count: u64) -> Result<()>;

    /// Move `entry` from `old_parent` to the parent recorded in the entry.
    async fn rename(&self, old_parent: EntryId, entry: &NamespaceEntry) -> Result<()>;

    /// Unlink one named child. Does not touch the child's own record.
    async fn remove_child(&self, directory: EntryId, name: &str) -> Result<()>;

    async fn remove_file(&self, id: EntryId) -> Result<()>;

    async fn remove_directory(&self, id: EntryId) -> Result<()>;

    /// Persist the parts of an entry flagged in the snapshot.
    ///
    /// The snapshot is consumed so it cannot be sent twice.
    async fn update_meta(&self, snapshot: Snapshot) -> Result<()>;

    /// Record a replica placement for a block.
    async fn add_replica(&self, block: BlockId, data_node_id: &str, storage_id: &str)
        -> Result<()>;
}

/// Last persisted state of one entry.
///
/// [`SyncState::sync`] sends only what changed since then and moves the
/// baseline forward when the store accepts the write.
#[derive(Debug, Clone)]
pub struct SyncState {
    persisted: NamespaceEntry,
}

impl SyncState {
    pub fn new(persisted: NamespaceEntry) -> Self {
        Self { persisted }
    }

    pub fn persisted(&self) -> &NamespaceEntry {
        &self.persisted
    }

    /// Persist the difference between the baseline and `current`.
    ///
    /// Returns the fields that were sent. Nothing is sent when nothing
    /// changed. On error the baseline is kept so the next call resends.
    pub async fn sync(
        &mut self,
        store: &dyn MetadataStore,
        current: &NamespaceEntry,
    ) -> Result<ChangedFields> {
        let changed = convert::diff(&self.persisted, current);
        if changed.is_empty() {
            return Ok(changed);
        }
        store
            .update_meta(Snapshot::new(current.clone(), changed))
            .await?;
        self.persisted = current.clone();
        Ok(changed)
    }
}

/// Build the store handle selected by the configuration.
pub fn open_store(config: &StoreConfig) -> Result<Arc<dyn MetadataStore>> {
    config.validate()?;
    match config.backend {
        BackendKind::Remote => {
            info!(endpoint = %config.remote.endpoint, "Opening remote metadata store");
            Ok(Arc::new(RemoteStore::from_config(&config.remote)?))
        }
        BackendKind::Local => {
            info!("Opening local metadata store; nothing will be persisted");
            Ok(Arc::new(LocalStore::new()))
        }
    }
}
