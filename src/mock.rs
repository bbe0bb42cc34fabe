//! In-process, non-durable store.
//!
//! Reads find nothing and mutations are accepted and dropped. Ids come from a
//! process-local counter, so they are unique only within this process. Good
//! for standalone runs and as a deterministic seam in tests; never a backend
//! for real data.

use crate::error::Result;
use crate::model::{Block, DirectoryEntry, FileEntry, NamespaceEntry, Snapshot};
use crate::oracle::{LocalOracle, TimestampOracle};
use crate::store::{CreateFile, MakeDirectory, MetadataStore};
use crate::types::{BlockId, EntryId, GenerationStamp};
use async_trait::async_trait;
use tracing::trace;

/// Store that persists nothing.
#[derive(Debug, Default)]
pub struct LocalStore {
    oracle: LocalOracle,
}

impl LocalStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store whose counter starts at `start`.
    pub fn with_start(start: u64) -> Self {
        Self {
            oracle: LocalOracle::new(start),
        }
    }
}

#[async_trait]
impl TimestampOracle for LocalStore {
    async fn next_batch(&self, n: usize) -> Result<Vec<u64>> {
        self.oracle.next_batch(n).await
    }
}

#[async_trait]
impl MetadataStore for LocalStore {
    async fn create_file(&self, request: CreateFile) -> Result<FileEntry> {
        trace!(id = request.id, "Dropping file create");
        Ok(request.into_entry())
    }

    async fn mkdir(&self, request: MakeDirectory) -> Result<DirectoryEntry> {
        trace!(id = request.id, "Dropping mkdir");
        Ok(request.into_entry())
    }

    async fn get_child(&self, _directory: EntryId, _name: &str) -> Result<Option<NamespaceEntry>> {
        Ok(None)
    }

    async fn get_children(&self, _directory: EntryId) -> Result<Vec<NamespaceEntry>> {
        Ok(Vec::new())
    }

    async fn get_file(&self, _id: EntryId) -> Result<Option<FileEntry>> {
        Ok(None)
    }

    async fn get_directory(&self, _id: EntryId) -> Result<Option<DirectoryEntry>> {
        Ok(None)
    }

    async fn get_block(&self, _file: EntryId, _index: u64) -> Result<Option<Block>> {
        Ok(None)
    }

    async fn add_block(
        &self,
        file: EntryId,
        block: BlockId,
        generation_stamp: GenerationStamp,
    ) -> Result<Block> {
        Ok(Block::new(block, generation_stamp, file))
    }

    async fn update_block(&self, _file: EntryId, block: Block) -> Result<Block> {
        Ok(block)
    }

    async fn truncate_blocks(&self, _file: EntryId, _count: u64) -> Result<()> {
        Ok(())
    }

    async fn rename(&self, _old_parent: EntryId, _entry: &NamespaceEntry) -> Result<()> {
        Ok(())
    }

    async fn remove_child(&self, _directory: EntryId, _name: &str) -> Result<()> {
        Ok(())
    }

    async fn remove_file(&self, _id: EntryId) -> Result<()> {
        Ok(())
    }

    async fn remove_directory(&self, _id: EntryId) -> Result<()> {
        Ok(())
    }

    async fn update_meta(&self, snapshot: Snapshot) -> Result<()> {
        trace!(id = snapshot.entry.id(), changed = ?snapshot.changed, "Dropping meta update");
        Ok(())
    }

    async fn add_replica(
        &self,
        _block: BlockId,
        _data_node_id: &str,
        _storage_id: &str,
    ) -> Result<()> {
        Ok(())
    }
}
