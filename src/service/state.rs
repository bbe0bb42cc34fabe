//! In-memory state table of the reference service.

use crate::model::{Block, ChangedFields, EntryRecord, FileEntry, NamespaceEntry, Replica};
use crate::types::{BlockId, EntryId, EntryTag, GenerationStamp};
use std::collections::{BTreeMap, HashMap};
use thiserror::Error;
use tracing::trace;

/// Failure of a state table operation.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum StateError {
    #[error("{0} not found")]
    NotFound(String),

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("bad request: {0}")]
    BadRequest(String),
}

pub type StateResult<T> = std::result::Result<T, StateError>;

/// Namespace entries, the child-name index and block metadata.
///
/// Entries are stored without their block lists; a file's blocks live in
/// `file_blocks` as ordered ids pointing into `blocks`.
#[derive(Debug, Default)]
pub struct MemoryState {
    entries: HashMap<EntryId, NamespaceEntry>,
    children: HashMap<EntryId, BTreeMap<Vec<u8>, EntryId>>,
    file_blocks: HashMap<EntryId, Vec<BlockId>>,
    blocks: HashMap<BlockId, Block>,
}

fn decode_record(record: EntryRecord) -> StateResult<NamespaceEntry> {
    NamespaceEntry::try_from(record).map_err(|e| StateError::BadRequest(e.to_string()))
}

impl MemoryState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn link(&mut self, parent: EntryId, name: Vec<u8>, id: EntryId) {
        self.children.entry(parent).or_default().insert(name, id);
    }

    /// Drop the index entry of `id` under `parent` if it still points at `id`.
    fn unlink(&mut self, parent: EntryId, name: &[u8], id: EntryId) {
        if let Some(index) = self.children.get_mut(&parent) {
            if index.get(name) == Some(&id) {
                index.remove(name);
            }
            if index.is_empty() {
                self.children.remove(&parent);
            }
        }
    }

    fn relink(&mut self, previous: Option<(EntryId, Vec<u8>)>, entry: &NamespaceEntry) {
        if let Some((parent, name)) = previous {
            self.unlink(parent, &name, entry.id());
        }
        self.link(entry.parent_id(), entry.name_bytes().to_vec(), entry.id());
    }

    fn drop_blocks(&mut self, file: EntryId) {
        for id in self.file_blocks.remove(&file).unwrap_or_default() {
            self.blocks.remove(&id);
        }
    }

    /// Upsert an entry by id and link it under its parent.
    ///
    /// A file's block list is replaced by the blocks the record carries.
    pub fn upsert(&mut self, path_id: EntryId, tag: EntryTag, record: EntryRecord) -> StateResult<()> {
        if record.id != path_id {
            return Err(StateError::BadRequest(format!(
                "record id {} does not match path id {}",
                record.id, path_id
            )));
        }
        let mut entry = decode_record(record)?;
        if entry.tag() != tag {
            return Err(StateError::BadRequest(format!(
                "entry {} is a {}, not a {}",
                path_id,
                entry.tag(),
                tag
            )));
        }

        if let NamespaceEntry::File(file) = &entry {
            self.check_blocks(path_id, &file.blocks)?;
        }

        let previous = self.entries.get(&path_id).map(|old| {
            (old.parent_id(), old.name_bytes().to_vec())
        });
        if self.entries.get(&path_id).is_some_and(|old| old.tag() == EntryTag::File) {
            self.drop_blocks(path_id);
        }
        if let NamespaceEntry::File(file) = &mut entry {
            let blocks = std::mem::take(&mut file.blocks);
            self.store_blocks(path_id, blocks);
        }
        self.relink(previous, &entry);
        trace!(id = path_id, %tag, "Upserted entry");
        self.entries.insert(path_id, entry);
        Ok(())
    }

    /// Reject a block list that would re-own another file's block or move a
    /// generation stamp backwards. Nothing is changed either way.
    fn check_blocks(&self, file: EntryId, blocks: &[Block]) -> StateResult<()> {
        for block in blocks {
            let Some(stored) = self.blocks.get(&block.id) else {
                continue;
            };
            if stored.owner_entry_id != file {
                return Err(StateError::Conflict(format!(
                    "block {} belongs to entry {}",
                    block.id, stored.owner_entry_id
                )));
            }
            if block.generation_stamp < stored.generation_stamp {
                return Err(StateError::Conflict(format!(
                    "block {} generation stamp {} is older than {}",
                    block.id, block.generation_stamp, stored.generation_stamp
                )));
            }
        }
        Ok(())
    }

    /// Replace the block list of a file. Callers run [`Self::check_blocks`] first.
    fn store_blocks(&mut self, file: EntryId, blocks: Vec<Block>) {
        let mut ids = Vec::with_capacity(blocks.len());
        for mut block in blocks {
            block.owner_entry_id = file;
            ids.push(block.id);
            self.blocks.insert(block.id, block);
        }
        self.file_blocks.insert(file, ids);
    }

    fn with_blocks(&self, mut entry: NamespaceEntry) -> NamespaceEntry {
        if let NamespaceEntry::File(file) = &mut entry {
            file.blocks = self
                .file_blocks
                .get(&file.attrs.id)
                .map(|ids| ids.iter().filter_map(|id| self.blocks.get(id).cloned()).collect())
                .unwrap_or_default();
        }
        entry
    }

    pub fn get(&self, id: EntryId) -> Option<NamespaceEntry> {
        self.entries.get(&id).cloned().map(|e| self.with_blocks(e))
    }

    pub fn get_tagged(&self, id: EntryId, tag: EntryTag) -> Option<NamespaceEntry> {
        self.get(id).filter(|e| e.tag() == tag)
    }

    pub fn child(&self, directory: EntryId, name: &[u8]) -> Option<NamespaceEntry> {
        let id = self.children.get(&directory)?.get(name)?;
        self.get(*id)
    }

    /// Children of a directory in name order.
    pub fn children(&self, directory: EntryId) -> Vec<NamespaceEntry> {
        self.children
            .get(&directory)
            .map(|index| index.values().filter_map(|id| self.get(*id)).collect())
            .unwrap_or_default()
    }

    fn file_mut(&mut self, file: EntryId) -> StateResult<&mut FileEntry> {
        match self.entries.get_mut(&file) {
            Some(NamespaceEntry::File(f)) => Ok(f),
            _ => Err(StateError::NotFound(format!("file {}", file))),
        }
    }

    pub fn block_at(&self, file: EntryId, index: u64) -> Option<Block> {
        let ids = self.file_blocks.get(&file)?;
        let id = ids.get(usize::try_from(index).ok()?)?;
        self.blocks.get(id).cloned()
    }

    /// Append a new block at the next position of a file.
    pub fn add_block(
        &mut self,
        file: EntryId,
        id: BlockId,
        generation_stamp: GenerationStamp,
    ) -> StateResult<Block> {
        let replication = self.file_mut(file)?.attrs.header.replication();
        if self.blocks.contains_key(&id) {
            return Err(StateError::Conflict(format!("block {} already exists", id)));
        }
        let mut block = Block::new(id, generation_stamp, file);
        block.replication = replication;
        self.file_blocks.entry(file).or_default().push(id);
        self.blocks.insert(id, block.clone());
        Ok(block)
    }

    /// Upsert a block of a file by block id.
    pub fn update_block(&mut self, file: EntryId, path_id: BlockId, mut block: Block) -> StateResult<Block> {
        self.file_mut(file)?;
        if block.id != path_id {
            return Err(StateError::BadRequest(format!(
                "block id {} does not match path id {}",
                block.id, path_id
            )));
        }
        self.check_blocks(file, std::slice::from_ref(&block))?;
        if !self.blocks.contains_key(&block.id) {
            self.file_blocks.entry(file).or_default().push(block.id);
        }
        block.owner_entry_id = file;
        self.blocks.insert(block.id, block.clone());
        Ok(block)
    }

    /// Drop every block of a file at position `count` or later.
    pub fn truncate(&mut self, file: EntryId, count: u64) -> StateResult<()> {
        self.file_mut(file)?;
        let keep = usize::try_from(count).unwrap_or(usize::MAX);
        if let Some(ids) = self.file_blocks.get_mut(&file) {
            if keep < ids.len() {
                for id in ids.split_off(keep) {
                    self.blocks.remove(&id);
                }
            }
        }
        Ok(())
    }

    /// Move an entry from `old_parent` to `new_parent`.
    ///
    /// The name comes from `record` when one with a non-empty name is given,
    /// otherwise the stored name is kept.
    pub fn rename(
        &mut self,
        id: EntryId,
        old_parent: EntryId,
        new_parent: EntryId,
        record: Option<EntryRecord>,
    ) -> StateResult<()> {
        let entry = self
            .entries
            .get_mut(&id)
            .ok_or_else(|| StateError::NotFound(format!("entry {}", id)))?;
        let old_name = entry.name_bytes().to_vec();
        if let Some(record) = record {
            if record.id != id {
                return Err(StateError::BadRequest(format!(
                    "record id {} does not match path id {}",
                    record.id, id
                )));
            }
            if !record.name.is_empty() {
                entry.attrs_mut().name = record.name;
            }
        }
        entry.attrs_mut().parent_id = new_parent;
        let new_name = entry.name_bytes().to_vec();

        self.unlink(old_parent, &old_name, id);
        self.link(new_parent, new_name, id);
        Ok(())
    }

    /// Unlink a named child. Returns false if nothing was linked.
    pub fn remove_child(&mut self, directory: EntryId, name: &[u8]) -> bool {
        let Some(index) = self.children.get_mut(&directory) else {
            return false;
        };
        let removed = index.remove(name).is_some();
        if index.is_empty() {
            self.children.remove(&directory);
        }
        removed
    }

    /// Delete an entry's own record. Children and index links are untouched.
    pub fn remove(&mut self, id: EntryId, tag: EntryTag) -> bool {
        if !self.entries.get(&id).is_some_and(|e| e.tag() == tag) {
            return false;
        }
        self.entries.remove(&id);
        if tag == EntryTag::File {
            self.drop_blocks(id);
        }
        true
    }

    /// Apply the parts of `record` flagged in its changed fields.
    pub fn update_meta(&mut self, path_id: EntryId, tag: EntryTag, record: EntryRecord) -> StateResult<()> {
        if record.id != path_id {
            return Err(StateError::BadRequest(format!(
                "record id {} does not match path id {}",
                record.id, path_id
            )));
        }
        let changed = record.changed_fields;
        let incoming = decode_record(record)?;
        if incoming.tag() != tag {
            return Err(StateError::BadRequest(format!("entry {} is not a {}", path_id, tag)));
        }
        let stored = self
            .entries
            .get(&path_id)
            .filter(|e| e.tag() == tag)
            .ok_or_else(|| StateError::NotFound(format!("{} {}", tag, path_id)))?;
        let previous = (stored.parent_id(), stored.name_bytes().to_vec());

        let mut updated = stored.clone();
        if changed.contains(ChangedFields::ATTRIBUTES) {
            *updated.attrs_mut() = incoming.attrs().clone();
        }
        if let (NamespaceEntry::File(target), NamespaceEntry::File(source)) = (&mut updated, incoming) {
            if changed.contains(ChangedFields::LEASE) {
                target.lease = source.lease;
            }
            if changed.contains(ChangedFields::BLOCKS) {
                self.check_blocks(path_id, &source.blocks)?;
                self.drop_blocks(path_id);
                self.store_blocks(path_id, source.blocks);
            }
        }
        if changed.contains(ChangedFields::ATTRIBUTES) {
            self.relink(Some(previous), &updated);
        }
        trace!(id = path_id, ?changed, "Applied meta update");
        self.entries.insert(path_id, updated);
        Ok(())
    }

    /// Record a replica placement. Returns false if it was already known.
    pub fn add_replica(&mut self, block: BlockId, replica: Replica) -> StateResult<bool> {
        let stored = self
            .blocks
            .get_mut(&block)
            .ok_or_else(|| StateError::NotFound(format!("block {}", block)))?;
        Ok(stored.add_replica(replica))
    }
}
