//! Namespace and block metadata model.
//!
//! Two layers live here:
//!
//! - the wire record [`EntryRecord`], a flat JSON shape whose `type` tag says
//!   which variant it carries, and
//! - the typed tagged union [`NamespaceEntry`] over [`FileEntry`] and
//!   [`DirectoryEntry`], which is what the store contract hands back.
//!
//! Converting a record into an entry checks that the tag is known and that
//! the record's shape agrees with it. A disagreement is a
//! [`StoreError::ContractViolation`].
//!
//! Dirty tracking is not stored on the entries. A write that should only
//! carry part of an entry is described by a [`Snapshot`], the pair of an
//! entry and the [`ChangedFields`] computed by an explicit diff step.

use crate::error::{Result, StoreError};
use crate::types::{BlockId, EntryId, EntryTag, FileHeader, GenerationStamp, PermissionWord};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Set of substructures that changed since the last persisted snapshot.
#[derive(Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ChangedFields(u32);

impl ChangedFields {
    /// Name, parent, permission, times or header.
    pub const ATTRIBUTES: Self = Self(1);
    /// The file's block list.
    pub const BLOCKS: Self = Self(1 << 1);
    /// The file's lease (open-for-write state).
    pub const LEASE: Self = Self(1 << 2);
    /// The directory's materialized child list.
    pub const CHILDREN: Self = Self(1 << 3);
    pub const ALL: Self = Self(0b1111);

    pub const fn empty() -> Self {
        Self(0)
    }

    pub const fn bits(self) -> u32 {
        self.0
    }

    /// Build from raw bits, dropping unknown ones.
    pub const fn from_bits_truncate(bits: u32) -> Self {
        Self(bits & Self::ALL.0)
    }

    pub const fn is_empty(&self) -> bool {
        self.0 == 0
    }

    pub const fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }

    pub const fn union(self, other: Self) -> Self {
        Self(self.0 | other.0)
    }

    pub fn insert(&mut self, other: Self) {
        self.0 |= other.0;
    }
}

impl std::ops::BitOr for ChangedFields {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        self.union(rhs)
    }
}

impl fmt::Debug for ChangedFields {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let names = [
            (Self::ATTRIBUTES, "ATTRIBUTES"),
            (Self::BLOCKS, "BLOCKS"),
            (Self::LEASE, "LEASE"),
            (Self::CHILDREN, "CHILDREN"),
        ];
        let set: Vec<&str> = names
            .iter()
            .filter(|(flag, _)| self.contains(*flag))
            .map(|(_, name)| *name)
            .collect();
        write!(f, "ChangedFields({})", set.join(" | "))
    }
}

/// Physical placement of one block replica.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Replica {
    pub data_node_id: String,
    pub storage_id: String,
}

impl Replica {
    pub fn new(data_node_id: impl Into<String>, storage_id: impl Into<String>) -> Self {
        Self {
            data_node_id: data_node_id.into(),
            storage_id: storage_id.into(),
        }
    }
}

/// Block metadata record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Block {
    pub id: BlockId,
    #[serde(rename = "generation")]
    pub generation_stamp: GenerationStamp,
    #[serde(rename = "number_bytes", default)]
    pub num_bytes: u64,
    #[serde(default)]
    pub replication: u16,
    #[serde(rename = "collection_id", default)]
    pub owner_entry_id: EntryId,
    #[serde(default)]
    pub block_pool_id: String,
    #[serde(rename = "storage", default)]
    pub replicas: Vec<Replica>,
}

impl Block {
    /// A freshly allocated, empty block owned by `owner`.
    pub fn new(id: BlockId, generation_stamp: GenerationStamp, owner: EntryId) -> Self {
        Self {
            id,
            generation_stamp,
            num_bytes: 0,
            replication: 0,
            owner_entry_id: owner,
            block_pool_id: String::new(),
            replicas: Vec::new(),
        }
    }

    /// Record a replica. Returns false if the placement was already known.
    pub fn add_replica(&mut self, replica: Replica) -> bool {
        if self.replicas.contains(&replica) {
            return false;
        }
        self.replicas.push(replica);
        true
    }

    /// Move the generation stamp forward. Stamps never decrease.
    pub fn advance_generation(&mut self, stamp: GenerationStamp) -> Result<()> {
        if stamp < self.generation_stamp {
            return Err(StoreError::InvalidArgument(format!(
                "block {} generation stamp {} is older than {}",
                self.id, stamp, self.generation_stamp
            )));
        }
        self.generation_stamp = stamp;
        Ok(())
    }
}

/// Client holding the write lease of an open file.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Lease {
    pub client_name: String,
    pub client_machine: String,
}

impl Lease {
    pub fn new(client_name: impl Into<String>, client_machine: impl Into<String>) -> Self {
        Self {
            client_name: client_name.into(),
            client_machine: client_machine.into(),
        }
    }
}

/// Fields shared by every namespace entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntryAttrs {
    pub id: EntryId,
    pub parent_id: EntryId,
    /// Raw name bytes, decoded on read.
    pub name: Vec<u8>,
    pub permission: PermissionWord,
    pub modification_time: u64,
    pub access_time: u64,
    pub header: FileHeader,
}

impl EntryAttrs {
    /// Decode the stored name. Invalid UTF-8 is reported, never replaced.
    pub fn name(&self) -> Result<&str> {
        std::str::from_utf8(&self.name).map_err(|e| {
            StoreError::Decode(format!("entry {} has an invalid name: {}", self.id, e))
        })
    }
}

/// A regular file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileEntry {
    pub attrs: EntryAttrs,
    /// Index in this vector is the block's position in the file.
    pub blocks: Vec<Block>,
    /// Present iff the file is open for writing.
    pub lease: Option<Lease>,
}

impl FileEntry {
    pub fn is_under_construction(&self) -> bool {
        self.lease.is_some()
    }
}

/// A directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirectoryEntry {
    pub attrs: EntryAttrs,
    /// Advisory cache of the children. The authoritative listing comes from
    /// the store's child index.
    pub children: Option<Vec<NamespaceEntry>>,
}

/// A namespace entry: a file or a directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NamespaceEntry {
    File(FileEntry),
    Directory(DirectoryEntry),
}

impl NamespaceEntry {
    pub fn tag(&self) -> EntryTag {
        match self {
            NamespaceEntry::File(_) => EntryTag::File,
            NamespaceEntry::Directory(_) => EntryTag::Directory,
        }
    }

    pub fn attrs(&self) -> &EntryAttrs {
        match self {
            NamespaceEntry::File(file) => &file.attrs,
            NamespaceEntry::Directory(dir) => &dir.attrs,
        }
    }

    pub fn attrs_mut(&mut self) -> &mut EntryAttrs {
        match self {
            NamespaceEntry::File(file) => &mut file.attrs,
            NamespaceEntry::Directory(dir) => &mut dir.attrs,
        }
    }

    pub fn id(&self) -> EntryId {
        self.attrs().id
    }

    pub fn parent_id(&self) -> EntryId {
        self.attrs().parent_id
    }

    pub fn name_bytes(&self) -> &[u8] {
        &self.attrs().name
    }

    pub fn name(&self) -> Result<&str> {
        self.attrs().name()
    }

    pub fn as_file(&self) -> Option<&FileEntry> {
        match self {
            NamespaceEntry::File(file) => Some(file),
            NamespaceEntry::Directory(_) => None,
        }
    }

    pub fn as_directory(&self) -> Option<&DirectoryEntry> {
        match self {
            NamespaceEntry::Directory(dir) => Some(dir),
            NamespaceEntry::File(_) => None,
        }
    }

    pub fn into_file(self) -> Option<FileEntry> {
        match self {
            NamespaceEntry::File(file) => Some(file),
            NamespaceEntry::Directory(_) => None,
        }
    }

    pub fn into_directory(self) -> Option<DirectoryEntry> {
        match self {
            NamespaceEntry::Directory(dir) => Some(dir),
            NamespaceEntry::File(_) => None,
        }
    }
}

impl From<FileEntry> for NamespaceEntry {
    fn from(file: FileEntry) -> Self {
        NamespaceEntry::File(file)
    }
}

impl From<DirectoryEntry> for NamespaceEntry {
    fn from(dir: DirectoryEntry) -> Self {
        NamespaceEntry::Directory(dir)
    }
}

/// Point-in-time entry paired with the substructures that changed since the
/// last persisted snapshot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Snapshot {
    pub entry: NamespaceEntry,
    pub changed: ChangedFields,
}

impl Snapshot {
    pub fn new(entry: NamespaceEntry, changed: ChangedFields) -> Self {
        Self { entry, changed }
    }
}

/// Entry record as it travels on the wire.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntryRecord {
    pub id: EntryId,
    #[serde(default)]
    pub parent_id: EntryId,
    #[serde(default)]
    pub name: Vec<u8>,
    #[serde(default)]
    pub permission: u64,
    #[serde(default)]
    pub modification_time: u64,
    #[serde(default)]
    pub access_time: u64,
    #[serde(default)]
    pub header: u64,
    #[serde(rename = "type")]
    pub entry_type: i16,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub blocks: Option<Vec<Block>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_machine: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub children: Option<Vec<EntryRecord>>,
    #[serde(default, skip_serializing_if = "ChangedFields::is_empty")]
    pub changed_fields: ChangedFields,
}

impl EntryRecord {
    fn with_attrs(attrs: &EntryAttrs, tag: EntryTag) -> Self {
        Self {
            id: attrs.id,
            parent_id: attrs.parent_id,
            name: attrs.name.clone(),
            permission: attrs.permission.0,
            modification_time: attrs.modification_time,
            access_time: attrs.access_time,
            header: attrs.header.0,
            entry_type: tag.code(),
            blocks: None,
            client_name: None,
            client_machine: None,
            children: None,
            changed_fields: ChangedFields::empty(),
        }
    }

    /// Record carrying only what a snapshot flags as changed.
    ///
    /// Attributes always travel since they identify the entry. A flagged but
    /// absent lease travels as no client fields, which clears it.
    pub fn from_snapshot(snapshot: &Snapshot) -> Self {
        let changed = snapshot.changed;
        let mut record = Self::with_attrs(snapshot.entry.attrs(), snapshot.entry.tag());
        record.changed_fields = changed;
        match &snapshot.entry {
            NamespaceEntry::File(file) => {
                if changed.contains(ChangedFields::BLOCKS) {
                    record.blocks = Some(file.blocks.clone());
                }
                if changed.contains(ChangedFields::LEASE) {
                    if let Some(lease) = &file.lease {
                        record.client_name = Some(lease.client_name.clone());
                        record.client_machine = Some(lease.client_machine.clone());
                    }
                }
            }
            NamespaceEntry::Directory(dir) => {
                if changed.contains(ChangedFields::CHILDREN) {
                    record.children = Some(
                        dir.children
                            .iter()
                            .flatten()
                            .map(EntryRecord::from)
                            .collect(),
                    );
                }
            }
        }
        record
    }

    /// Decode the tag. Unknown tags are a contract violation.
    pub fn tag(&self) -> Result<EntryTag> {
        EntryTag::from_code(self.entry_type)
    }

    fn attrs(&self) -> EntryAttrs {
        EntryAttrs {
            id: self.id,
            parent_id: self.parent_id,
            name: self.name.clone(),
            permission: PermissionWord(self.permission),
            modification_time: self.modification_time,
            access_time: self.access_time,
            header: FileHeader(self.header),
        }
    }

    fn lease(&self) -> Result<Option<Lease>> {
        let name = self.client_name.as_deref().filter(|s| !s.is_empty());
        let machine = self.client_machine.as_deref().filter(|s| !s.is_empty());
        match (name, machine) {
            (Some(name), Some(machine)) => Ok(Some(Lease::new(name, machine))),
            (None, None) => Ok(None),
            _ => Err(StoreError::ContractViolation(format!(
                "entry {} carries half a lease",
                self.id
            ))),
        }
    }
}

impl From<&NamespaceEntry> for EntryRecord {
    fn from(entry: &NamespaceEntry) -> Self {
        let mut record = Self::with_attrs(entry.attrs(), entry.tag());
        match entry {
            NamespaceEntry::File(file) => {
                record.blocks = Some(file.blocks.clone());
                if let Some(lease) = &file.lease {
                    record.client_name = Some(lease.client_name.clone());
                    record.client_machine = Some(lease.client_machine.clone());
                }
            }
            NamespaceEntry::Directory(dir) => {
                record.children = dir
                    .children
                    .as_ref()
                    .map(|children| children.iter().map(EntryRecord::from).collect());
            }
        }
        record
    }
}

impl TryFrom<EntryRecord> for NamespaceEntry {
    type Error = StoreError;

    fn try_from(record: EntryRecord) -> Result<Self> {
        let attrs = record.attrs();
        match record.tag()? {
            EntryTag::File => {
                if record.children.as_ref().is_some_and(|c| !c.is_empty()) {
                    return Err(StoreError::ContractViolation(format!(
                        "file {} carries directory children",
                        record.id
                    )));
                }
                let lease = record.lease()?;
                Ok(NamespaceEntry::File(FileEntry {
                    attrs,
                    blocks: record.blocks.unwrap_or_default(),
                    lease,
                }))
            }
            EntryTag::Directory => {
                if record.blocks.as_ref().is_some_and(|b| !b.is_empty()) {
                    return Err(StoreError::ContractViolation(format!(
                        "directory {} carries file blocks",
                        record.id
                    )));
                }
                if record.lease()?.is_some() {
                    return Err(StoreError::ContractViolation(format!(
                        "directory {} carries a lease",
                        record.id
                    )));
                }
                let children = record
                    .children
                    .map(|children| {
                        children
                            .into_iter()
                            .map(NamespaceEntry::try_from)
                            .collect::<Result<Vec<_>>>()
                    })
                    .transpose()?;
                Ok(NamespaceEntry::Directory(DirectoryEntry { attrs, children }))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn file_record() -> EntryRecord {
        let entry = NamespaceEntry::File(FileEntry {
            attrs: EntryAttrs {
                id: 2,
                parent_id: 1,
                name: b"a.txt".to_vec(),
                permission: PermissionWord::pack(1, 1, 0o644),
                modification_time: 10,
                access_time: 11,
                header: FileHeader::pack(3, 1024, 0).unwrap(),
            },
            blocks: vec![Block::new(100, 5, 2)],
            lease: Some(Lease::new("c1", "m1")),
        });
        EntryRecord::from(&entry)
    }

    #[test]
    fn test_changed_fields_ops() {
        let mut set = ChangedFields::BLOCKS | ChangedFields::LEASE;
        assert!(set.contains(ChangedFields::BLOCKS));
        assert!(!set.contains(ChangedFields::ATTRIBUTES));
        set.insert(ChangedFields::ATTRIBUTES);
        assert!(set.contains(ChangedFields::ATTRIBUTES | ChangedFields::LEASE));
        assert!(ChangedFields::empty().is_empty());
        assert_eq!(ChangedFields::from_bits_truncate(0xff), ChangedFields::ALL);
        assert_eq!(format!("{:?}", ChangedFields::LEASE), "ChangedFields(LEASE)");
    }

    #[test]
    fn test_record_json_keys() {
        let json = serde_json::to_value(file_record()).unwrap();
        assert_eq!(json["type"], 0);
        assert_eq!(json["parent_id"], 1);
        assert_eq!(json["client_name"], "c1");
        assert_eq!(json["blocks"][0]["generation"], 5);
        assert_eq!(json["blocks"][0]["collection_id"], 2);
        assert!(json.get("children").is_none());
        assert!(json.get("changed_fields").is_none());
    }

    #[test]
    fn test_record_into_file_entry() {
        let entry = NamespaceEntry::try_from(file_record()).unwrap();
        let file = entry.as_file().unwrap();
        assert_eq!(file.blocks.len(), 1);
        assert!(file.is_under_construction());
        assert_eq!(entry.name().unwrap(), "a.txt");
        assert!(entry.as_directory().is_none());
    }

    #[test]
    fn test_unknown_tag_is_contract_violation() {
        let mut record = file_record();
        record.entry_type = 9;
        let err = NamespaceEntry::try_from(record).unwrap_err();
        assert!(err.is_contract_violation());
    }

    #[test]
    fn test_directory_with_blocks_is_contract_violation() {
        let mut record = file_record();
        record.entry_type = EntryTag::DIRECTORY_CODE;
        record.client_name = None;
        record.client_machine = None;
        let err = NamespaceEntry::try_from(record).unwrap_err();
        assert!(err.is_contract_violation());
    }

    #[test]
    fn test_half_lease_is_contract_violation() {
        let mut record = file_record();
        record.client_machine = None;
        assert!(NamespaceEntry::try_from(record).unwrap_err().is_contract_violation());
    }

    #[test]
    fn test_empty_lease_strings_mean_closed() {
        let mut record = file_record();
        record.client_name = Some(String::new());
        record.client_machine = Some(String::new());
        let entry = NamespaceEntry::try_from(record).unwrap();
        assert!(!entry.as_file().unwrap().is_under_construction());
    }

    #[test]
    fn test_invalid_name_is_decode_failure() {
        let mut record = file_record();
        record.name = vec![b'a', 0xc3, 0x28];
        let entry = NamespaceEntry::try_from(record).unwrap();
        assert!(matches!(entry.name(), Err(StoreError::Decode(_))));
    }

    #[test]
    fn test_snapshot_record_omits_unchanged_parts() {
        let entry = NamespaceEntry::try_from(file_record()).unwrap();
        let record = EntryRecord::from_snapshot(&Snapshot::new(entry.clone(), ChangedFields::LEASE));
        assert!(record.blocks.is_none());
        assert_eq!(record.client_name.as_deref(), Some("c1"));
        assert_eq!(record.changed_fields, ChangedFields::LEASE);
        assert_eq!(serde_json::to_value(&record).unwrap()["changed_fields"], 4);

        let record = EntryRecord::from_snapshot(&Snapshot::new(entry, ChangedFields::BLOCKS));
        assert_eq!(record.blocks.as_ref().map(Vec::len), Some(1));
        assert!(record.client_name.is_none());
    }

    #[test]
    fn test_block_generation_never_decreases() {
        let mut block = Block::new(7, 10, 1);
        assert!(block.advance_generation(9).is_err());
        block.advance_generation(12).unwrap();
        assert_eq!(block.generation_stamp, 12);
    }

    #[test]
    fn test_block_replicas_are_a_set() {
        let mut block = Block::new(7, 1, 1);
        assert!(block.add_replica(Replica::new("dn1", "s1")));
        assert!(!block.add_replica(Replica::new("dn1", "s1")));
        assert!(block.add_replica(Replica::new("dn1", "s2")));
        assert_eq!(block.replicas.len(), 2);
    }
}
