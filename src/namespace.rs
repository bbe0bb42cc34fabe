//! Live namespace-tree nodes and permission resolution.
//!
//! These are the in-memory shapes the namenode works with. The conversion
//! engine in [`crate::convert`] moves them to and from stored entries.

use crate::error::{Result, StoreError};
use crate::model::{Lease, Replica};
use crate::types::{BlockId, EntryId, FileHeader, GenerationStamp, PermissionWord, MAX_SERIAL};
use parking_lot::RwLock;
use std::collections::HashMap;

/// Resolved owner, group and mode of a node.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PermissionStatus {
    pub user: String,
    pub group: String,
    pub mode: u16,
}

impl PermissionStatus {
    pub fn new(user: impl Into<String>, group: impl Into<String>, mode: u16) -> Self {
        Self {
            user: user.into(),
            group: group.into(),
            mode,
        }
    }
}

/// Translates packed permission words to owner/group/mode and back.
pub trait PermissionResolver: Send + Sync {
    fn resolve(&self, word: PermissionWord) -> Result<PermissionStatus>;

    fn encode(&self, status: &PermissionStatus) -> Result<PermissionWord>;
}

#[derive(Debug, Default)]
struct Interner {
    names: Vec<String>,
    serials: HashMap<String, u32>,
}

impl Interner {
    fn intern(&mut self, name: &str) -> Result<u32> {
        if let Some(serial) = self.serials.get(name) {
            return Ok(*serial);
        }
        let serial = self.names.len() as u32;
        if serial > MAX_SERIAL {
            return Err(StoreError::InvalidArgument(format!(
                "serial space exhausted interning {}",
                name
            )));
        }
        self.names.push(name.to_string());
        self.serials.insert(name.to_string(), serial);
        Ok(serial)
    }

    fn lookup(&self, serial: u32) -> Option<&str> {
        self.names.get(serial as usize).map(String::as_str)
    }
}

/// Resolver that interns user and group names to dense serial numbers.
#[derive(Debug, Default)]
pub struct SerialPermissionResolver {
    users: RwLock<Interner>,
    groups: RwLock<Interner>,
}

impl SerialPermissionResolver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn user_serial(&self, user: &str) -> Result<u32> {
        if let Some(serial) = self.users.read().serials.get(user) {
            return Ok(*serial);
        }
        self.users.write().intern(user)
    }

    pub fn group_serial(&self, group: &str) -> Result<u32> {
        if let Some(serial) = self.groups.read().serials.get(group) {
            return Ok(*serial);
        }
        self.groups.write().intern(group)
    }
}

impl PermissionResolver for SerialPermissionResolver {
    fn resolve(&self, word: PermissionWord) -> Result<PermissionStatus> {
        let user = self
            .users
            .read()
            .lookup(word.user_serial())
            .map(str::to_string)
            .ok_or_else(|| {
                StoreError::Decode(format!("unknown user serial {}", word.user_serial()))
            })?;
        let group = self
            .groups
            .read()
            .lookup(word.group_serial())
            .map(str::to_string)
            .ok_or_else(|| {
                StoreError::Decode(format!("unknown group serial {}", word.group_serial()))
            })?;
        Ok(PermissionStatus {
            user,
            group,
            mode: word.mode(),
        })
    }

    fn encode(&self, status: &PermissionStatus) -> Result<PermissionWord> {
        let user = self.user_serial(&status.user)?;
        let group = self.group_serial(&status.group)?;
        Ok(PermissionWord::pack(user, group, status.mode))
    }
}

/// Resolver that keeps only the mode bits and reports a fixed owner.
#[derive(Debug, Clone)]
pub struct OwnerPermissionResolver {
    user: String,
    group: String,
}

impl OwnerPermissionResolver {
    pub fn new(user: impl Into<String>, group: impl Into<String>) -> Self {
        Self {
            user: user.into(),
            group: group.into(),
        }
    }
}

impl PermissionResolver for OwnerPermissionResolver {
    fn resolve(&self, word: PermissionWord) -> Result<PermissionStatus> {
        Ok(PermissionStatus::new(&self.user, &self.group, word.mode()))
    }

    fn encode(&self, status: &PermissionStatus) -> Result<PermissionWord> {
        Ok(PermissionWord::pack(0, 0, status.mode))
    }
}

/// Live block record held by a file node.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlockInfo {
    pub id: BlockId,
    pub generation_stamp: GenerationStamp,
    pub num_bytes: u64,
    pub replication: u16,
    pub block_pool_id: String,
    pub replicas: Vec<Replica>,
}

impl BlockInfo {
    pub fn new(id: BlockId, generation_stamp: GenerationStamp) -> Self {
        Self {
            id,
            generation_stamp,
            num_bytes: 0,
            replication: 0,
            block_pool_id: String::new(),
            replicas: Vec::new(),
        }
    }
}

/// Live file node.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct INodeFile {
    pub id: EntryId,
    pub parent_id: EntryId,
    pub name: String,
    pub permission: PermissionStatus,
    pub modification_time: u64,
    pub access_time: u64,
    pub header: FileHeader,
    pub blocks: Vec<BlockInfo>,
    lease: Option<Lease>,
}

impl INodeFile {
    pub fn new(
        id: EntryId,
        parent_id: EntryId,
        name: impl Into<String>,
        permission: PermissionStatus,
        header: FileHeader,
    ) -> Self {
        Self {
            id,
            parent_id,
            name: name.into(),
            permission,
            modification_time: 0,
            access_time: 0,
            header,
            blocks: Vec::new(),
            lease: None,
        }
    }

    pub fn replication(&self) -> u16 {
        self.header.replication()
    }

    pub fn preferred_block_size(&self) -> u64 {
        self.header.preferred_block_size()
    }

    pub fn is_under_construction(&self) -> bool {
        self.lease.is_some()
    }

    /// Client holding the write lease, if the file is open for writing.
    pub fn lease(&self) -> Option<&Lease> {
        self.lease.as_ref()
    }

    /// Open the file for writing by `lease`.
    pub fn open_for_write(&mut self, lease: Lease) {
        self.lease = Some(lease);
    }

    /// Close the file, returning the lease it held.
    pub fn close(&mut self) -> Option<Lease> {
        self.lease.take()
    }

    pub fn last_block(&self) -> Option<&BlockInfo> {
        self.blocks.last()
    }

    pub fn len(&self) -> u64 {
        self.blocks.iter().map(|b| b.num_bytes).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.blocks.is_empty()
    }
}

/// Live directory node.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct INodeDirectory {
    pub id: EntryId,
    pub parent_id: EntryId,
    pub name: String,
    pub permission: PermissionStatus,
    pub modification_time: u64,
    pub access_time: u64,
    pub children: Option<Vec<INode>>,
}

impl INodeDirectory {
    pub fn new(
        id: EntryId,
        parent_id: EntryId,
        name: impl Into<String>,
        permission: PermissionStatus,
    ) -> Self {
        Self {
            id,
            parent_id,
            name: name.into(),
            permission,
            modification_time: 0,
            access_time: 0,
            children: None,
        }
    }
}

/// A live namespace node.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum INode {
    File(INodeFile),
    Directory(INodeDirectory),
}

impl INode {
    pub fn id(&self) -> EntryId {
        match self {
            INode::File(f) => f.id,
            INode::Directory(d) => d.id,
        }
    }

    pub fn parent_id(&self) -> EntryId {
        match self {
            INode::File(f) => f.parent_id,
            INode::Directory(d) => d.parent_id,
        }
    }

    pub fn name(&self) -> &str {
        match self {
            INode::File(f) => &f.name,
            INode::Directory(d) => &d.name,
        }
    }

    pub fn permission(&self) -> &PermissionStatus {
        match self {
            INode::File(f) => &f.permission,
            INode::Directory(d) => &d.permission,
        }
    }

    pub fn is_file(&self) -> bool {
        matches!(self, INode::File(_))
    }

    pub fn as_file(&self) -> Option<&INodeFile> {
        match self {
            INode::File(f) => Some(f),
            INode::Directory(_) => None,
        }
    }

    pub fn as_file_mut(&mut self) -> Option<&mut INodeFile> {
        match self {
            INode::File(f) => Some(f),
            INode::Directory(_) => None,
        }
    }

    pub fn as_directory(&self) -> Option<&INodeDirectory> {
        match self {
            INode::Directory(d) => Some(d),
            INode::File(_) => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_serial_resolver_round_trip() {
        let resolver = SerialPermissionResolver::new();
        let status = PermissionStatus::new("hdfs", "supergroup", 0o755);
        let word = resolver.encode(&status).unwrap();
        assert_eq!(resolver.resolve(word).unwrap(), status);

        let other = resolver
            .encode(&PermissionStatus::new("alice", "supergroup", 0o600))
            .unwrap();
        assert_eq!(other.group_serial(), word.group_serial());
        assert_ne!(other.user_serial(), word.user_serial());
    }

    #[test]
    fn test_serial_resolver_unknown_serial() {
        let resolver = SerialPermissionResolver::new();
        let err = resolver.resolve(PermissionWord::pack(5, 0, 0o644)).unwrap_err();
        assert!(matches!(err, StoreError::Decode(_)));
    }

    #[test]
    fn test_owner_resolver_keeps_mode_only() {
        let resolver = OwnerPermissionResolver::new("root", "wheel");
        let status = resolver.resolve(PermissionWord::pack(9, 9, 0o700)).unwrap();
        assert_eq!(status, PermissionStatus::new("root", "wheel", 0o700));
        assert_eq!(resolver.encode(&status).unwrap(), PermissionWord::pack(0, 0, 0o700));
    }

    #[test]
    fn test_file_lease_transitions() {
        let header = FileHeader::pack(3, 1024, 0).unwrap();
        let mut file = INodeFile::new(2, 1, "a", PermissionStatus::new("u", "g", 0o644), header);
        assert!(!file.is_under_construction());
        file.open_for_write(Lease::new("c1", "m1"));
        assert_eq!(file.lease().map(|l| l.client_name.as_str()), Some("c1"));
        assert_eq!(file.close(), Some(Lease::new("c1", "m1")));
        assert!(!file.is_under_construction());
        assert_eq!(file.replication(), 3);
        assert_eq!(file.preferred_block_size(), 1024);
    }

    #[test]
    fn test_file_length() {
        let header = FileHeader::pack(1, 1024, 0).unwrap();
        let mut file = INodeFile::new(2, 1, "a", PermissionStatus::new("u", "g", 0o644), header);
        assert!(file.is_empty());
        let mut b = BlockInfo::new(10, 1);
        b.num_bytes = 1024;
        file.blocks.push(b.clone());
        b.id = 11;
        b.num_bytes = 12;
        file.blocks.push(b);
        assert_eq!(file.len(), 1036);
        assert_eq!(file.last_block().map(|b| b.id), Some(11));
    }
}
