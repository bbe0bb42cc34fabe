//! Conversion between stored entries and live namespace nodes.
//!
//! [`materialize`] turns a wire record into a live node, dispatching on the
//! record's tag. [`snapshot`] goes the other way and pairs the captured entry
//! with the set of substructures that changed. [`diff`] computes that set from
//! two entries.

use crate::error::Result;
use crate::model::{
    Block, ChangedFields, DirectoryEntry, EntryAttrs, EntryRecord, FileEntry, NamespaceEntry,
    Snapshot,
};
use crate::namespace::{BlockInfo, INode, INodeDirectory, INodeFile, PermissionResolver};
use crate::types::{EntryId, FileHeader};

/// Build a live node from a wire record.
///
/// Fails with a contract violation on an unknown tag or a shape that
/// disagrees with the tag, and with a decode failure on a name that is not
/// valid UTF-8.
pub fn materialize(record: &EntryRecord, resolver: &dyn PermissionResolver) -> Result<INode> {
    let entry = NamespaceEntry::try_from(record.clone())?;
    materialize_entry(&entry, resolver)
}

/// Build a live node from a typed entry.
pub fn materialize_entry(
    entry: &NamespaceEntry,
    resolver: &dyn PermissionResolver,
) -> Result<INode> {
    match entry {
        NamespaceEntry::File(file) => materialize_file(file, resolver).map(INode::File),
        NamespaceEntry::Directory(dir) => {
            materialize_directory(dir, resolver).map(INode::Directory)
        }
    }
}

fn materialize_file(file: &FileEntry, resolver: &dyn PermissionResolver) -> Result<INodeFile> {
    let attrs = &file.attrs;
    let mut node = INodeFile::new(
        attrs.id,
        attrs.parent_id,
        attrs.name()?,
        resolver.resolve(attrs.permission)?,
        attrs.header,
    );
    node.modification_time = attrs.modification_time;
    node.access_time = attrs.access_time;
    node.blocks = file.blocks.iter().map(block_info).collect();
    if let Some(lease) = &file.lease {
        node.open_for_write(lease.clone());
    }
    Ok(node)
}

fn materialize_directory(
    dir: &DirectoryEntry,
    resolver: &dyn PermissionResolver,
) -> Result<INodeDirectory> {
    let attrs = &dir.attrs;
    let mut node = INodeDirectory::new(
        attrs.id,
        attrs.parent_id,
        attrs.name()?,
        resolver.resolve(attrs.permission)?,
    );
    node.modification_time = attrs.modification_time;
    node.access_time = attrs.access_time;
    node.children = dir
        .children
        .as_ref()
        .map(|children| {
            children
                .iter()
                .map(|child| materialize_entry(child, resolver))
                .collect::<Result<Vec<_>>>()
        })
        .transpose()?;
    Ok(node)
}

fn block_info(block: &Block) -> BlockInfo {
    BlockInfo {
        id: block.id,
        generation_stamp: block.generation_stamp,
        num_bytes: block.num_bytes,
        replication: block.replication,
        block_pool_id: block.block_pool_id.clone(),
        replicas: block.replicas.clone(),
    }
}

fn block_record(info: &BlockInfo, owner: EntryId) -> Block {
    Block {
        id: info.id,
        generation_stamp: info.generation_stamp,
        num_bytes: info.num_bytes,
        replication: info.replication,
        owner_entry_id: owner,
        block_pool_id: info.block_pool_id.clone(),
        replicas: info.replicas.clone(),
    }
}

/// Capture a typed entry from a live node.
pub fn capture(node: &INode, resolver: &dyn PermissionResolver) -> Result<NamespaceEntry> {
    match node {
        INode::File(file) => Ok(NamespaceEntry::File(FileEntry {
            attrs: EntryAttrs {
                id: file.id,
                parent_id: file.parent_id,
                name: file.name.as_bytes().to_vec(),
                permission: resolver.encode(&file.permission)?,
                modification_time: file.modification_time,
                access_time: file.access_time,
                header: file.header,
            },
            blocks: file
                .blocks
                .iter()
                .map(|info| block_record(info, file.id))
                .collect(),
            lease: file.lease().cloned(),
        })),
        INode::Directory(dir) => Ok(NamespaceEntry::Directory(DirectoryEntry {
            attrs: EntryAttrs {
                id: dir.id,
                parent_id: dir.parent_id,
                name: dir.name.as_bytes().to_vec(),
                permission: resolver.encode(&dir.permission)?,
                modification_time: dir.modification_time,
                access_time: dir.access_time,
                header: FileHeader::EMPTY,
            },
            children: dir
                .children
                .as_ref()
                .map(|children| {
                    children
                        .iter()
                        .map(|child| capture(child, resolver))
                        .collect::<Result<Vec<_>>>()
                })
                .transpose()?,
        })),
    }
}

/// Capture a live node annotated with the substructures that changed.
pub fn snapshot(
    node: &INode,
    changed: ChangedFields,
    resolver: &dyn PermissionResolver,
) -> Result<Snapshot> {
    Ok(Snapshot::new(capture(node, resolver)?, changed))
}

/// Substructures of `current` that differ from `previous`.
///
/// Entries of different variants differ in everything.
pub fn diff(previous: &NamespaceEntry, current: &NamespaceEntry) -> ChangedFields {
    let mut changed = ChangedFields::empty();
    if previous.attrs() != current.attrs() {
        changed.insert(ChangedFields::ATTRIBUTES);
    }
    match (previous, current) {
        (NamespaceEntry::File(prev), NamespaceEntry::File(cur)) => {
            if prev.blocks != cur.blocks {
                changed.insert(ChangedFields::BLOCKS);
            }
            if prev.lease != cur.lease {
                changed.insert(ChangedFields::LEASE);
            }
        }
        (NamespaceEntry::Directory(prev), NamespaceEntry::Directory(cur)) => {
            if prev.children != cur.children {
                changed.insert(ChangedFields::CHILDREN);
            }
        }
        _ => return ChangedFields::ALL,
    }
    changed
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::StoreError;
    use crate::model::{Lease, Replica};
    use crate::namespace::{PermissionStatus, SerialPermissionResolver};
    use crate::types::EntryTag;

    fn live_file(resolver: &SerialPermissionResolver) -> INode {
        let header = FileHeader::pack(3, 128 << 20, 0).unwrap();
        let mut file = INodeFile::new(
            2,
            1,
            "a.txt",
            PermissionStatus::new("hdfs", "supergroup", 0o644),
            header,
        );
        file.modification_time = 1_700_000_000_000;
        file.access_time = 1_700_000_000_500;
        let mut block = BlockInfo::new(100, 5);
        block.num_bytes = 4096;
        block.replicas.push(Replica::new("dn-1", "disk-0"));
        file.blocks.push(block);
        file.blocks.push(BlockInfo::new(101, 6));
        file.open_for_write(Lease::new("c1", "m1"));
        // warm the resolver so serials are stable
        resolver.encode(&file.permission).unwrap();
        INode::File(file)
    }

    #[test]
    fn test_snapshot_then_materialize_round_trip() {
        let resolver = SerialPermissionResolver::new();
        let node = live_file(&resolver);
        let snap = snapshot(&node, ChangedFields::ALL, &resolver).unwrap();
        let record = EntryRecord::from_snapshot(&snap);
        let back = materialize(&record, &resolver).unwrap();
        assert_eq!(back, node);
    }

    #[test]
    fn test_directory_round_trip_with_children() {
        let resolver = SerialPermissionResolver::new();
        let mut dir = INodeDirectory::new(1, 0, "home", PermissionStatus::new("hdfs", "hdfs", 0o755));
        dir.children = Some(vec![live_file(&resolver)]);
        let node = INode::Directory(dir);
        let record = EntryRecord::from_snapshot(&snapshot(&node, ChangedFields::ALL, &resolver).unwrap());
        assert_eq!(record.entry_type, EntryTag::DIRECTORY_CODE);
        assert_eq!(record.header, 0);
        assert_eq!(materialize(&record, &resolver).unwrap(), node);
    }

    #[test]
    fn test_materialize_unknown_tag() {
        let resolver = SerialPermissionResolver::new();
        let node = live_file(&resolver);
        let mut record = EntryRecord::from(&capture(&node, &resolver).unwrap());
        record.entry_type = 2;
        let err = materialize(&record, &resolver).unwrap_err();
        assert!(err.is_contract_violation());
    }

    #[test]
    fn test_materialize_invalid_name() {
        let resolver = SerialPermissionResolver::new();
        let node = live_file(&resolver);
        let mut record = EntryRecord::from(&capture(&node, &resolver).unwrap());
        record.name = vec![0xff, 0xfe, 0xfd];
        let err = materialize(&record, &resolver).unwrap_err();
        assert!(matches!(err, StoreError::Decode(_)));
    }

    #[test]
    fn test_materialized_blocks_keep_order() {
        let resolver = SerialPermissionResolver::new();
        let node = live_file(&resolver);
        let record = EntryRecord::from(&capture(&node, &resolver).unwrap());
        let INode::File(file) = materialize(&record, &resolver).unwrap() else {
            panic!("expected a file");
        };
        let ids: Vec<_> = file.blocks.iter().map(|b| b.id).collect();
        assert_eq!(ids, vec![100, 101]);
        assert_eq!(file.blocks[0].replicas, vec![Replica::new("dn-1", "disk-0")]);
        assert!(file.is_under_construction());
    }

    #[test]
    fn test_diff_reports_changed_parts() {
        let resolver = SerialPermissionResolver::new();
        let mut node = live_file(&resolver);
        let before = capture(&node, &resolver).unwrap();
        assert!(diff(&before, &before).is_empty());

        let file = node.as_file_mut().unwrap();
        file.close();
        file.blocks.push(BlockInfo::new(102, 7));
        let after = capture(&node, &resolver).unwrap();
        assert_eq!(diff(&before, &after), ChangedFields::BLOCKS | ChangedFields::LEASE);

        node.as_file_mut().unwrap().access_time += 1;
        let touched = capture(&node, &resolver).unwrap();
        assert_eq!(diff(&after, &touched), ChangedFields::ATTRIBUTES);
    }

    #[test]
    fn test_diff_across_variants_is_all() {
        let resolver = SerialPermissionResolver::new();
        let file = capture(&live_file(&resolver), &resolver).unwrap();
        let dir = capture(
            &INode::Directory(INodeDirectory::new(2, 1, "a.txt", PermissionStatus::new("hdfs", "supergroup", 0o644))),
            &resolver,
        )
        .unwrap();
        assert_eq!(diff(&file, &dir), ChangedFields::ALL);
    }
}
