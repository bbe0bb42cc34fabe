// Request builders shared by the integration tests

use statestore::model::Lease;
use statestore::store::{CreateFile, MakeDirectory};
use statestore::types::{EntryId, FileHeader, PermissionWord};

pub const BLOCK_SIZE: u64 = 128 * 1024 * 1024;

pub fn header() -> FileHeader {
    FileHeader::pack(3, BLOCK_SIZE, 0).unwrap()
}

pub fn make_dir(parent_id: EntryId, id: EntryId, name: &str) -> MakeDirectory {
    MakeDirectory {
        parent_id,
        id,
        name: name.to_string(),
        permission: PermissionWord::pack(0, 0, 0o755),
        modification_time: 1_700_000_000_000,
        access_time: 1_700_000_000_000,
    }
}

pub fn make_file(parent_id: EntryId, id: EntryId, name: &str, lease: Option<Lease>) -> CreateFile {
    CreateFile {
        parent_id,
        id,
        name: name.to_string(),
        permission: PermissionWord::pack(0, 0, 0o644),
        modification_time: 1_700_000_000_000,
        access_time: 1_700_000_000_000,
        header: header(),
        lease,
    }
}

pub fn open_lease() -> Option<Lease> {
    Some(Lease::new("c1", "m1"))
}
