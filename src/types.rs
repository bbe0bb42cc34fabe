//! Core type definitions for the namespace metadata store.
//!
//! # Key Types
//!
//! - [`EntryTag`]: variant tag carried by every wire entry record
//! - [`FileHeader`]: packed replication / preferred block size word
//! - [`PermissionWord`]: packed user serial / group serial / mode word
//!
//! # Type Aliases
//!
//! - [`EntryId`] = `u64`: namespace entry identifier, issued by the oracle
//! - [`BlockId`] = `u64`: block identifier, issued by the oracle
//! - [`GenerationStamp`] = `u64`: per-block version number
//!
//! # Examples
//!
//! ```rust
//! use statestore::types::{FileHeader, PermissionWord};
//!
//! let header = FileHeader::pack(3, 128 * 1024 * 1024, 0).unwrap();
//! assert_eq!(header.replication(), 3);
//! assert_eq!(header.preferred_block_size(), 128 * 1024 * 1024);
//!
//! let perm = PermissionWord::pack(7, 9, 0o755);
//! assert_eq!(perm.user_serial(), 7);
//! assert_eq!(perm.group_serial(), 9);
//! assert_eq!(perm.mode(), 0o755);
//! ```

use crate::error::{Result, StoreError};
use serde::{Deserialize, Serialize};

/// Unique identifier for a namespace entry.
pub type EntryId = u64;

/// Unique identifier for a block.
pub type BlockId = u64;

/// Block generation stamp.
pub type GenerationStamp = u64;

/// Identifier of the root directory.
pub const ROOT_ID: EntryId = 0;

/// Variant tag carried on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EntryTag {
    File,
    Directory,
}

impl EntryTag {
    pub const FILE_CODE: i16 = 0;
    pub const DIRECTORY_CODE: i16 = 1;

    pub fn code(self) -> i16 {
        match self {
            EntryTag::File => Self::FILE_CODE,
            EntryTag::Directory => Self::DIRECTORY_CODE,
        }
    }

    /// Resolve a wire tag. Unknown tags are a contract violation.
    pub fn from_code(code: i16) -> Result<Self> {
        match code {
            Self::FILE_CODE => Ok(EntryTag::File),
            Self::DIRECTORY_CODE => Ok(EntryTag::Directory),
            other => Err(StoreError::ContractViolation(format!(
                "unknown entry tag {}",
                other
            ))),
        }
    }
}

impl std::fmt::Display for EntryTag {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EntryTag::File => write!(f, "file"),
            EntryTag::Directory => write!(f, "directory"),
        }
    }
}

const BLOCK_SIZE_BITS: u32 = 48;
const REPLICATION_BITS: u32 = 12;
const STORAGE_POLICY_BITS: u32 = 4;

const BLOCK_SIZE_MASK: u64 = (1 << BLOCK_SIZE_BITS) - 1;
const REPLICATION_MASK: u64 = (1 << REPLICATION_BITS) - 1;
const STORAGE_POLICY_MASK: u64 = (1 << STORAGE_POLICY_BITS) - 1;

/// Packed file header.
///
/// Layout, low to high: preferred block size (48 bits), replication
/// (12 bits), storage policy id (4 bits). Directories carry a zero header.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FileHeader(pub u64);

impl FileHeader {
    pub const EMPTY: Self = Self(0);

    pub fn pack(replication: u16, preferred_block_size: u64, storage_policy: u8) -> Result<Self> {
        if preferred_block_size == 0 || preferred_block_size > BLOCK_SIZE_MASK {
            return Err(StoreError::InvalidArgument(format!(
                "preferred block size {} out of range",
                preferred_block_size
            )));
        }
        if u64::from(replication) > REPLICATION_MASK {
            return Err(StoreError::InvalidArgument(format!(
                "replication {} out of range",
                replication
            )));
        }
        if u64::from(storage_policy) > STORAGE_POLICY_MASK {
            return Err(StoreError::InvalidArgument(format!(
                "storage policy {} out of range",
                storage_policy
            )));
        }
        Ok(Self(
            preferred_block_size
                | (u64::from(replication) << BLOCK_SIZE_BITS)
                | (u64::from(storage_policy) << (BLOCK_SIZE_BITS + REPLICATION_BITS)),
        ))
    }

    pub fn preferred_block_size(self) -> u64 {
        self.0 & BLOCK_SIZE_MASK
    }

    pub fn replication(self) -> u16 {
        ((self.0 >> BLOCK_SIZE_BITS) & REPLICATION_MASK) as u16
    }

    pub fn storage_policy(self) -> u8 {
        ((self.0 >> (BLOCK_SIZE_BITS + REPLICATION_BITS)) & STORAGE_POLICY_MASK) as u8
    }
}

const MODE_BITS: u32 = 16;
const SERIAL_BITS: u32 = 24;
const SERIAL_MASK: u64 = (1 << SERIAL_BITS) - 1;

/// Largest user or group serial a permission word can hold.
pub const MAX_SERIAL: u32 = SERIAL_MASK as u32;

/// Packed permission word.
///
/// Layout, low to high: mode (16 bits), group serial (24 bits), user serial
/// (24 bits). Serials are resolved to names by a
/// [`PermissionResolver`](crate::namespace::PermissionResolver).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PermissionWord(pub u64);

impl PermissionWord {
    pub fn pack(user_serial: u32, group_serial: u32, mode: u16) -> Self {
        let user = u64::from(user_serial) & SERIAL_MASK;
        let group = u64::from(group_serial) & SERIAL_MASK;
        Self((user << (MODE_BITS + SERIAL_BITS)) | (group << MODE_BITS) | u64::from(mode))
    }

    pub fn mode(self) -> u16 {
        (self.0 & 0xffff) as u16
    }

    pub fn group_serial(self) -> u32 {
        ((self.0 >> MODE_BITS) & SERIAL_MASK) as u32
    }

    pub fn user_serial(self) -> u32 {
        ((self.0 >> (MODE_BITS + SERIAL_BITS)) & SERIAL_MASK) as u32
    }
}
