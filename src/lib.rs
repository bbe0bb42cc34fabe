//! statestore - disaggregated namespace metadata for a distributed filesystem
//! namenode.
//!
//! The namenode keeps its namespace tree (files, directories) and block
//! metadata in an external store instead of its own heap. This crate is the
//! layer between the two.
//!
//! # Features
//!
//! - **Metadata model**: a tagged union over file and directory entries, with
//!   block and replica records.
//! - **Store contract**: [`MetadataStore`], the operation set every backing
//!   store implements.
//! - **Remote client**: [`RemoteStore`](client::RemoteStore) speaks HTTP/JSON to
//!   a metadata service.
//! - **Oracle**: [`TimestampOracle`](oracle::TimestampOracle), the only source
//!   of entry ids, block ids and generation stamps.
//! - **Conversion**: [`convert`] moves entries to and from live namespace
//!   nodes and computes minimal update payloads.
//! - **Reference service**: [`service`], an in-memory implementation of the
//!   metadata service for standalone runs and tests.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │  Namenode: live INode tree | permission resolver             │
//! ├──────────────────────────────────────────────────────────────┤
//! │  Conversion: materialize | snapshot | diff                   │
//! ├──────────────────────────────────────────────────────────────┤
//! │  Store contract + oracle                                     │
//! ├───────────────────────────────┬──────────────────────────────┤
//! │  RemoteStore (HTTP client)    │  LocalStore (in-process)     │
//! ├───────────────────────────────┴──────────────────────────────┤
//! │  Metadata service (reference: axum + in-memory state)        │
//! └──────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Quick Start
//!
//! ```no_run
//! use statestore::config::StoreConfig;
//! use statestore::oracle::TimestampOracle;
//! use statestore::store::{open_store, MakeDirectory};
//! use statestore::types::{PermissionWord, ROOT_ID};
//!
//! #[tokio::main]
//! async fn main() -> statestore::Result<()> {
//!     let store = open_store(&StoreConfig::development())?;
//!
//!     let id = store.next().await?;
//!     let home = store
//!         .mkdir(MakeDirectory {
//!             parent_id: ROOT_ID,
//!             id,
//!             name: "home".to_string(),
//!             permission: PermissionWord::pack(0, 0, 0o755),
//!             modification_time: 0,
//!             access_time: 0,
//!         })
//!         .await?;
//!
//!     for child in store.get_children(home.attrs.id).await? {
//!         println!("{}", child.name()?);
//!     }
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod error;
pub mod types;

pub mod client;
pub mod convert;
pub mod mock;
pub mod model;
pub mod namespace;
pub mod oracle;
pub mod service;
pub mod store;

pub mod cli;
pub mod observability;
pub mod shutdown;

// Re-exports
pub use error::{Result, StoreError};
pub use model::{ChangedFields, NamespaceEntry, Snapshot};
pub use store::{open_store, MetadataStore};
