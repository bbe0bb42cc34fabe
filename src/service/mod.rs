//! Reference metadata service.
//!
//! An axum service that implements every route the remote client speaks,
//! over an in-memory state table. It backs standalone runs and is the test
//! double for [`RemoteStore`](crate::client::RemoteStore). Nothing it holds
//! survives a restart.

#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]

mod server;
mod state;

pub use server::{router, run_service, serve, ApiError, ServiceState};
pub use state::{MemoryState, StateError};
