//! Error types for the namespace metadata store.
//!
//! This module provides a unified error type [`StoreError`] for every store,
//! oracle and conversion operation, along with a convenient [`Result`] alias.
//!
//! # Error Categories
//!
//! - **Transport**: the backing service could not be reached or timed out
//! - **Remote**: the backing service answered with a failure status
//! - **Decode**: a response body or a stored name could not be decoded
//! - **Contract violation**: the store and the model disagree (unknown variant
//!   tag, impossible shape); always fatal
//!
//! Logical absence is not an error. Lookups return `Option` and listings
//! return an empty `Vec` when nothing is stored.
//!
//! # Example
//!
//! ```rust
//! use statestore::error::{Result, StoreError};
//!
//! fn decode_name(bytes: &[u8]) -> Result<&str> {
//!     std::str::from_utf8(bytes)
//!         .map_err(|e| StoreError::Decode(format!("entry name: {}", e)))
//! }
//!
//! let err = decode_name(&[0xff, 0xfe]).unwrap_err();
//! assert!(matches!(err, StoreError::Decode(_)));
//! assert!(!err.is_contract_violation());
//! ```

use std::io;
use thiserror::Error;

/// Main error type for store operations.
#[derive(Error, Debug)]
pub enum StoreError {
    // Reaching the backing service
    #[error("Transport failure: {0}")]
    Transport(String),

    #[error("Remote error (status {status}, code {code}): {message}")]
    Remote {
        status: u16,
        code: i32,
        message: String,
    },

    // Payload errors
    #[error("Decode failure: {0}")]
    Decode(String),

    #[error("Contract violation: {0}")]
    ContractViolation(String),

    /// A mutation addressed an entity the backing store does not hold.
    #[error("Mutation target missing: {0}")]
    TargetMissing(String),

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    // Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Invalid configuration: {field}: {reason}")]
    InvalidConfig { field: String, reason: String },

    // External errors
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl StoreError {
    /// True when the store and the model disagree about the shape of a record.
    pub fn is_contract_violation(&self) -> bool {
        matches!(self, StoreError::ContractViolation(_))
    }

    /// True when a failed mutation may or may not have been applied.
    ///
    /// Callers must re-read authoritative state before retrying such a call.
    pub fn outcome_unknown(&self) -> bool {
        match self {
            StoreError::Transport(_) => true,
            StoreError::Remote { status, .. } => *status >= 500,
            _ => false,
        }
    }

    /// HTTP status carried by a remote failure.
    pub fn status(&self) -> Option<u16> {
        match self {
            StoreError::Remote { status, .. } => Some(*status),
            _ => None,
        }
    }

    /// Short label used for metrics and logs.
    pub fn kind(&self) -> &'static str {
        match self {
            StoreError::Transport(_) => "transport",
            StoreError::Remote { .. } => "remote",
            StoreError::Decode(_) => "decode",
            StoreError::ContractViolation(_) => "contract_violation",
            StoreError::TargetMissing(_) => "target_missing",
            StoreError::InvalidArgument(_) => "invalid_argument",
            StoreError::Config(_) | StoreError::InvalidConfig { .. } => "config",
            StoreError::Io(_) => "io",
            StoreError::Serialization(_) => "serialization",
            StoreError::Internal(_) => "internal",
        }
    }
}

impl From<serde_json::Error> for StoreError {
    fn from(e: serde_json::Error) -> Self {
        StoreError::Serialization(e.to_string())
    }
}

impl From<reqwest::Error> for StoreError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_decode() {
            StoreError::Decode(e.to_string())
        } else {
            StoreError::Transport(e.to_string())
        }
    }
}

/// Result type alias for store operations.
pub type Result<T> = std::result::Result<T, StoreError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_outcome_unknown() {
        assert!(StoreError::Transport("reset".into()).outcome_unknown());
        assert!(StoreError::Remote {
            status: 503,
            code: 503,
            message: "closed".into()
        }
        .outcome_unknown());
        assert!(!StoreError::Remote {
            status: 400,
            code: 400,
            message: "bad id".into()
        }
        .outcome_unknown());
        assert!(!StoreError::Decode("bad".into()).outcome_unknown());
    }

    #[test]
    fn test_status_and_kind() {
        let err = StoreError::Remote {
            status: 409,
            code: 409,
            message: "stale generation".into(),
        };
        assert_eq!(err.status(), Some(409));
        assert_eq!(err.kind(), "remote");
        assert_eq!(StoreError::ContractViolation("tag 7".into()).kind(), "contract_violation");
        assert!(StoreError::ContractViolation("tag 7".into()).is_contract_violation());
        assert_eq!(StoreError::Internal("x".into()).status(), None);
    }

    #[test]
    fn test_display() {
        let err = StoreError::InvalidConfig {
            field: "remote.endpoint".into(),
            reason: "must be absolute".into(),
        };
        assert_eq!(
            err.to_string(),
            "Invalid configuration: remote.endpoint: must be absolute"
        );
    }
}
