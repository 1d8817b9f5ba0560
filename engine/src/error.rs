//! Error types for the magsync engine.

use crate::{CollectionName, RecordKey, SchemaVersion};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// All possible errors from the magsync engine.
///
/// Store and transport implementations live outside this crate, so their
/// failures cross the trait seam as strings.
#[derive(Debug, Error, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Error {
    // Pass-level errors
    #[error("remote state unreachable: {0}")]
    RemoteUnreachable(String),

    #[error("schema upgrade to version {target} failed: {reason}")]
    SchemaUpgradeFailed {
        target: SchemaVersion,
        reason: String,
    },

    // Collection-level errors
    #[error("transaction on '{collection}' failed: {reason}")]
    TransactionFailed {
        collection: CollectionName,
        reason: String,
    },

    #[error("record '{key}' already exists in '{collection}'")]
    RecordConflict {
        collection: CollectionName,
        key: RecordKey,
    },

    #[error("fetching '{collection}' failed: {reason}")]
    FetchFailed {
        collection: CollectionName,
        reason: String,
    },

    #[error("invalid collection name: {0:?}")]
    InvalidCollectionName(String),

    // Store errors
    #[error("collection not found: {0}")]
    CollectionNotFound(CollectionName),

    #[error("collection already exists: {0}")]
    CollectionExists(CollectionName),

    #[error("record has no usable '{key_path}' identifier")]
    MissingIdentifier { key_path: String },

    #[error("schema version mismatch: expected {expected}, got {actual}")]
    SchemaVersionMismatch {
        expected: SchemaVersion,
        actual: SchemaVersion,
    },

    #[error("store error: {0}")]
    Store(String),

    // Transport errors
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("invalid response: {0}")]
    InvalidResponse(String),
}

impl Error {
    /// Whether this error means the remote could not be reached at all.
    pub fn is_offline(&self) -> bool {
        matches!(self, Error::RemoteUnreachable(_))
    }

    /// Wrap a store-level failure as a failed transaction on `collection`.
    ///
    /// Conflicts and identifier errors are kept as they are so callers can
    /// tell a bad operation log from a broken store.
    pub fn in_transaction(self, collection: &str) -> Self {
        match self {
            err @ (Error::RecordConflict { .. }
            | Error::MissingIdentifier { .. }
            | Error::TransactionFailed { .. }) => err,
            other => Error::TransactionFailed {
                collection: collection.to_string(),
                reason: other.to_string(),
            },
        }
    }
}

/// Result type for engine operations.
pub type Result<T> = std::result::Result<T, Error>;
