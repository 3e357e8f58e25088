use arbor_types::{ObjectHash, TypeError};

use crate::object::ObjectKind;

/// Errors from object store and object graph operations.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// The requested object was not found.
    #[error("object not found: {0}")]
    NotFound(ObjectHash),

    /// Content does not hash to the id it was stored or supplied under.
    #[error("hash mismatch: expected {expected}, computed {computed}")]
    HashMismatch {
        expected: ObjectHash,
        computed: ObjectHash,
    },

    /// The serialized form of an object cannot be decoded.
    #[error("malformed {kind} object: {reason}")]
    Malformed { kind: ObjectKind, reason: String },

    /// A stored object has a different kind than the reader expects.
    #[error("kind mismatch for {hash}: expected {expected}, found {found}")]
    KindMismatch {
        hash: ObjectHash,
        expected: ObjectKind,
        found: ObjectKind,
    },

    /// No registry entry for an object kind.
    #[error("object kind not registered: {0}")]
    UnregisteredKind(ObjectKind),

    /// Failure in a foundation type codec.
    #[error("codec error: {0}")]
    Type(#[from] TypeError),

    /// Invalid configuration.
    #[error("invalid configuration: {0}")]
    Config(String),

    /// Failure reported by a storage backend.
    #[error("backend error: {0}")]
    Backend(String),
}

/// Result alias for store operations.
pub type StoreResult<T> = Result<T, StoreError>;
