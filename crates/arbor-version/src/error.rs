use arbor_model::ModelError;
use arbor_store::{ObjectHash, StoreError};

/// Errors from versions and operation logs.
#[derive(Debug, thiserror::Error)]
pub enum VersionError {
    /// A version violates one of its structural rules.
    #[error("invalid version: {0}")]
    InvalidVersion(String),

    #[error("cannot replay history across merge version {0}")]
    MergeNotSupported(ObjectHash),

    /// The operation cannot be expressed as node-level mutations.
    #[error("cannot replay history containing {0} operations")]
    OperationNotSupported(&'static str),

    #[error("{0} is not an ancestor of the version")]
    NotAnAncestor(ObjectHash),

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("model error: {0}")]
    Model(#[from] ModelError),

    #[error("store error: {0}")]
    Store(#[from] StoreError),
}

/// Result alias for version operations.
pub type VersionResult<T> = Result<T, VersionError>;
