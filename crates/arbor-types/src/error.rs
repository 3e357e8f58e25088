use thiserror::Error;

/// Errors produced by type operations.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum TypeError {
    #[error("invalid object hash: {0}")]
    InvalidHash(String),

    #[error("invalid node id: {0}")]
    InvalidNodeId(String),

    #[error("invalid escape sequence in {0:?}")]
    InvalidEscape(String),

    #[error("invalid field count: expected {expected}, got {actual}")]
    FieldCount { expected: usize, actual: usize },
}
