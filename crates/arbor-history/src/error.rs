use arbor_store::StoreError;

/// Errors from history index operations.
#[derive(Debug, thiserror::Error)]
pub enum HistoryError {
    /// Index nodes that cannot be combined as requested.
    #[error("history index invariant violated: {0}")]
    InvariantViolation(String),

    #[error("unsupported history index operation: {0}")]
    Unsupported(&'static str),

    #[error("invalid interval of {0} seconds")]
    InvalidInterval(i64),

    #[error("store error: {0}")]
    Store(#[from] StoreError),
}

/// Result alias for history index operations.
pub type HistoryResult<T> = Result<T, HistoryError>;
