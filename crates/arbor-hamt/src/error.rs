use arbor_store::StoreError;

/// Errors from trie operations.
#[derive(Debug, thiserror::Error)]
pub enum HamtError {
    /// Two distinct keys share all 64 trie-key bits.
    #[error("trie key collision between {first} and {second}")]
    KeyCollision { first: String, second: String },

    /// A persisted trie violates a structural invariant.
    #[error("corrupt trie: {0}")]
    Corrupt(String),

    #[error("store error: {0}")]
    Store(#[from] StoreError),
}

/// Result alias for trie operations.
pub type HamtResult<T> = Result<T, HamtError>;
