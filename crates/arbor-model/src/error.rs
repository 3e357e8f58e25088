use arbor_hamt::HamtError;
use arbor_store::StoreError;

/// Errors from node records and model trees.
#[derive(Debug, thiserror::Error)]
pub enum ModelError {
    #[error("node not found: {0}")]
    NodeNotFound(String),

    #[error("node already exists: {0}")]
    NodeExists(String),

    /// The id is reserved and cannot name a node.
    #[error("invalid node id: {0}")]
    InvalidNodeId(String),

    /// A children list names the same id twice.
    #[error("node {node} lists child {child} more than once")]
    DuplicateChild { node: String, child: String },

    /// Role and value arrays of a node differ in length.
    #[error("{what} of node {node}: {roles} roles but {values} values")]
    LengthMismatch {
        node: String,
        what: &'static str,
        roles: usize,
        values: usize,
    },

    /// A node's recorded containment disagrees with its parent.
    #[error("inconsistent containment: {child} is listed under {parent} but is not contained there")]
    InconsistentContainment { parent: String, child: String },

    #[error("moving {child} under {parent} would create a containment cycle")]
    ContainmentCycle { parent: String, child: String },

    #[error("the root node cannot be moved")]
    MoveRoot,

    #[error("the root node cannot be deleted")]
    DeleteRoot,

    #[error("node {0} has no parent")]
    NoParent(String),

    #[error("invalid index {index}: role {role} of {parent} has {size} children")]
    InvalidIndex {
        parent: String,
        role: String,
        index: i32,
        size: usize,
    },

    #[error("trie error: {0}")]
    Hamt(#[from] HamtError),

    #[error("store error: {0}")]
    Store(#[from] StoreError),
}

/// Result alias for model operations.
pub type ModelResult<T> = Result<T, ModelError>;
