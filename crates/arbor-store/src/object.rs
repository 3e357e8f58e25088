use std::fmt;

use arbor_types::ObjectHash;
use serde::{Deserialize, Serialize};

use crate::error::{StoreError, StoreResult};
use crate::reference::ErasedRef;

/// The kind of object stored.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum ObjectKind {
    /// Immutable node record.
    Node,
    /// Trie node (leaf, internal or single).
    HamtNode,
    /// Tree snapshot binding a trie root.
    Tree,
    /// Commit in the version DAG.
    Version,
    /// Externalized operation log of a version.
    OperationsList,
    /// History index node (leaf or range).
    HistoryIndex,
}

impl fmt::Display for ObjectKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Node => write!(f, "node"),
            Self::HamtNode => write!(f, "hamt"),
            Self::Tree => write!(f, "tree"),
            Self::Version => write!(f, "version"),
            Self::OperationsList => write!(f, "operations"),
            Self::HistoryIndex => write!(f, "history"),
        }
    }
}

/// A stored object: kind tag + serialized string.
///
/// The hash covers `data` only; the kind is a storage-side hint that lets
/// generic walkers pick a deserializer.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StoredObject {
    pub kind: ObjectKind,
    pub data: String,
}

impl StoredObject {
    pub fn new(kind: ObjectKind, data: impl Into<String>) -> Self {
        Self {
            kind,
            data: data.into(),
        }
    }

    /// Compute the content-addressed hash of this object.
    pub fn compute_hash(&self) -> ObjectHash {
        ObjectHash::of(&self.data)
    }

    /// Size of the serialized form in bytes.
    pub fn size(&self) -> usize {
        self.data.len()
    }
}

/// Self-describing serialization contract of every persisted value.
///
/// Implementations must be canonical: equal values serialize to equal
/// strings, and `deserialize(serialize(v)) == v`. Values are plain data, so
/// generic containers of them can be cloned, compared and printed.
pub trait ObjectData: Clone + fmt::Debug + PartialEq + Send + Sync + Sized + 'static {
    const KIND: ObjectKind;

    fn serialize(&self) -> String;

    fn deserialize(input: &str) -> StoreResult<Self>;

    /// Outgoing references this object owns, for reachability walks and
    /// persistence of newly created objects.
    fn containment_refs(&self) -> Vec<ErasedRef> {
        Vec::new()
    }

    fn hash(&self) -> ObjectHash {
        ObjectHash::of(&self.serialize())
    }
}

/// Shorthand for a [`StoreError::Malformed`] of kind `kind`.
pub fn malformed(kind: ObjectKind, reason: impl fmt::Display) -> StoreError {
    StoreError::Malformed {
        kind,
        reason: reason.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hash_covers_data_only() {
        let a = StoredObject::new(ObjectKind::Node, "1/%00/0/%00///");
        let b = StoredObject::new(ObjectKind::Tree, "1/%00/0/%00///");
        assert_eq!(a.compute_hash(), b.compute_hash());
        assert_eq!(a.compute_hash(), ObjectHash::of("1/%00/0/%00///"));
    }

    #[test]
    fn kind_display() {
        assert_eq!(ObjectKind::HamtNode.to_string(), "hamt");
        assert_eq!(ObjectKind::HistoryIndex.to_string(), "history");
    }

    #[test]
    fn malformed_message_names_kind() {
        let err = malformed(ObjectKind::Version, "missing tree");
        assert_eq!(err.to_string(), "malformed version object: missing tree");
    }
}
