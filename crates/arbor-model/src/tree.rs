//! Tree snapshots: a trie root plus the tree's identity.

use arbor_hamt::HamtRef;
use arbor_store::{malformed, ErasedRef, ObjectData, ObjectKind, ObjectRef, StoreResult};
use arbor_types::{codec, NodeId};

use crate::node::Node;

/// Persistence version of trees that store child roles by id.
pub const ROLE_IDS_VERSION: u32 = 3;
/// Persistence version of trees that store child roles by name.
pub const ROLE_NAMES_VERSION: u32 = 2;

/// Root of the node map of one tree.
pub type NodesRef<K> = HamtRef<K, Node<K>>;

/// An immutable snapshot of a tree.
#[derive(Clone, Debug, PartialEq)]
pub struct Tree<K: NodeId> {
    pub tree_id: String,
    pub root: NodesRef<K>,
    pub uses_role_ids: bool,
}

impl<K: NodeId> Tree<K> {
    pub fn new(tree_id: impl Into<String>, root: NodesRef<K>, uses_role_ids: bool) -> Self {
        Self {
            tree_id: tree_id.into(),
            root,
            uses_role_ids,
        }
    }

    pub fn persistence_version(&self) -> u32 {
        if self.uses_role_ids {
            ROLE_IDS_VERSION
        } else {
            ROLE_NAMES_VERSION
        }
    }
}

/// `treeId/version/rootHash`
impl<K: NodeId> ObjectData for Tree<K> {
    const KIND: ObjectKind = ObjectKind::Tree;

    fn serialize(&self) -> String {
        format!(
            "{}{sep}{}{sep}{}",
            codec::escape(Some(&self.tree_id)),
            self.persistence_version(),
            self.root.hash(),
            sep = codec::LEVEL1,
        )
    }

    fn deserialize(input: &str) -> StoreResult<Self> {
        let fields = codec::split_exact(input, codec::LEVEL1, 3)?;
        let uses_role_ids = match fields[1] {
            "3" => true,
            "2" => false,
            other => {
                return Err(malformed(
                    Self::KIND,
                    format!("unknown persistence version {other:?}"),
                ))
            }
        };
        Ok(Self {
            tree_id: codec::unescape_required(fields[0])?,
            root: ObjectRef::parse(fields[2])?,
            uses_role_ids,
        })
    }

    fn containment_refs(&self) -> Vec<ErasedRef> {
        vec![self.root.erase()]
    }
}
