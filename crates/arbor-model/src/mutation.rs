//! Mutation requests and change events of model trees.

use arbor_types::{ConceptReference, NodeReference};

/// Index meaning "after the last child in the role".
pub const APPEND: i32 = -1;

/// One requested change to a tree.
///
/// Child positions are indexes among the children in `role`, with
/// [`APPEND`] for the end.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum MutationParameters<K> {
    /// Create new nodes under `parent`.
    AddNew {
        parent: K,
        role: Option<String>,
        index: i32,
        nodes: Vec<(K, Option<ConceptReference>)>,
    },
    /// Move existing nodes under `parent`, one after the other.
    Move {
        parent: K,
        role: Option<String>,
        index: i32,
        children: Vec<K>,
    },
    Property {
        node: K,
        role: String,
        value: Option<String>,
    },
    Reference {
        node: K,
        role: String,
        target: Option<NodeReference>,
    },
    Concept {
        node: K,
        concept: Option<ConceptReference>,
    },
    /// Delete a node and everything below it.
    Remove { node: K },
}

impl<K> MutationParameters<K> {
    /// The node the mutation is addressed to: the parent for child
    /// mutations, the changed node otherwise.
    pub fn node(&self) -> &K {
        match self {
            Self::AddNew { parent, .. } | Self::Move { parent, .. } => parent,
            Self::Property { node, .. }
            | Self::Reference { node, .. }
            | Self::Concept { node, .. }
            | Self::Remove { node } => node,
        }
    }
}

/// A difference between two snapshots of a tree.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum ModelChangeEvent<K> {
    NodeAdded { node: K },
    NodeRemoved { node: K },
    /// Parent or role in parent changed.
    ContainmentChanged { node: K },
    ConceptChanged { node: K },
    PropertyChanged { node: K, role: String },
    ReferenceChanged { node: K, role: String },
    /// Membership or order of the children of `parent` in `role` changed.
    ChildrenChanged { parent: K, role: Option<String> },
}

impl<K> ModelChangeEvent<K> {
    pub fn node(&self) -> &K {
        match self {
            Self::NodeAdded { node }
            | Self::NodeRemoved { node }
            | Self::ContainmentChanged { node }
            | Self::ConceptChanged { node }
            | Self::PropertyChanged { node, .. }
            | Self::ReferenceChanged { node, .. } => node,
            Self::ChildrenChanged { parent, .. } => parent,
        }
    }
}

/// Display form of a child role.
pub(crate) fn role_name(role: Option<&str>) -> String {
    role.unwrap_or("<default>").to_owned()
}
