//! Model trees for arbor.
//!
//! A tree is a set of [`Node`] records kept in a trie keyed by node id.
//! Each record names its parent and role, its ordered children, and its
//! property and reference values. [`Tree`] is the persisted snapshot;
//! [`GenericModelTree`] adds navigation, mutation and diffing on top of it.
//!
//! # Invariants
//!
//! 1. A child's containment names the parent whose children array holds it.
//! 2. Containment is acyclic and every node is reachable from the root.
//! 3. A children array never holds the same id twice.

pub mod error;
pub mod generic;
pub mod mutation;
pub mod node;
pub mod tree;

pub use error::{ModelError, ModelResult};
pub use generic::GenericModelTree;
pub use mutation::{ModelChangeEvent, MutationParameters, APPEND};
pub use node::{Containment, Node};
pub use tree::{NodesRef, Tree, ROLE_IDS_VERSION, ROLE_NAMES_VERSION};

use arbor_hamt::HamtNode;
use arbor_store::ObjectRegistry;
use arbor_types::NodeId;

/// Register the object kinds of trees keyed by `K`.
pub fn register_objects<K: NodeId>(registry: &mut ObjectRegistry) {
    registry
        .register::<Node<K>>()
        .register::<HamtNode<K, Node<K>>>()
        .register::<Tree<K>>();
}
