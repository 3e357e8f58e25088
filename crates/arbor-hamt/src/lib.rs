//! Persistent hash array mapped trie (HAMT) for arbor.
//!
//! Maps node ids to content-addressed references. Each level consumes five
//! bits of the id's 64-bit trie key. Three node kinds exist:
//!
//! - [`HamtNode::Leaf`] -- one key/value pair
//! - [`HamtNode::Internal`] -- up to 32 children, addressed through a bitmap
//! - [`HamtNode::Single`] -- a run of 1..=13 levels that all keys share
//!
//! The shape of a trie is a function of its key set alone: empty subtrees
//! disappear, one-key subtrees are leaves, and single-child internal nodes
//! collapse into `Single` runs. Equal contents therefore hash equally,
//! whatever sequence of operations produced them.
//!
//! All operations return [`arbor_store::Deferred`] values; loads of sibling
//! subtrees are fetched in one batch per level.

pub mod diff;
pub mod error;
pub mod map;
pub mod node;
mod ops;

pub use diff::MapChange;
pub use error::{HamtError, HamtResult};
pub use map::HamtMap;
pub use node::{
    HamtInternal, HamtLeaf, HamtNode, HamtRef, HamtSingle, BITS_PER_LEVEL, ENTRIES_PER_LEVEL,
    MAX_LEVELS,
};
