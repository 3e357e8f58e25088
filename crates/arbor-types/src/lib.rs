//! Foundation types for the arbor model store.
//!
//! Every other arbor crate depends on `arbor-types`. It defines how objects
//! are named (content hashes), how nodes are named (the [`NodeId`]
//! capability trait), and the field codec all serialized objects share.
//!
//! # Key Types
//!
//! - [`ObjectHash`] -- 44-character content id (SHA-256, URL-safe base64, spliced)
//! - [`NodeId`] -- serialize / deserialize / compare / hash / trie-key capabilities
//! - [`NodeReference`] -- globally unique structured node reference
//! - [`ConceptReference`] -- reference to a node's type

pub mod codec;
pub mod error;
pub mod hash;
pub mod id;
pub mod reference;

pub use error::TypeError;
pub use hash::ObjectHash;
pub use id::{NodeId, ROOT_ID};
pub use reference::{ConceptReference, NodeReference};
