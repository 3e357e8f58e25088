//! Content-addressed object storage for arbor.
//!
//! Every persisted value (node records, trie nodes, trees, versions, history
//! index nodes) is an immutable object keyed by the [`ObjectHash`] of its
//! serialized string. This crate owns the storage contract and everything
//! needed to walk an object graph lazily:
//!
//! - [`ObjectStore`] -- the backend contract, with [`InMemoryObjectStore`]
//! - [`ObjectData`] -- self-describing serialize/deserialize contract
//! - [`ObjectRef`] -- a hash plus a lazily resolved value
//! - [`ObjectGraph`] -- hash-keyed dedup arena, batched loading, persistence
//! - [`Deferred`] -- lazy effect values; nothing is read until executed
//! - [`ObjectRegistry`] -- explicit table of known object kinds
//!
//! # Design Rules
//!
//! 1. Objects are immutable once written (content-addressing guarantees this).
//! 2. Loading is explicit: composed [`Deferred`] values announce the hashes
//!    they need and [`ObjectGraph::execute`] fetches them in batches.
//! 3. Only objects created in memory are ever written; everything loaded from
//!    the store is already there.
//! 4. Store failures surface unchanged; there is no retry at this layer.

pub mod config;
pub mod deferred;
pub mod error;
pub mod graph;
pub mod memory;
pub mod object;
pub mod reference;
pub mod registry;
pub mod traits;

pub use arbor_types::ObjectHash;
pub use config::GraphConfig;
pub use deferred::{Deferred, Many, One, ZeroOrOne};
pub use error::{StoreError, StoreResult};
pub use graph::ObjectGraph;
pub use memory::{InMemoryObjectStore, StoreStats};
pub use object::{malformed, ObjectData, ObjectKind, StoredObject};
pub use reference::{ErasedRef, ObjectRef};
pub use registry::ObjectRegistry;
pub use traits::ObjectStore;
