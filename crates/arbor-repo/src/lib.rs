//! Repository facade for arbor.
//!
//! A [`Repository`] owns the current tree, the head [`arbor_version::Version`]
//! and the history index over every version committed so far. Committing a
//! batch of mutations derives the new tree, records the operations in a new
//! version based on the head, adds that version to the history index and
//! only then writes the new objects to the store.

pub mod commit;
pub mod config;
pub mod error;
pub mod repository;

pub use commit::{CommitRequest, CommitResult, VersionSummary};
pub use config::RepositoryConfig;
pub use error::{RepoError, RepoResult};
pub use repository::{HistoryIndexRef, Repository};

// Re-export the types needed to drive a repository.
pub use arbor_model::{GenericModelTree, ModelChangeEvent, MutationParameters, APPEND};
pub use arbor_store::{InMemoryObjectStore, ObjectGraph, ObjectHash, ObjectRegistry, ObjectStore};
pub use arbor_types::{ConceptReference, NodeId, NodeReference, ROOT_ID};
pub use arbor_version::{Operation, Version, VersionRef};

/// Register every object kind a repository keyed by `K` stores.
pub fn register_objects<K: NodeId>(registry: &mut ObjectRegistry) {
    arbor_model::register_objects::<K>(registry);
    arbor_version::register_objects::<K>(registry);
    arbor_history::register_objects::<Version<K>>(registry);
}
