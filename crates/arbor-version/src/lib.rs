//! Versions of arbor trees.
//!
//! A [`Version`] binds a tree snapshot to the version it was derived from
//! and to the [`Operation`] log that leads there. Merge versions also record
//! the two versions they join, so versions form a DAG. Short logs are kept
//! inline; longer ones move to a separate [`OperationsList`] object.
//!
//! [`history_as_mutation_parameters`] turns a linear stretch of that DAG
//! back into the node mutations that replay it.

pub mod builder;
pub mod config;
pub mod error;
pub mod operation;
pub mod replay;
pub mod version;

pub use builder::VersionBuilder;
pub use config::VersionConfig;
pub use error::{VersionError, VersionResult};
pub use operation::Operation;
pub use replay::history_as_mutation_parameters;
pub use version::{OperationsList, Version, VersionOperations, VersionRef};

use arbor_store::ObjectRegistry;
use arbor_types::NodeId;

/// Register the object kinds of versions over trees keyed by `K`.
pub fn register_objects<K: NodeId>(registry: &mut ObjectRegistry) {
    registry.register::<Version<K>>().register::<OperationsList<K>>();
}
