//! History index for arbor.
//!
//! A balanced binary tree over the versions of a repository, ordered by
//! time. Ranges aggregate the size, time span and authors of everything
//! below them, so "the latest N versions" and "versions between two times"
//! are answered in logarithmic time. Appending a version merges its
//! one-version index into the existing one.

pub mod error;
pub mod node;
pub mod ops;
pub mod query;

pub use error::{HistoryError, HistoryResult};
pub use node::{HistoryIndexNode, HistoryLeaf, HistoryRange, HistoryRef};
pub use ops::{concat, merge, rebalance, split_at_interval};
pub use query::{range, versions, versions_between, versions_reversed};

use arbor_store::{ObjectData, ObjectRegistry};

/// Register history index nodes over versions of type `V`.
pub fn register_objects<V: ObjectData>(registry: &mut ObjectRegistry) {
    registry.register::<HistoryIndexNode<V>>();
}
