//! Replaying a linear stretch of history as node mutations.

use std::sync::Arc;

use arbor_model::MutationParameters;
use arbor_store::{Deferred, Many, ObjectGraph, ObjectHash};
use arbor_types::NodeId;

use crate::error::VersionError;
use crate::version::{Version, VersionRef};

/// Mutations turning the tree of version `old` into the tree of `version`,
/// oldest first.
///
/// `old` must be reachable from `version` through base (or legacy previous)
/// links alone. Merge versions on the way, and operations that cannot be
/// expressed as node mutations, fail instead of being approximated.
pub fn history_as_mutation_parameters<K: NodeId>(
    graph: &ObjectGraph,
    version: &VersionRef<K>,
    old: ObjectHash,
) -> Many<MutationParameters<K>, VersionError> {
    let graph_ = graph.clone();
    path_to(graph.clone(), version.clone(), old, Vec::new()).and_then(move |path| {
        let logs = path.iter().rev().map(|v| v.operations(&graph_)).collect();
        Deferred::join_all(logs).try_map(|logs| {
            let mut mutations = Vec::new();
            for op in logs.into_iter().flatten() {
                if let Some(mutation) = op.to_mutation()? {
                    mutations.push(mutation);
                }
            }
            Ok(mutations)
        })
    })
}

/// Versions from `version` back to, but excluding, `old`; newest first.
fn path_to<K: NodeId>(
    graph: ObjectGraph,
    version: VersionRef<K>,
    old: ObjectHash,
    mut path: Vec<Arc<Version<K>>>,
) -> Many<Arc<Version<K>>, VersionError> {
    if version.hash() == old {
        return Deferred::ready(path);
    }
    let hash = version.hash();
    let next = graph.clone();
    graph.load(&version).err_into().and_then(move |data| {
        if data.is_merge() {
            return Deferred::failed(VersionError::MergeNotSupported(hash));
        }
        let Some(parent) = data.history_parent().cloned() else {
            return Deferred::failed(VersionError::NotAnAncestor(old));
        };
        path.push(data);
        path_to(next, parent, old, path)
    })
}
