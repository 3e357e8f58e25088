//! Structural comparison of two tries.

use std::sync::Arc;

use arbor_store::{Deferred, ErasedRef, ObjectData, ObjectGraph, ObjectRef};
use arbor_types::NodeId;

use crate::node::{HamtInternal, HamtNode, HamtRef, BITS_PER_LEVEL, ENTRIES_PER_LEVEL};
use crate::ops::{self, load, Step};

/// One difference between two versions of a map.
#[derive(Clone, Debug, PartialEq)]
pub enum MapChange<K, V> {
    Added { key: K, value: ObjectRef<V> },
    Removed { key: K, value: ObjectRef<V> },
    Changed { key: K, old: ObjectRef<V>, new: ObjectRef<V> },
}

impl<K, V> MapChange<K, V> {
    pub fn key(&self) -> &K {
        match self {
            Self::Added { key, .. } | Self::Removed { key, .. } | Self::Changed { key, .. } => key,
        }
    }
}

/// Changes turning `old` into `new`. With `changes_only`, keys present on
/// one side only are not reported.
pub(crate) fn get_changes<K: NodeId, V: ObjectData>(
    graph: &ObjectGraph,
    new: HamtRef<K, V>,
    old: HamtRef<K, V>,
    shift: u32,
    changes_only: bool,
) -> Step<Vec<MapChange<K, V>>> {
    if new.hash() == old.hash() {
        return Deferred::ready(Vec::new());
    }
    let graph_ = graph.clone();
    load(graph, &new)
        .zip(load(graph, &old))
        .and_then(move |(new, old)| compare(&graph_, &new, &old, shift, changes_only))
}

fn compare<K: NodeId, V: ObjectData>(
    graph: &ObjectGraph,
    new: &HamtNode<K, V>,
    old: &HamtNode<K, V>,
    shift: u32,
    changes_only: bool,
) -> Step<Vec<MapChange<K, V>>> {
    match (new, old) {
        (HamtNode::Leaf(leaf), _) => {
            let key = leaf.key.clone();
            let value = leaf.value.clone();
            if changes_only {
                return ops::get(graph, old, key.clone(), shift).map(move |previous| match previous {
                    Some(previous) if previous != value => vec![MapChange::Changed {
                        key,
                        old: previous,
                        new: value,
                    }],
                    _ => Vec::new(),
                });
            }
            ops::entries(graph, old).map(move |previous| {
                let mut changes = Vec::new();
                let mut found = false;
                for (k, v) in previous {
                    if k == key {
                        found = true;
                        if v != value {
                            changes.push(MapChange::Changed {
                                key: k,
                                old: v,
                                new: value.clone(),
                            });
                        }
                    } else {
                        changes.push(MapChange::Removed { key: k, value: v });
                    }
                }
                if !found {
                    changes.push(MapChange::Added { key, value });
                }
                changes
            })
        }
        (_, HamtNode::Leaf(leaf)) => {
            let key = leaf.key.clone();
            let value = leaf.value.clone();
            if changes_only {
                return ops::get(graph, new, key.clone(), shift).map(move |current| match current {
                    Some(current) if current != value => vec![MapChange::Changed {
                        key,
                        old: value,
                        new: current,
                    }],
                    _ => Vec::new(),
                });
            }
            ops::entries(graph, new).map(move |current| {
                let mut changes = Vec::new();
                let mut found = false;
                for (k, v) in current {
                    if k == key {
                        found = true;
                        if v != value {
                            changes.push(MapChange::Changed {
                                key: k,
                                old: value.clone(),
                                new: v,
                            });
                        }
                    } else {
                        changes.push(MapChange::Added { key: k, value: v });
                    }
                }
                if !found {
                    changes.push(MapChange::Removed { key, value });
                }
                changes
            })
        }
        (HamtNode::Internal(new_internal), HamtNode::Internal(old_internal)) => {
            let below = shift + BITS_PER_LEVEL;
            let mut parts = Vec::new();
            for slot in 0..ENTRIES_PER_LEVEL {
                match (new_internal.child(slot), old_internal.child(slot)) {
                    (Some(n), Some(o)) if n.hash() != o.hash() => {
                        parts.push(get_changes(graph, n.clone(), o.clone(), below, changes_only));
                    }
                    (Some(n), None) if !changes_only => {
                        parts.push(ops::entries_ref(graph, n).map(|added| {
                            added
                                .into_iter()
                                .map(|(key, value)| MapChange::Added { key, value })
                                .collect()
                        }));
                    }
                    (None, Some(o)) if !changes_only => {
                        parts.push(ops::entries_ref(graph, o).map(|removed| {
                            removed
                                .into_iter()
                                .map(|(key, value)| MapChange::Removed { key, value })
                                .collect()
                        }));
                    }
                    _ => {}
                }
            }
            Deferred::join_all(parts).map(|parts| parts.into_iter().flatten().collect())
        }
        (HamtNode::Internal(_), HamtNode::Single(old_single)) => compare(
            graph,
            new,
            &HamtNode::Internal(old_single.expand()),
            shift,
            changes_only,
        ),
        (HamtNode::Single(new_single), HamtNode::Single(old_single))
            if new_single.num_levels == old_single.num_levels
                && new_single.bits == old_single.bits =>
        {
            get_changes(
                graph,
                new_single.child.clone(),
                old_single.child.clone(),
                shift + new_single.num_levels * BITS_PER_LEVEL,
                changes_only,
            )
        }
        (HamtNode::Single(new_single), _) => compare(
            graph,
            &HamtNode::Internal(new_single.expand()),
            old,
            shift,
            changes_only,
        ),
    }
}

/// Objects reachable from `new` that `old` does not already hold at the
/// same position, values included. `old = None` means everything.
///
/// `old_stored` is false when `old` is a node synthesized while aligning
/// shapes (a split `Single` run); such a node is not in the store even if
/// `new` happens to equal it, although its children are.
pub(crate) fn object_diff<K: NodeId, V: ObjectData>(
    graph: &ObjectGraph,
    new: HamtRef<K, V>,
    old: Option<HamtRef<K, V>>,
    old_stored: bool,
    shift: u32,
) -> Step<Vec<ErasedRef>> {
    let Some(old) = old else {
        return ops::all_objects(graph, &new, None);
    };
    if new.hash() == old.hash() {
        return Deferred::ready(if old_stored { Vec::new() } else { vec![new.erase()] });
    }
    let graph_ = graph.clone();
    load(graph, &new)
        .zip(load(graph, &old))
        .and_then(move |(new_node, old_node)| {
            diff_nodes(&graph_, new, new_node, old, old_stored, old_node, shift)
        })
}

fn diff_nodes<K: NodeId, V: ObjectData>(
    graph: &ObjectGraph,
    new: HamtRef<K, V>,
    new_node: Arc<HamtNode<K, V>>,
    old: HamtRef<K, V>,
    old_stored: bool,
    old_node: Arc<HamtNode<K, V>>,
    shift: u32,
) -> Step<Vec<ErasedRef>> {
    match (&*new_node, &*old_node) {
        (HamtNode::Leaf(leaf), _) => {
            // Leaves are position independent: if `old` maps the same key to
            // the same value, this exact leaf object is already stored.
            let value = leaf.value.clone();
            ops::get(graph, &old_node, leaf.key.clone(), shift).map(move |previous| {
                if previous.as_ref() == Some(&value) {
                    Vec::new()
                } else {
                    vec![new.erase(), value.erase()]
                }
            })
        }
        (_, HamtNode::Leaf(_)) => ops::all_objects(graph, &new, Some(old.hash())),
        (HamtNode::Internal(internal), _) => {
            let (old_internal, children_stored) = match &*old_node {
                HamtNode::Internal(o) => (o.clone(), true),
                HamtNode::Single(o) => (o.expand(), o.num_levels == 1),
                HamtNode::Leaf(_) => (HamtInternal::empty(), true),
            };
            let below = shift + BITS_PER_LEVEL;
            let mut parts = vec![Deferred::ready(vec![new.erase()])];
            for (slot, child) in internal.slots() {
                parts.push(object_diff(
                    graph,
                    child.clone(),
                    old_internal.child(slot).cloned(),
                    children_stored,
                    below,
                ));
            }
            Deferred::join_all(parts).map(|parts| parts.into_iter().flatten().collect())
        }
        (HamtNode::Single(single), _) => {
            let own = new.erase();
            let child = single.child.clone();
            let below = shift + single.num_levels * BITS_PER_LEVEL;
            let graph_ = graph.clone();
            let (levels, bits) = (single.num_levels, single.bits);
            ops::descend_path(graph, old, old_stored, &old_node, shift, levels, bits)
                .and_then(move |old_child| {
                    let (old_child, stored) = match old_child {
                        Some((node, stored)) => (Some(node), stored),
                        None => (None, true),
                    };
                    object_diff(&graph_, child, old_child, stored, below)
                })
                .map(move |mut objects| {
                    objects.insert(0, own);
                    objects
                })
        }
    }
}
