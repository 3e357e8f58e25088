//! Lookup, bulk update and traversal over trie nodes.
//!
//! Every function here is shift-relative: `shift` is the number of key bits
//! consumed above `node`. Results are canonical (see the crate docs) as long
//! as the input nodes are.

use std::collections::BTreeMap;
use std::sync::Arc;

use arbor_store::{Deferred, ErasedRef, ObjectData, ObjectGraph, ObjectHash, ObjectRef};
use arbor_types::NodeId;

use crate::error::HamtError;
use crate::node::{
    level_index, level_mask, path_bits, HamtInternal, HamtLeaf, HamtNode, HamtRef, HamtSingle,
    BITS_PER_LEVEL, MAX_SHIFT,
};

pub(crate) type Step<T> = Deferred<T, HamtError>;

/// A pending write; `None` deletes the key.
pub(crate) type Entry<K, V> = (K, Option<ObjectRef<V>>);

pub(crate) fn load<K: NodeId, V: ObjectData>(
    graph: &ObjectGraph,
    node: &HamtRef<K, V>,
) -> Step<Arc<HamtNode<K, V>>> {
    graph.load(node).err_into()
}

/// Load `child` and continue with `f` one level further down.
fn descend<K, V, T, F>(graph: &ObjectGraph, child: &HamtRef<K, V>, shift: u32, f: F) -> Step<T>
where
    K: NodeId,
    V: ObjectData,
    T: Send + 'static,
    F: FnOnce(&ObjectGraph, &HamtNode<K, V>, u32) -> Step<T> + Send + 'static,
{
    let graph_ = graph.clone();
    load(graph, child).and_then(move |node| f(&graph_, &node, shift))
}

fn flatten<T: Send + 'static>(parts: Vec<Step<Vec<T>>>) -> Step<Vec<T>> {
    Deferred::join_all(parts).map(|parts| parts.into_iter().flatten().collect())
}

// ---------------------------------------------------------------------------
// Lookup
// ---------------------------------------------------------------------------

pub(crate) fn get<K: NodeId, V: ObjectData>(
    graph: &ObjectGraph,
    node: &HamtNode<K, V>,
    key: K,
    shift: u32,
) -> Step<Option<ObjectRef<V>>> {
    match node {
        HamtNode::Leaf(leaf) => Deferred::ready((leaf.key == key).then(|| leaf.value.clone())),
        HamtNode::Internal(internal) => match internal.child(level_index(key.trie_key(), shift)) {
            None => Deferred::ready(None),
            Some(child) => descend(graph, child, shift + BITS_PER_LEVEL, move |g, n, s| {
                get(g, n, key, s)
            }),
        },
        HamtNode::Single(single) => {
            if !single.matches(&key, shift) {
                return Deferred::ready(None);
            }
            let below = shift + single.num_levels * BITS_PER_LEVEL;
            descend(graph, &single.child, below, move |g, n, s| get(g, n, key, s))
        }
    }
}

/// Look up many keys at once. Keys are grouped by slot so every subtree is
/// visited once, and sibling subtrees load in the same batch.
pub(crate) fn get_all<K: NodeId, V: ObjectData>(
    graph: &ObjectGraph,
    node: &HamtNode<K, V>,
    keys: Vec<K>,
    shift: u32,
) -> Step<Vec<(K, ObjectRef<V>)>> {
    if keys.is_empty() {
        return Deferred::ready(Vec::new());
    }
    match node {
        HamtNode::Leaf(leaf) => {
            let found = keys.contains(&leaf.key);
            Deferred::ready(if found {
                vec![(leaf.key.clone(), leaf.value.clone())]
            } else {
                Vec::new()
            })
        }
        HamtNode::Internal(internal) => {
            let mut groups: BTreeMap<usize, Vec<K>> = BTreeMap::new();
            for key in keys {
                groups.entry(level_index(key.trie_key(), shift)).or_default().push(key);
            }
            let parts = groups
                .into_iter()
                .filter_map(|(slot, group)| {
                    internal.child(slot).map(|child| {
                        descend(graph, child, shift + BITS_PER_LEVEL, move |g, n, s| {
                            get_all(g, n, group, s)
                        })
                    })
                })
                .collect();
            flatten(parts)
        }
        HamtNode::Single(single) => {
            let matching: Vec<K> = keys.into_iter().filter(|k| single.matches(k, shift)).collect();
            if matching.is_empty() {
                return Deferred::ready(Vec::new());
            }
            let below = shift + single.num_levels * BITS_PER_LEVEL;
            descend(graph, &single.child, below, move |g, n, s| get_all(g, n, matching, s))
        }
    }
}

/// Every key/value pair below `node`, in trie order.
pub(crate) fn entries<K: NodeId, V: ObjectData>(
    graph: &ObjectGraph,
    node: &HamtNode<K, V>,
) -> Step<Vec<(K, ObjectRef<V>)>> {
    match node {
        HamtNode::Leaf(leaf) => Deferred::ready(vec![(leaf.key.clone(), leaf.value.clone())]),
        HamtNode::Internal(internal) => flatten(
            internal
                .children
                .iter()
                .map(|child| descend(graph, child, 0, |g, n, _| entries(g, n)))
                .collect(),
        ),
        HamtNode::Single(single) => descend(graph, &single.child, 0, |g, n, _| entries(g, n)),
    }
}

pub(crate) fn entries_ref<K: NodeId, V: ObjectData>(
    graph: &ObjectGraph,
    node: &HamtRef<K, V>,
) -> Step<Vec<(K, ObjectRef<V>)>> {
    descend(graph, node, 0, |g, n, _| entries(g, n))
}

/// `node` and everything below it, including values, skipping the subtree
/// whose hash is `stop`.
pub(crate) fn all_objects<K: NodeId, V: ObjectData>(
    graph: &ObjectGraph,
    node: &HamtRef<K, V>,
    stop: Option<ObjectHash>,
) -> Step<Vec<ErasedRef>> {
    if Some(node.hash()) == stop {
        return Deferred::ready(Vec::new());
    }
    let own = node.erase();
    descend(graph, node, 0, move |g, n, _| {
        let below = match n {
            HamtNode::Leaf(leaf) => Deferred::ready(vec![leaf.value.erase()]),
            HamtNode::Internal(internal) => flatten(
                internal
                    .children
                    .iter()
                    .map(|child| all_objects(g, child, stop))
                    .collect(),
            ),
            HamtNode::Single(single) => all_objects(g, &single.child, stop),
        };
        below.map(move |mut objects| {
            objects.insert(0, own);
            objects
        })
    })
}

// ---------------------------------------------------------------------------
// Canonical construction
// ---------------------------------------------------------------------------

/// Canonical trie holding exactly `entries` (distinct keys) at `shift`.
pub(crate) fn build<K: NodeId, V: ObjectData>(
    entries: Vec<(K, ObjectRef<V>)>,
    shift: u32,
) -> Result<Option<HamtRef<K, V>>, HamtError> {
    if entries.len() <= 1 {
        return Ok(entries
            .into_iter()
            .next()
            .map(|(key, value)| ObjectRef::new(HamtNode::Leaf(HamtLeaf { key, value }))));
    }
    if shift > MAX_SHIFT {
        return Err(HamtError::KeyCollision {
            first: format!("{:?}", entries[0].0),
            second: format!("{:?}", entries[1].0),
        });
    }
    let mut groups: BTreeMap<usize, Vec<(K, ObjectRef<V>)>> = BTreeMap::new();
    for (key, value) in entries {
        groups.entry(level_index(key.trie_key(), shift)).or_default().push((key, value));
    }
    let mut slots = BTreeMap::new();
    for (slot, group) in groups {
        if let Some(child) = build(group, shift + BITS_PER_LEVEL)? {
            slots.insert(slot, child);
        }
    }
    if slots.len() == 1 {
        let Some((slot, child)) = slots.pop_first() else {
            return Ok(None);
        };
        let node = child
            .loaded()
            .ok_or_else(|| HamtError::Corrupt("freshly built child is not loaded".into()))?;
        return Ok(Some(HamtNode::under_slot(&child, &node, slot)));
    }
    Ok(Some(ObjectRef::new(HamtNode::Internal(HamtInternal::from_slots(slots)))))
}

/// Canonical replacement for an internal node whose slots are now `slots`.
fn normalize<K: NodeId, V: ObjectData>(
    graph: &ObjectGraph,
    mut slots: BTreeMap<usize, HamtRef<K, V>>,
) -> Step<Option<HamtRef<K, V>>> {
    match slots.len() {
        0 => Deferred::ready(None),
        1 => match slots.pop_first() {
            Some((slot, child)) => load(graph, &child)
                .map(move |node| Some(HamtNode::under_slot(&child, &node, slot))),
            None => Deferred::ready(None),
        },
        _ => Deferred::ready(Some(ObjectRef::new(HamtNode::Internal(
            HamtInternal::from_slots(slots),
        )))),
    }
}

/// Canonical replacement for `single` once its child became `child`.
fn with_child<K: NodeId, V: ObjectData>(
    graph: &ObjectGraph,
    single: HamtSingle<K, V>,
    child: Option<HamtRef<K, V>>,
) -> Step<Option<HamtRef<K, V>>> {
    let Some(child) = child else {
        return Deferred::ready(None);
    };
    load(graph, &child).map(move |node| {
        Some(match &*node {
            HamtNode::Leaf(_) => child,
            HamtNode::Single(inner) => ObjectRef::new(HamtNode::Single(HamtSingle {
                num_levels: single.num_levels + inner.num_levels,
                bits: (single.bits << (inner.num_levels * BITS_PER_LEVEL)) | inner.bits,
                child: inner.child.clone(),
            })),
            HamtNode::Internal(_) => ObjectRef::new(HamtNode::Single(HamtSingle {
                num_levels: single.num_levels,
                bits: single.bits,
                child,
            })),
        })
    })
}

// ---------------------------------------------------------------------------
// Bulk update
// ---------------------------------------------------------------------------

/// Apply `entries` (distinct keys) below the stored node `this`. Returns
/// `this` itself when nothing changed, `None` when the subtree became empty.
pub(crate) fn put_all_ref<K: NodeId, V: ObjectData>(
    graph: &ObjectGraph,
    this: HamtRef<K, V>,
    entries: Vec<Entry<K, V>>,
    shift: u32,
) -> Step<Option<HamtRef<K, V>>> {
    if entries.is_empty() {
        return Deferred::ready(Some(this));
    }
    let graph_ = graph.clone();
    load(graph, &this).and_then(move |node| {
        let unchanged = this.hash();
        put_all(&graph_, &node, entries, shift).map(move |result| match result {
            Some(new) if new.hash() == unchanged => Some(this),
            other => other,
        })
    })
}

/// Apply `entries` (distinct keys) to `node`.
pub(crate) fn put_all<K: NodeId, V: ObjectData>(
    graph: &ObjectGraph,
    node: &HamtNode<K, V>,
    entries: Vec<Entry<K, V>>,
    shift: u32,
) -> Step<Option<HamtRef<K, V>>> {
    match node {
        HamtNode::Leaf(leaf) => {
            let mut merged = Vec::with_capacity(entries.len() + 1);
            let mut replaced = false;
            for (key, value) in entries {
                if key == leaf.key {
                    replaced = true;
                }
                if let Some(value) = value {
                    merged.push((key, value));
                }
            }
            if !replaced {
                merged.push((leaf.key.clone(), leaf.value.clone()));
            }
            Deferred::from_result(build(merged, shift))
        }
        HamtNode::Internal(internal) => {
            let mut groups: BTreeMap<usize, Vec<Entry<K, V>>> = BTreeMap::new();
            for entry in entries {
                groups.entry(level_index(entry.0.trie_key(), shift)).or_default().push(entry);
            }
            let below = shift + BITS_PER_LEVEL;
            let updates = groups
                .into_iter()
                .map(|(slot, group)| {
                    let update = match internal.child(slot) {
                        Some(child) => put_all_ref(graph, child.clone(), group, below),
                        None => Deferred::from_result(build(present(group), below)),
                    };
                    update.map(move |child| (slot, child))
                })
                .collect();
            let mut slots = internal.slot_map();
            let graph_ = graph.clone();
            Deferred::join_all(updates).and_then(move |updates| {
                for (slot, child) in updates {
                    match child {
                        Some(child) => slots.insert(slot, child),
                        None => slots.remove(&slot),
                    };
                }
                normalize(&graph_, slots)
            })
        }
        HamtNode::Single(single) => {
            let (matching, others): (Vec<_>, Vec<_>) =
                entries.into_iter().partition(|(key, _)| single.matches(key, shift));
            if others.iter().any(|(_, value)| value.is_some()) {
                let mut all = matching;
                all.extend(others);
                return put_all(graph, &HamtNode::Internal(single.expand()), all, shift);
            }
            if matching.is_empty() {
                return Deferred::ready(Some(ObjectRef::new(node.clone())));
            }
            let below = shift + single.num_levels * BITS_PER_LEVEL;
            let single = single.clone();
            let graph_ = graph.clone();
            put_all_ref(graph, single.child.clone(), matching, below)
                .and_then(move |child| with_child(&graph_, single, child))
        }
    }
}

fn present<K, V>(entries: Vec<Entry<K, V>>) -> Vec<(K, ObjectRef<V>)> {
    entries
        .into_iter()
        .filter_map(|(key, value)| value.map(|value| (key, value)))
        .collect()
}

/// Subtree of `node` (at `shift`) covering the `levels` levels of `bits`,
/// or `None` if no key there follows that path.
///
/// The flag tells whether the returned node is stored as such; a `Single`
/// run cut short yields a new node that exists only in memory.
pub(crate) fn descend_path<K: NodeId, V: ObjectData>(
    graph: &ObjectGraph,
    this: HamtRef<K, V>,
    this_stored: bool,
    node: &HamtNode<K, V>,
    shift: u32,
    levels: u32,
    bits: u64,
) -> Step<Option<(HamtRef<K, V>, bool)>> {
    if levels == 0 {
        return Deferred::ready(Some((this, this_stored)));
    }
    match node {
        HamtNode::Leaf(leaf) => Deferred::ready(
            (path_bits(leaf.key.trie_key(), shift, levels) == bits).then_some((this, true)),
        ),
        HamtNode::Internal(internal) => {
            let rest = levels - 1;
            let top = (bits >> (rest * BITS_PER_LEVEL)) as usize;
            match internal.child(top & 31) {
                None => Deferred::ready(None),
                Some(child) => {
                    let child = child.clone();
                    let graph_ = graph.clone();
                    load(graph, &child).and_then(move |node| {
                        descend_path(
                            &graph_,
                            child,
                            true,
                            &node,
                            shift + BITS_PER_LEVEL,
                            rest,
                            bits & level_mask(rest),
                        )
                    })
                }
            }
        }
        HamtNode::Single(single) => {
            let common = single.num_levels.min(levels);
            let own_prefix = single.bits >> ((single.num_levels - common) * BITS_PER_LEVEL);
            let wanted_prefix = bits >> ((levels - common) * BITS_PER_LEVEL);
            if own_prefix != wanted_prefix {
                return Deferred::ready(None);
            }
            if single.num_levels > levels {
                let remaining = single.num_levels - levels;
                let rest = ObjectRef::new(HamtNode::Single(HamtSingle {
                    num_levels: remaining,
                    bits: single.bits & level_mask(remaining),
                    child: single.child.clone(),
                }));
                return Deferred::ready(Some((rest, false)));
            }
            let rest = levels - single.num_levels;
            let child = single.child.clone();
            let below = shift + single.num_levels * BITS_PER_LEVEL;
            let graph_ = graph.clone();
            load(graph, &child).and_then(move |node| {
                descend_path(&graph_, child, true, &node, below, rest, bits & level_mask(rest))
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::node::tests::{blob, Blob};
    use arbor_store::InMemoryObjectStore;

    type Node = HamtNode<u64, Blob>;

    fn graph() -> ObjectGraph {
        ObjectGraph::new(Arc::new(InMemoryObjectStore::new()))
    }

    fn node_of(r: &Option<HamtRef<u64, Blob>>) -> Arc<Node> {
        r.as_ref().unwrap().loaded().unwrap()
    }

    #[test]
    fn build_single_key_is_leaf() {
        let built = build(vec![(7u64, blob("a"))], 0).unwrap();
        assert!(matches!(&*node_of(&built), HamtNode::Leaf(l) if l.key == 7));
    }

    #[test]
    fn build_shared_prefix_is_single_over_internal() {
        // Same top 59 bits, different lowest bits: 12 shared levels.
        let built = build(vec![(0x10u64, blob("a")), (0x11u64, blob("b"))], 0).unwrap();
        match &*node_of(&built) {
            HamtNode::Single(s) => {
                assert_eq!(s.num_levels, 12);
                let child = s.child.loaded().unwrap();
                assert!(matches!(&*child, HamtNode::Internal(i) if i.children.len() == 2));
            }
            other => panic!("expected single, got {other:?}"),
        }
    }

    #[test]
    fn build_diverging_top_level_is_internal() {
        let built = build(vec![(0u64, blob("a")), (u64::MAX, blob("b"))], 0).unwrap();
        assert!(matches!(&*node_of(&built), HamtNode::Internal(i) if i.children.len() == 2));
    }

    #[test]
    fn build_reports_collisions_past_the_last_level() {
        let err = build(vec![(1u64, blob("a")), (2u64, blob("b"))], MAX_SHIFT + BITS_PER_LEVEL)
            .unwrap_err();
        assert!(matches!(err, HamtError::KeyCollision { .. }));
    }

    #[test]
    fn put_all_into_empty_matches_build() {
        let g = graph();
        let entries = vec![
            (1u64, Some(blob("a"))),
            (2u64, Some(blob("b"))),
            (99u64, Some(blob("c"))),
        ];
        let built = build(
            entries.iter().map(|(k, v)| (*k, v.clone().unwrap())).collect(),
            0,
        )
        .unwrap()
        .unwrap();
        let put = g.execute(put_all(&g, &Node::empty(), entries, 0)).unwrap().unwrap();
        assert_eq!(put.hash(), built.hash());
    }

    #[test]
    fn get_walks_single_runs() {
        let g = graph();
        let root = build(vec![(0x10u64, blob("a")), (0x11u64, blob("b"))], 0).unwrap().unwrap();
        let node = root.loaded().unwrap();
        let found = g.execute(get(&g, &node, 0x11, 0)).unwrap();
        assert_eq!(found, Some(blob("b")));
        assert_eq!(g.execute(get(&g, &node, 0x12, 0)).unwrap(), None);
        assert_eq!(g.execute(get(&g, &node, 1 << 40, 0)).unwrap(), None);
    }

    #[test]
    fn descend_path_through_single() {
        let g = graph();
        let root = build(vec![(0x10u64, blob("a")), (0x11u64, blob("b"))], 0).unwrap().unwrap();
        let node = root.loaded().unwrap();
        // The first three levels of both keys are zero.
        let (sub, stored) = g
            .execute(descend_path(&g, root.clone(), true, &node, 0, 3, 0))
            .unwrap()
            .unwrap();
        assert!(!stored);
        match &*sub.loaded().unwrap() {
            HamtNode::Single(s) => assert_eq!(s.num_levels, 9),
            other => panic!("expected single, got {other:?}"),
        }
        let missing = g.execute(descend_path(&g, root, true, &node, 0, 1, 5)).unwrap();
        assert!(missing.is_none());
    }
}
