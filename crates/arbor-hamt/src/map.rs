//! The [`HamtMap`] handle: a trie root bound to the graph it loads from.

use std::collections::{BTreeMap, HashSet};

use arbor_store::{ErasedRef, Many, ObjectData, ObjectGraph, ObjectHash, ObjectRef, One, ZeroOrOne};
use arbor_types::NodeId;
use tracing::debug;

use crate::diff::{self, MapChange};
use crate::error::HamtError;
use crate::node::{HamtNode, HamtRef};
use crate::ops::{self, Entry};

/// An immutable map from node ids to object references.
///
/// Every update returns a new map sharing unchanged subtrees with the old
/// one. Nothing is written until the root is passed to
/// [`ObjectGraph::write`].
pub struct HamtMap<K: NodeId, V: ObjectData> {
    graph: ObjectGraph,
    root: HamtRef<K, V>,
}

impl<K: NodeId, V: ObjectData> Clone for HamtMap<K, V> {
    fn clone(&self) -> Self {
        Self {
            graph: self.graph.clone(),
            root: self.root.clone(),
        }
    }
}

impl<K: NodeId, V: ObjectData> HamtMap<K, V> {
    /// An empty map.
    pub fn new(graph: ObjectGraph) -> Self {
        Self {
            graph,
            root: ObjectRef::new(HamtNode::empty()),
        }
    }

    /// A map over an existing (possibly unloaded) root.
    pub fn from_root(graph: ObjectGraph, root: HamtRef<K, V>) -> Self {
        Self { graph, root }
    }

    pub fn root(&self) -> &HamtRef<K, V> {
        &self.root
    }

    pub fn hash(&self) -> ObjectHash {
        self.root.hash()
    }

    pub fn graph(&self) -> &ObjectGraph {
        &self.graph
    }

    fn with_root(&self, root: HamtRef<K, V>) -> Self {
        Self {
            graph: self.graph.clone(),
            root,
        }
    }

    // -----------------------------------------------------------------------
    // Reads
    // -----------------------------------------------------------------------

    pub fn get(&self, key: K) -> ZeroOrOne<ObjectRef<V>, HamtError> {
        let graph = self.graph.clone();
        ops::load(&self.graph, &self.root).and_then(move |root| ops::get(&graph, &root, key, 0))
    }

    /// Look up many keys; absent keys are left out of the result.
    pub fn get_all(&self, keys: Vec<K>) -> Many<(K, ObjectRef<V>), HamtError> {
        let graph = self.graph.clone();
        ops::load(&self.graph, &self.root)
            .and_then(move |root| ops::get_all(&graph, &root, keys, 0))
    }

    pub fn contains(&self, key: K) -> One<bool, HamtError> {
        self.get(key).map(|value| value.is_some())
    }

    /// Every entry, in trie order.
    pub fn entries(&self) -> Many<(K, ObjectRef<V>), HamtError> {
        ops::entries_ref(&self.graph, &self.root)
    }

    pub fn len(&self) -> One<usize, HamtError> {
        self.entries().map(|entries| entries.len())
    }

    // -----------------------------------------------------------------------
    // Updates
    // -----------------------------------------------------------------------

    pub fn put(&self, key: K, value: ObjectRef<V>) -> One<Self, HamtError> {
        self.put_all(vec![(key, Some(value))])
    }

    pub fn remove(&self, key: K) -> One<Self, HamtError> {
        self.put_all(vec![(key, None)])
    }

    /// Apply many writes at once; `None` removes a key. When a key appears
    /// more than once the last write wins.
    ///
    /// The result is identical to applying the writes one by one.
    pub fn put_all(&self, entries: Vec<(K, Option<ObjectRef<V>>)>) -> One<Self, HamtError> {
        let mut distinct: BTreeMap<K, Option<ObjectRef<V>>> = BTreeMap::new();
        for (key, value) in entries {
            distinct.insert(key, value);
        }
        let entries: Vec<Entry<K, V>> = distinct.into_iter().collect();
        debug!(count = entries.len(), "updating trie");
        let this = self.clone();
        ops::put_all_ref(&self.graph, self.root.clone(), entries, 0).map(move |root| match root {
            Some(root) if root.hash() == this.root.hash() => this,
            Some(root) => this.with_root(root),
            None => this.with_root(ObjectRef::new(HamtNode::empty())),
        })
    }

    // -----------------------------------------------------------------------
    // Comparison
    // -----------------------------------------------------------------------

    /// Changes turning `old` into this map. With `changes_only`, only keys
    /// present in both maps with different values are reported.
    pub fn get_changes(&self, old: &Self, changes_only: bool) -> Many<MapChange<K, V>, HamtError> {
        diff::get_changes(&self.graph, self.root.clone(), old.root.clone(), 0, changes_only)
    }

    /// Objects a store already holding `old` needs in order to hold this map
    /// as well: every node and value reachable from this root that `old`
    /// does not share. `None` returns everything reachable.
    pub fn object_diff(&self, old: Option<&Self>) -> Many<ErasedRef, HamtError> {
        let old = old.map(|old| old.root.clone());
        diff::object_diff(&self.graph, self.root.clone(), old, true, 0).map(|objects| {
            let mut seen = HashSet::new();
            objects.into_iter().filter(|object| seen.insert(object.hash())).collect()
        })
    }
}

impl<K: NodeId, V: ObjectData> std::fmt::Debug for HamtMap<K, V> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HamtMap").field("root", &self.root).finish()
    }
}

impl<K: NodeId, V: ObjectData> PartialEq for HamtMap<K, V> {
    fn eq(&self, other: &Self) -> bool {
        self.root == other.root
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeSet;
    use std::sync::Arc;

    use super::*;
    use crate::node::tests::{blob, Blob};
    use arbor_store::{Deferred, InMemoryObjectStore};
    use proptest::prelude::*;

    type Map = HamtMap<u64, Blob>;

    fn run<T: Send + 'static>(map: &Map, deferred: Deferred<T, HamtError>) -> Result<T, HamtError> {
        map.graph().execute(deferred)
    }

    fn setup() -> (Arc<InMemoryObjectStore>, Map) {
        let store = Arc::new(InMemoryObjectStore::new());
        let graph = ObjectGraph::new(store.clone());
        (store, Map::new(graph))
    }

    fn put(map: &Map, key: u64, value: &str) -> Map {
        run(map, map.put(key, blob(value))).unwrap()
    }

    fn remove(map: &Map, key: u64) -> Map {
        run(map, map.remove(key)).unwrap()
    }

    fn get(map: &Map, key: u64) -> Option<String> {
        run(map, map.get(key))
            .unwrap()
            .map(|value| map.graph().resolve(&value).unwrap().0.clone())
    }

    fn contents(map: &Map) -> BTreeMap<u64, String> {
        run(map, map.entries())
            .unwrap()
            .into_iter()
            .map(|(k, v)| (k, map.graph().resolve(&v).unwrap().0.clone()))
            .collect()
    }

    // -----------------------------------------------------------------------
    // Basic behaviour
    // -----------------------------------------------------------------------

    #[test]
    fn put_then_get() {
        let (_, empty) = setup();
        let map = put(&empty, 5, "A");
        assert_eq!(get(&map, 5), Some("A".into()));
        assert_eq!(get(&map, 6), None);
        assert_eq!(get(&empty, 5), None);
    }

    #[test]
    fn put_overwrites() {
        let (_, empty) = setup();
        let map = put(&put(&empty, 5, "A"), 5, "B");
        assert_eq!(get(&map, 5), Some("B".into()));
        assert_eq!(run(&map, map.len()).unwrap(), 1);
    }

    #[test]
    fn removing_the_only_key_restores_the_empty_root() {
        let (_, empty) = setup();
        let map = remove(&put(&empty, 5, "A"), 5);
        assert_eq!(map.hash(), empty.hash());
        assert!(contents(&map).is_empty());
    }

    #[test]
    fn removing_a_sibling_collapses_to_a_leaf() {
        let (_, empty) = setup();
        let two = put(&put(&empty, 0, "a"), u64::MAX, "b");
        assert!(matches!(&*two.root().loaded().unwrap(), HamtNode::Internal(_)));
        let one = remove(&two, u64::MAX);
        assert!(matches!(&*one.root().loaded().unwrap(), HamtNode::Leaf(l) if l.key == 0));
        assert_eq!(one.hash(), put(&empty, 0, "a").hash());
    }

    #[test]
    fn removing_an_absent_key_changes_nothing() {
        let (_, empty) = setup();
        let map = put(&put(&empty, 1, "a"), 2, "b");
        let same = remove(&map, 3);
        assert_eq!(same, map);
        assert_eq!(remove(&empty, 3), empty);
    }

    #[test]
    fn shape_is_independent_of_insertion_order() {
        let (_, empty) = setup();
        let keys = [1u64, 0x10, 0x11, 1 << 63, 42, 43, u64::MAX];
        let forward = keys.iter().fold(empty.clone(), |m, k| put(&m, *k, &k.to_string()));
        let backward = keys.iter().rev().fold(empty.clone(), |m, k| put(&m, *k, &k.to_string()));
        assert_eq!(forward.hash(), backward.hash());
        let batch = run(
            &empty,
            empty.put_all(keys.iter().map(|k| (*k, Some(blob(&k.to_string())))).collect()),
        )
        .unwrap();
        assert_eq!(batch.hash(), forward.hash());
    }

    #[test]
    fn put_all_last_write_wins() {
        let (_, empty) = setup();
        let map = run(
            &empty,
            empty.put_all(vec![
                (1, Some(blob("a"))),
                (2, Some(blob("b"))),
                (1, None),
                (2, Some(blob("c"))),
            ]),
        )
        .unwrap();
        assert_eq!(contents(&map), BTreeMap::from([(2, "c".to_owned())]));
    }

    #[test]
    fn get_all_skips_absent_keys() {
        let (_, empty) = setup();
        let map = (0..20u64).fold(empty, |m, k| put(&m, k * 1_000_003, "v"));
        let found = run(&map, map.get_all(vec![0, 1_000_003, 7, 19 * 1_000_003])).unwrap();
        let keys: BTreeSet<u64> = found.into_iter().map(|(k, _)| k).collect();
        assert_eq!(keys, BTreeSet::from([0, 1_000_003, 19 * 1_000_003]));
    }

    // -----------------------------------------------------------------------
    // Persistence and batching
    // -----------------------------------------------------------------------

    fn spread(i: u64) -> u64 {
        i.wrapping_mul(0x9e37_79b9_7f4a_7c15)
    }

    #[test]
    fn reopened_map_reads_back() {
        let (store, empty) = setup();
        let map = (0..200u64).fold(empty, |m, i| put(&m, spread(i), &i.to_string()));
        let written = map.graph().write(map.root()).unwrap();
        assert!(written > 200);
        assert_eq!(map.graph().write(map.root()).unwrap(), 0);

        let graph = ObjectGraph::new(store.clone());
        let reopened = Map::from_root(graph, ObjectRef::from_hash(map.hash()));
        assert_eq!(get(&reopened, spread(17)), Some("17".into()));
        assert_eq!(contents(&reopened), contents(&map));
    }

    #[test]
    fn get_all_loads_one_batch_per_level() {
        let (store, empty) = setup();
        let map = (0..1000u64).fold(empty, |m, i| put(&m, spread(i), "v"));
        map.graph().write(map.root()).unwrap();

        let graph = ObjectGraph::new(store.clone());
        let reopened = Map::from_root(graph, ObjectRef::from_hash(map.hash()));
        store.reset_stats();
        let keys: Vec<u64> = (0..100u64).map(|i| spread(i * 7)).collect();
        let found = run(&reopened, reopened.get_all(keys.clone())).unwrap();
        assert_eq!(found.len(), keys.len());
        let stats = store.stats();
        assert!(stats.batch_reads <= 6, "{stats:?}");
        assert_eq!(stats.reads, 0);
    }

    #[test]
    fn unchanged_update_keeps_the_root() {
        let (_, empty) = setup();
        let map = put(&put(&empty, 1, "a"), 2, "b");
        map.graph().write(map.root()).unwrap();
        let same = put(&map, 1, "a");
        assert!(same.root().is_persisted());
        assert_eq!(same.hash(), map.hash());
    }

    // -----------------------------------------------------------------------
    // Comparison
    // -----------------------------------------------------------------------

    fn summarize(changes: &[MapChange<u64, Blob>]) -> BTreeSet<(u64, &'static str)> {
        changes
            .iter()
            .map(|change| {
                let kind = match change {
                    MapChange::Added { .. } => "added",
                    MapChange::Removed { .. } => "removed",
                    MapChange::Changed { .. } => "changed",
                };
                (*change.key(), kind)
            })
            .collect()
    }

    #[test]
    fn get_changes_reports_each_kind() {
        let (_, empty) = setup();
        let old = put(&put(&put(&empty, 1, "a"), 2, "b"), 1 << 62, "c");
        let new = put(&remove(&put(&old, 2, "B"), 1), 99, "d");
        let changes = run(&new, new.get_changes(&old, false)).unwrap();
        assert_eq!(
            summarize(&changes),
            BTreeSet::from([(1, "removed"), (2, "changed"), (99, "added")])
        );
        let only = run(&new, new.get_changes(&old, true)).unwrap();
        assert_eq!(summarize(&only), BTreeSet::from([(2, "changed")]));
    }

    #[test]
    fn get_changes_between_leaf_and_internal_roots() {
        let (_, empty) = setup();
        let one = put(&empty, 5, "a");
        let many = put(&put(&one, 6, "b"), u64::MAX, "c");
        let forward = run(&many, many.get_changes(&one, false)).unwrap();
        assert_eq!(summarize(&forward), BTreeSet::from([(6, "added"), (u64::MAX, "added")]));
        let backward = run(&one, one.get_changes(&many, false)).unwrap();
        assert_eq!(summarize(&backward), BTreeSet::from([(6, "removed"), (u64::MAX, "removed")]));
    }

    #[test]
    fn self_diff_is_empty() {
        let (_, empty) = setup();
        let map = (0..50u64).fold(empty, |m, i| put(&m, spread(i), "v"));
        assert!(run(&map, map.get_changes(&map, false)).unwrap().is_empty());
        assert!(run(&map, map.object_diff(Some(&map))).unwrap().is_empty());
    }

    #[test]
    fn object_diff_without_base_is_everything() {
        let (store, empty) = setup();
        let map = put(&put(&empty, 1, "a"), u64::MAX, "b");
        let objects = run(&map, map.object_diff(None)).unwrap();
        map.graph().write(map.root()).unwrap();
        let stored: BTreeSet<ObjectHash> = store.all_hashes().into_iter().collect();
        let listed: BTreeSet<ObjectHash> = objects.iter().map(ErasedRef::hash).collect();
        assert_eq!(listed, stored);
    }

    // -----------------------------------------------------------------------
    // Model-based properties
    // -----------------------------------------------------------------------

    #[derive(Clone, Debug)]
    enum Op {
        Put(u64, u8),
        Remove(u64),
    }

    fn key_strategy() -> impl Strategy<Value = u64> {
        // Mix small keys (long shared prefixes) with spread ones.
        prop_oneof![0u64..64, any::<u64>(), (0u64..16).prop_map(|k| k << 60)]
    }

    fn op_strategy() -> impl Strategy<Value = Op> {
        prop_oneof![
            3 => (key_strategy(), any::<u8>()).prop_map(|(k, v)| Op::Put(k, v)),
            1 => key_strategy().prop_map(Op::Remove),
        ]
    }

    fn apply(map: &Map, model: &mut BTreeMap<u64, String>, op: &Op) -> Map {
        match op {
            Op::Put(k, v) => {
                model.insert(*k, v.to_string());
                put(map, *k, &v.to_string())
            }
            Op::Remove(k) => {
                model.remove(k);
                remove(map, *k)
            }
        }
    }

    fn all_hashes(map: &Map) -> BTreeSet<ObjectHash> {
        run(map, map.object_diff(None))
            .unwrap()
            .iter()
            .map(ErasedRef::hash)
            .collect()
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(64))]

        #[test]
        fn behaves_like_a_btreemap(ops in prop::collection::vec(op_strategy(), 0..60)) {
            let (_, empty) = setup();
            let mut model = BTreeMap::new();
            let mut map = empty.clone();
            for op in &ops {
                map = apply(&map, &mut model, op);
            }
            prop_assert_eq!(contents(&map), model.clone());

            let rebuilt = run(
                &empty,
                empty.put_all(model.iter().map(|(k, v)| (*k, Some(blob(v)))).collect()),
            )
            .unwrap();
            prop_assert_eq!(rebuilt.hash(), map.hash());
        }

        #[test]
        fn diffs_describe_the_update(
            base in prop::collection::vec(op_strategy(), 0..40),
            update in prop::collection::vec(op_strategy(), 0..20),
        ) {
            let (store, empty) = setup();
            let mut model = BTreeMap::new();
            let mut old = empty;
            for op in &base {
                old = apply(&old, &mut model, op);
            }
            let before = model.clone();
            old.graph().write(old.root()).unwrap();
            let mut new = old.clone();
            for op in &update {
                new = apply(&new, &mut model, op);
            }

            // Replaying the changes on the old contents yields the new ones.
            let changes = run(&new, new.get_changes(&old, false)).unwrap();
            let mut replayed = before;
            for change in changes {
                match change {
                    MapChange::Added { key, value }
                    | MapChange::Changed { key, new: value, .. } => {
                        replayed.insert(key, value.loaded().unwrap().0.clone());
                    }
                    MapChange::Removed { key, .. } => {
                        replayed.remove(&key);
                    }
                }
            }
            prop_assert_eq!(&replayed, &model);

            // The old store plus the object diff covers the new map.
            let stored: BTreeSet<ObjectHash> = store.all_hashes().into_iter().collect();
            let diff: BTreeSet<ObjectHash> = run(&new, new.object_diff(Some(&old)))
                .unwrap()
                .iter()
                .map(ErasedRef::hash)
                .collect();
            let needed = all_hashes(&new);
            prop_assert!(diff.is_subset(&needed));
            for hash in &needed {
                prop_assert!(stored.contains(hash) || diff.contains(hash), "missing {}", hash);
            }
        }
    }
}
