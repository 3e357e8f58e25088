use std::any::Any;
use std::collections::{BTreeSet, HashMap, HashSet, VecDeque};
use std::sync::{Arc, Mutex, PoisonError};

use arbor_types::ObjectHash;
use tracing::{debug, trace};

use crate::config::GraphConfig;
use crate::deferred::Deferred;
use crate::error::{StoreError, StoreResult};
use crate::object::{ObjectData, ObjectKind, StoredObject};
use crate::reference::{ErasedRef, ObjectRef};
use crate::registry::ObjectRegistry;
use crate::traits::ObjectStore;

/// Lazily loaded view of the objects in a store.
///
/// The graph keeps a hash-keyed arena of deserialized objects, so every
/// distinct object is decoded at most once while it stays cached, and a
/// buffer of raw objects fetched for pending [`Deferred`] computations.
/// Cloning is cheap and clones share both.
#[derive(Clone)]
pub struct ObjectGraph {
    inner: Arc<GraphInner>,
}

struct GraphInner {
    store: Arc<dyn ObjectStore>,
    config: GraphConfig,
    fetched: Mutex<HashMap<ObjectHash, StoredObject>>,
    arena: Mutex<Arena>,
}

struct Arena {
    objects: HashMap<ObjectHash, Arc<dyn Any + Send + Sync>>,
    order: VecDeque<ObjectHash>,
    capacity: usize,
}

impl Arena {
    fn get(&self, hash: &ObjectHash) -> Option<Arc<dyn Any + Send + Sync>> {
        self.objects.get(hash).cloned()
    }

    fn insert(&mut self, hash: ObjectHash, value: Arc<dyn Any + Send + Sync>) {
        if self.capacity == 0 {
            return;
        }
        if self.objects.insert(hash, value).is_none() {
            self.order.push_back(hash);
        }
        while self.objects.len() > self.capacity {
            match self.order.pop_front() {
                Some(oldest) => {
                    self.objects.remove(&oldest);
                }
                None => break,
            }
        }
    }
}

impl ObjectGraph {
    pub fn new(store: Arc<dyn ObjectStore>) -> Self {
        Self::with_config(store, GraphConfig::default())
    }

    pub fn with_config(store: Arc<dyn ObjectStore>, config: GraphConfig) -> Self {
        let capacity = config.cache_capacity;
        Self {
            inner: Arc::new(GraphInner {
                store,
                config,
                fetched: Mutex::new(HashMap::new()),
                arena: Mutex::new(Arena {
                    objects: HashMap::new(),
                    order: VecDeque::new(),
                    capacity,
                }),
            }),
        }
    }

    pub fn store(&self) -> &Arc<dyn ObjectStore> {
        &self.inner.store
    }

    pub fn config(&self) -> &GraphConfig {
        &self.inner.config
    }

    // -----------------------------------------------------------------------
    // Loading
    // -----------------------------------------------------------------------

    /// Deferred resolution of a reference.
    pub fn load<T: ObjectData>(&self, reference: &ObjectRef<T>) -> Deferred<Arc<T>> {
        if let Some(value) = reference.loaded() {
            return Deferred::ready(value);
        }
        if let Some(value) = self.cached::<T>(&reference.hash()) {
            reference.fill(value.clone());
            return Deferred::ready(value);
        }
        let reference = reference.clone();
        Deferred::waiting(vec![reference.hash()], move |graph| {
            Deferred::from_result(graph.materialize(&reference))
        })
    }

    /// Deferred resolution of many references in one batch.
    pub fn load_all<T: ObjectData>(&self, references: &[ObjectRef<T>]) -> Deferred<Vec<Arc<T>>> {
        Deferred::join_all(references.iter().map(|r| self.load(r)).collect())
    }

    /// Drive a deferred computation to completion.
    ///
    /// Each round fetches every hash the computation waits for, in chunks of
    /// at most [`GraphConfig::batch_size`], then resumes it.
    pub fn execute<T, E>(&self, deferred: Deferred<T, E>) -> Result<T, E>
    where
        T: Send + 'static,
        E: From<StoreError> + Send + 'static,
    {
        let mut current = deferred;
        loop {
            match current.into_step() {
                Ok(result) => return result,
                Err((wants, resume)) => {
                    self.fetch(&wants)?;
                    current = resume(self);
                }
            }
        }
    }

    /// Resolve one reference right away.
    pub fn resolve<T: ObjectData>(&self, reference: &ObjectRef<T>) -> StoreResult<Arc<T>> {
        self.execute(self.load(reference))
    }

    fn cached<T: ObjectData>(&self, hash: &ObjectHash) -> Option<Arc<T>> {
        let arena = self.inner.arena.lock().unwrap_or_else(PoisonError::into_inner);
        arena.get(hash).and_then(|any| any.downcast::<T>().ok())
    }

    fn fetch(&self, wants: &[ObjectHash]) -> StoreResult<()> {
        let missing: Vec<ObjectHash> = {
            let arena = self.inner.arena.lock().unwrap_or_else(PoisonError::into_inner);
            let fetched = self.inner.fetched.lock().unwrap_or_else(PoisonError::into_inner);
            let mut seen = HashSet::new();
            wants
                .iter()
                .filter(|h| !arena.objects.contains_key(h) && !fetched.contains_key(h))
                .filter(|h| seen.insert(**h))
                .copied()
                .collect()
        };
        if missing.is_empty() {
            return Ok(());
        }
        {
            // Leftovers of earlier rounds go first; this round's objects stay
            // until they are materialized.
            let mut fetched = self.inner.fetched.lock().unwrap_or_else(PoisonError::into_inner);
            if fetched.len() + missing.len() > self.inner.config.cache_capacity {
                let wanted: HashSet<&ObjectHash> = wants.iter().collect();
                let before = fetched.len();
                fetched.retain(|hash, _| wanted.contains(hash));
                trace!(evicted = before - fetched.len(), "evicted stale fetched objects");
            }
        }
        let batch_size = self.inner.config.batch_size.max(1);
        let mut found = 0;
        for chunk in missing.chunks(batch_size) {
            let objects = self.inner.store.read_batch(chunk)?;
            let mut fetched = self.inner.fetched.lock().unwrap_or_else(PoisonError::into_inner);
            for (hash, object) in chunk.iter().zip(objects) {
                if let Some(object) = object {
                    found += 1;
                    fetched.insert(*hash, object);
                }
            }
        }
        debug!(requested = missing.len(), found, "fetched objects from store");
        Ok(())
    }

    fn materialize<T: ObjectData>(&self, reference: &ObjectRef<T>) -> StoreResult<Arc<T>> {
        if let Some(value) = reference.loaded() {
            return Ok(value);
        }
        let hash = reference.hash();
        if let Some(value) = self.cached::<T>(&hash) {
            reference.fill(value.clone());
            return Ok(value);
        }
        let buffered = self
            .inner
            .fetched
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&hash);
        let object = match buffered {
            Some(object) => object,
            None => self
                .inner
                .store
                .read(&hash)?
                .ok_or(StoreError::NotFound(hash))?,
        };
        if object.kind != T::KIND {
            return Err(StoreError::KindMismatch {
                hash,
                expected: T::KIND,
                found: object.kind,
            });
        }
        let computed = object.compute_hash();
        if computed != hash {
            return Err(StoreError::HashMismatch {
                expected: hash,
                computed,
            });
        }
        let value = Arc::new(T::deserialize(&object.data)?);
        trace!(hash = %hash.short(), kind = %T::KIND, "materialized object");
        self.inner
            .arena
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(hash, value.clone());
        reference.fill(value.clone());
        Ok(value)
    }

    // -----------------------------------------------------------------------
    // Persistence
    // -----------------------------------------------------------------------

    /// Write every not-yet-persisted object reachable from `root`.
    pub fn write<T: ObjectData>(&self, root: &ObjectRef<T>) -> StoreResult<usize> {
        self.write_all(&[root.erase()])
    }

    /// Write every not-yet-persisted object reachable from `roots`.
    ///
    /// Descendants are written before the objects that reference them.
    /// Returns the number of objects written.
    pub fn write_all(&self, roots: &[ErasedRef]) -> StoreResult<usize> {
        let mut stack: Vec<ErasedRef> = roots.to_vec();
        let mut seen = HashSet::new();
        let mut written = Vec::new();
        let mut objects = Vec::new();
        while let Some(reference) = stack.pop() {
            if reference.is_persisted() || !seen.insert(reference.hash()) {
                continue;
            }
            let Some((object, children)) = reference.stored() else {
                continue;
            };
            stack.extend(children);
            objects.push(object);
            written.push(reference);
        }
        objects.reverse();
        for chunk in objects.chunks(self.inner.config.batch_size.max(1)) {
            self.inner.store.write_batch(chunk)?;
        }
        for reference in &written {
            reference.mark_persisted();
        }
        debug!(count = written.len(), "persisted new objects");
        Ok(written.len())
    }

    // -----------------------------------------------------------------------
    // Reachability
    // -----------------------------------------------------------------------

    /// All hashes reachable from a stored root, each verified by
    /// re-serializing its object.
    ///
    /// Walks one level per store round trip. Fails on the first missing or
    /// corrupted object.
    pub fn reachable(
        &self,
        registry: &ObjectRegistry,
        root: ObjectHash,
        kind: ObjectKind,
    ) -> StoreResult<BTreeSet<ObjectHash>> {
        let mut seen = BTreeSet::new();
        let mut level = vec![(root, kind)];
        seen.insert(root);
        while !level.is_empty() {
            let hashes: Vec<ObjectHash> = level.iter().map(|(hash, _)| *hash).collect();
            let objects = self.inner.store.read_batch(&hashes)?;
            let mut next = Vec::new();
            for ((hash, kind), object) in level.into_iter().zip(objects) {
                let object = object.ok_or(StoreError::NotFound(hash))?;
                registry.verify(kind, &object.data, hash)?;
                for (child, child_kind) in registry.children(kind, &object.data)? {
                    if seen.insert(child) {
                        next.push((child, child_kind));
                    }
                }
            }
            level = next;
        }
        Ok(seen)
    }
}

impl std::fmt::Debug for ObjectGraph {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let cached = self
            .inner
            .arena
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .objects
            .len();
        f.debug_struct("ObjectGraph")
            .field("cached", &cached)
            .field("config", &self.inner.config)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::InMemoryObjectStore;
    use crate::reference::tests::Note;
    use proptest::prelude::*;

    fn setup() -> (Arc<InMemoryObjectStore>, ObjectGraph) {
        let store = Arc::new(InMemoryObjectStore::new());
        let graph = ObjectGraph::new(store.clone());
        (store, graph)
    }

    /// Fresh references to the same hashes, with nothing loaded.
    fn unloaded(refs: &[ObjectRef<Note>]) -> Vec<ObjectRef<Note>> {
        refs.iter().map(|r| ObjectRef::from_hash(r.hash())).collect()
    }

    fn family() -> ObjectRef<Note> {
        let a = ObjectRef::new(Note::leaf("a"));
        let b = ObjectRef::new(Note::leaf("b"));
        ObjectRef::new(Note {
            text: "root".into(),
            children: vec![a, b],
        })
    }

    // -----------------------------------------------------------------------
    // Persistence
    // -----------------------------------------------------------------------

    #[test]
    fn write_persists_new_objects_once() {
        let (store, graph) = setup();
        let root = family();
        assert_eq!(graph.write(&root).unwrap(), 3);
        assert_eq!(store.len(), 3);
        assert!(root.is_persisted());
        assert_eq!(graph.write(&root).unwrap(), 0);
    }

    #[test]
    fn write_skips_shared_persisted_subtrees() {
        let (store, graph) = setup();
        let shared = ObjectRef::new(Note::leaf("shared"));
        graph.write(&shared).unwrap();
        let parent = ObjectRef::new(Note {
            text: "p".into(),
            children: vec![shared],
        });
        store.reset_stats();
        assert_eq!(graph.write(&parent).unwrap(), 1);
        assert_eq!(store.stats().writes, 1);
    }

    // -----------------------------------------------------------------------
    // Loading
    // -----------------------------------------------------------------------

    #[test]
    fn load_resolves_from_store() {
        let (store, graph) = setup();
        let root = family();
        graph.write(&root).unwrap();

        let fresh = ObjectGraph::new(store.clone());
        let parsed: ObjectRef<Note> = ObjectRef::from_hash(root.hash());
        let note = fresh.resolve(&parsed).unwrap();
        assert_eq!(note.text, "root");
        assert!(!note.children[0].is_loaded());
        assert!(parsed.is_loaded());
    }

    #[test]
    fn load_all_uses_one_batch() {
        let (store, graph) = setup();
        let root = family();
        graph.write(&root).unwrap();

        let fresh = ObjectGraph::new(store.clone());
        let parsed = fresh.resolve(&ObjectRef::<Note>::from_hash(root.hash())).unwrap();
        store.reset_stats();
        let children = fresh.execute(fresh.load_all(&parsed.children)).unwrap();
        assert_eq!(children.len(), 2);
        assert_eq!(children[0].text, "a");
        assert_eq!(store.stats().batch_reads, 1);
    }

    #[test]
    fn arena_deduplicates_by_hash() {
        let (store, graph) = setup();
        let root = family();
        graph.write(&root).unwrap();
        let fresh = ObjectGraph::new(store.clone());
        let first = fresh.resolve(&ObjectRef::<Note>::from_hash(root.hash())).unwrap();
        store.reset_stats();
        let second = fresh.resolve(&ObjectRef::<Note>::from_hash(root.hash())).unwrap();
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(store.stats(), Default::default());
    }

    #[test]
    fn missing_object_is_not_found() {
        let (_, graph) = setup();
        let missing: ObjectRef<Note> = ObjectRef::from_hash(ObjectHash::of("missing/"));
        assert!(matches!(graph.resolve(&missing), Err(StoreError::NotFound(_))));
    }

    #[test]
    fn kind_mismatch_is_reported() {
        let (store, graph) = setup();
        let hash = store.write(&StoredObject::new(ObjectKind::Tree, "x/")).unwrap();
        let r: ObjectRef<Note> = ObjectRef::from_hash(hash);
        assert!(matches!(graph.resolve(&r), Err(StoreError::KindMismatch { .. })));
    }

    #[test]
    fn batch_size_splits_round_trips() {
        let store = Arc::new(InMemoryObjectStore::new());
        let config = GraphConfig {
            batch_size: 2,
            ..GraphConfig::default()
        };
        let graph = ObjectGraph::with_config(store.clone(), config);
        let refs: Vec<ObjectRef<Note>> = (0..5)
            .map(|i| ObjectRef::new(Note::leaf(&i.to_string())))
            .collect();
        for r in &refs {
            graph.write(r).unwrap();
        }
        let fresh = ObjectGraph::with_config(store.clone(), graph.config().clone());
        let parsed = unloaded(&refs);
        store.reset_stats();
        fresh.execute(fresh.load_all(&parsed)).unwrap();
        assert_eq!(store.stats().batch_reads, 3);
    }

    #[test]
    fn small_cache_keeps_one_batch_per_round() {
        let store = Arc::new(InMemoryObjectStore::new());
        let config = GraphConfig {
            batch_size: 4,
            cache_capacity: 3,
        };
        let leaves: Vec<ObjectRef<Note>> = (0..12)
            .map(|i| ObjectRef::new(Note::leaf(&format!("leaf {i}"))))
            .collect();
        let roots: Vec<ObjectRef<Note>> = leaves
            .chunks(3)
            .enumerate()
            .map(|(i, chunk)| {
                ObjectRef::new(Note {
                    text: format!("root {i}"),
                    children: chunk.to_vec(),
                })
            })
            .collect();
        let writer = ObjectGraph::new(store.clone());
        for root in &roots {
            writer.write(root).unwrap();
        }

        let fresh = ObjectGraph::with_config(store.clone(), config);
        let parsed = unloaded(&roots);
        store.reset_stats();
        let graph = fresh.clone();
        let two_levels = fresh.load_all(&parsed).and_then(move |roots| {
            let children: Vec<ObjectRef<Note>> =
                roots.iter().flat_map(|root| root.children.iter().cloned()).collect();
            graph.load_all(&children)
        });
        let children = fresh.execute(two_levels).unwrap();
        assert_eq!(children.len(), 12);
        assert_eq!(children[11].text, "leaf 11");

        let stats = store.stats();
        // 4 roots in one chunk, then 12 leaves in three chunks of four.
        assert_eq!(stats.batch_reads, 4);
        assert_eq!(stats.reads, 0);
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(32))]

        #[test]
        fn load_all_costs_one_batch_per_chunk(
            count in 1usize..40,
            batch_size in 1usize..8,
            cache_capacity in 0usize..8,
        ) {
            let store = Arc::new(InMemoryObjectStore::new());
            let texts: Vec<String> = (0..count).map(|i| format!("leaf {i}")).collect();
            let refs: Vec<ObjectRef<Note>> =
                texts.iter().map(|t| ObjectRef::new(Note::leaf(t))).collect();
            let writer = ObjectGraph::new(store.clone());
            for r in &refs {
                writer.write(r).unwrap();
            }

            let config = GraphConfig { batch_size, cache_capacity };
            let fresh = ObjectGraph::with_config(store.clone(), config);
            let parsed = unloaded(&refs);
            store.reset_stats();
            let loaded = fresh.execute(fresh.load_all(&parsed)).unwrap();
            let loaded: Vec<String> = loaded.iter().map(|n| n.text.clone()).collect();
            prop_assert_eq!(loaded, texts);
            prop_assert_eq!(store.stats().batch_reads, count.div_ceil(batch_size));
            prop_assert_eq!(store.stats().reads, 0);
        }
    }

    // -----------------------------------------------------------------------
    // Reachability
    // -----------------------------------------------------------------------

    #[test]
    fn reachable_walks_and_verifies() {
        let (store, graph) = setup();
        let root = family();
        graph.write(&root).unwrap();
        let mut registry = ObjectRegistry::new();
        registry.register::<Note>();
        let reachable = graph.reachable(&registry, root.hash(), ObjectKind::Node).unwrap();
        assert_eq!(reachable.len(), 3);
        assert_eq!(reachable.len(), store.len());
    }

    #[test]
    fn reachable_reports_missing_children() {
        let (store, graph) = setup();
        let root = family();
        graph.write(&root).unwrap();
        let child = root.loaded().unwrap().children[0].hash();
        store.delete(&child).unwrap();
        let mut registry = ObjectRegistry::new();
        registry.register::<Note>();
        assert!(matches!(
            graph.reachable(&registry, root.hash(), ObjectKind::Node),
            Err(StoreError::NotFound(h)) if h == child
        ));
    }
}
