use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{PoisonError, RwLock};

use arbor_types::ObjectHash;
use tracing::trace;

use crate::error::StoreResult;
use crate::object::StoredObject;
use crate::traits::ObjectStore;

/// Round-trip counters of an [`InMemoryObjectStore`].
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct StoreStats {
    /// Calls to `read` (including those made by the default batch path).
    pub reads: usize,
    /// Calls to `read_batch`.
    pub batch_reads: usize,
    /// Objects passed to `write` or `write_batch`.
    pub writes: usize,
}

/// In-memory, HashMap-based object store.
///
/// Intended for tests and embedding. All objects are held in memory behind a
/// `RwLock`; round trips are counted so tests can assert batching.
pub struct InMemoryObjectStore {
    objects: RwLock<HashMap<ObjectHash, StoredObject>>,
    reads: AtomicUsize,
    batch_reads: AtomicUsize,
    writes: AtomicUsize,
}

impl InMemoryObjectStore {
    /// Create a new empty in-memory store.
    pub fn new() -> Self {
        Self {
            objects: RwLock::new(HashMap::new()),
            reads: AtomicUsize::new(0),
            batch_reads: AtomicUsize::new(0),
            writes: AtomicUsize::new(0),
        }
    }

    /// Number of objects currently stored.
    pub fn len(&self) -> usize {
        self.objects.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    /// Returns `true` if the store is empty.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Remove all objects from the store.
    pub fn clear(&self) {
        self.objects
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
    }

    /// Return a sorted list of all hashes in the store.
    pub fn all_hashes(&self) -> Vec<ObjectHash> {
        let map = self.objects.read().unwrap_or_else(PoisonError::into_inner);
        let mut hashes: Vec<ObjectHash> = map.keys().copied().collect();
        hashes.sort();
        hashes
    }

    /// Round trips served so far.
    pub fn stats(&self) -> StoreStats {
        StoreStats {
            reads: self.reads.load(Ordering::Relaxed),
            batch_reads: self.batch_reads.load(Ordering::Relaxed),
            writes: self.writes.load(Ordering::Relaxed),
        }
    }

    /// Reset the round-trip counters.
    pub fn reset_stats(&self) {
        self.reads.store(0, Ordering::Relaxed);
        self.batch_reads.store(0, Ordering::Relaxed);
        self.writes.store(0, Ordering::Relaxed);
    }
}

impl Default for InMemoryObjectStore {
    fn default() -> Self {
        Self::new()
    }
}

impl ObjectStore for InMemoryObjectStore {
    fn read(&self, hash: &ObjectHash) -> StoreResult<Option<StoredObject>> {
        self.reads.fetch_add(1, Ordering::Relaxed);
        let map = self.objects.read().unwrap_or_else(PoisonError::into_inner);
        Ok(map.get(hash).cloned())
    }

    fn write(&self, object: &StoredObject) -> StoreResult<ObjectHash> {
        self.writes.fetch_add(1, Ordering::Relaxed);
        let hash = object.compute_hash();
        let mut map = self.objects.write().unwrap_or_else(PoisonError::into_inner);
        map.entry(hash).or_insert_with(|| object.clone());
        Ok(hash)
    }

    fn exists(&self, hash: &ObjectHash) -> StoreResult<bool> {
        let map = self.objects.read().unwrap_or_else(PoisonError::into_inner);
        Ok(map.contains_key(hash))
    }

    fn delete(&self, hash: &ObjectHash) -> StoreResult<bool> {
        let mut map = self.objects.write().unwrap_or_else(PoisonError::into_inner);
        Ok(map.remove(hash).is_some())
    }

    fn read_batch(&self, hashes: &[ObjectHash]) -> StoreResult<Vec<Option<StoredObject>>> {
        self.batch_reads.fetch_add(1, Ordering::Relaxed);
        trace!(count = hashes.len(), "batch read");
        let map = self.objects.read().unwrap_or_else(PoisonError::into_inner);
        Ok(hashes.iter().map(|hash| map.get(hash).cloned()).collect())
    }
}

impl std::fmt::Debug for InMemoryObjectStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InMemoryObjectStore")
            .field("object_count", &self.len())
            .field("stats", &self.stats())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::object::ObjectKind;

    fn node(data: &str) -> StoredObject {
        StoredObject::new(ObjectKind::Node, data)
    }

    // -----------------------------------------------------------------------
    // Basic CRUD
    // -----------------------------------------------------------------------

    #[test]
    fn write_then_read() {
        let store = InMemoryObjectStore::new();
        let obj = node("1/%00/0/%00///");
        let hash = store.write(&obj).unwrap();
        assert_eq!(hash, obj.compute_hash());
        assert_eq!(store.read(&hash).unwrap(), Some(obj));
    }

    #[test]
    fn read_missing_returns_none() {
        let store = InMemoryObjectStore::new();
        assert!(store.read(&ObjectHash::of("nope")).unwrap().is_none());
    }

    #[test]
    fn write_is_idempotent() {
        let store = InMemoryObjectStore::new();
        let obj = node("same");
        let a = store.write(&obj).unwrap();
        let b = store.write(&obj).unwrap();
        assert_eq!(a, b);
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn exists_and_delete() {
        let store = InMemoryObjectStore::new();
        let hash = store.write(&node("x")).unwrap();
        assert!(store.exists(&hash).unwrap());
        assert!(store.delete(&hash).unwrap());
        assert!(!store.exists(&hash).unwrap());
        assert!(!store.delete(&hash).unwrap());
    }

    #[test]
    fn clear_and_all_hashes() {
        let store = InMemoryObjectStore::new();
        store.write(&node("a")).unwrap();
        store.write(&node("b")).unwrap();
        let hashes = store.all_hashes();
        assert_eq!(hashes.len(), 2);
        assert!(hashes[0] < hashes[1]);
        store.clear();
        assert!(store.is_empty());
    }

    // -----------------------------------------------------------------------
    // Batching
    // -----------------------------------------------------------------------

    #[test]
    fn read_batch_preserves_order_and_counts_one_round_trip() {
        let store = InMemoryObjectStore::new();
        let a = store.write(&node("a")).unwrap();
        let b = store.write(&node("b")).unwrap();
        let missing = ObjectHash::of("missing");
        store.reset_stats();

        let result = store.read_batch(&[b, missing, a]).unwrap();
        assert_eq!(result[0].as_ref().unwrap().data, "b");
        assert!(result[1].is_none());
        assert_eq!(result[2].as_ref().unwrap().data, "a");

        let stats = store.stats();
        assert_eq!(stats.batch_reads, 1);
        assert_eq!(stats.reads, 0);
    }

    #[test]
    fn write_batch_counts_objects() {
        let store = InMemoryObjectStore::new();
        let hashes = store.write_batch(&[node("a"), node("b"), node("c")]).unwrap();
        assert_eq!(hashes.len(), 3);
        assert_eq!(store.stats().writes, 3);
    }

    #[test]
    fn debug_shows_count() {
        let store = InMemoryObjectStore::new();
        store.write(&node("a")).unwrap();
        let debug = format!("{store:?}");
        assert!(debug.contains("object_count: 1"));
    }
}
