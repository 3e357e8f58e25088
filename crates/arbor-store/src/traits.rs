use arbor_types::ObjectHash;

use crate::error::StoreResult;
use crate::object::StoredObject;

/// Content-addressed object store.
///
/// All implementations must satisfy these invariants:
/// - Objects are immutable once written. The same data always produces the
///   same hash, so writes are idempotent.
/// - Write-then-link: write the object, then hand out its hash.
/// - Concurrent reads are always safe (objects are immutable).
/// - The store never interprets object contents.
/// - Backend failures are propagated, never silently ignored.
///
/// Remote or slow backends should override [`ObjectStore::read_batch`]: the
/// object graph groups every hash a traversal level needs into one call.
pub trait ObjectStore: Send + Sync {
    /// Read an object by hash.
    ///
    /// Returns `Ok(None)` if the object does not exist.
    fn read(&self, hash: &ObjectHash) -> StoreResult<Option<StoredObject>>;

    /// Write an object and return its hash.
    ///
    /// If the object already exists, this is a no-op.
    fn write(&self, object: &StoredObject) -> StoreResult<ObjectHash>;

    /// Check whether an object exists in the store.
    fn exists(&self, hash: &ObjectHash) -> StoreResult<bool>;

    /// Delete an object by hash. Returns `true` if the object existed.
    ///
    /// Intended for garbage collection only.
    fn delete(&self, hash: &ObjectHash) -> StoreResult<bool>;

    /// Read multiple objects in one round trip.
    ///
    /// The result has one entry per requested hash, in request order.
    fn read_batch(&self, hashes: &[ObjectHash]) -> StoreResult<Vec<Option<StoredObject>>> {
        hashes.iter().map(|hash| self.read(hash)).collect()
    }

    /// Write multiple objects and return their hashes.
    fn write_batch(&self, objects: &[StoredObject]) -> StoreResult<Vec<ObjectHash>> {
        objects.iter().map(|obj| self.write(obj)).collect()
    }
}
