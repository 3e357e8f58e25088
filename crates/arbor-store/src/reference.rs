use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, OnceLock};

use arbor_types::ObjectHash;

use crate::error::{StoreError, StoreResult};
use crate::object::{ObjectData, ObjectKind, StoredObject};

/// Content-addressed handle to an object of type `T`.
///
/// A reference is its hash plus a lazily filled value. References built from
/// a value ([`ObjectRef::new`]) carry the value and are not yet persisted;
/// references parsed from a stored object ([`ObjectRef::from_hash`]) start
/// empty and are filled by [`crate::ObjectGraph::load`]. Clones share the
/// same slot, so a value resolved through one clone is visible to all.
///
/// Equality and hashing consider the content hash only.
pub struct ObjectRef<T> {
    inner: Arc<RefInner<T>>,
}

struct RefInner<T> {
    hash: ObjectHash,
    data: OnceLock<Arc<T>>,
    persisted: AtomicBool,
}

impl<T: ObjectData> ObjectRef<T> {
    /// Reference a freshly created value.
    pub fn new(data: T) -> Self {
        Self::from_arc(Arc::new(data))
    }

    /// Reference a freshly created, already shared value.
    pub fn from_arc(data: Arc<T>) -> Self {
        let hash = data.hash();
        let slot = OnceLock::new();
        let _ = slot.set(data);
        Self {
            inner: Arc::new(RefInner {
                hash,
                data: slot,
                persisted: AtomicBool::new(false),
            }),
        }
    }

    /// Reference an object that already lives in the store.
    pub fn from_hash(hash: ObjectHash) -> Self {
        Self {
            inner: Arc::new(RefInner {
                hash,
                data: OnceLock::new(),
                persisted: AtomicBool::new(true),
            }),
        }
    }

    /// Parse a hash field of a serialized object.
    pub fn parse(field: &str) -> StoreResult<Self> {
        Ok(Self::from_hash(ObjectHash::parse(field)?))
    }

    /// Pair a known hash with its value, verifying that they agree.
    pub fn with_data(hash: ObjectHash, data: T) -> StoreResult<Self> {
        let computed = data.hash();
        if computed != hash {
            return Err(StoreError::HashMismatch {
                expected: hash,
                computed,
            });
        }
        Ok(Self::new(data))
    }

    /// The content hash.
    pub fn hash(&self) -> ObjectHash {
        self.inner.hash
    }

    /// The value, if it is already in memory.
    pub fn loaded(&self) -> Option<Arc<T>> {
        self.inner.data.get().cloned()
    }

    pub fn is_loaded(&self) -> bool {
        self.inner.data.get().is_some()
    }

    /// Whether the object is known to be in the store.
    pub fn is_persisted(&self) -> bool {
        self.inner.persisted.load(Ordering::Acquire)
    }

    /// Type-erased view, for persistence and reachability walks.
    pub fn erase(&self) -> ErasedRef {
        ErasedRef {
            inner: self.inner.clone(),
        }
    }

    pub(crate) fn fill(&self, data: Arc<T>) {
        let _ = self.inner.data.set(data);
    }
}

impl<T> Clone for ObjectRef<T> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<T> PartialEq for ObjectRef<T> {
    fn eq(&self, other: &Self) -> bool {
        self.inner.hash == other.inner.hash
    }
}

impl<T> Eq for ObjectRef<T> {}

impl<T> Hash for ObjectRef<T> {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.inner.hash.hash(state);
    }
}

impl<T> fmt::Debug for ObjectRef<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ObjectRef({})", self.inner.hash.short())
    }
}

/// Object-safe view of a reference's slot.
trait AnyRef: Send + Sync {
    fn hash(&self) -> ObjectHash;
    fn kind(&self) -> ObjectKind;
    fn is_persisted(&self) -> bool;
    fn mark_persisted(&self);
    fn stored(&self) -> Option<(StoredObject, Vec<ErasedRef>)>;
    fn children(&self) -> Option<Vec<ErasedRef>>;
}

impl<T: ObjectData> AnyRef for RefInner<T> {
    fn hash(&self) -> ObjectHash {
        self.hash
    }

    fn kind(&self) -> ObjectKind {
        T::KIND
    }

    fn is_persisted(&self) -> bool {
        self.persisted.load(Ordering::Acquire)
    }

    fn mark_persisted(&self) {
        self.persisted.store(true, Ordering::Release);
    }

    fn stored(&self) -> Option<(StoredObject, Vec<ErasedRef>)> {
        let data = self.data.get()?;
        Some((
            StoredObject::new(T::KIND, data.serialize()),
            data.containment_refs(),
        ))
    }

    fn children(&self) -> Option<Vec<ErasedRef>> {
        self.data.get().map(|data| data.containment_refs())
    }
}

/// Type-erased [`ObjectRef`].
#[derive(Clone)]
pub struct ErasedRef {
    inner: Arc<dyn AnyRef>,
}

impl ErasedRef {
    pub fn hash(&self) -> ObjectHash {
        self.inner.hash()
    }

    pub fn kind(&self) -> ObjectKind {
        self.inner.kind()
    }

    pub fn is_persisted(&self) -> bool {
        self.inner.is_persisted()
    }

    /// Outgoing references, if the value is in memory.
    pub fn children(&self) -> Option<Vec<ErasedRef>> {
        self.inner.children()
    }

    pub(crate) fn stored(&self) -> Option<(StoredObject, Vec<ErasedRef>)> {
        self.inner.stored()
    }

    pub(crate) fn mark_persisted(&self) {
        self.inner.mark_persisted();
    }
}

impl fmt::Debug for ErasedRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ErasedRef({} {})", self.kind(), self.hash().short())
    }
}
