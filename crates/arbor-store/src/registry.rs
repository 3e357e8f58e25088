use std::collections::HashMap;

use arbor_types::ObjectHash;

use crate::error::{StoreError, StoreResult};
use crate::object::{ObjectData, ObjectKind};

type ChildrenFn = fn(&str) -> StoreResult<Vec<(ObjectHash, ObjectKind)>>;
type ReserializeFn = fn(&str) -> StoreResult<String>;

struct Entry {
    type_name: &'static str,
    children: ChildrenFn,
    reserialize: ReserializeFn,
}

/// Table of object kinds that generic walkers can decode.
///
/// Built once at startup by registering each concrete [`ObjectData`] type,
/// then passed by reference wherever a stored object must be interpreted
/// without static knowledge of its type (reachability walks, verification).
#[derive(Default)]
pub struct ObjectRegistry {
    entries: HashMap<ObjectKind, Entry>,
}

impl ObjectRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `T` as the decoder for `T::KIND`, replacing any earlier entry.
    pub fn register<T: ObjectData>(&mut self) -> &mut Self {
        self.entries.insert(
            T::KIND,
            Entry {
                type_name: std::any::type_name::<T>(),
                children: children_of::<T>,
                reserialize: reserialize::<T>,
            },
        );
        self
    }

    pub fn is_registered(&self, kind: ObjectKind) -> bool {
        self.entries.contains_key(&kind)
    }

    /// Name of the type registered for `kind`.
    pub fn type_name(&self, kind: ObjectKind) -> Option<&'static str> {
        self.entries.get(&kind).map(|entry| entry.type_name)
    }

    /// Outgoing references of a serialized object.
    pub fn children(
        &self,
        kind: ObjectKind,
        data: &str,
    ) -> StoreResult<Vec<(ObjectHash, ObjectKind)>> {
        (self.entry(kind)?.children)(data)
    }

    /// Check that `data` is the canonical serialization hashing to `expected`.
    pub fn verify(&self, kind: ObjectKind, data: &str, expected: ObjectHash) -> StoreResult<()> {
        let canonical = (self.entry(kind)?.reserialize)(data)?;
        let computed = ObjectHash::of(&canonical);
        if computed != expected {
            return Err(StoreError::HashMismatch { expected, computed });
        }
        Ok(())
    }

    fn entry(&self, kind: ObjectKind) -> StoreResult<&Entry> {
        self.entries
            .get(&kind)
            .ok_or(StoreError::UnregisteredKind(kind))
    }
}

fn children_of<T: ObjectData>(data: &str) -> StoreResult<Vec<(ObjectHash, ObjectKind)>> {
    Ok(T::deserialize(data)?
        .containment_refs()
        .iter()
        .map(|r| (r.hash(), r.kind()))
        .collect())
}

fn reserialize<T: ObjectData>(data: &str) -> StoreResult<String> {
    Ok(T::deserialize(data)?.serialize())
}

impl std::fmt::Debug for ObjectRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut kinds: Vec<ObjectKind> = self.entries.keys().copied().collect();
        kinds.sort();
        f.debug_struct("ObjectRegistry").field("kinds", &kinds).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reference::tests::Note;
    use crate::reference::ObjectRef;

    #[test]
    fn unregistered_kind_is_an_error() {
        let registry = ObjectRegistry::new();
        assert!(matches!(
            registry.children(ObjectKind::Tree, ""),
            Err(StoreError::UnregisteredKind(ObjectKind::Tree))
        ));
    }

    #[test]
    fn children_of_registered_kind() {
        let mut registry = ObjectRegistry::new();
        registry.register::<Note>();
        assert!(registry.is_registered(ObjectKind::Node));
        let child = ObjectRef::new(Note::leaf("c"));
        let parent = Note {
            text: "p".into(),
            children: vec![child.clone()],
        };
        let children = registry.children(ObjectKind::Node, &parent.serialize()).unwrap();
        assert_eq!(children, vec![(child.hash(), ObjectKind::Node)]);
    }

    #[test]
    fn verify_detects_foreign_hash() {
        let mut registry = ObjectRegistry::new();
        registry.register::<Note>();
        let data = Note::leaf("a").serialize();
        assert!(registry.verify(ObjectKind::Node, &data, ObjectHash::of(&data)).is_ok());
        assert!(matches!(
            registry.verify(ObjectKind::Node, &data, ObjectHash::of("other")),
            Err(StoreError::HashMismatch { .. })
        ));
    }
}
