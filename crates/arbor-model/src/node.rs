//! The immutable node record.
//!
//! A node stores its id, concept, containment (parent and role), the ids of
//! its children in order, and two role tables: property values and
//! reference targets. Role tables are parallel arrays sorted by role, so
//! lookups are binary searches and the serialized form is canonical.
//!
//! Every `with_*` method returns a new record; arrays that did not change
//! are shared with the receiver.

use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;

use arbor_store::{malformed, ObjectData, ObjectKind, StoreResult};
use arbor_types::{codec, ConceptReference, NodeId, NodeReference};

use crate::error::{ModelError, ModelResult};

/// Parent id and the role the node occupies there. `None` is the default
/// (unnamed) role.
pub type Containment<K> = (K, Option<String>);

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Node<K> {
    id: K,
    concept: Option<ConceptReference>,
    containment: Option<Containment<K>>,
    children: Arc<[K]>,
    property_roles: Arc<[String]>,
    property_values: Arc<[String]>,
    reference_roles: Arc<[String]>,
    reference_targets: Arc<[NodeReference]>,
}

impl<K: NodeId> Node<K> {
    /// A node without children, properties or references.
    pub fn new(
        id: K,
        concept: Option<ConceptReference>,
        containment: Option<Containment<K>>,
    ) -> Self {
        Self {
            id,
            concept,
            containment,
            children: Arc::from(Vec::new()),
            property_roles: Arc::from(Vec::new()),
            property_values: Arc::from(Vec::new()),
            reference_roles: Arc::from(Vec::new()),
            reference_targets: Arc::from(Vec::new()),
        }
    }

    /// Build a node from role/value pairs. Pairs may come in any order; a
    /// role given twice keeps its last value.
    pub fn from_parts(
        id: K,
        concept: Option<ConceptReference>,
        containment: Option<Containment<K>>,
        children: Vec<K>,
        properties: Vec<(String, String)>,
        references: Vec<(String, NodeReference)>,
    ) -> ModelResult<Self> {
        let properties: BTreeMap<String, String> = properties.into_iter().collect();
        let references: BTreeMap<String, NodeReference> = references.into_iter().collect();
        let (property_roles, property_values): (Vec<String>, Vec<String>) =
            properties.into_iter().unzip();
        let (reference_roles, reference_targets): (Vec<String>, Vec<NodeReference>) =
            references.into_iter().unzip();
        Self::from_arrays(
            id,
            concept,
            containment,
            children,
            (property_roles, property_values),
            (reference_roles, reference_targets),
        )
    }

    /// Build a node from parallel role/value arrays.
    ///
    /// Fails when a children list repeats an id or when a role array and its
    /// value array differ in length. Roles are sorted if they are not yet.
    pub fn from_arrays(
        id: K,
        concept: Option<ConceptReference>,
        containment: Option<Containment<K>>,
        children: Vec<K>,
        properties: (Vec<String>, Vec<String>),
        references: (Vec<String>, Vec<NodeReference>),
    ) -> ModelResult<Self> {
        check_lengths(&id, "properties", &properties.0, &properties.1)?;
        check_lengths(&id, "references", &references.0, &references.1)?;
        check_children(&id, &children)?;
        let (property_roles, property_values) = sorted(properties);
        let (reference_roles, reference_targets) = sorted(references);
        Ok(Self {
            id,
            concept,
            containment,
            children: children.into(),
            property_roles: property_roles.into(),
            property_values: property_values.into(),
            reference_roles: reference_roles.into(),
            reference_targets: reference_targets.into(),
        })
    }

    // -----------------------------------------------------------------------
    // Accessors
    // -----------------------------------------------------------------------

    pub fn id(&self) -> &K {
        &self.id
    }

    pub fn concept(&self) -> Option<&ConceptReference> {
        self.concept.as_ref()
    }

    pub fn containment(&self) -> Option<&Containment<K>> {
        self.containment.as_ref()
    }

    pub fn parent(&self) -> Option<&K> {
        self.containment.as_ref().map(|(parent, _)| parent)
    }

    pub fn role_in_parent(&self) -> Option<&str> {
        self.containment.as_ref().and_then(|(_, role)| role.as_deref())
    }

    pub fn children(&self) -> &[K] {
        &self.children
    }

    pub fn property(&self, role: &str) -> Option<&str> {
        lookup(&self.property_roles, role).map(|i| self.property_values[i].as_str())
    }

    pub fn property_roles(&self) -> &[String] {
        &self.property_roles
    }

    pub fn properties(&self) -> impl Iterator<Item = (&str, &str)> + '_ {
        self.property_roles
            .iter()
            .zip(self.property_values.iter())
            .map(|(role, value)| (role.as_str(), value.as_str()))
    }

    pub fn reference_target(&self, role: &str) -> Option<&NodeReference> {
        lookup(&self.reference_roles, role).map(|i| &self.reference_targets[i])
    }

    pub fn reference_roles(&self) -> &[String] {
        &self.reference_roles
    }

    pub fn references(&self) -> impl Iterator<Item = (&str, &NodeReference)> + '_ {
        self.reference_roles
            .iter()
            .zip(self.reference_targets.iter())
            .map(|(role, target)| (role.as_str(), target))
    }

    // -----------------------------------------------------------------------
    // Updates
    // -----------------------------------------------------------------------

    /// Set or (with `None`) clear a property.
    pub fn with_property_value(&self, role: &str, value: Option<&str>) -> Self {
        let value = value.map(str::to_owned);
        match update_table(&self.property_roles, &self.property_values, role, value) {
            Some((roles, values)) => Self {
                property_roles: roles,
                property_values: values,
                ..self.clone()
            },
            None => self.clone(),
        }
    }

    /// Set or (with `None`) clear a reference.
    pub fn with_reference_target(&self, role: &str, target: Option<NodeReference>) -> Self {
        match update_table(&self.reference_roles, &self.reference_targets, role, target) {
            Some((roles, targets)) => Self {
                reference_roles: roles,
                reference_targets: targets,
                ..self.clone()
            },
            None => self.clone(),
        }
    }

    pub fn with_containment(&self, containment: Option<Containment<K>>) -> Self {
        Self {
            containment,
            ..self.clone()
        }
    }

    pub fn with_concept(&self, concept: Option<ConceptReference>) -> Self {
        Self {
            concept,
            ..self.clone()
        }
    }

    pub fn with_child_removed(&self, child: &K) -> Self {
        if !self.children.contains(child) {
            return self.clone();
        }
        let children: Vec<K> = self.children.iter().filter(|c| *c != child).cloned().collect();
        Self {
            children: children.into(),
            ..self.clone()
        }
    }

    pub fn with_children(&self, children: Vec<K>) -> ModelResult<Self> {
        check_children(&self.id, &children)?;
        Ok(Self {
            children: children.into(),
            ..self.clone()
        })
    }
}

fn lookup(roles: &[String], role: &str) -> Option<usize> {
    roles.binary_search_by(|r| r.as_str().cmp(role)).ok()
}

/// New arrays for `role` set to `value`, or `None` if nothing changes.
fn update_table<V: Clone + PartialEq>(
    roles: &Arc<[String]>,
    values: &Arc<[V]>,
    role: &str,
    value: Option<V>,
) -> Option<(Arc<[String]>, Arc<[V]>)> {
    match (roles.binary_search_by(|r| r.as_str().cmp(role)), value) {
        (Ok(i), Some(value)) => {
            if values[i] == value {
                return None;
            }
            let mut new_values = values.to_vec();
            new_values[i] = value;
            Some((roles.clone(), new_values.into()))
        }
        (Ok(i), None) => {
            let mut new_roles = roles.to_vec();
            let mut new_values = values.to_vec();
            new_roles.remove(i);
            new_values.remove(i);
            Some((new_roles.into(), new_values.into()))
        }
        (Err(_), None) => None,
        (Err(i), Some(value)) => {
            let mut new_roles = roles.to_vec();
            let mut new_values = values.to_vec();
            new_roles.insert(i, role.to_owned());
            new_values.insert(i, value);
            Some((new_roles.into(), new_values.into()))
        }
    }
}

fn check_lengths<K: NodeId, V>(
    id: &K,
    what: &'static str,
    roles: &[String],
    values: &[V],
) -> ModelResult<()> {
    if roles.len() != values.len() {
        return Err(ModelError::LengthMismatch {
            node: id.serialize(),
            what,
            roles: roles.len(),
            values: values.len(),
        });
    }
    Ok(())
}

fn check_children<K: NodeId>(id: &K, children: &[K]) -> ModelResult<()> {
    let mut seen = HashSet::with_capacity(children.len());
    for child in children {
        if !seen.insert(child) {
            return Err(ModelError::DuplicateChild {
                node: id.serialize(),
                child: child.serialize(),
            });
        }
    }
    Ok(())
}

fn sorted<V>((roles, values): (Vec<String>, Vec<V>)) -> (Vec<String>, Vec<V>) {
    if roles.windows(2).all(|w| w[0] < w[1]) {
        return (roles, values);
    }
    let table: BTreeMap<String, V> = roles.into_iter().zip(values).collect();
    table.into_iter().unzip()
}

// ---------------------------------------------------------------------------
// Serialization
// ---------------------------------------------------------------------------

/// `id/concept/parent/role/child,child/role=value,.../role=target,...`
impl<K: NodeId> ObjectData for Node<K> {
    const KIND: ObjectKind = ObjectKind::Node;

    fn serialize(&self) -> String {
        let children: Vec<String> = self.children.iter().map(NodeId::serialize).collect();
        let properties: Vec<String> = self
            .properties()
            .map(|(role, value)| {
                let (role, value) = (codec::escape(Some(role)), codec::escape(Some(value)));
                format!("{role}{}{value}", codec::MAPPING)
            })
            .collect();
        let references: Vec<String> = self
            .references()
            .map(|(role, target)| {
                format!(
                    "{}{}{}",
                    codec::escape(Some(role)),
                    codec::MAPPING,
                    codec::escape(Some(target.as_str()))
                )
            })
            .collect();
        codec::join_fields(
            [
                self.id.serialize(),
                codec::escape(self.concept.as_ref().map(ConceptReference::uid)),
                K::serialize_optional(self.parent()),
                codec::escape(self.role_in_parent()),
                codec::join_list(children, codec::LEVEL2),
                codec::join_list(properties, codec::LEVEL2),
                codec::join_list(references, codec::LEVEL2),
            ],
            codec::LEVEL1,
        )
    }

    fn deserialize(input: &str) -> StoreResult<Self> {
        let fields = codec::split_exact(input, codec::LEVEL1, 7)?;
        let id = K::deserialize(fields[0])?;
        let concept = codec::unescape(fields[1])?.map(ConceptReference::new);
        let parent = K::deserialize_optional(fields[2])?;
        let role = codec::unescape(fields[3])?;
        let children = codec::split_list(fields[4], codec::LEVEL2)
            .into_iter()
            .map(K::deserialize)
            .collect::<Result<Vec<K>, _>>()?;
        let properties =
            parse_table(fields[5], |value| codec::unescape_required(value).map_err(Into::into))?;
        let references = parse_table(fields[6], |value| {
            Ok(NodeReference::new(codec::unescape_required(value)?))
        })?;
        Self::from_arrays(
            id,
            concept,
            parent.map(|parent| (parent, role)),
            children,
            properties,
            references,
        )
        .map_err(|e| malformed(ObjectKind::Node, e))
    }
}

fn parse_table<V>(
    field: &str,
    parse: impl Fn(&str) -> StoreResult<V>,
) -> StoreResult<(Vec<String>, Vec<V>)> {
    let mut roles = Vec::new();
    let mut values = Vec::new();
    for entry in codec::split_list(field, codec::LEVEL2) {
        let (role, value) = entry
            .split_once(codec::MAPPING)
            .ok_or_else(|| {
                malformed(ObjectKind::Node, format!("role entry without value: {entry}"))
            })?;
        roles.push(codec::unescape_required(role)?);
        values.push(parse(value)?);
    }
    Ok((roles, values))
}
