//! The generic model tree: navigation, bulk mutation and change diffing over
//! a trie of node records, for any node-id type.
//!
//! Every method returns a [`Deferred`] value. Reads that touch several nodes
//! (children of a node, all nodes of a subtree level, both sides of a diff)
//! resolve them through one batched trie lookup.

use std::collections::{BTreeSet, HashMap, HashSet};
use std::sync::Arc;

use arbor_hamt::{HamtLeaf, HamtMap, HamtNode, MapChange};
use arbor_store::{Deferred, ObjectGraph, ObjectRef};
use arbor_types::{ConceptReference, NodeId, NodeReference};
use tracing::{debug, trace};

use crate::error::ModelError;
use crate::mutation::{role_name, ModelChangeEvent, MutationParameters, APPEND};
use crate::node::{Containment, Node};
use crate::tree::Tree;

pub type Step<T> = Deferred<T, ModelError>;

/// An immutable tree of nodes keyed by `K`.
#[derive(Clone, Debug)]
pub struct GenericModelTree<K: NodeId> {
    tree_id: Arc<str>,
    root_id: K,
    uses_role_ids: bool,
    nodes: HamtMap<K, Node<K>>,
}

impl<K: NodeId> GenericModelTree<K> {
    /// A tree holding only its root node.
    pub fn new(graph: ObjectGraph, tree_id: &str, uses_role_ids: bool) -> Self {
        let root_id = K::root_id(tree_id);
        let root = Node::new(root_id.clone(), None, None);
        let leaf = HamtNode::Leaf(HamtLeaf {
            key: root_id.clone(),
            value: ObjectRef::new(root),
        });
        Self {
            tree_id: tree_id.into(),
            root_id,
            uses_role_ids,
            nodes: HamtMap::from_root(graph, ObjectRef::new(leaf)),
        }
    }

    pub fn from_tree(graph: ObjectGraph, tree: &Tree<K>) -> Self {
        Self {
            tree_id: tree.tree_id.as_str().into(),
            root_id: K::root_id(&tree.tree_id),
            uses_role_ids: tree.uses_role_ids,
            nodes: HamtMap::from_root(graph, tree.root.clone()),
        }
    }

    pub fn load(graph: ObjectGraph, tree: &ObjectRef<Tree<K>>) -> Step<Self> {
        let graph_ = graph.clone();
        graph
            .load(tree)
            .err_into()
            .map(move |tree| Self::from_tree(graph_, &tree))
    }

    /// The snapshot object of this tree.
    pub fn tree(&self) -> Tree<K> {
        Tree::new(self.tree_id.to_string(), self.nodes.root().clone(), self.uses_role_ids)
    }

    pub fn tree_id(&self) -> &str {
        &self.tree_id
    }

    pub fn root_id(&self) -> &K {
        &self.root_id
    }

    pub fn uses_role_ids(&self) -> bool {
        self.uses_role_ids
    }

    pub fn nodes(&self) -> &HamtMap<K, Node<K>> {
        &self.nodes
    }

    pub fn graph(&self) -> &ObjectGraph {
        self.nodes.graph()
    }

    fn with_nodes(&self, nodes: HamtMap<K, Node<K>>) -> Self {
        Self {
            tree_id: self.tree_id.clone(),
            root_id: self.root_id.clone(),
            uses_role_ids: self.uses_role_ids,
            nodes,
        }
    }

    // -----------------------------------------------------------------------
    // Navigation
    // -----------------------------------------------------------------------

    /// The record of `id`; fails with [`ModelError::NodeNotFound`].
    pub fn node(&self, id: K) -> Step<Arc<Node<K>>> {
        let graph = self.graph().clone();
        self.nodes.get(id.clone()).err_into().and_then(move |found| match found {
            Some(value) => graph.load(&value).err_into(),
            None => Deferred::failed(ModelError::NodeNotFound(id.serialize())),
        })
    }

    /// Records of all `ids`, in the given order, fetched in one batch.
    pub fn nodes_of(&self, ids: Vec<K>) -> Step<Vec<Arc<Node<K>>>> {
        if ids.is_empty() {
            return Deferred::ready(Vec::new());
        }
        let graph = self.graph().clone();
        self.nodes.get_all(ids.clone()).err_into().and_then(move |found| {
            let found: HashMap<K, ObjectRef<Node<K>>> = found.into_iter().collect();
            let mut refs = Vec::with_capacity(ids.len());
            for id in &ids {
                match found.get(id) {
                    Some(value) => refs.push(value.clone()),
                    None => return Deferred::failed(ModelError::NodeNotFound(id.serialize())),
                }
            }
            graph.load_all(&refs).err_into()
        })
    }

    pub fn contains(&self, id: K) -> Step<bool> {
        self.nodes.contains(id).err_into()
    }

    pub fn concept(&self, id: K) -> Step<Option<ConceptReference>> {
        self.node(id).map(|node| node.concept().cloned())
    }

    pub fn parent(&self, id: K) -> Step<Option<K>> {
        self.node(id).map(|node| node.parent().cloned())
    }

    pub fn containment(&self, id: K) -> Step<Option<Containment<K>>> {
        self.node(id).map(|node| node.containment().cloned())
    }

    pub fn role_in_parent(&self, id: K) -> Step<Option<String>> {
        self.node(id).map(|node| node.role_in_parent().map(str::to_owned))
    }

    pub fn property(&self, id: K, role: &str) -> Step<Option<String>> {
        let role = role.to_owned();
        self.node(id).map(move |node| node.property(&role).map(str::to_owned))
    }

    pub fn property_roles(&self, id: K) -> Step<Vec<String>> {
        self.node(id).map(|node| node.property_roles().to_vec())
    }

    pub fn properties(&self, id: K) -> Step<Vec<(String, String)>> {
        self.node(id).map(|node| {
            node.properties()
                .map(|(role, value)| (role.to_owned(), value.to_owned()))
                .collect()
        })
    }

    pub fn reference_target(&self, id: K, role: &str) -> Step<Option<NodeReference>> {
        let role = role.to_owned();
        self.node(id).map(move |node| node.reference_target(&role).cloned())
    }

    pub fn reference_roles(&self, id: K) -> Step<Vec<String>> {
        self.node(id).map(|node| node.reference_roles().to_vec())
    }

    pub fn references(&self, id: K) -> Step<Vec<(String, NodeReference)>> {
        self.node(id).map(|node| {
            node.references()
                .map(|(role, target)| (role.to_owned(), target.clone()))
                .collect()
        })
    }

    /// All children of `parent`, in order, whatever their role.
    pub fn children(&self, parent: K) -> Step<Vec<K>> {
        self.node(parent).map(|node| node.children().to_vec())
    }

    /// Records of the children of `parent`, checking that each child is
    /// really contained there.
    fn child_nodes(&self, parent: &Node<K>) -> Step<Vec<Arc<Node<K>>>> {
        let parent_id = parent.id().clone();
        self.nodes_of(parent.children().to_vec()).try_map(move |children| {
            for child in &children {
                if child.parent() != Some(&parent_id) {
                    return Err(ModelError::InconsistentContainment {
                        parent: parent_id.serialize(),
                        child: child.id().serialize(),
                    });
                }
            }
            Ok(children)
        })
    }

    pub fn children_in_role(&self, parent: K, role: Option<&str>) -> Step<Vec<K>> {
        let this = self.clone();
        let role = role.map(str::to_owned);
        self.node(parent).and_then(move |node| {
            this.child_nodes(&node).map(move |children| {
                children
                    .iter()
                    .filter(|child| child.role_in_parent() == role.as_deref())
                    .map(|child| child.id().clone())
                    .collect()
            })
        })
    }

    /// Children of `parent` grouped by role, roles in order of first
    /// appearance.
    pub fn all_children(&self, parent: K) -> Step<Vec<(Option<String>, Vec<K>)>> {
        let this = self.clone();
        self.node(parent).and_then(move |node| {
            this.child_nodes(&node).map(|children| {
                let mut groups: Vec<(Option<String>, Vec<K>)> = Vec::new();
                for child in children {
                    let role = child.role_in_parent().map(str::to_owned);
                    match groups.iter_mut().find(|(r, _)| *r == role) {
                        Some((_, ids)) => ids.push(child.id().clone()),
                        None => groups.push((role, vec![child.id().clone()])),
                    }
                }
                groups
            })
        })
    }

    /// `id`'s ancestors, nearest first.
    pub fn ancestors(&self, id: K, include_self: bool) -> Step<Vec<K>> {
        let start = if include_self { vec![id.clone()] } else { Vec::new() };
        collect_ancestors(self.clone(), id, start)
    }

    /// `id` and the nodes below it, level by level. Each level is fetched
    /// in one batch.
    pub fn descendants(&self, id: K, include_self: bool) -> Step<Vec<K>> {
        let start = if include_self { vec![id.clone()] } else { Vec::new() };
        collect_descendants(self.clone(), vec![id], start)
    }

    /// Every node record of the tree, in trie order.
    pub fn all_nodes(&self) -> Step<Vec<Arc<Node<K>>>> {
        let graph = self.graph().clone();
        self.nodes.entries().err_into().and_then(move |entries| {
            let refs: Vec<ObjectRef<Node<K>>> =
                entries.into_iter().map(|(_, value)| value).collect();
            graph.load_all(&refs).err_into()
        })
    }

    // -----------------------------------------------------------------------
    // Mutation
    // -----------------------------------------------------------------------

    /// Apply `operations` in order; each sees the result of the previous one.
    pub fn mutate(&self, operations: Vec<MutationParameters<K>>) -> Step<Self> {
        debug!(tree = %self.tree_id, count = operations.len(), "mutating tree");
        Deferred::fold(self.clone(), operations.into_iter(), |tree, operation| {
            tree.apply(operation)
        })
    }

    pub fn apply(&self, operation: MutationParameters<K>) -> Step<Self> {
        trace!(?operation, "applying mutation");
        match operation {
            MutationParameters::AddNew {
                parent,
                role,
                index,
                nodes,
            } => self.add_new_children(parent, role, index, nodes),
            MutationParameters::Move {
                parent,
                role,
                index,
                children,
            } => Deferred::fold(self.clone(), children.into_iter(), move |tree, child| {
                tree.move_node(parent.clone(), role.clone(), index, child)
            }),
            MutationParameters::Property { node, role, value } => self.update_node(node, move |n| {
                Ok(n.with_property_value(&role, value.as_deref()))
            }),
            MutationParameters::Reference { node, role, target } => {
                self.update_node(node, move |n| Ok(n.with_reference_target(&role, target)))
            }
            MutationParameters::Concept { node, concept } => {
                self.update_node(node, move |n| Ok(n.with_concept(concept)))
            }
            MutationParameters::Remove { node } => self.remove_node(node),
        }
    }

    pub fn add_new_child(
        &self,
        parent: K,
        role: Option<&str>,
        index: i32,
        child: K,
        concept: Option<ConceptReference>,
    ) -> Step<Self> {
        self.add_new_children(parent, role.map(str::to_owned), index, vec![(child, concept)])
    }

    pub fn set_property(&self, node: K, role: &str, value: Option<&str>) -> Step<Self> {
        self.apply(MutationParameters::Property {
            node,
            role: role.to_owned(),
            value: value.map(str::to_owned),
        })
    }

    pub fn set_reference_target(
        &self,
        node: K,
        role: &str,
        target: Option<NodeReference>,
    ) -> Step<Self> {
        self.apply(MutationParameters::Reference {
            node,
            role: role.to_owned(),
            target,
        })
    }

    pub fn set_concept(&self, node: K, concept: Option<ConceptReference>) -> Step<Self> {
        self.apply(MutationParameters::Concept { node, concept })
    }

    fn update_node<F>(&self, id: K, update: F) -> Step<Self>
    where
        F: FnOnce(&Node<K>) -> Result<Node<K>, ModelError> + Send + 'static,
    {
        let this = self.clone();
        self.node(id.clone()).and_then(move |node| match update(&node) {
            Ok(updated) if updated == *node => Deferred::ready(this),
            Ok(updated) => this.put_nodes(vec![(id, Some(updated))]),
            Err(e) => Deferred::failed(e),
        })
    }

    fn put_nodes(&self, entries: Vec<(K, Option<Node<K>>)>) -> Step<Self> {
        let entries = entries
            .into_iter()
            .map(|(id, node)| (id, node.map(ObjectRef::new)))
            .collect();
        let this = self.clone();
        self.nodes
            .put_all(entries)
            .err_into()
            .map(move |nodes| this.with_nodes(nodes))
    }

    /// Children array of `parent` after inserting `new_ids` at `index` among
    /// the children in `role`. Children of other roles keep their places.
    fn insert_children(
        &self,
        parent: Arc<Node<K>>,
        role: Option<String>,
        index: i32,
        new_ids: Vec<K>,
    ) -> Step<Vec<K>> {
        if index == APPEND {
            let mut all = parent.children().to_vec();
            all.extend(new_ids);
            return Deferred::ready(all);
        }
        self.child_nodes(&parent).try_map(move |children| {
            let in_role: Vec<&K> = children
                .iter()
                .filter(|child| child.role_in_parent() == role.as_deref())
                .map(|child| child.id())
                .collect();
            let size = in_role.len();
            let position = usize::try_from(index).ok().filter(|i| *i <= size).ok_or_else(|| {
                ModelError::InvalidIndex {
                    parent: parent.id().serialize(),
                    role: role_name(role.as_deref()),
                    index,
                    size,
                }
            })?;
            let mut all = parent.children().to_vec();
            let at = match in_role.get(position) {
                Some(anchor) => all.iter().position(|c| c == *anchor).unwrap_or(all.len()),
                None => all.len(),
            };
            all.splice(at..at, new_ids);
            Ok(all)
        })
    }

    fn add_new_children(
        &self,
        parent: K,
        role: Option<String>,
        index: i32,
        nodes: Vec<(K, Option<ConceptReference>)>,
    ) -> Step<Self> {
        if let Some((id, _)) = nodes.iter().find(|(id, _)| !id.is_valid()) {
            return Deferred::failed(ModelError::InvalidNodeId(id.serialize()));
        }
        let ids: Vec<K> = nodes.iter().map(|(id, _)| id.clone()).collect();
        let this = self.clone();
        let existing = self.nodes.get_all(ids.clone()).err_into();
        existing
            .zip(self.node(parent.clone()))
            .and_then(move |(existing, parent_node)| {
                if let Some((id, _)) = existing.first() {
                    return Deferred::failed(ModelError::NodeExists(id.serialize()));
                }
                let tree = this.clone();
                this.insert_children(parent_node.clone(), role.clone(), index, ids)
                    .and_then(move |children| {
                        let updated = match parent_node.with_children(children) {
                            Ok(updated) => updated,
                            Err(e) => return Deferred::failed(e),
                        };
                        let mut entries: Vec<(K, Option<Node<K>>)> = nodes
                            .into_iter()
                            .map(|(id, concept)| {
                                let containment = Some((parent.clone(), role.clone()));
                                (id.clone(), Some(Node::new(id, concept, containment)))
                            })
                            .collect();
                        entries.push((parent, Some(updated)));
                        tree.put_nodes(entries)
                    })
            })
    }

    /// Move `child` to `index` among the children of `new_parent` in `role`.
    ///
    /// Within the same parent and role, `index` counts positions before the
    /// move. Fails for the root and when `new_parent` lies below `child`.
    pub fn move_node(
        &self,
        new_parent: K,
        role: Option<String>,
        index: i32,
        child: K,
    ) -> Step<Self> {
        if child == self.root_id {
            return Deferred::failed(ModelError::MoveRoot);
        }
        let this = self.clone();
        self.ancestors(new_parent.clone(), true)
            .zip(self.node(child.clone()))
            .and_then(move |(ancestors, child_node)| {
                if ancestors.contains(&child) {
                    return Deferred::failed(ModelError::ContainmentCycle {
                        parent: new_parent.serialize(),
                        child: child.serialize(),
                    });
                }
                let Some((old_parent, old_role)) = child_node.containment().cloned() else {
                    return Deferred::failed(ModelError::NoParent(child.serialize()));
                };
                let adjusted = if old_parent == new_parent && old_role == role && index != APPEND {
                    let moved = child.clone();
                    this.children_in_role(old_parent.clone(), old_role.as_deref())
                        .map(move |siblings| match siblings.iter().position(|s| *s == moved) {
                            Some(old_index) if (old_index as i64) < i64::from(index) => index - 1,
                            _ => index,
                        })
                } else {
                    Deferred::ready(index)
                };
                let removed_child = child.clone();
                adjusted.and_then(move |index| {
                    this.update_node(old_parent, move |p| Ok(p.with_child_removed(&removed_child)))
                        .and_then(move |tree| {
                            tree.attach(new_parent, role, index, child, child_node)
                        })
                })
            })
    }

    /// Insert the detached `child` under `parent` and record its new
    /// containment.
    fn attach(
        &self,
        parent: K,
        role: Option<String>,
        index: i32,
        child: K,
        child_node: Arc<Node<K>>,
    ) -> Step<Self> {
        let this = self.clone();
        self.node(parent.clone()).and_then(move |parent_node| {
            let ids = vec![child.clone()];
            this.insert_children(parent_node.clone(), role.clone(), index, ids)
                .and_then(move |children| {
                    let updated = match parent_node.with_children(children) {
                        Ok(updated) => updated,
                        Err(e) => return Deferred::failed(e),
                    };
                    let moved = child_node.with_containment(Some((parent.clone(), role)));
                    this.put_nodes(vec![(parent, Some(updated)), (child, Some(moved))])
                })
        })
    }

    /// Delete `id` and its whole subtree.
    pub fn remove_node(&self, id: K) -> Step<Self> {
        if id == self.root_id {
            return Deferred::failed(ModelError::DeleteRoot);
        }
        let this = self.clone();
        self.node(id.clone())
            .zip(self.descendants(id.clone(), true))
            .and_then(move |(node, doomed)| {
                let Some(parent) = node.parent().cloned() else {
                    return Deferred::failed(ModelError::NoParent(id.serialize()));
                };
                debug!(node = %id.serialize(), count = doomed.len(), "removing subtree");
                let tree = this.clone();
                this.node(parent.clone()).and_then(move |parent_node| {
                    let mut entries: Vec<(K, Option<Node<K>>)> =
                        doomed.into_iter().map(|doomed| (doomed, None)).collect();
                    entries.push((parent, Some(parent_node.with_child_removed(&id))));
                    tree.put_nodes(entries)
                })
            })
    }

    // -----------------------------------------------------------------------
    // Diffing
    // -----------------------------------------------------------------------

    /// Events turning `old` into this tree. With `changes_only`, added and
    /// removed nodes are not reported.
    ///
    /// Both trees must be readable through this tree's graph.
    pub fn get_changes(&self, old: &Self, changes_only: bool) -> Step<Vec<ModelChangeEvent<K>>> {
        if self.nodes.hash() == old.nodes.hash() {
            return Deferred::ready(Vec::new());
        }
        let new_tree = self.clone();
        let old_tree = old.clone();
        self.nodes
            .get_changes(&old.nodes, changes_only)
            .err_into()
            .and_then(move |changes| {
                let parts = changes
                    .into_iter()
                    .map(|change| match change {
                        MapChange::Added { key, .. } => Deferred::ready(if changes_only {
                            Vec::new()
                        } else {
                            vec![ModelChangeEvent::NodeAdded { node: key }]
                        }),
                        MapChange::Removed { key, .. } => Deferred::ready(if changes_only {
                            Vec::new()
                        } else {
                            vec![ModelChangeEvent::NodeRemoved { node: key }]
                        }),
                        MapChange::Changed { old, new, .. } => {
                            node_changes(&new_tree, &old_tree, old, new)
                        }
                    })
                    .collect();
                Deferred::join_all(parts).map(|parts| {
                    let mut seen = HashSet::new();
                    parts
                        .into_iter()
                        .flatten()
                        .filter(|event| seen.insert(event.clone()))
                        .collect()
                })
            })
    }
}

fn collect_ancestors<K: NodeId>(tree: GenericModelTree<K>, id: K, mut acc: Vec<K>) -> Step<Vec<K>> {
    let next = tree.clone();
    tree.node(id).and_then(move |node| match node.parent() {
        None => Deferred::ready(acc),
        Some(parent) => {
            if acc.contains(parent) {
                return Deferred::failed(ModelError::InconsistentContainment {
                    parent: parent.serialize(),
                    child: node.id().serialize(),
                });
            }
            acc.push(parent.clone());
            collect_ancestors(next, parent.clone(), acc)
        }
    })
}

fn collect_descendants<K: NodeId>(
    tree: GenericModelTree<K>,
    level: Vec<K>,
    mut acc: Vec<K>,
) -> Step<Vec<K>> {
    if level.is_empty() {
        return Deferred::ready(acc);
    }
    let next = tree.clone();
    tree.nodes_of(level).and_then(move |nodes| {
        let below: Vec<K> = nodes.iter().flat_map(|n| n.children().iter().cloned()).collect();
        acc.extend(below.iter().cloned());
        collect_descendants(next, below, acc)
    })
}

/// Events for one node whose record changed.
fn node_changes<K: NodeId>(
    new_tree: &GenericModelTree<K>,
    old_tree: &GenericModelTree<K>,
    old: ObjectRef<Node<K>>,
    new: ObjectRef<Node<K>>,
) -> Step<Vec<ModelChangeEvent<K>>> {
    let graph = new_tree.graph();
    let new_tree = new_tree.clone();
    let old_tree = old_tree.clone();
    graph
        .load(&old)
        .zip(graph.load(&new))
        .err_into()
        .and_then(move |(old, new)| {
            let mut events = record_changes(&old, &new);
            if old.children() == new.children() {
                return Deferred::ready(events);
            }
            let id = new.id().clone();
            new_tree
                .nodes_of(new.children().to_vec())
                .zip(old_tree.nodes_of(old.children().to_vec()))
                .map(move |(new_children, old_children)| {
                    let new_roles = by_role(&new_children);
                    let old_roles = by_role(&old_children);
                    let roles: BTreeSet<&Option<String>> =
                        new_roles.keys().chain(old_roles.keys()).collect();
                    for role in roles {
                        if new_roles.get(role) != old_roles.get(role) {
                            events.push(ModelChangeEvent::ChildrenChanged {
                                parent: id.clone(),
                                role: role.clone(),
                            });
                        }
                    }
                    events
                })
        })
}

/// Differences visible on the two records alone.
fn record_changes<K: NodeId>(old: &Node<K>, new: &Node<K>) -> Vec<ModelChangeEvent<K>> {
    let id = new.id().clone();
    let mut events = Vec::new();
    if old.parent() != new.parent() {
        events.push(ModelChangeEvent::ContainmentChanged { node: id.clone() });
    } else if old.role_in_parent() != new.role_in_parent() {
        events.push(ModelChangeEvent::ContainmentChanged { node: id.clone() });
        if let Some(parent) = new.parent() {
            events.push(ModelChangeEvent::ChildrenChanged {
                parent: parent.clone(),
                role: old.role_in_parent().map(str::to_owned),
            });
            events.push(ModelChangeEvent::ChildrenChanged {
                parent: parent.clone(),
                role: new.role_in_parent().map(str::to_owned),
            });
        }
    }
    if old.concept() != new.concept() {
        events.push(ModelChangeEvent::ConceptChanged { node: id.clone() });
    }
    let property_roles: BTreeSet<&String> =
        old.property_roles().iter().chain(new.property_roles()).collect();
    for role in property_roles {
        if old.property(role) != new.property(role) {
            events.push(ModelChangeEvent::PropertyChanged {
                node: id.clone(),
                role: role.clone(),
            });
        }
    }
    let reference_roles: BTreeSet<&String> =
        old.reference_roles().iter().chain(new.reference_roles()).collect();
    for role in reference_roles {
        if old.reference_target(role) != new.reference_target(role) {
            events.push(ModelChangeEvent::ReferenceChanged {
                node: id.clone(),
                role: role.clone(),
            });
        }
    }
    events
}

fn by_role<K: NodeId>(children: &[Arc<Node<K>>]) -> HashMap<Option<String>, Vec<K>> {
    let mut roles: HashMap<Option<String>, Vec<K>> = HashMap::new();
    for child in children {
        roles
            .entry(child.role_in_parent().map(str::to_owned))
            .or_default()
            .push(child.id().clone());
    }
    roles
}
