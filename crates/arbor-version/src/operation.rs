//! Operation log entries recorded by versions.
//!
//! Each entry serializes as `Name;part;part;...`. Multi-valued parts use
//! `:` between items. Every free-text part is escaped, so an entry never
//! contains the `,` that separates entries in a log.

use arbor_model::{MutationParameters, APPEND};
use arbor_store::{malformed, ObjectHash, ObjectKind, StoreError, StoreResult};
use arbor_types::{codec, ConceptReference, NodeId, NodeReference};

use crate::error::{VersionError, VersionResult};

/// One recorded change.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Operation<K> {
    AddNewChild {
        parent: K,
        role: Option<String>,
        index: i32,
        child: K,
        concept: Option<ConceptReference>,
    },
    AddNewChildren {
        parent: K,
        role: Option<String>,
        index: i32,
        children: Vec<(K, Option<ConceptReference>)>,
    },
    DeleteNode {
        node: K,
    },
    MoveNode {
        child: K,
        parent: K,
        role: Option<String>,
        index: i32,
    },
    SetProperty {
        node: K,
        role: String,
        value: Option<String>,
    },
    SetReference {
        node: K,
        role: String,
        target: Option<NodeReference>,
    },
    SetConcept {
        node: K,
        concept: Option<ConceptReference>,
    },
    NoOp,
    /// Replaces a whole subtree with its state in `result_tree`.
    BulkUpdate {
        subtree_root: K,
        result_tree: ObjectHash,
    },
    /// Reverts the changes of `version`.
    Undo {
        version: ObjectHash,
    },
    /// Returns the model to the state of `target`.
    RevertTo {
        latest_known: ObjectHash,
        target: ObjectHash,
    },
}

impl<K: NodeId> Operation<K> {
    pub fn name(&self) -> &'static str {
        match self {
            Self::AddNewChild { .. } => "AddNewChild",
            Self::AddNewChildren { .. } => "AddNewChildren",
            Self::DeleteNode { .. } => "DeleteNode",
            Self::MoveNode { .. } => "MoveNode",
            Self::SetProperty { .. } => "SetProperty",
            Self::SetReference { .. } => "SetReference",
            Self::SetConcept { .. } => "SetConcept",
            Self::NoOp => "NoOp",
            Self::BulkUpdate { .. } => "BulkUpdate",
            Self::Undo { .. } => "Undo",
            Self::RevertTo { .. } => "RevertTo",
        }
    }

    pub fn serialize(&self) -> String {
        let parts: Vec<String> = match self {
            Self::AddNewChild {
                parent,
                role,
                index,
                child,
                concept,
            } => vec![
                parent.serialize(),
                codec::escape(role.as_deref()),
                index.to_string(),
                child.serialize(),
                concept_field(concept.as_ref()),
            ],
            Self::AddNewChildren {
                parent,
                role,
                index,
                children,
            } => vec![
                parent.serialize(),
                codec::escape(role.as_deref()),
                index.to_string(),
                codec::join_list(children.iter().map(|(id, _)| id.serialize()), codec::LEVEL4),
                codec::join_list(
                    children.iter().map(|(_, concept)| concept_field(concept.as_ref())),
                    codec::LEVEL4,
                ),
            ],
            Self::DeleteNode { node } => vec![node.serialize()],
            Self::MoveNode {
                child,
                parent,
                role,
                index,
            } => vec![
                child.serialize(),
                parent.serialize(),
                codec::escape(role.as_deref()),
                index.to_string(),
            ],
            Self::SetProperty { node, role, value } => vec![
                node.serialize(),
                codec::escape(Some(role)),
                codec::escape(value.as_deref()),
            ],
            Self::SetReference { node, role, target } => vec![
                node.serialize(),
                codec::escape(Some(role)),
                codec::escape(target.as_ref().map(NodeReference::as_str)),
            ],
            Self::SetConcept { node, concept } => {
                vec![node.serialize(), concept_field(concept.as_ref())]
            }
            Self::NoOp => vec![String::new()],
            Self::BulkUpdate {
                subtree_root,
                result_tree,
            } => vec![subtree_root.serialize(), result_tree.to_string()],
            Self::Undo { version } => vec![version.to_string()],
            Self::RevertTo {
                latest_known,
                target,
            } => vec![latest_known.to_string(), target.to_string()],
        };
        let mut out = self.name().to_owned();
        for part in parts {
            out.push(codec::LEVEL3);
            out.push_str(&part);
        }
        out
    }

    pub fn deserialize(input: &str) -> StoreResult<Self> {
        let (name, rest) = input
            .split_once(codec::LEVEL3)
            .ok_or_else(|| bad(format!("operation without parts: {input:?}")))?;
        let parts: Vec<&str> = rest.split(codec::LEVEL3).collect();
        let expect = |count: usize| -> StoreResult<()> {
            if parts.len() == count {
                Ok(())
            } else {
                Err(bad(format!("{name} takes {count} parts, found {}", parts.len())))
            }
        };
        let op = match name {
            "AddNewChild" => {
                expect(5)?;
                Self::AddNewChild {
                    parent: K::deserialize(parts[0])?,
                    role: codec::unescape(parts[1])?,
                    index: parse_index(parts[2])?,
                    child: K::deserialize(parts[3])?,
                    concept: parse_concept(parts[4])?,
                }
            }
            "AddNewChildren" => {
                expect(5)?;
                let ids = codec::split_list(parts[3], codec::LEVEL4);
                let concepts = codec::split_list(parts[4], codec::LEVEL4);
                if ids.len() != concepts.len() {
                    return Err(bad(format!(
                        "{} child ids but {} concepts",
                        ids.len(),
                        concepts.len()
                    )));
                }
                let children = ids
                    .into_iter()
                    .zip(concepts)
                    .map(|(id, concept)| -> StoreResult<(K, Option<ConceptReference>)> {
                        Ok((K::deserialize(id)?, parse_concept(concept)?))
                    })
                    .collect::<StoreResult<Vec<_>>>()?;
                Self::AddNewChildren {
                    parent: K::deserialize(parts[0])?,
                    role: codec::unescape(parts[1])?,
                    index: parse_index(parts[2])?,
                    children,
                }
            }
            "DeleteNode" => {
                expect(1)?;
                Self::DeleteNode {
                    node: K::deserialize(parts[0])?,
                }
            }
            "MoveNode" => {
                expect(4)?;
                Self::MoveNode {
                    child: K::deserialize(parts[0])?,
                    parent: K::deserialize(parts[1])?,
                    role: codec::unescape(parts[2])?,
                    index: parse_index(parts[3])?,
                }
            }
            "SetProperty" => {
                expect(3)?;
                Self::SetProperty {
                    node: K::deserialize(parts[0])?,
                    role: codec::unescape_required(parts[1])?,
                    value: codec::unescape(parts[2])?,
                }
            }
            "SetReference" => {
                expect(3)?;
                Self::SetReference {
                    node: K::deserialize(parts[0])?,
                    role: codec::unescape_required(parts[1])?,
                    target: codec::unescape(parts[2])?.map(NodeReference::new),
                }
            }
            "SetConcept" => {
                expect(2)?;
                Self::SetConcept {
                    node: K::deserialize(parts[0])?,
                    concept: parse_concept(parts[1])?,
                }
            }
            "NoOp" => Self::NoOp,
            "BulkUpdate" => {
                expect(2)?;
                Self::BulkUpdate {
                    subtree_root: K::deserialize(parts[0])?,
                    result_tree: ObjectHash::parse(parts[1])?,
                }
            }
            "Undo" => {
                expect(1)?;
                Self::Undo {
                    version: ObjectHash::parse(parts[0])?,
                }
            }
            "RevertTo" => {
                expect(2)?;
                Self::RevertTo {
                    latest_known: ObjectHash::parse(parts[0])?,
                    target: ObjectHash::parse(parts[1])?,
                }
            }
            other => return Err(bad(format!("unknown operation {other:?}"))),
        };
        Ok(op)
    }

    /// The node-level mutation this operation performs, `None` for
    /// [`Operation::NoOp`].
    ///
    /// Bulk updates, undo and revert depend on other versions' trees and
    /// have no such form.
    pub fn to_mutation(&self) -> VersionResult<Option<MutationParameters<K>>> {
        let mutation = match self {
            Self::AddNewChild {
                parent,
                role,
                index,
                child,
                concept,
            } => MutationParameters::AddNew {
                parent: parent.clone(),
                role: role.clone(),
                index: *index,
                nodes: vec![(child.clone(), concept.clone())],
            },
            Self::AddNewChildren {
                parent,
                role,
                index,
                children,
            } => MutationParameters::AddNew {
                parent: parent.clone(),
                role: role.clone(),
                index: *index,
                nodes: children.clone(),
            },
            Self::DeleteNode { node } => MutationParameters::Remove { node: node.clone() },
            Self::MoveNode {
                child,
                parent,
                role,
                index,
            } => MutationParameters::Move {
                parent: parent.clone(),
                role: role.clone(),
                index: *index,
                children: vec![child.clone()],
            },
            Self::SetProperty { node, role, value } => MutationParameters::Property {
                node: node.clone(),
                role: role.clone(),
                value: value.clone(),
            },
            Self::SetReference { node, role, target } => MutationParameters::Reference {
                node: node.clone(),
                role: role.clone(),
                target: target.clone(),
            },
            Self::SetConcept { node, concept } => MutationParameters::Concept {
                node: node.clone(),
                concept: concept.clone(),
            },
            Self::NoOp => return Ok(None),
            Self::BulkUpdate { .. } | Self::Undo { .. } | Self::RevertTo { .. } => {
                return Err(VersionError::OperationNotSupported(self.name()))
            }
        };
        Ok(Some(mutation))
    }

    /// Log entries recording `mutation`.
    pub fn from_mutation(mutation: MutationParameters<K>) -> Vec<Self> {
        match mutation {
            MutationParameters::AddNew {
                parent,
                role,
                index,
                mut nodes,
            } => {
                if nodes.len() == 1 {
                    let (child, concept) = nodes.remove(0);
                    vec![Self::AddNewChild {
                        parent,
                        role,
                        index,
                        child,
                        concept,
                    }]
                } else {
                    vec![Self::AddNewChildren {
                        parent,
                        role,
                        index,
                        children: nodes,
                    }]
                }
            }
            MutationParameters::Move {
                parent,
                role,
                index,
                children,
            } => children
                .into_iter()
                .map(|child| Self::MoveNode {
                    child,
                    parent: parent.clone(),
                    role: role.clone(),
                    index,
                })
                .collect(),
            MutationParameters::Property { node, role, value } => {
                vec![Self::SetProperty { node, role, value }]
            }
            MutationParameters::Reference { node, role, target } => {
                vec![Self::SetReference { node, role, target }]
            }
            MutationParameters::Concept { node, concept } => {
                vec![Self::SetConcept { node, concept }]
            }
            MutationParameters::Remove { node } => vec![Self::DeleteNode { node }],
        }
    }
}

/// Serialize a log as one field.
pub(crate) fn serialize_log<K: NodeId>(operations: &[Operation<K>]) -> String {
    codec::join_list(operations.iter().map(Operation::serialize), codec::LEVEL2)
}

pub(crate) fn deserialize_log<K: NodeId>(field: &str) -> StoreResult<Vec<Operation<K>>> {
    codec::split_list(field, codec::LEVEL2)
        .into_iter()
        .map(Operation::deserialize)
        .collect()
}

fn concept_field(concept: Option<&ConceptReference>) -> String {
    codec::escape(concept.map(ConceptReference::uid))
}

fn parse_concept(field: &str) -> StoreResult<Option<ConceptReference>> {
    Ok(codec::unescape(field)?.map(ConceptReference::new))
}

fn parse_index(field: &str) -> StoreResult<i32> {
    let index: i32 = field
        .parse()
        .map_err(|_| bad(format!("invalid index {field:?}")))?;
    if index < APPEND {
        return Err(bad(format!("invalid index {index}")));
    }
    Ok(index)
}

fn bad(reason: String) -> StoreError {
    malformed(ObjectKind::Version, reason)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    type Op = Operation<u64>;

    fn roundtrip(op: &Op) -> Op {
        Op::deserialize(&op.serialize()).unwrap()
    }

    #[test]
    fn layouts() {
        let op = Op::AddNewChild {
            parent: 1,
            role: None,
            index: -1,
            child: 0xab,
            concept: Some(ConceptReference::new("mps:c/1")),
        };
        assert_eq!(op.serialize(), "AddNewChild;1;%00;-1;ab;mps%3Ac%2F1");
        assert_eq!(
            Op::SetProperty {
                node: 2,
                role: "name".into(),
                value: Some("a;b".into()),
            }
            .serialize(),
            "SetProperty;2;name;a%3Bb"
        );
        assert_eq!(Op::NoOp.serialize(), "NoOp;");
        assert_eq!(Op::DeleteNode { node: 16 }.serialize(), "DeleteNode;10");
    }

    #[test]
    fn every_kind_roundtrips() {
        let hash = ObjectHash::of("x");
        let ops = vec![
            Op::AddNewChild {
                parent: 1,
                role: Some("items".into()),
                index: 0,
                child: 2,
                concept: None,
            },
            Op::AddNewChildren {
                parent: 1,
                role: None,
                index: 3,
                children: vec![(4, Some(ConceptReference::new("k"))), (5, None)],
            },
            Op::DeleteNode { node: 9 },
            Op::MoveNode {
                child: 2,
                parent: 4,
                role: Some("r".into()),
                index: -1,
            },
            Op::SetProperty {
                node: 2,
                role: "p".into(),
                value: None,
            },
            Op::SetReference {
                node: 2,
                role: "r".into(),
                target: Some(NodeReference::new("tree%2Fx/7")),
            },
            Op::SetConcept {
                node: 2,
                concept: Some(ConceptReference::new("c")),
            },
            Op::NoOp,
            Op::BulkUpdate {
                subtree_root: 1,
                result_tree: hash,
            },
            Op::Undo { version: hash },
            Op::RevertTo {
                latest_known: hash,
                target: ObjectHash::of("y"),
            },
        ];
        for op in &ops {
            assert_eq!(&roundtrip(op), op);
        }
        let log = serialize_log(&ops);
        assert_eq!(deserialize_log::<u64>(&log).unwrap(), ops);
        assert!(deserialize_log::<u64>("").unwrap().is_empty());
    }

    #[test]
    fn rejects_malformed_entries() {
        assert!(Op::deserialize("Frobnicate;1").is_err());
        assert!(Op::deserialize("DeleteNode").is_err());
        assert!(Op::deserialize("MoveNode;1;2;%00").is_err());
        assert!(Op::deserialize("AddNewChild;1;%00;-2;2;%00").is_err());
        assert!(Op::deserialize("AddNewChildren;1;%00;0;2:3;%00").is_err());
    }

    #[test]
    fn mutation_mapping() {
        let add = MutationParameters::AddNew {
            parent: 1u64,
            role: None,
            index: APPEND,
            nodes: vec![(2, None)],
        };
        let ops = Op::from_mutation(add.clone());
        assert!(matches!(ops.as_slice(), [Op::AddNewChild { child: 2, .. }]));
        assert_eq!(ops[0].to_mutation().unwrap(), Some(add));

        let moves = Op::from_mutation(MutationParameters::Move {
            parent: 1,
            role: None,
            index: 0,
            children: vec![3, 4],
        });
        assert_eq!(moves.len(), 2);

        let concept = MutationParameters::Concept {
            node: 5u64,
            concept: None,
        };
        assert_eq!(Op::from_mutation(concept.clone())[0].to_mutation().unwrap(), Some(concept));
        assert_eq!(Op::NoOp.to_mutation().unwrap(), None);
        assert!(matches!(
            Op::Undo { version: ObjectHash::of("v") }.to_mutation(),
            Err(VersionError::OperationNotSupported("Undo"))
        ));
    }

    fn text() -> impl Strategy<Value = String> {
        "[a-z;:,/%=]{0,5}"
    }

    fn concept() -> impl Strategy<Value = Option<ConceptReference>> {
        proptest::option::of(text().prop_map(ConceptReference::new))
    }

    fn id() -> impl Strategy<Value = u64> {
        any::<u64>()
    }

    fn operation() -> impl Strategy<Value = Op> {
        let index = -1i32..50;
        prop_oneof![
            (id(), proptest::option::of(text()), index.clone(), id(), concept()).prop_map(
                |(parent, role, index, child, concept)| Op::AddNewChild {
                    parent,
                    role,
                    index,
                    child,
                    concept,
                }
            ),
            (
                id(),
                proptest::option::of(text()),
                index.clone(),
                proptest::collection::vec((id(), concept()), 0..4)
            )
                .prop_map(|(parent, role, index, children)| Op::AddNewChildren {
                    parent,
                    role,
                    index,
                    children,
                }),
            id().prop_map(|node| Op::DeleteNode { node }),
            (id(), id(), proptest::option::of(text()), index).prop_map(
                |(child, parent, role, index)| Op::MoveNode {
                    child,
                    parent,
                    role,
                    index,
                }
            ),
            (id(), text(), proptest::option::of(text()))
                .prop_map(|(node, role, value)| Op::SetProperty { node, role, value }),
            (id(), text(), proptest::option::of(text().prop_map(NodeReference::new)))
                .prop_map(|(node, role, target)| Op::SetReference { node, role, target }),
            (id(), concept()).prop_map(|(node, concept)| Op::SetConcept { node, concept }),
            Just(Op::NoOp),
        ]
    }

    proptest! {
        #[test]
        fn logs_roundtrip(ops in proptest::collection::vec(operation(), 0..6)) {
            for op in &ops {
                prop_assert_eq!(&roundtrip(op), op);
            }
            prop_assert_eq!(deserialize_log::<u64>(&serialize_log(&ops)).unwrap(), ops);
        }
    }
}
