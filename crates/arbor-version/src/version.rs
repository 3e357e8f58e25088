//! Versions: commits of the version DAG.

use arbor_model::Tree;
use arbor_store::{
    malformed, Deferred, ErasedRef, ObjectData, ObjectGraph, ObjectHash, ObjectKind, ObjectRef,
    StoreResult,
};
use arbor_types::{codec, NodeId};
use chrono::{DateTime, SecondsFormat, Utc};

use crate::error::{VersionError, VersionResult};
use crate::operation::{deserialize_log, serialize_log, Operation};

/// An operation log stored as its own object.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct OperationsList<K> {
    pub operations: Vec<Operation<K>>,
}

impl<K: NodeId> ObjectData for OperationsList<K> {
    const KIND: ObjectKind = ObjectKind::OperationsList;

    fn serialize(&self) -> String {
        serialize_log(&self.operations)
    }

    fn deserialize(input: &str) -> StoreResult<Self> {
        Ok(Self {
            operations: deserialize_log(input)?,
        })
    }
}

/// Where a version keeps its operations.
#[derive(Clone, Debug, PartialEq)]
pub enum VersionOperations<K: NodeId> {
    Inline(Vec<Operation<K>>),
    External(ObjectRef<OperationsList<K>>),
}

pub type VersionRef<K> = ObjectRef<Version<K>>;

/// A commit: a tree snapshot, its predecessors and the operations that
/// produced it from its base.
#[derive(Clone, Debug, PartialEq)]
pub struct Version<K: NodeId> {
    pub id: u64,
    pub time: Option<DateTime<Utc>>,
    pub author: Option<String>,
    pub tree: ObjectRef<Tree<K>>,
    /// Version the operations apply to.
    pub base_version: Option<VersionRef<K>>,
    /// Predecessor in the legacy single-parent layout.
    pub previous_version: Option<VersionRef<K>>,
    pub merged_versions: Option<(VersionRef<K>, VersionRef<K>)>,
    pub operations: VersionOperations<K>,
    pub operation_count: usize,
}

impl<K: NodeId> Version<K> {
    pub fn validate(&self) -> VersionResult<()> {
        if self.base_version.is_some() && self.previous_version.is_some() {
            return Err(VersionError::InvalidVersion(
                "base version and legacy previous version are exclusive".into(),
            ));
        }
        if self.previous_version.is_some() && self.merged_versions.is_some() {
            return Err(VersionError::InvalidVersion(
                "the legacy layout cannot record merged versions".into(),
            ));
        }
        if let VersionOperations::Inline(ops) = &self.operations {
            if ops.len() != self.operation_count {
                return Err(VersionError::InvalidVersion(format!(
                    "{} inline operations but a count of {}",
                    ops.len(),
                    self.operation_count
                )));
            }
        }
        Ok(())
    }

    pub fn is_merge(&self) -> bool {
        self.merged_versions.is_some()
    }

    /// The version this one was derived from, in either layout.
    pub fn history_parent(&self) -> Option<&VersionRef<K>> {
        self.base_version.as_ref().or(self.previous_version.as_ref())
    }

    /// Direct predecessors in the DAG: both merged versions for a merge,
    /// otherwise the history parent.
    pub fn parents(&self) -> Vec<&VersionRef<K>> {
        match &self.merged_versions {
            Some((first, second)) => vec![first, second],
            None => self.history_parent().into_iter().collect(),
        }
    }

    /// The operation log, loading it if it is stored separately.
    pub fn operations(&self, graph: &ObjectGraph) -> Deferred<Vec<Operation<K>>, VersionError> {
        match &self.operations {
            VersionOperations::Inline(ops) => Deferred::ready(ops.clone()),
            VersionOperations::External(list) => graph
                .load(list)
                .err_into()
                .map(|list| list.operations.clone()),
        }
    }

    fn uses_legacy_layout(&self) -> bool {
        self.previous_version.is_some()
    }
}

fn optional_hash<T: ObjectData>(reference: Option<&ObjectRef<T>>) -> String {
    reference.map(|r| r.hash().to_string()).unwrap_or_default()
}

fn parse_optional<T: ObjectData>(field: &str) -> StoreResult<Option<ObjectRef<T>>> {
    if field.is_empty() {
        Ok(None)
    } else {
        ObjectRef::parse(field).map(Some)
    }
}

fn parse_time(field: &str) -> StoreResult<Option<DateTime<Utc>>> {
    codec::unescape(field)?
        .map(|text| {
            DateTime::parse_from_rfc3339(&text)
                .map(|t| t.with_timezone(&Utc))
                .map_err(|e| malformed(ObjectKind::Version, format!("invalid time {text:?}: {e}")))
        })
        .transpose()
}

fn parse_count(field: &str) -> StoreResult<usize> {
    field
        .parse()
        .map_err(|_| malformed(ObjectKind::Version, format!("invalid operation count {field:?}")))
}

fn parse_operations<K: NodeId>(field: &str) -> StoreResult<VersionOperations<K>> {
    if ObjectHash::looks_like_hash(field) {
        Ok(VersionOperations::External(ObjectRef::parse(field)?))
    } else {
        Ok(VersionOperations::Inline(deserialize_log(field)?))
    }
}

/// `id/time/author/tree/base/merged1/merged2/opCount/ops`, or the legacy
/// `id/time/author/tree/previous/ops/opCount` when a previous version is set.
/// `ops` is either the inline log or the hash of an [`OperationsList`].
impl<K: NodeId> ObjectData for Version<K> {
    const KIND: ObjectKind = ObjectKind::Version;

    fn serialize(&self) -> String {
        let time = self
            .time
            .map(|t| t.to_rfc3339_opts(SecondsFormat::AutoSi, true));
        let ops = match &self.operations {
            VersionOperations::Inline(ops) => serialize_log(ops),
            VersionOperations::External(list) => list.hash().to_string(),
        };
        let mut fields = vec![
            codec::format_hex(self.id),
            codec::escape(time.as_deref()),
            codec::escape(self.author.as_deref()),
            self.tree.hash().to_string(),
        ];
        if self.uses_legacy_layout() {
            fields.push(optional_hash(self.previous_version.as_ref()));
            fields.push(ops);
            fields.push(self.operation_count.to_string());
        } else {
            let (first, second) = match &self.merged_versions {
                Some((first, second)) => (Some(first), Some(second)),
                None => (None, None),
            };
            fields.push(optional_hash(self.base_version.as_ref()));
            fields.push(optional_hash(first));
            fields.push(optional_hash(second));
            fields.push(self.operation_count.to_string());
            fields.push(ops);
        }
        codec::join_fields(fields, codec::LEVEL1)
    }

    fn deserialize(input: &str) -> StoreResult<Self> {
        let fields: Vec<&str> = input.split(codec::LEVEL1).collect();
        let version = match fields.len() {
            9 => {
                let merged = match (parse_optional(fields[5])?, parse_optional(fields[6])?) {
                    (Some(first), Some(second)) => Some((first, second)),
                    (None, None) => None,
                    _ => return Err(malformed(Self::KIND, "a merge needs two merged versions")),
                };
                Self {
                    id: codec::parse_hex(fields[0])?,
                    time: parse_time(fields[1])?,
                    author: codec::unescape(fields[2])?,
                    tree: ObjectRef::parse(fields[3])?,
                    base_version: parse_optional(fields[4])?,
                    previous_version: None,
                    merged_versions: merged,
                    operation_count: parse_count(fields[7])?,
                    operations: parse_operations(fields[8])?,
                }
            }
            7 => Self {
                id: codec::parse_hex(fields[0])?,
                time: parse_time(fields[1])?,
                author: codec::unescape(fields[2])?,
                tree: ObjectRef::parse(fields[3])?,
                base_version: None,
                previous_version: parse_optional(fields[4])?,
                merged_versions: None,
                operations: parse_operations(fields[5])?,
                operation_count: parse_count(fields[6])?,
            },
            n => return Err(malformed(Self::KIND, format!("expected 9 or 7 fields, found {n}"))),
        };
        version
            .validate()
            .map_err(|e| malformed(Self::KIND, e))?;
        Ok(version)
    }

    fn containment_refs(&self) -> Vec<ErasedRef> {
        let mut refs = vec![self.tree.erase()];
        refs.extend(self.base_version.iter().map(ObjectRef::erase));
        refs.extend(self.previous_version.iter().map(ObjectRef::erase));
        if let Some((first, second)) = &self.merged_versions {
            refs.push(first.erase());
            refs.push(second.erase());
        }
        if let VersionOperations::External(list) = &self.operations {
            refs.push(list.erase());
        }
        refs
    }
}
