use arbor_model::Tree;
use arbor_store::ObjectRef;
use arbor_types::NodeId;
use chrono::{DateTime, Utc};
use tracing::debug;

use crate::config::VersionConfig;
use crate::error::VersionResult;
use crate::operation::Operation;
use crate::version::{OperationsList, Version, VersionOperations, VersionRef};

/// Step-by-step construction of a [`Version`].
pub struct VersionBuilder<K: NodeId> {
    id: u64,
    time: Option<DateTime<Utc>>,
    author: Option<String>,
    tree: ObjectRef<Tree<K>>,
    base: Option<VersionRef<K>>,
    previous: Option<VersionRef<K>>,
    merged: Option<(VersionRef<K>, VersionRef<K>)>,
    operations: Vec<Operation<K>>,
    config: VersionConfig,
}

impl<K: NodeId> VersionBuilder<K> {
    pub fn new(id: u64, tree: ObjectRef<Tree<K>>) -> Self {
        Self {
            id,
            time: None,
            author: None,
            tree,
            base: None,
            previous: None,
            merged: None,
            operations: Vec::new(),
            config: VersionConfig::default(),
        }
    }

    pub fn time(mut self, time: DateTime<Utc>) -> Self {
        self.time = Some(time);
        self
    }

    pub fn author(mut self, author: impl Into<String>) -> Self {
        self.author = Some(author.into());
        self
    }

    pub fn base(mut self, base: VersionRef<K>) -> Self {
        self.base = Some(base);
        self
    }

    /// Record the predecessor in the legacy single-parent layout.
    pub fn previous(mut self, previous: VersionRef<K>) -> Self {
        self.previous = Some(previous);
        self
    }

    pub fn merged(mut self, first: VersionRef<K>, second: VersionRef<K>) -> Self {
        self.merged = Some((first, second));
        self
    }

    pub fn operations(mut self, operations: Vec<Operation<K>>) -> Self {
        self.operations = operations;
        self
    }

    pub fn config(mut self, config: &VersionConfig) -> Self {
        self.config = config.clone();
        self
    }

    pub fn build(self) -> VersionResult<Version<K>> {
        let operation_count = self.operations.len();
        let operations = if operation_count > self.config.inline_operations_limit {
            debug!(count = operation_count, "storing operation log separately");
            VersionOperations::External(ObjectRef::new(OperationsList {
                operations: self.operations,
            }))
        } else {
            VersionOperations::Inline(self.operations)
        };
        let version = Version {
            id: self.id,
            time: self.time,
            author: self.author,
            tree: self.tree,
            base_version: self.base,
            previous_version: self.previous,
            merged_versions: self.merged,
            operations,
            operation_count,
        };
        version.validate()?;
        debug!(
            id = version.id,
            operations = operation_count,
            merge = version.is_merge(),
            "built version"
        );
        Ok(version)
    }
}
