use std::sync::Arc;

use arbor_history::HistoryIndexNode;
use arbor_model::{GenericModelTree, ModelChangeEvent, MutationParameters};
use arbor_store::{ObjectGraph, ObjectHash, ObjectRef, ObjectStore};
use arbor_types::NodeId;
use arbor_version::{history_as_mutation_parameters, Operation, Version, VersionBuilder, VersionRef};
use chrono::{DateTime, Utc};
use tracing::debug;

use crate::commit::{CommitRequest, CommitResult, VersionSummary};
use crate::config::RepositoryConfig;
use crate::error::{RepoError, RepoResult};

/// History index over the versions of trees keyed by `K`.
pub type HistoryIndexRef<K> = ObjectRef<HistoryIndexNode<Version<K>>>;

/// A versioned tree: its current state, the head version and the history
/// index over all versions.
pub struct Repository<K: NodeId> {
    graph: ObjectGraph,
    config: RepositoryConfig,
    tree: GenericModelTree<K>,
    head: VersionRef<K>,
    history: HistoryIndexRef<K>,
}

impl<K: NodeId> Repository<K> {
    /// Create a repository holding an empty tree as its first version.
    pub fn init(
        store: Arc<dyn ObjectStore>,
        config: RepositoryConfig,
        author: Option<&str>,
    ) -> RepoResult<Self> {
        Self::init_at(store, config, author, Utc::now())
    }

    pub fn init_at(
        store: Arc<dyn ObjectStore>,
        config: RepositoryConfig,
        author: Option<&str>,
        time: DateTime<Utc>,
    ) -> RepoResult<Self> {
        let graph = ObjectGraph::with_config(store, config.graph.clone());
        let tree = GenericModelTree::new(graph.clone(), &config.tree_id, config.uses_role_ids);
        let mut builder = VersionBuilder::new(1, ObjectRef::new(tree.tree()))
            .time(time)
            .config(&config.version);
        if let Some(author) = author {
            builder = builder.author(author);
        }
        let head = ObjectRef::new(builder.build()?);
        let history = ObjectRef::new(HistoryIndexNode::of(head.clone(), author, time));
        let written = graph.write_all(&[head.erase(), history.erase()])?;
        debug!(tree = %config.tree_id, version = %head.hash(), written, "initialized repository");
        Ok(Self {
            graph,
            config,
            tree,
            head,
            history,
        })
    }

    /// Open a repository from its stored head version and history index.
    pub fn load(
        store: Arc<dyn ObjectStore>,
        config: RepositoryConfig,
        head: ObjectHash,
        history: ObjectHash,
    ) -> RepoResult<Self> {
        let graph = ObjectGraph::with_config(store, config.graph.clone());
        let head: VersionRef<K> = ObjectRef::from_hash(head);
        let history: HistoryIndexRef<K> = ObjectRef::from_hash(history);
        let version = graph.execute(graph.load(&head))?;
        let tree = graph.execute(GenericModelTree::load(graph.clone(), &version.tree))?;
        if tree.tree_id() != config.tree_id {
            return Err(RepoError::TreeMismatch {
                expected: config.tree_id,
                found: tree.tree_id().to_owned(),
            });
        }
        graph.resolve(&history)?;
        debug!(tree = %config.tree_id, version = %head.hash(), "loaded repository");
        Ok(Self {
            graph,
            config,
            tree,
            head,
            history,
        })
    }

    pub fn graph(&self) -> &ObjectGraph {
        &self.graph
    }

    pub fn config(&self) -> &RepositoryConfig {
        &self.config
    }

    /// The tree of the head version.
    pub fn tree(&self) -> &GenericModelTree<K> {
        &self.tree
    }

    pub fn head(&self) -> &VersionRef<K> {
        &self.head
    }

    pub fn history_root(&self) -> &HistoryIndexRef<K> {
        &self.history
    }

    pub fn version(&self, version: &VersionRef<K>) -> RepoResult<Arc<Version<K>>> {
        Ok(self.graph.resolve(version)?)
    }

    /// Apply `request` to the head tree and record it as the new head.
    ///
    /// Nothing is written and the repository is left unchanged if any
    /// mutation fails.
    pub fn commit(&mut self, request: CommitRequest<K>) -> RepoResult<CommitResult<K>> {
        let CommitRequest {
            mutations,
            author,
            time,
        } = request;
        let time = time.unwrap_or_else(Utc::now);
        let tree = self.graph.execute(self.tree.mutate(mutations.clone()))?;
        let operations: Vec<Operation<K>> =
            mutations.into_iter().flat_map(Operation::from_mutation).collect();
        let operation_count = operations.len();

        let id = self.version(&self.head)?.id + 1;
        let mut builder = VersionBuilder::new(id, ObjectRef::new(tree.tree()))
            .time(time)
            .base(self.head.clone())
            .operations(operations)
            .config(&self.config.version);
        if let Some(author) = &author {
            builder = builder.author(author.clone());
        }
        let version = ObjectRef::new(builder.build()?);
        let entry = ObjectRef::new(HistoryIndexNode::of(version.clone(), author.as_deref(), time));
        let history = self
            .graph
            .execute(arbor_history::merge(&self.graph, &self.history, &entry))?;

        let written = self.graph.write_all(&[version.erase(), history.erase()])?;
        debug!(
            id,
            version = %version.hash(),
            operations = operation_count,
            written,
            "committed version"
        );
        self.tree = tree;
        self.head = version.clone();
        self.history = history;
        Ok(CommitResult {
            version,
            id,
            operation_count,
            written,
        })
    }

    /// Differences between the trees of two versions, as seen from `old`.
    pub fn changes_between(
        &self,
        old: &VersionRef<K>,
        new: &VersionRef<K>,
        changes_only: bool,
    ) -> RepoResult<Vec<ModelChangeEvent<K>>> {
        let (old, new) = self.graph.execute(self.graph.load(old).zip(self.graph.load(new)))?;
        let old_tree = GenericModelTree::load(self.graph.clone(), &old.tree);
        let new_tree = GenericModelTree::load(self.graph.clone(), &new.tree);
        let (old_tree, new_tree) = self.graph.execute(old_tree.zip(new_tree))?;
        Ok(self.graph.execute(new_tree.get_changes(&old_tree, changes_only))?)
    }

    /// Mutations leading from version `old` to the head, oldest first.
    pub fn mutations_since(&self, old: ObjectHash) -> RepoResult<Vec<MutationParameters<K>>> {
        Ok(self
            .graph
            .execute(history_as_mutation_parameters(&self.graph, &self.head, old))?)
    }

    /// Up to `count` versions after skipping the `skip` newest, newest first.
    pub fn history(&self, skip: u64, count: u64) -> RepoResult<Vec<VersionRef<K>>> {
        Ok(self
            .graph
            .execute(arbor_history::range(&self.graph, &self.history, skip, count))?)
    }

    /// Versions with a time in `from..=to`, oldest first.
    pub fn history_between(
        &self,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> RepoResult<Vec<VersionRef<K>>> {
        Ok(self
            .graph
            .execute(arbor_history::versions_between(&self.graph, &self.history, from, to))?)
    }

    /// The `limit` newest versions, newest first.
    pub fn log(&self, limit: u64) -> RepoResult<Vec<VersionSummary>> {
        let versions = self.history(0, limit)?;
        let loaded = self.graph.execute(self.graph.load_all(&versions))?;
        Ok(versions
            .iter()
            .zip(loaded)
            .map(|(reference, version)| VersionSummary::of(reference.hash(), &version))
            .collect())
    }

    /// Number of versions in the history index.
    pub fn version_count(&self) -> RepoResult<u64> {
        Ok(self.graph.resolve(&self.history)?.size())
    }
}
