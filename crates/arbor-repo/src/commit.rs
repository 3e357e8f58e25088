use arbor_model::MutationParameters;
use arbor_store::ObjectHash;
use arbor_types::NodeId;
use arbor_version::{Version, VersionRef};
use chrono::{DateTime, Utc};

/// Changes to record as one version.
#[derive(Clone, Debug)]
pub struct CommitRequest<K> {
    pub mutations: Vec<MutationParameters<K>>,
    pub author: Option<String>,
    /// Defaults to the current time.
    pub time: Option<DateTime<Utc>>,
}

impl<K> CommitRequest<K> {
    pub fn new(mutations: Vec<MutationParameters<K>>) -> Self {
        Self {
            mutations,
            author: None,
            time: None,
        }
    }

    pub fn with_author(mut self, author: impl Into<String>) -> Self {
        self.author = Some(author.into());
        self
    }

    pub fn with_time(mut self, time: DateTime<Utc>) -> Self {
        self.time = Some(time);
        self
    }

    pub fn then(mut self, mutation: MutationParameters<K>) -> Self {
        self.mutations.push(mutation);
        self
    }
}

/// Outcome of a commit.
#[derive(Clone, Debug)]
pub struct CommitResult<K: NodeId> {
    pub version: VersionRef<K>,
    pub id: u64,
    pub operation_count: usize,
    /// Objects written to the store.
    pub written: usize,
}

/// One version as listed by [`crate::Repository::log`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct VersionSummary {
    pub hash: ObjectHash,
    pub id: u64,
    pub time: Option<DateTime<Utc>>,
    pub author: Option<String>,
    pub operation_count: usize,
    pub is_merge: bool,
}

impl VersionSummary {
    pub fn of<K: NodeId>(hash: ObjectHash, version: &Version<K>) -> Self {
        Self {
            hash,
            id: version.id,
            time: version.time,
            author: version.author.clone(),
            operation_count: version.operation_count,
            is_merge: version.is_merge(),
        }
    }
}
