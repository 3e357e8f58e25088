use arbor_history::HistoryError;
use arbor_model::ModelError;
use arbor_store::StoreError;
use arbor_version::VersionError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum RepoError {
    #[error("configuration error: {0}")]
    Config(String),

    /// The stored head belongs to another tree.
    #[error("head version holds tree {found}, expected {expected}")]
    TreeMismatch { expected: String, found: String },

    #[error("model error: {0}")]
    Model(#[from] ModelError),

    #[error("version error: {0}")]
    Version(#[from] VersionError),

    #[error("history error: {0}")]
    History(#[from] HistoryError),

    #[error("store error: {0}")]
    Store(#[from] StoreError),
}

pub type RepoResult<T> = Result<T, RepoError>;
