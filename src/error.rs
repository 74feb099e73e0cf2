use thiserror::Error;

use crate::parsing::ParseError;

/// Failure taxonomy for every store and upload operation.
///
/// Merge conflicts are not errors; they are resolved by the merge policy.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The upload was rejected before anything was written.
    #[error("failed to parse upload: {0}")]
    Parse(#[from] ParseError),

    /// A write failed; the surrounding transaction was rolled back.
    #[error("storage write failed: {0:#}")]
    StorageWrite(#[from] anyhow::Error),

    /// The request was rejected before any mutation.
    #[error("invalid request: {0}")]
    Validation(String),

    #[error("upload {0} is locked")]
    Locked(String),

    #[error("{0} not found")]
    NotFound(String),

    /// Backup export failed; the cleanup that required it was aborted.
    #[error("backup failed: {0:#}")]
    Backup(anyhow::Error),
}

pub type StoreResult<T> = Result<T, StoreError>;

impl StoreError {
    pub fn validation(message: impl Into<String>) -> Self {
        StoreError::Validation(message.into())
    }
}
