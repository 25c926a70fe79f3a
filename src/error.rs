use crate::store::RecordId;
use thiserror::Error;

/// Errors raised by a container or one of its contexts.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),
    #[error("invalid record: {0}")]
    Validation(String),
    #[error("store capacity of {capacity} records exceeded (checkpoint needs {requested})")]
    CapacityExceeded { capacity: usize, requested: usize },
    #[error("record {0} not found")]
    NotFound(RecordId),
    #[error("{0} updated records no longer exist in the store")]
    Stale(usize),
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("inspector worker is no longer running")]
    WorkerGone,
}

impl StoreError {
    pub fn validation(message: impl Into<String>) -> Self {
        StoreError::Validation(message.into())
    }

    /// True when the failure came from the caller's data rather than the store.
    pub fn is_validation(&self) -> bool {
        matches!(self, StoreError::Validation(_))
    }
}
