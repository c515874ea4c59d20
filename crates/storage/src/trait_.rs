//! Store trait abstraction.

use ctxop_core::{ChangeSet, Record};

/// Error type for store operations.
pub type Result<T> = std::result::Result<T, StoreError>;

/// Errors that can occur during store operations.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization/deserialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// A change still carries a temporary id
    #[error("Temporary id reached the store: {0}")]
    TemporaryId(String),

    /// Entity name cannot be used as a store path
    #[error("Invalid entity name: {0:?}")]
    InvalidEntity(String),

    /// Other error
    #[error("{0}")]
    Other(String),
}

/// Backing store beneath a root context.
///
/// Calls are synchronous; they run inside the root context's scope.
pub trait Store: Send + Sync {
    /// Reserve `count` fresh keys for an entity.
    fn allocate_keys(&self, entity: &str, count: usize) -> Result<Vec<u64>>;

    /// Load every stored record of an entity.
    fn load(&self, entity: &str) -> Result<Vec<Record>>;

    /// Apply a change set. Every id in it must be permanent.
    fn apply(&self, changes: &ChangeSet) -> Result<()>;
}

/// Reject change sets that still carry temporary ids.
pub(crate) fn ensure_permanent(changes: &ChangeSet) -> Result<()> {
    match changes.iter().find(|(id, _)| id.is_temporary()) {
        Some((id, _)) => Err(StoreError::TemporaryId(id.to_string())),
        None => Ok(()),
    }
}
