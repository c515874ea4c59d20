//! Context errors.

use ctxop_core::ObjectId;
use ctxop_storage::StoreError;

/// Result type for context operations.
pub type Result<T> = std::result::Result<T, ContextError>;

/// Errors raised by managed contexts.
#[derive(Debug, thiserror::Error)]
pub enum ContextError {
    /// Entity is not part of the model
    #[error("Unknown entity: {0}")]
    UnknownEntity(String),

    /// Object is not visible from this context
    #[error("Object not found: {0}")]
    NotFound(ObjectId),

    /// A required attribute is missing or null
    #[error("{entity} {object} is missing required attribute `{attribute}`")]
    MissingAttribute {
        /// Entity name
        entity: String,
        /// Attribute name
        attribute: String,
        /// Offending object
        object: ObjectId,
    },

    /// A unique attribute value is used twice
    #[error("{entity}.{attribute} must be unique, {value} is already used")]
    UniqueViolation {
        /// Entity name
        entity: String,
        /// Attribute name
        attribute: String,
        /// Duplicated value
        value: String,
    },

    /// The chain has no backing store
    #[error("No backing store is reachable from this context")]
    NoStore,

    /// Backing store failure
    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    /// The closure running in the context's scope did not complete
    #[error("Context scope aborted: {0}")]
    ScopeAborted(String),
}

impl ContextError {
    /// Whether this error comes from commit-time validation.
    pub fn is_validation(&self) -> bool {
        matches!(
            self,
            ContextError::MissingAttribute { .. } | ContextError::UniqueViolation { .. }
        )
    }
}
