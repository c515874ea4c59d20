//! Operation errors.

/// Why an operation finished without a result.
#[derive(Debug, thiserror::Error)]
pub enum OperationError {
    /// The target context was gone at start, or cancellation was requested
    /// before the work began
    #[error("Operation cancelled")]
    Cancelled,

    /// The work itself failed
    #[error("Operation work failed: {0}")]
    Body(#[source] anyhow::Error),

    /// Obtaining permanent ids or saving the scratch context failed
    #[error("Failed to save scratch context: {0}")]
    Save(#[source] anyhow::Error),
}

impl OperationError {
    /// Whether this is a cancellation.
    pub fn is_cancelled(&self) -> bool {
        matches!(self, OperationError::Cancelled)
    }

    /// The underlying error of work and save failures.
    pub fn inner(&self) -> Option<&anyhow::Error> {
        match self {
            OperationError::Cancelled => None,
            OperationError::Body(e) | OperationError::Save(e) => Some(e),
        }
    }

    /// Downcast the underlying error.
    pub fn downcast_ref<E>(&self) -> Option<&E>
    where
        E: std::fmt::Display + std::fmt::Debug + Send + Sync + 'static,
    {
        self.inner().and_then(|e| e.downcast_ref::<E>())
    }
}

/// A failure saving a context above the scratch context.
///
/// Reported next to a successful result; levels below `level` stay saved.
#[derive(Debug, thiserror::Error)]
#[error("Failed to save ancestor context at level {level}: {source}")]
pub struct AncestorSaveError {
    /// Level that failed; the target context is level 1
    pub level: u32,
    /// Error from the context
    #[source]
    pub source: anyhow::Error,
}

impl AncestorSaveError {
    /// Wrap a context error.
    pub fn new<E>(level: u32, error: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        Self {
            level,
            source: anyhow::Error::new(error),
        }
    }

    /// Downcast the underlying error.
    pub fn downcast_ref<E>(&self) -> Option<&E>
    where
        E: std::fmt::Display + std::fmt::Debug + Send + Sync + 'static,
    {
        self.source.downcast_ref::<E>()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, thiserror::Error)]
    #[error("validation failed")]
    struct ValidationFailed;

    #[test]
    fn test_downcast_through_operation_error() {
        let error = OperationError::Save(anyhow::Error::new(ValidationFailed));
        assert!(error.downcast_ref::<ValidationFailed>().is_some());
        assert!(!error.is_cancelled());
        assert!(OperationError::Cancelled.inner().is_none());
    }

    #[test]
    fn test_ancestor_error_display() {
        let error = AncestorSaveError::new(2, ValidationFailed);
        assert_eq!(
            error.to_string(),
            "Failed to save ancestor context at level 2: validation failed"
        );
        assert!(error.downcast_ref::<ValidationFailed>().is_some());
    }
}
