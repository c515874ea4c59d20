//! Transactional context abstraction.
//!
//! Operations only need a small surface of a context: walk to the parent,
//! create a child, and run a closure with exclusive access to the context's
//! pending state. Everything else (fetching, inserting, validation, how
//! saves reach the backing store) belongs to the implementation.

use async_trait::async_trait;
use std::sync::Arc;

/// Exclusive view of a context's pending state, handed to closures run
/// through [`TransactionalContext::perform`].
pub trait ScopedSession: Send {
    /// Error produced by saves and id assignment.
    type Error: std::error::Error + Send + Sync + 'static;

    /// Whether the context holds unsaved changes.
    fn has_changes(&self) -> bool;

    /// Whether objects were inserted in this context and not yet saved.
    fn has_inserted_objects(&self) -> bool;

    /// Replace temporary ids of inserted objects with permanent ones.
    fn obtain_permanent_ids(&mut self) -> Result<(), Self::Error>;

    /// Push pending changes into the parent context, or into the backing
    /// store for a root context.
    fn save(&mut self) -> Result<(), Self::Error>;
}

/// A mutable scope of pending changes, optionally nested under a parent.
///
/// Every context serializes the closures submitted to it: two `perform`
/// calls on the same context never overlap, while different contexts may run
/// concurrently.
#[async_trait]
pub trait TransactionalContext: Send + Sync + Sized + 'static {
    /// Error produced by this context.
    type Error: std::error::Error + Send + Sync + 'static;

    /// Exclusive view used inside `perform`.
    type Session: ScopedSession<Error = Self::Error>;

    /// The parent context, if any.
    fn parent(&self) -> Option<Arc<Self>>;

    /// Create a new child context of this one.
    fn new_child(self: &Arc<Self>) -> Arc<Self>;

    /// Run `f` with exclusive access to this context.
    ///
    /// The closure runs off the caller's task. The returned future resolves
    /// once it completes; awaiting it does not hold the context's scope. An
    /// error means the scope aborted before `f` returned.
    async fn perform<F, R>(&self, f: F) -> Result<R, Self::Error>
    where
        F: FnOnce(&mut Self::Session) -> R + Send + 'static,
        R: Send + 'static;
}
