//! Managed contexts.

use std::sync::Arc;

use async_trait::async_trait;
use ctxop_core::{ChangeSet, ContextId, Model, Record, TransactionalContext};
use ctxop_storage::Store;
use tokio::sync::Mutex;
use tracing::debug;

use crate::error::{ContextError, Result};
use crate::session::Session;

/// An in-memory transactional context.
///
/// A root context saves into its [`Store`]; a child context saves into its
/// parent. Each context's pending changes sit behind a fair mutex, which is
/// the context's serialized scope: closures submitted through `perform` run
/// on tokio's blocking pool one at a time, in submission order.
///
/// A child keeps its parent alive.
pub struct ManagedContext {
    id: ContextId,
    name: String,
    parent: Option<Arc<ManagedContext>>,
    store: Option<Arc<dyn Store>>,
    model: Arc<Model>,
    pub(crate) changes: Arc<Mutex<ChangeSet>>,
}

impl ManagedContext {
    /// Create a root context that saves into `store`.
    pub fn root(store: Arc<dyn Store>, model: Model) -> Arc<Self> {
        Arc::new(Self {
            id: ContextId::new(),
            name: "root".to_string(),
            parent: None,
            store: Some(store),
            model: Arc::new(model),
            changes: Arc::new(Mutex::new(ChangeSet::new())),
        })
    }

    /// Create a root context without a backing store. Saving it, or obtaining
    /// permanent ids anywhere below it, fails with [`ContextError::NoStore`].
    pub fn detached(model: Model) -> Arc<Self> {
        Arc::new(Self {
            id: ContextId::new(),
            name: "detached".to_string(),
            parent: None,
            store: None,
            model: Arc::new(model),
            changes: Arc::new(Mutex::new(ChangeSet::new())),
        })
    }

    /// Create a named child context.
    pub fn child_named(self: &Arc<Self>, name: impl Into<String>) -> Arc<Self> {
        let child = Arc::new(Self {
            id: ContextId::new(),
            name: name.into(),
            parent: Some(Arc::clone(self)),
            store: None,
            model: Arc::clone(&self.model),
            changes: Arc::new(Mutex::new(ChangeSet::new())),
        });
        debug!("Created context {} ({}) under {}", child.id, child.name, self.id);
        child
    }

    /// Context id.
    pub fn id(&self) -> ContextId {
        self.id
    }

    /// Context name, for logs.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The model shared by the chain.
    pub fn model(&self) -> &Model {
        &self.model
    }

    /// Number of levels above this context.
    pub fn depth(&self) -> usize {
        self.parent.as_ref().map_or(0, |p| p.depth() + 1)
    }

    /// The store at the root of this chain, if it has one.
    pub(crate) fn root_store(&self) -> Option<Arc<dyn Store>> {
        match &self.parent {
            Some(parent) => parent.root_store(),
            None => self.store.clone(),
        }
    }

    /// Parent context, if any.
    pub(crate) fn parent_context(&self) -> Option<&Arc<ManagedContext>> {
        self.parent.as_ref()
    }

    /// Fetch every visible record of an entity.
    pub async fn fetch(&self, entity: impl Into<String>) -> Result<Vec<Record>> {
        let entity = entity.into();
        self.perform(move |session| session.fetch(&entity)).await?
    }

    /// Whether this context holds unsaved changes.
    pub async fn has_changes(&self) -> Result<bool> {
        use ctxop_core::ScopedSession;
        self.perform(|session| session.has_changes()).await
    }

    /// Save this context once.
    pub async fn save(&self) -> Result<()> {
        use ctxop_core::ScopedSession;
        self.perform(|session| session.save()).await?
    }
}

impl std::fmt::Debug for ManagedContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ManagedContext")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("depth", &self.depth())
            .finish()
    }
}

#[async_trait]
impl TransactionalContext for ManagedContext {
    type Error = ContextError;
    type Session = Session;

    fn parent(&self) -> Option<Arc<Self>> {
        self.parent.clone()
    }

    fn new_child(self: &Arc<Self>) -> Arc<Self> {
        self.child_named("scratch")
    }

    async fn perform<F, R>(&self, f: F) -> Result<R>
    where
        F: FnOnce(&mut Session) -> R + Send + 'static,
        R: Send + 'static,
    {
        let id = self.id;
        let parent = self.parent.clone();
        let store = self.root_store();
        let model = Arc::clone(&self.model);
        let changes = Arc::clone(&self.changes);

        tokio::task::spawn_blocking(move || {
            let mut session = Session::new(id, parent, store, model, changes.blocking_lock_owned());
            f(&mut session)
        })
        .await
        .map_err(|e| ContextError::ScopeAborted(e.to_string()))
    }
}
