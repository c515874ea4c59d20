//! Operation queue.
//!
//! Runs operations with bounded concurrency and tracks the ones that have not
//! finished yet. Finished operations leave the queue.

use std::collections::HashMap;
use std::num::NonZeroUsize;
use std::sync::Arc;

use ctxop_core::{OperationId, TransactionalContext};
use serde::{Deserialize, Serialize};
use tokio::sync::{watch, Mutex, Semaphore};
use tracing::{debug, info};

use crate::operation::ContextOperation;
use crate::state::{OperationInfo, OperationState};

/// An operation a queue can run, independent of its context and result types.
pub trait Operation: Send + Sync {
    /// Operation ID
    fn id(&self) -> OperationId;

    /// Begin executing. Queues call this once a slot is free.
    fn dispatch(self: Arc<Self>);

    /// Request cancellation
    fn cancel(&self);

    /// Watch the latest lifecycle state
    fn subscribe(&self) -> watch::Receiver<OperationState>;

    /// Snapshot for listing
    fn info(&self) -> OperationInfo;
}

impl<C, R> Operation for ContextOperation<C, R>
where
    C: TransactionalContext,
    R: Send + Sync + 'static,
{
    fn id(&self) -> OperationId {
        ContextOperation::id(self)
    }

    fn dispatch(self: Arc<Self>) {
        self.start();
    }

    fn cancel(&self) {
        ContextOperation::cancel(self)
    }

    fn subscribe(&self) -> watch::Receiver<OperationState> {
        ContextOperation::subscribe(self)
    }

    fn info(&self) -> OperationInfo {
        ContextOperation::info(self)
    }
}

const DEFAULT_MAX_CONCURRENT: NonZeroUsize = match NonZeroUsize::new(4) {
    Some(n) => n,
    None => unreachable!(),
};

/// Queue configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct QueueConfig {
    /// Queue name, for logs
    pub name: String,
    /// Maximum number of operations executing at once
    pub max_concurrent: NonZeroUsize,
}

impl QueueConfig {
    /// Create a configuration with a name and default concurrency.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    /// Set the maximum number of operations executing at once.
    pub fn with_max_concurrent(mut self, max_concurrent: NonZeroUsize) -> Self {
        self.max_concurrent = max_concurrent;
        self
    }
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            name: "ctxop.queue".to_string(),
            max_concurrent: DEFAULT_MAX_CONCURRENT,
        }
    }
}

/// In-memory operation queue.
pub struct OperationQueue {
    config: QueueConfig,
    permits: Arc<Semaphore>,
    /// Operations that have not finished yet
    operations: Arc<Mutex<HashMap<OperationId, Arc<dyn Operation>>>>,
    /// Number of tracked operations
    pending: Arc<watch::Sender<usize>>,
}

impl OperationQueue {
    /// Create a queue with default configuration.
    pub fn new() -> Self {
        Self::with_config(QueueConfig::default())
    }

    /// Create a queue with custom configuration.
    pub fn with_config(config: QueueConfig) -> Self {
        let (pending, _) = watch::channel(0);
        Self {
            permits: Arc::new(Semaphore::new(config.max_concurrent.get())),
            config,
            operations: Arc::new(Mutex::new(HashMap::new())),
            pending: Arc::new(pending),
        }
    }

    /// Queue name.
    pub fn name(&self) -> &str {
        &self.config.name
    }

    /// Add an operation. It starts once a slot is free.
    ///
    /// Must be called from within a tokio runtime.
    pub async fn add_operation(&self, operation: Arc<dyn Operation>) {
        let id = operation.id();
        {
            let mut operations = self.operations.lock().await;
            operations.insert(id, Arc::clone(&operation));
            self.pending.send_replace(operations.len());
        }
        debug!("Queued operation {} on {}", id, self.config.name);

        let permits = Arc::clone(&self.permits);
        let operations = Arc::clone(&self.operations);
        let pending = Arc::clone(&self.pending);
        tokio::spawn(async move {
            // The semaphore is never closed.
            let _permit = permits.acquire_owned().await.ok();
            let mut state = operation.subscribe();
            Arc::clone(&operation).dispatch();
            let _ = state.wait_for(|s| *s == OperationState::Finished).await;

            let mut operations = operations.lock().await;
            operations.remove(&id);
            pending.send_replace(operations.len());
        });
    }

    /// Cancel every operation still in the queue.
    pub async fn cancel_all_operations(&self) {
        let operations = self.operations.lock().await;
        for operation in operations.values() {
            operation.cancel();
        }
        info!("Cancelled {} operations on {}", operations.len(), self.config.name);
    }

    /// Number of operations that have not finished.
    pub async fn operation_count(&self) -> usize {
        self.operations.lock().await.len()
    }

    /// Snapshots of operations that have not finished.
    pub async fn operations(&self) -> Vec<OperationInfo> {
        let operations = self.operations.lock().await;
        let mut infos: Vec<_> = operations.values().map(|o| o.info()).collect();
        infos.sort_by_key(|info| info.created_at);
        infos
    }

    /// Wait until every added operation finished.
    pub async fn wait_until_all_operations_are_finished(&self) {
        let mut pending = self.pending.subscribe();
        let _ = pending.wait_for(|count| *count == 0).await;
    }
}

impl Default for OperationQueue {
    fn default() -> Self {
        Self::new()
    }
}
