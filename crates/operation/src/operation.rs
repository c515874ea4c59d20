//! Context operations.
//!
//! A [`ContextOperation`] runs a unit of work inside a throwaway child
//! ("scratch") context of its target, saves the scratch context into the
//! target, then saves further up the chain as far as its [`SaveDepth`]
//! allows. The outcome is recorded exactly once, and completion handlers
//! observe it exactly once.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, OnceLock, Weak};
use std::time::Duration;

use ctxop_core::{OperationDefaults, OperationId, SaveDepth, ScopedSession, Time, TransactionalContext};
use parking_lot::Mutex;
use tokio::sync::{broadcast, watch};
use tracing::{debug, error, info, warn};

use crate::chain::{save_up_the_chain, CancelCheck};
use crate::error::{AncestorSaveError, OperationError};
use crate::state::{OperationInfo, OperationState};

type Work<C, R> = Box<dyn FnOnce(&mut <C as TransactionalContext>::Session) -> anyhow::Result<R> + Send>;
type SuccessHandler<C, R> = Box<dyn FnOnce(&ContextOperation<C, R>, &R) + Send>;
type FailureHandler<C, R> = Box<dyn FnOnce(&ContextOperation<C, R>, &OperationError) + Send>;
type CompletionHandlers<C, R> = (SuccessHandler<C, R>, FailureHandler<C, R>);

/// Final outcome of an operation.
#[derive(Debug)]
pub struct Outcome<R> {
    /// The work's result, or why there is none
    pub result: Result<R, OperationError>,
    /// Failure saving above the target, reported next to a successful result
    pub error_saving_ancestor: Option<AncestorSaveError>,
}

/// Builder for [`ContextOperation`].
pub struct OperationBuilder<C> {
    target: Weak<C>,
    save_depth: SaveDepth,
    obtain_permanent_ids: bool,
}

impl<C: TransactionalContext> OperationBuilder<C> {
    /// Start building an operation against `target`.
    ///
    /// Only a weak reference to the target is kept.
    pub fn new(target: &Arc<C>) -> Self {
        let defaults = OperationDefaults::default();
        Self {
            target: Arc::downgrade(target),
            save_depth: defaults.save_depth,
            obtain_permanent_ids: defaults.obtain_permanent_ids,
        }
    }

    /// Take save depth and id behaviour from configured defaults.
    pub fn with_defaults(mut self, defaults: &OperationDefaults) -> Self {
        self.save_depth = defaults.save_depth;
        self.obtain_permanent_ids = defaults.obtain_permanent_ids;
        self
    }

    /// Set the save depth.
    pub fn with_save_depth(mut self, save_depth: SaveDepth) -> Self {
        self.save_depth = save_depth;
        self
    }

    /// Set whether inserted objects get permanent ids before the scratch save.
    pub fn with_obtain_permanent_ids(mut self, obtain: bool) -> Self {
        self.obtain_permanent_ids = obtain;
        self
    }

    /// Build an idle operation running `work`.
    pub fn build<R, W>(self, work: W) -> Arc<ContextOperation<C, R>>
    where
        R: Send + Sync + 'static,
        W: FnOnce(&mut C::Session) -> anyhow::Result<R> + Send + 'static,
    {
        let (state_tx, _) = watch::channel(OperationState::Idle);
        let (transitions_tx, _) = broadcast::channel(4);
        let work: Work<C, R> = Box::new(work);
        let operation = ContextOperation {
            id: OperationId::new(),
            save_depth: self.save_depth,
            obtain_permanent_ids: self.obtain_permanent_ids,
            target: self.target,
            work: Mutex::new(Some(work)),
            executing: AtomicBool::new(false),
            finished: AtomicBool::new(false),
            cancelled: AtomicBool::new(false),
            outcome: OnceLock::new(),
            completion: Mutex::new(None),
            state_tx,
            transitions_tx,
            created_at: chrono::Utc::now(),
            started_at: OnceLock::new(),
            finished_at: OnceLock::new(),
        };
        debug!(
            "Created operation {} (save depth {}, permanent ids {})",
            operation.id, operation.save_depth, operation.obtain_permanent_ids
        );
        Arc::new(operation)
    }
}

/// A unit of work committed through a scratch child of a target context.
///
/// Lifecycle: idle, then executing after [`start`](Self::start), then
/// finished. `is_executing` and `is_finished` are never both true, and once
/// finished nothing changes: the outcome is written once.
///
/// Work runs inside the scratch context's scope. After the work returns,
/// inserted objects optionally get permanent ids and the scratch context is
/// saved into the target. The walk up the chain then saves the target and
/// further ancestors, each in its own scope, according to the save depth.
///
/// Cancellation is cooperative. It is checked before the work begins and
/// before each ancestor save; work that already began is not interrupted.
pub struct ContextOperation<C: TransactionalContext, R> {
    id: OperationId,
    save_depth: SaveDepth,
    obtain_permanent_ids: bool,
    target: Weak<C>,
    work: Mutex<Option<Work<C, R>>>,
    executing: AtomicBool,
    finished: AtomicBool,
    cancelled: AtomicBool,
    outcome: OnceLock<Outcome<R>>,
    completion: Mutex<Option<CompletionHandlers<C, R>>>,
    state_tx: watch::Sender<OperationState>,
    transitions_tx: broadcast::Sender<OperationState>,
    created_at: Time,
    started_at: OnceLock<Time>,
    finished_at: OnceLock<Time>,
}

impl<C, R> ContextOperation<C, R>
where
    C: TransactionalContext,
    R: Send + Sync + 'static,
{
    /// Create an operation with default settings.
    pub fn new<W>(target: &Arc<C>, work: W) -> Arc<Self>
    where
        W: FnOnce(&mut C::Session) -> anyhow::Result<R> + Send + 'static,
    {
        OperationBuilder::new(target).build(work)
    }

    /// Operation ID.
    pub fn id(&self) -> OperationId {
        self.id
    }

    /// Configured save depth.
    pub fn save_depth(&self) -> SaveDepth {
        self.save_depth
    }

    /// Whether inserted objects get permanent ids before the scratch save.
    pub fn obtain_permanent_ids(&self) -> bool {
        self.obtain_permanent_ids
    }

    /// The target context, if it is still alive.
    pub fn target(&self) -> Option<Arc<C>> {
        self.target.upgrade()
    }

    /// Started and not yet finished.
    pub fn is_executing(&self) -> bool {
        self.executing.load(Ordering::Acquire)
    }

    /// Outcome recorded.
    pub fn is_finished(&self) -> bool {
        self.finished.load(Ordering::Acquire)
    }

    /// Cancellation requested, or the target was gone at start.
    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Acquire)
    }

    /// Current lifecycle state.
    pub fn state(&self) -> OperationState {
        *self.state_tx.borrow()
    }

    /// Watch the latest lifecycle state.
    pub fn subscribe(&self) -> watch::Receiver<OperationState> {
        self.state_tx.subscribe()
    }

    /// Receive every lifecycle transition sent after this call, in order.
    ///
    /// Unlike [`subscribe`](Self::subscribe), `Executing` is delivered even
    /// when `Finished` follows immediately.
    pub fn transitions(&self) -> broadcast::Receiver<OperationState> {
        self.transitions_tx.subscribe()
    }

    /// The outcome, once finished.
    pub fn outcome(&self) -> Option<&Outcome<R>> {
        self.outcome.get()
    }

    /// The work's result. None until finished, and None after any failure.
    pub fn result(&self) -> Option<&R> {
        self.outcome().and_then(|o| o.result.as_ref().ok())
    }

    /// Why the operation finished without a result.
    pub fn error(&self) -> Option<&OperationError> {
        self.outcome().and_then(|o| o.result.as_ref().err())
    }

    /// Failure saving an ancestor above the scratch context.
    pub fn error_saving_ancestor(&self) -> Option<&AncestorSaveError> {
        self.outcome().and_then(|o| o.error_saving_ancestor.as_ref())
    }

    /// Request cancellation.
    ///
    /// Idempotent. Has no effect once the operation finished.
    pub fn cancel(&self) {
        // Shares the lock `finish` holds while flipping `finished`.
        let _finishing = self.completion.lock();
        if self.is_finished() {
            debug!("Operation {} already finished, ignoring cancel", self.id);
            return;
        }
        if !self.cancelled.swap(true, Ordering::AcqRel) {
            info!("Operation {} cancelled", self.id);
        }
    }

    /// Register completion handlers.
    ///
    /// Exactly one of them runs, exactly once, after the outcome is recorded.
    /// If the operation already finished, the matching handler runs before
    /// this returns. Registering again replaces handlers that have not run.
    /// Handlers run before `Finished` is published, so `wait()` returns only
    /// after they completed.
    pub fn on_completion<S, F>(&self, on_success: S, on_failure: F)
    where
        S: FnOnce(&Self, &R) + Send + 'static,
        F: FnOnce(&Self, &OperationError) + Send + 'static,
    {
        let handlers: CompletionHandlers<C, R> = (Box::new(on_success), Box::new(on_failure));
        let mut slot = self.completion.lock();
        if !self.is_finished() {
            if slot.is_some() {
                warn!("Replacing completion handlers of operation {}", self.id);
            }
            *slot = Some(handlers);
            return;
        }
        drop(slot);
        self.deliver(handlers);
    }

    /// Start the operation.
    ///
    /// Must be called from within a tokio runtime. Starting an operation
    /// twice is ignored. If the target context is gone, the operation
    /// finishes as cancelled without creating a scratch context.
    pub fn start(self: &Arc<Self>) {
        if self.started_at.set(chrono::Utc::now()).is_err() {
            warn!("Operation {} already started", self.id);
            return;
        }

        let Some(target) = self.target.upgrade() else {
            info!("Target of operation {} is gone, cancelling", self.id);
            self.cancelled.store(true, Ordering::Release);
            self.mark_executing();
            self.finish(Err(OperationError::Cancelled), None);
            return;
        };

        self.mark_executing();
        let scratch = target.new_child();
        drop(target);
        debug!("Operation {} executing", self.id);

        let operation = Arc::clone(self);
        tokio::spawn(async move {
            operation.execute_in_context(scratch).await;
        });
    }

    /// Wait until the operation finished.
    pub async fn wait(&self) {
        let mut state = self.subscribe();
        // The sender lives in `self`, so the channel cannot close here.
        let _ = state.wait_for(|s| *s == OperationState::Finished).await;
    }

    /// Wait until the operation finished or `timeout` elapsed.
    ///
    /// Returns whether it finished.
    pub async fn wait_timeout(&self, timeout: Duration) -> bool {
        tokio::time::timeout(timeout, self.wait()).await.is_ok()
    }

    /// Snapshot for listing and logging.
    pub fn info(&self) -> OperationInfo {
        OperationInfo {
            id: self.id,
            state: self.state(),
            cancelled: self.is_cancelled(),
            save_depth: self.save_depth,
            created_at: self.created_at,
            started_at: self.started_at.get().copied(),
            finished_at: self.finished_at.get().copied(),
            error: self.error().map(|e| e.to_string()),
            error_saving_ancestor: self.error_saving_ancestor().map(|e| e.to_string()),
        }
    }

    fn cancel_check(self: &Arc<Self>) -> CancelCheck {
        let operation = Arc::downgrade(self);
        Arc::new(move || operation.upgrade().map_or(true, |o| o.is_cancelled()))
    }

    async fn execute_in_context(self: Arc<Self>, scratch: Arc<C>) {
        let work = self.work.lock().take();
        let Some(work) = work else {
            error!("Operation {} has no work left to run", self.id);
            self.finish(Err(OperationError::Body(anyhow::anyhow!("work already consumed"))), None);
            return;
        };

        let is_cancelled = self.cancel_check();
        let check = Arc::clone(&is_cancelled);
        let obtain_permanent_ids = self.obtain_permanent_ids;
        let id = self.id;

        let prepared = scratch
            .perform(move |session| -> Result<R, OperationError> {
                if check() {
                    debug!("Operation {} cancelled before its work began", id);
                    return Err(OperationError::Cancelled);
                }

                debug!("Operation {} running its work", id);
                let result = work(session).map_err(OperationError::Body)?;

                if obtain_permanent_ids && session.has_inserted_objects() {
                    debug!("Operation {} obtaining permanent ids", id);
                    session
                        .obtain_permanent_ids()
                        .map_err(|e| OperationError::Save(anyhow::Error::new(e)))?;
                }
                session
                    .save()
                    .map_err(|e| OperationError::Save(anyhow::Error::new(e)))?;
                debug!("Operation {} saved its scratch context", id);
                Ok(result)
            })
            .await;

        let result = match prepared {
            Ok(Ok(result)) => result,
            Ok(Err(e)) => {
                self.finish(Err(e), None);
                return;
            }
            Err(e) => {
                let e = anyhow::Error::new(e).context("scratch context scope aborted");
                self.finish(Err(OperationError::Body(e)), None);
                return;
            }
        };

        let error_saving_ancestor = save_up_the_chain(
            scratch.parent(),
            self.save_depth.ancestor_levels(),
            is_cancelled,
        )
        .await;
        drop(scratch);

        self.finish(Ok(result), error_saving_ancestor);
    }

    fn mark_executing(&self) {
        self.executing.store(true, Ordering::Release);
        self.publish(OperationState::Executing);
    }

    fn publish(&self, state: OperationState) {
        self.state_tx.send_replace(state);
        // No receivers is fine.
        let _ = self.transitions_tx.send(state);
    }

    fn finish(&self, result: Result<R, OperationError>, error_saving_ancestor: Option<AncestorSaveError>) {
        match (&result, &error_saving_ancestor) {
            (Ok(_), None) => info!("Operation {} finished", self.id),
            (Ok(_), Some(e)) => warn!("Operation {} finished, but {}", self.id, e),
            (Err(e), _) => info!("Operation {} finished without result: {}", self.id, e),
        }

        let outcome = Outcome {
            result,
            error_saving_ancestor,
        };
        if self.outcome.set(outcome).is_err() {
            error!("Operation {} finished twice, keeping the first outcome", self.id);
            debug_assert!(false, "operation finished twice");
            return;
        }

        let _ = self.finished_at.set(chrono::Utc::now());
        let handlers = {
            let mut slot = self.completion.lock();
            self.executing.store(false, Ordering::Release);
            self.finished.store(true, Ordering::Release);
            slot.take()
        };
        if let Some(handlers) = handlers {
            self.deliver(handlers);
        }

        // Waiters resume only after the handlers ran.
        self.publish(OperationState::Finished);
    }

    fn deliver(&self, (on_success, on_failure): CompletionHandlers<C, R>) {
        let Some(outcome) = self.outcome.get() else {
            return;
        };
        match &outcome.result {
            Ok(result) => on_success(self, result),
            Err(e) => on_failure(self, e),
        }
    }
}

impl<C: TransactionalContext, R> std::fmt::Debug for ContextOperation<C, R> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ContextOperation")
            .field("id", &self.id)
            .field("state", &*self.state_tx.borrow())
            .field("save_depth", &self.save_depth)
            .field("cancelled", &self.cancelled.load(Ordering::Acquire))
            .finish()
    }
}
