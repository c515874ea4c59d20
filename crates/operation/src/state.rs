//! Operation lifecycle state.

use ctxop_core::{OperationId, SaveDepth, Time};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Lifecycle state of an operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum OperationState {
    /// Created, not started
    Idle,
    /// Started, outcome not yet known
    Executing,
    /// Outcome recorded; nothing changes afterwards
    Finished,
}

impl fmt::Display for OperationState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OperationState::Idle => write!(f, "idle"),
            OperationState::Executing => write!(f, "executing"),
            OperationState::Finished => write!(f, "finished"),
        }
    }
}

/// Snapshot of an operation for listing and logging.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OperationInfo {
    /// Operation ID
    pub id: OperationId,
    /// Lifecycle state
    pub state: OperationState,
    /// Whether cancellation was requested
    pub cancelled: bool,
    /// Configured save depth
    pub save_depth: SaveDepth,
    /// Created timestamp
    pub created_at: Time,
    /// Started timestamp (None if idle)
    pub started_at: Option<Time>,
    /// Finished timestamp (None if not finished)
    pub finished_at: Option<Time>,
    /// Primary error, if finished without a result
    pub error: Option<String>,
    /// Ancestor save error, if any
    pub error_saving_ancestor: Option<String>,
}
