//! Context operations.
//!
//! Run work in a scratch child of a target context, save it into the target,
//! then save up the ancestor chain as far as the configured depth allows.

#![warn(missing_docs)]

pub mod chain;
pub mod error;
pub mod operation;
pub mod queue;
pub mod state;

pub use chain::{save_up_the_chain, CancelCheck};
pub use error::{AncestorSaveError, OperationError};
pub use operation::{ContextOperation, OperationBuilder, Outcome};
pub use queue::{Operation, OperationQueue, QueueConfig};
pub use state::{OperationInfo, OperationState};
