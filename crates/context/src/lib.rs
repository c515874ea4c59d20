//! Reference transactional contexts.
//!
//! [`ManagedContext`] implements the context traits from `ctxop-core` with
//! nested in-memory change sets, commit-time validation against a
//! [`ctxop_core::Model`], and a [`ctxop_storage::Store`] beneath the root.

#![warn(missing_docs)]

pub mod context;
pub mod error;
pub mod session;

pub use context::ManagedContext;
pub use error::{ContextError, Result};
pub use session::Session;
