//! ctxop core types.
//!
//! This crate defines the identifiers, records, save depths and context
//! traits shared by the storage, context and operation crates.

#![warn(missing_docs)]

// Identities
mod id;

// Operation settings
mod depth;
mod config;

// Records and validation model
mod record;
mod model;

// Context abstraction
pub mod context;

// Re-exports
pub use id::*;

pub use depth::{SaveDepth, ParseSaveDepthError};
pub use config::OperationDefaults;
pub use record::{Attributes, Change, ChangeSet, Record};
pub use model::{EntityDescription, Model};
pub use context::{ScopedSession, TransactionalContext};

/// Timestamp type
pub type Time = chrono::DateTime<chrono::Utc>;
