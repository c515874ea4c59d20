//! Backing stores beneath a root context.
//!
//! This crate provides the synchronous store interface a root context saves
//! into, with an in-memory and a JSON file implementation.

#![warn(missing_docs)]

pub mod trait_;
pub mod memory;
pub mod json_storage;

pub use trait_::{Store, StoreError, Result};
pub use memory::InMemoryStore;
pub use json_storage::JsonStore;
