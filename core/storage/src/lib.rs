//! Vault storage abstraction for KeyRelay.
//!
//! This module provides a trait-based interface for the persisted vault
//! entries and a store registry for resolving a backend by name.
//!
//! # Design Principles
//! - Store isolation: no backend-specific logic in vault or crypto modules
//! - Async operations: all I/O operations are async
//! - Revision stamps: every write can be made conditional on the revision it
//!   was computed from, so a read-modify-write never loses an update

pub mod local;
pub mod memory;
pub mod provider;
pub mod registry;

pub use local::LocalStore;
pub use memory::MemoryStore;
pub use provider::{validate_key, StoredEntry, VaultStore, WriteCondition};
pub use registry::{create_default_registry, StoreFactory, StoreRegistry};
