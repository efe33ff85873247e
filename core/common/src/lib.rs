//! Common utilities and types shared across KeyRelay crates.
//!
//! This module provides the error taxonomy and the identifier types that
//! flow between the vault, the storage backends and the session relay.

pub mod error;
pub mod types;

pub use error::{Error, Result};
pub use types::{ProviderId, SessionId};
