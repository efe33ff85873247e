//! Application layer for KeyRelay.
//!
//! Wires a credential vault, a session relay and a store backend into one
//! object owned by the calling layer. Front ends (the CLI, a desktop shell)
//! hold a `VaultSession` instead of reaching for global state.

pub mod session;

pub use session::{SessionStatus, VaultSession};
