//! Ephemeral session relay for KeyRelay.
//!
//! This module provides:
//! - Session establishment from vault raw key material
//! - Per-request sealing of provider keys into request headers
//! - The session registry contract, with in-memory and HTTP implementations
//! - Server-side request authentication against a registry
//!
//! # Security Guarantees
//! - The provider key never leaves the client unsealed after it is saved
//! - Every sealed request uses a fresh 192-bit nonce
//! - No live session means no credentials: headers are withheld, never
//!   replaced with a fallback

pub mod clock;
pub mod config;
pub mod http;
pub mod registry;
pub mod relay;
pub mod server;

pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{RelayConfig, DEFAULT_REQUEST_TIMEOUT, DEFAULT_SESSION_TTL};
pub use http::HttpSessionRegistry;
pub use registry::{
    MemorySessionRegistry, PruneResponse, ResolvedSession, SaveResponse, SessionRegistry,
};
pub use relay::{ActiveSession, SessionHeaders, SessionRelay, SESSION_AUTH_HEADER, SESSION_ID_HEADER};
pub use server::RequestAuthenticator;
