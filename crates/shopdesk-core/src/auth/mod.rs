//! Authentication module for managing the bearer-token session.
//!
//! This module provides:
//! - `AuthState` / `SessionData`: the in-memory session and its identity fields
//! - `SessionStore`: persistence under both the granular and the legacy schema
//! - `clock`: client-side expiry heuristics for access tokens
//! - `SessionManager`: login/register/logout, single-flight refresh and the
//!   background renewal loop
//!
//! The manager is the only writer of session state. Everything else reads
//! snapshots and asks the manager to refresh or log out.

pub mod clock;
pub mod error;
pub mod manager;
pub mod state;
pub mod store;

pub use clock::{expires_at, is_expiring_soon, TokenError, DEFAULT_EXPIRY_THRESHOLD};
pub use error::SessionError;
pub use manager::{LogoutReason, SessionConfig, SessionEvent, SessionManager};
pub use state::{AuthState, SessionData, SessionPhase, Tenant, User};
pub use store::{FileStore, KeyValueStore, KeyringStore, MemoryStore, SessionStore, StoreError};
