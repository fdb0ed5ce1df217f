//! Shopdesk core library.
//!
//! This crate contains the session lifecycle and the authenticated request
//! pipeline shared by every shopdesk front end:
//!
//! - `auth`: session state, persistence, token expiry checks and the
//!   `SessionManager` that keeps a bearer-token session alive
//! - `api`: the Auth Service client, the `RequestGateway` that attaches
//!   tokens and retries once after a refresh, and typed resource endpoints
//! - `config`: environment selection and tunables

pub mod api;
pub mod auth;
pub mod config;

pub use api::{ApiError, AuthClient, RequestGateway, Resource, ResourceApi};
pub use auth::{
    AuthState, LogoutReason, SessionConfig, SessionData, SessionError, SessionEvent,
    SessionManager, SessionPhase, SessionStore, Tenant, User,
};
pub use config::{Config, Environment, StorageBackend};
