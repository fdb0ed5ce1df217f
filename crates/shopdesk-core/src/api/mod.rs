//! HTTP clients for the remote Auth Service and the tenant Resource API.
//!
//! `AuthClient` talks to the login/register/refresh endpoints.
//! `RequestGateway` carries every Resource API call: it attaches the bearer
//! token and, on a 401, refreshes through the `SessionManager` and retries the
//! request once. `ResourceApi` is the typed surface the business screens use.

pub mod auth_client;
pub mod error;
pub mod gateway;
pub mod resources;

pub use auth_client::{AuthClient, AuthResponse, LoginRequest, RefreshResponse, RegisterRequest};
pub use error::ApiError;
pub use gateway::RequestGateway;
pub use resources::{Resource, ResourceApi};
