//! Authenticated request pipeline for the Resource API.
//!
//! Every call goes through `RequestGateway::send`, which:
//! 1. attaches `Authorization: Bearer <access_token>` when a session exists
//! 2. on a 401, asks the `SessionManager` for a refresh (when a refresh token
//!    is available) and replays the original request exactly once
//! 3. hands every other status back untouched, with no retries
//!
//! A failed refresh has already logged the session out by the time `send`
//! returns `ApiError::SessionExpired`, so every screen observes it.

use reqwest::header::{HeaderValue, AUTHORIZATION};
use reqwest::{Client, Method, Request, RequestBuilder, Response, StatusCode};
use tracing::{debug, warn};

use super::ApiError;
use crate::auth::SessionManager;

/// Gateway for tenant-scoped API calls.
/// Clone is cheap - `Client` and `SessionManager` are both `Arc` handles.
#[derive(Clone)]
pub struct RequestGateway {
    client: Client,
    base_url: String,
    session: SessionManager,
}

impl RequestGateway {
    pub fn new(client: Client, base_url: &str, session: SessionManager) -> Self {
        Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            session,
        }
    }

    pub fn session(&self) -> &SessionManager {
        &self.session
    }

    pub fn url(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path.trim_start_matches('/'))
    }

    /// Start a request against the Resource API. Authorization is added by `send`.
    pub fn request(&self, method: Method, path: &str) -> RequestBuilder {
        self.client.request(method, self.url(path))
    }

    /// Dispatch a request, refreshing and retrying once on a 401.
    pub async fn send(&self, request: Request) -> Result<Response, ApiError> {
        let replay = request.try_clone();
        let method = request.method().clone();
        let url = request.url().clone();

        let response = self.dispatch(request, self.session.access_token()).await?;
        if response.status() != StatusCode::UNAUTHORIZED {
            return Ok(response);
        }

        if !self.session.has_refresh_token() {
            debug!(%method, %url, "401 with no refresh token");
            return Ok(response);
        }

        let Some(replay) = replay else {
            warn!(%method, %url, "401 on a request whose body cannot be replayed");
            return Ok(response);
        };

        match self.session.refresh().await {
            Ok(token) => {
                debug!(%method, %url, "Retrying request with refreshed token");
                self.dispatch(replay, Some(token)).await
            }
            Err(e) => {
                debug!(%method, %url, error = %e, "Refresh failed after 401");
                Err(ApiError::SessionExpired)
            }
        }
    }

    async fn dispatch(&self, mut request: Request, token: Option<String>) -> Result<Response, ApiError> {
        if let Some(token) = token {
            let value = HeaderValue::from_str(&format!("Bearer {}", token))
                .map_err(|e| ApiError::InvalidRequest(e.to_string()))?;
            request.headers_mut().insert(AUTHORIZATION, value);
        }
        Ok(self.client.execute(request).await?)
    }
}
