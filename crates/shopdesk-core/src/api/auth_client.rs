//! Client for the remote Auth Service.
//!
//! Responses are decoded into explicit DTOs and checked for the required
//! fields before they become a `SessionData`.

use std::time::Duration;

use reqwest::{Client, Response, StatusCode};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use super::error::detail_from_body;
use crate::auth::{SessionData, SessionError, Tenant, User};

#[derive(Clone, Serialize)]
pub struct LoginRequest {
    pub email: String,
    pub password: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub client_slug: Option<String>,
}

#[derive(Clone, Serialize)]
pub struct RegisterRequest {
    pub email: String,
    pub password: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub client_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub client_slug: Option<String>,
}

#[derive(Serialize)]
struct RefreshRequest<'a> {
    refresh_token: &'a str,
}

/// Body returned by `/auth/login` and `/auth/register`.
#[derive(Debug, Clone, Deserialize)]
pub struct AuthResponse {
    pub access_token: String,
    pub refresh_token: String,
    pub user: User,
    pub client: Tenant,
}

impl AuthResponse {
    fn into_session(self) -> Result<SessionData, SessionError> {
        let data = SessionData {
            access_token: self.access_token,
            refresh_token: self.refresh_token,
            user: self.user,
            tenant: self.client,
        };
        if data.is_complete() {
            Ok(data)
        } else {
            Err(SessionError::Decode(
                "auth response is missing a token or identity".to_string(),
            ))
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct RefreshResponse {
    pub access_token: String,
}

#[derive(Clone)]
pub struct AuthClient {
    client: Client,
    base_url: String,
}

impl AuthClient {
    pub fn new(base_url: &str, timeout: Duration) -> reqwest::Result<Self> {
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self::with_client(client, base_url))
    }

    /// Share an existing connection pool.
    pub fn with_client(client: Client, base_url: &str) -> Self {
        Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub async fn login(&self, request: &LoginRequest) -> Result<SessionData, SessionError> {
        debug!(tenant = ?request.client_slug, "Sending login request");
        self.authenticate("login", request).await
    }

    pub async fn register(&self, request: &RegisterRequest) -> Result<SessionData, SessionError> {
        debug!(tenant = ?request.client_slug, "Sending register request");
        self.authenticate("register", request).await
    }

    /// Exchange a refresh token for a new access token.
    pub async fn refresh(&self, refresh_token: &str) -> Result<String, SessionError> {
        let url = format!("{}/auth/refresh", self.base_url);
        let response = self
            .client
            .post(&url)
            .json(&RefreshRequest { refresh_token })
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let detail = Self::error_detail(response).await;
            warn!(status = status.as_u16(), "Refresh rejected");
            return Err(match status {
                StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
                    SessionError::InvalidRefreshToken
                }
                _ => SessionError::Server {
                    status: status.as_u16(),
                    detail,
                },
            });
        }

        let body: RefreshResponse = response.json().await?;
        if body.access_token.is_empty() {
            return Err(SessionError::Decode("refresh returned an empty token".to_string()));
        }
        Ok(body.access_token)
    }

    async fn authenticate<B: Serialize>(
        &self,
        endpoint: &str,
        body: &B,
    ) -> Result<SessionData, SessionError> {
        let url = format!("{}/auth/{}", self.base_url, endpoint);
        let response = self.client.post(&url).json(body).send().await?;

        let status = response.status();
        if !status.is_success() {
            let detail = Self::error_detail(response).await;
            return Err(match status.as_u16() {
                400 | 401 | 403 | 409 | 422 => SessionError::InvalidCredentials(detail),
                code => SessionError::Server {
                    status: code,
                    detail,
                },
            });
        }

        let body: AuthResponse = response.json().await?;
        body.into_session()
    }

    async fn error_detail(response: Response) -> String {
        let status = response.status();
        let text = response.text().await.unwrap_or_default();
        if text.is_empty() {
            return status.to_string();
        }
        detail_from_body(&text)
    }
}
