//! Errors returned to callers of the tenant resource API.
//!
//! The backend answers failures with a `{"detail": ...}` JSON body; the
//! detail text is lifted out so messages read like the server meant them.

use serde::Deserialize;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ApiError {
    /// 403: the signed-in user's role may not touch this tenant resource.
    #[error("Access denied: {0}")]
    AccessDenied(String),

    /// 401 that the gateway handed back unchanged: there was no refresh
    /// token to try, or the replay after a successful refresh was also
    /// rejected. The session itself is left alone.
    #[error("Not signed in")]
    Unauthorized,

    /// A 401 led to a refresh and the refresh failed. The session has
    /// already been logged out and storage cleared by the time this is seen.
    #[error("Session expired - please log in again")]
    SessionExpired,

    #[error("Not found: {0}")]
    NotFound(String),

    /// 409, e.g. a duplicate product SKU or discount code.
    #[error("Conflict: {0}")]
    Conflict(String),

    /// 422 from request body validation.
    #[error("Rejected by validation: {0}")]
    Validation(String),

    #[error("Rate limited - please wait before retrying")]
    RateLimited,

    #[error("Server error: {0}")]
    ServerError(String),

    #[error("Network error: {0}")]
    NetworkError(#[from] reqwest::Error),

    /// The request could not be built or serialized locally.
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Invalid response: {0}")]
    InvalidResponse(String),
}

/// Maximum length for error details kept in messages
const MAX_ERROR_BODY_LENGTH: usize = 500;

#[derive(Deserialize)]
struct ErrorBody {
    detail: serde_json::Value,
}

/// Human-readable detail of an error body.
///
/// A string `detail` is used as is; structured details (validation error
/// lists) are kept as compact JSON. Anything else is the raw body.
pub(crate) fn detail_from_body(body: &str) -> String {
    match serde_json::from_str::<ErrorBody>(body) {
        Ok(ErrorBody {
            detail: serde_json::Value::String(detail),
        }) => detail,
        Ok(ErrorBody { detail }) => detail.to_string(),
        Err(_) => body.to_string(),
    }
}

fn truncate(detail: String) -> String {
    if detail.len() <= MAX_ERROR_BODY_LENGTH {
        return detail;
    }
    let mut end = MAX_ERROR_BODY_LENGTH;
    while !detail.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}... (truncated, {} total bytes)", &detail[..end], detail.len())
}

impl ApiError {
    /// Map a non-success resource response.
    pub fn from_status(status: reqwest::StatusCode, body: &str) -> Self {
        let detail = truncate(detail_from_body(body));
        match status.as_u16() {
            401 => ApiError::Unauthorized,
            403 => ApiError::AccessDenied(detail),
            404 => ApiError::NotFound(detail),
            409 => ApiError::Conflict(detail),
            422 => ApiError::Validation(detail),
            429 => ApiError::RateLimited,
            500..=599 => ApiError::ServerError(detail),
            _ => ApiError::InvalidResponse(format!("Status {}: {}", status, detail)),
        }
    }

    /// Whether the user has to sign in again before retrying.
    pub fn requires_login(&self) -> bool {
        matches!(self, ApiError::Unauthorized | ApiError::SessionExpired)
    }
}
