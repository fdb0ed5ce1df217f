//! Client-side expiry heuristics for access tokens.
//!
//! Tokens are JWT-shaped (`header.payload.signature`). Only the `exp` claim of
//! the payload is read and the signature is never checked, so nothing here is
//! a security boundary. It only decides when to renew.

use std::time::Duration;

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use chrono::{DateTime, TimeDelta, Utc};
use serde::Deserialize;
use thiserror::Error;

/// Renew when the access token has less than this left.
pub const DEFAULT_EXPIRY_THRESHOLD: Duration = Duration::from_secs(60);

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TokenError {
    #[error("token is not a JWT: {0}")]
    Malformed(String),

    #[error("token has no exp claim")]
    MissingExpiry,
}

#[derive(Debug, Deserialize)]
struct Claims {
    exp: Option<f64>,
}

/// Decode the expiry instant of a token without verifying it.
pub fn expires_at(token: &str) -> Result<DateTime<Utc>, TokenError> {
    let mut parts = token.split('.');
    let payload = match (parts.next(), parts.next(), parts.next(), parts.next()) {
        (Some(_), Some(payload), Some(_), None) => payload,
        _ => return Err(TokenError::Malformed("expected three segments".to_string())),
    };

    let bytes = URL_SAFE_NO_PAD
        .decode(payload.trim_end_matches('='))
        .map_err(|e| TokenError::Malformed(e.to_string()))?;
    let claims: Claims =
        serde_json::from_slice(&bytes).map_err(|e| TokenError::Malformed(e.to_string()))?;

    let exp = claims.exp.ok_or(TokenError::MissingExpiry)?;
    DateTime::from_timestamp_millis((exp * 1000.0) as i64).ok_or(TokenError::MissingExpiry)
}

/// True when `token` expires within `threshold`.
///
/// Unreadable tokens count as expiring so the caller renews instead of
/// trusting them.
pub fn is_expiring_soon(token: &str, threshold: Duration) -> bool {
    is_expiring_soon_at(token, threshold, Utc::now())
}

pub fn is_expiring_soon_at(token: &str, threshold: Duration, now: DateTime<Utc>) -> bool {
    match expires_at(token) {
        Ok(exp) => {
            let threshold = TimeDelta::from_std(threshold).unwrap_or(TimeDelta::MAX);
            exp - now < threshold
        }
        Err(e) => {
            tracing::debug!(error = %e, "Treating undecodable token as expiring");
            true
        }
    }
}

#[cfg(test)]
pub(crate) fn test_token(exp: i64) -> String {
    let header = URL_SAFE_NO_PAD.encode(br#"{"alg":"HS256","typ":"JWT"}"#);
    let payload = URL_SAFE_NO_PAD.encode(format!(r#"{{"sub":"u1","exp":{}}}"#, exp));
    format!("{}.{}.sig", header, payload)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_not_a_jwt_is_expiring() {
        assert!(is_expiring_soon("not-a-jwt", DEFAULT_EXPIRY_THRESHOLD));
        assert!(matches!(expires_at("not-a-jwt"), Err(TokenError::Malformed(_))));
    }

    #[test]
    fn test_garbage_payload_is_expiring() {
        assert!(is_expiring_soon("a.!!!.c", DEFAULT_EXPIRY_THRESHOLD));
        let no_json = format!("a.{}.c", URL_SAFE_NO_PAD.encode("hello"));
        assert!(is_expiring_soon(&no_json, DEFAULT_EXPIRY_THRESHOLD));
    }

    #[test]
    fn test_missing_exp_is_expiring() {
        let payload = URL_SAFE_NO_PAD.encode(r#"{"sub":"u1"}"#);
        let token = format!("h.{}.s", payload);
        assert_eq!(expires_at(&token), Err(TokenError::MissingExpiry));
        assert!(is_expiring_soon(&token, DEFAULT_EXPIRY_THRESHOLD));
    }

    #[test]
    fn test_threshold_boundaries() {
        let now = Utc::now();
        let token = test_token(now.timestamp() + 10);
        assert!(is_expiring_soon_at(&token, DEFAULT_EXPIRY_THRESHOLD, now));

        let token = test_token(now.timestamp() + 3600);
        assert!(!is_expiring_soon_at(&token, DEFAULT_EXPIRY_THRESHOLD, now));
        assert!(is_expiring_soon_at(&token, Duration::from_secs(7200), now));
    }

    #[test]
    fn test_already_expired() {
        let token = test_token(Utc::now().timestamp() - 5);
        assert!(is_expiring_soon(&token, Duration::ZERO));
    }

    #[test]
    fn test_padded_payload_decodes() {
        let token = test_token(1_900_000_000);
        let mut parts: Vec<String> = token.split('.').map(str::to_string).collect();
        parts[1].push_str("==");
        let padded = parts.join(".");
        assert_eq!(expires_at(&padded).unwrap().timestamp(), 1_900_000_000);
    }
}
