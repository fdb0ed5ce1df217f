use chrono::{DateTime, NaiveDateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};

#[cfg(feature = "ts")]
use ts_rs::TS;

/// The signed-in user. `role` is passed through untouched.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "ts", derive(TS), ts(export))]
pub struct User {
    pub id: String,
    pub email: String,
    pub role: String,
    #[serde(default = "default_active")]
    pub is_active: bool,
    #[serde(deserialize_with = "deserialize_timestamp")]
    #[cfg_attr(feature = "ts", ts(type = "string"))]
    pub created_at: DateTime<Utc>,
}

fn default_active() -> bool {
    true
}

/// RFC 3339, or a naive `YYYY-MM-DDTHH:MM:SS[.f]` the backend emits for
/// columns stored without a zone; naive values are taken as UTC.
fn deserialize_timestamp<'de, D>(deserializer: D) -> Result<DateTime<Utc>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = String::deserialize(deserializer)?;
    if let Ok(parsed) = DateTime::parse_from_rfc3339(&raw) {
        return Ok(parsed.with_timezone(&Utc));
    }
    NaiveDateTime::parse_from_str(&raw, "%Y-%m-%dT%H:%M:%S%.f")
        .or_else(|_| NaiveDateTime::parse_from_str(&raw, "%Y-%m-%d %H:%M:%S%.f"))
        .map(|naive| naive.and_utc())
        .map_err(|e| serde::de::Error::custom(format!("invalid timestamp {:?}: {}", raw, e)))
}

/// The tenant (client company) the user belongs to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "ts", derive(TS), ts(export))]
pub struct Tenant {
    pub id: String,
    pub name: String,
    pub slug: String,
    #[serde(deserialize_with = "deserialize_timestamp")]
    #[cfg_attr(feature = "ts", ts(type = "string"))]
    pub created_at: DateTime<Utc>,
}

/// Identity and token fields of an established session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "ts", derive(TS), ts(export))]
pub struct SessionData {
    pub access_token: String,
    pub refresh_token: String,
    pub user: User,
    pub tenant: Tenant,
}

impl SessionData {
    /// True when every field needed for an authenticated session is present.
    pub fn is_complete(&self) -> bool {
        !self.access_token.is_empty()
            && !self.refresh_token.is_empty()
            && !self.user.id.is_empty()
            && !self.tenant.id.is_empty()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[cfg_attr(feature = "ts", derive(TS), ts(export))]
#[serde(rename_all = "snake_case")]
pub enum SessionPhase {
    #[default]
    LoggedOut,
    Authenticating,
    Authenticated,
    /// Transient sub-state of `Authenticated` while a refresh is in flight.
    Refreshing,
}

/// Snapshot of the process-wide session.
///
/// Owned by `SessionManager`; callers only ever see clones.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "ts", derive(TS), ts(export))]
pub struct AuthState {
    pub session: Option<SessionData>,
    pub phase: SessionPhase,
    pub is_loading: bool,
}

impl Default for AuthState {
    fn default() -> Self {
        Self {
            session: None,
            phase: SessionPhase::LoggedOut,
            is_loading: true,
        }
    }
}

impl AuthState {
    /// Logged-out defaults after bootstrap has finished.
    pub fn logged_out() -> Self {
        Self {
            is_loading: false,
            ..Self::default()
        }
    }

    pub fn authenticated(session: SessionData) -> Self {
        Self {
            session: Some(session),
            phase: SessionPhase::Authenticated,
            is_loading: false,
        }
    }

    pub fn is_authenticated(&self) -> bool {
        self.session
            .as_ref()
            .map(SessionData::is_complete)
            .unwrap_or(false)
    }

    /// Get the bearer token if a session exists
    pub fn access_token(&self) -> Option<&str> {
        self.session.as_ref().map(|s| s.access_token.as_str())
    }

    pub fn refresh_token(&self) -> Option<&str> {
        self.session
            .as_ref()
            .map(|s| s.refresh_token.as_str())
            .filter(|t| !t.is_empty())
    }

    pub fn user(&self) -> Option<&User> {
        self.session.as_ref().map(|s| &s.user)
    }

    pub fn tenant(&self) -> Option<&Tenant> {
        self.session.as_ref().map(|s| &s.tenant)
    }
}

#[cfg(test)]
pub(crate) mod fixtures {
    use chrono::TimeZone;

    use super::*;

    pub fn user() -> User {
        User {
            id: "u1".to_string(),
            email: "a@b.com".to_string(),
            role: "admin".to_string(),
            is_active: true,
            created_at: Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap(),
        }
    }

    pub fn tenant() -> Tenant {
        Tenant {
            id: "c1".to_string(),
            name: "Acme".to_string(),
            slug: "acme".to_string(),
            created_at: Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap(),
        }
    }

    pub fn session(access: &str, refresh: &str) -> SessionData {
        SessionData {
            access_token: access.to_string(),
            refresh_token: refresh.to_string(),
            user: user(),
            tenant: tenant(),
        }
    }
}
