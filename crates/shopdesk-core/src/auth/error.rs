use thiserror::Error;

/// Errors surfaced by session operations.
///
/// `Clone` because one refresh outcome is handed to every caller waiting on it,
/// which is why transport failures are carried as messages.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SessionError {
    #[error("Invalid credentials: {0}")]
    InvalidCredentials(String),

    #[error("Network error: {0}")]
    Network(String),

    #[error("Refresh token rejected - please log in again")]
    InvalidRefreshToken,

    #[error("Invalid response from auth service: {0}")]
    Decode(String),

    #[error("Auth service error ({status}): {detail}")]
    Server { status: u16, detail: String },

    #[error("Failed to persist session: {0}")]
    Storage(String),

    #[error("Not authenticated")]
    NotAuthenticated,

    #[error("Session changed while the request was in flight")]
    Superseded,
}

impl From<reqwest::Error> for SessionError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_decode() {
            SessionError::Decode(err.to_string())
        } else {
            SessionError::Network(err.to_string())
        }
    }
}
