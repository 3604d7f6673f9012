//! Authentication errors.

use thiserror::Error;

/// Errors produced while authenticating a request.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AuthError {
    #[error("missing authorization header")]
    MissingAuthHeader,

    #[error("malformed authorization header")]
    InvalidAuthHeader,

    /// The presented token is not in the store.
    #[error("unknown token")]
    Unknown,

    /// The token exists but has been marked inactive.
    #[error("token revoked")]
    Revoked,
}

impl AuthError {
    /// Stable machine-readable code for API responses.
    pub fn code(&self) -> &'static str {
        match self {
            AuthError::MissingAuthHeader => "MISSING_AUTH",
            AuthError::InvalidAuthHeader => "INVALID_AUTH",
            AuthError::Unknown => "UNKNOWN_TOKEN",
            AuthError::Revoked => "REVOKED_TOKEN",
        }
    }
}
