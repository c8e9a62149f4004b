//! Authentication error taxonomy.
//!
//! Every variant here is terminal at the middleware layer: it maps to a
//! distinct HTTP status and machine-readable code, and is never passed
//! silently into business handlers.

use std::time::Duration;

use thiserror::Error;

/// Authentication/authorization failure.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum AuthError {
    /// No credential, or a credential that failed validation.
    #[error("unauthenticated")]
    Unauthenticated,

    /// Valid credential, wrong role.
    #[error("forbidden")]
    Forbidden,

    /// Mutating request did not supply an anti-forgery token.
    #[error("anti-forgery token missing")]
    MissingToken,

    /// Anti-forgery token present but failed verification.
    #[error("anti-forgery token invalid")]
    InvalidToken,

    /// The external authority was unreachable or returned incomplete data.
    #[error("profile fetch failed: {0}")]
    ProfileFetchFailed(String),

    /// Rate limit exceeded for the (client, route class) pair.
    #[error("too many requests")]
    TooManyRequests { retry_after: Duration },

    /// Uniqueness violation during identity creation that survived the retry.
    #[error("conflict: {0}")]
    Conflict(String),

    /// Infrastructure failure outside the credential path (e.g. user store down).
    #[error("internal error: {0}")]
    Internal(String),
}

impl AuthError {
    /// Machine-readable error code for response bodies.
    pub fn code(&self) -> &'static str {
        match self {
            AuthError::Unauthenticated => "unauthenticated",
            AuthError::Forbidden => "forbidden",
            AuthError::MissingToken => "missing_csrf_token",
            AuthError::InvalidToken => "invalid_csrf_token",
            AuthError::ProfileFetchFailed(_) => "profile_fetch_failed",
            AuthError::TooManyRequests { .. } => "too_many_requests",
            AuthError::Conflict(_) => "conflict",
            AuthError::Internal(_) => "internal_error",
        }
    }
}
