//! Error taxonomy shared by the token service, signup manager and orchestrator.
//!
//! Callers only ever see [`AuthError::kind`] and a fixed message; the wrapped
//! causes of `Unavailable` and `Internal` are for logs.

use axum::http::StatusCode;
use thiserror::Error;

use crate::store::{StoreError, UniqueKey};

#[derive(Debug, Error)]
pub enum AuthError {
    #[error("invalid or expired token")]
    InvalidToken,
    #[error("an account with this email already exists")]
    UserExists,
    #[error("a signup attempt is already in progress for this email")]
    AttemptInProgress,
    #[error("signup attempt is no longer active")]
    AttemptNotActive,
    #[error("more than one live signup attempt for one email")]
    AmbiguousAttempt,
    #[error("credential store unavailable: {0:#}")]
    Unavailable(#[source] anyhow::Error),
    #[error("internal error: {0:#}")]
    Internal(#[source] anyhow::Error),
}

impl AuthError {
    /// Stable machine-readable kind.
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::InvalidToken => "invalid_token",
            Self::UserExists => "already_exists",
            Self::AttemptInProgress => "conflict",
            Self::AttemptNotActive => "attempt_not_active",
            Self::AmbiguousAttempt | Self::Internal(_) => "internal_error",
            Self::Unavailable(_) => "service_unavailable",
        }
    }

    /// Message safe to return to a client.
    #[must_use]
    pub const fn public_message(&self) -> &'static str {
        match self {
            Self::InvalidToken => "Invalid or expired token",
            Self::UserExists => "An account with this email already exists",
            Self::AttemptInProgress => "A signup is already in progress for this email",
            Self::AttemptNotActive => "Signup attempt is no longer active",
            Self::Unavailable(_) => "Service temporarily unavailable",
            Self::AmbiguousAttempt | Self::Internal(_) => "Internal server error",
        }
    }

    #[must_use]
    pub const fn status(&self) -> StatusCode {
        match self {
            Self::InvalidToken => StatusCode::UNAUTHORIZED,
            Self::UserExists | Self::AttemptInProgress => StatusCode::CONFLICT,
            Self::AttemptNotActive => StatusCode::GONE,
            Self::Unavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            Self::AmbiguousAttempt | Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// True for failures that should be logged at `error`.
    #[must_use]
    pub const fn is_server_fault(&self) -> bool {
        matches!(
            self,
            Self::Unavailable(_) | Self::Internal(_) | Self::AmbiguousAttempt
        )
    }
}

impl From<StoreError> for AuthError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::Conflict(UniqueKey::UserEmail) => Self::UserExists,
            StoreError::Conflict(UniqueKey::InProgressAttemptEmail) => Self::AttemptInProgress,
            StoreError::Conflict(key @ UniqueKey::RefreshTokenId) => {
                Self::Internal(anyhow::anyhow!("unexpected unique violation on {key:?}"))
            }
            StoreError::Backend(err) => Self::Unavailable(err),
        }
    }
}

pub type AuthResult<T> = Result<T, AuthError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn store_conflicts_map_to_domain_errors() {
        let err = AuthError::from(StoreError::Conflict(UniqueKey::UserEmail));
        assert!(matches!(err, AuthError::UserExists));
        assert_eq!(err.status(), StatusCode::CONFLICT);

        let err = AuthError::from(StoreError::Conflict(UniqueKey::InProgressAttemptEmail));
        assert!(matches!(err, AuthError::AttemptInProgress));
        assert_eq!(err.kind(), "conflict");

        let err = AuthError::from(StoreError::Conflict(UniqueKey::RefreshTokenId));
        assert_eq!(err.kind(), "internal_error");
    }

    #[test]
    fn backend_failures_do_not_leak_cause() {
        let err = AuthError::from(StoreError::Backend(anyhow::anyhow!(
            "connection refused to 10.0.0.5:5432"
        )));
        assert_eq!(err.kind(), "service_unavailable");
        assert_eq!(err.status(), StatusCode::SERVICE_UNAVAILABLE);
        assert!(!err.public_message().contains("10.0.0.5"));
        assert!(err.to_string().contains("10.0.0.5"));
        assert!(err.is_server_fault());
    }

    #[test]
    fn invalid_token_is_unauthorized() {
        let err = AuthError::InvalidToken;
        assert_eq!(err.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(err.kind(), "invalid_token");
        assert!(!err.is_server_fault());
    }
}
