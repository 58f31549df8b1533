//! Failure responses.
//!
//! Every failure becomes `{"error": kind, "message": text}` with a fixed
//! message. Server-side causes are logged here and dropped.

use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use tracing::{debug, error};

use super::types::ErrorResponse;
use crate::{
    error::AuthError,
    session::{LoginFailure, RefreshFailure, SignupFailure},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ApiError {
    pub status: StatusCode,
    pub kind: &'static str,
    pub message: &'static str,
}

impl ApiError {
    #[must_use]
    pub const fn new(status: StatusCode, kind: &'static str, message: &'static str) -> Self {
        Self {
            status,
            kind,
            message,
        }
    }

    #[must_use]
    pub const fn bad_request(message: &'static str) -> Self {
        Self::new(StatusCode::BAD_REQUEST, "invalid_request", message)
    }

    #[must_use]
    pub const fn unauthorized() -> Self {
        Self::new(
            StatusCode::UNAUTHORIZED,
            "invalid_token",
            "Invalid or expired token",
        )
    }

    #[must_use]
    pub const fn inactive_account() -> Self {
        Self::new(
            StatusCode::FORBIDDEN,
            "inactive_account",
            "Account is not active",
        )
    }

    #[must_use]
    pub const fn internal() -> Self {
        Self::new(
            StatusCode::INTERNAL_SERVER_ERROR,
            "internal_error",
            "Internal server error",
        )
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = ErrorResponse {
            error: self.kind.to_string(),
            message: self.message.to_string(),
        };
        (self.status, Json(body)).into_response()
    }
}

impl From<AuthError> for ApiError {
    fn from(err: AuthError) -> Self {
        if err.is_server_fault() {
            error!("Request failed: {err}");
        } else {
            debug!("Request rejected: {err}");
        }
        Self::new(err.status(), err.kind(), err.public_message())
    }
}

impl From<RefreshFailure> for ApiError {
    fn from(failure: RefreshFailure) -> Self {
        let status = match failure {
            RefreshFailure::Internal => StatusCode::INTERNAL_SERVER_ERROR,
            _ => StatusCode::UNAUTHORIZED,
        };
        Self::new(status, failure.kind(), failure.message())
    }
}

impl From<SignupFailure> for ApiError {
    fn from(failure: SignupFailure) -> Self {
        let status = match failure {
            SignupFailure::AlreadyExists => StatusCode::CONFLICT,
            SignupFailure::Internal => StatusCode::INTERNAL_SERVER_ERROR,
        };
        Self::new(status, failure.kind(), failure.message())
    }
}

impl From<LoginFailure> for ApiError {
    fn from(failure: LoginFailure) -> Self {
        let status = match failure {
            LoginFailure::InvalidCredentials => StatusCode::UNAUTHORIZED,
            LoginFailure::InactiveAccount => StatusCode::FORBIDDEN,
            LoginFailure::Internal => StatusCode::INTERNAL_SERVER_ERROR,
        };
        Self::new(status, failure.kind(), failure.message())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn refresh_failures_are_unauthorized_except_internal() {
        for failure in [
            RefreshFailure::NoSession,
            RefreshFailure::InvalidSession,
            RefreshFailure::RevokedSession,
            RefreshFailure::ExpiredSession,
            RefreshFailure::InactiveAccount,
        ] {
            assert_eq!(ApiError::from(failure).status, StatusCode::UNAUTHORIZED);
        }
        assert_eq!(
            ApiError::from(RefreshFailure::Internal).status,
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[test]
    fn internal_auth_errors_hide_their_cause() {
        let api = ApiError::from(AuthError::Internal(anyhow::anyhow!("pool timed out")));
        assert_eq!(api.kind, "internal_error");
        assert!(!api.message.contains("pool"));
    }

    #[test]
    fn signup_conflict_is_409() {
        let api = ApiError::from(SignupFailure::AlreadyExists);
        assert_eq!(api.status, StatusCode::CONFLICT);
        assert_eq!(api.kind, "already_exists");
    }
}
