//! Bearer-token guards.
//!
//! Handlers call a guard first and receive the resolved user or attempt as a
//! plain value, which they then pass along explicitly.

use axum::http::HeaderMap;
use tracing::{debug, error};

use super::{error::ApiError, state::AppState, utils::extract_bearer_token};
use crate::{
    error::AuthError,
    store::{SignupAttempt, User},
};

/// Authenticated user resolved from an access token.
#[derive(Clone, Debug)]
pub struct Principal {
    pub user: User,
}

/// Live signup attempt resolved from a signup token.
#[derive(Clone, Debug)]
pub struct SignupPrincipal {
    pub attempt: SignupAttempt,
}

/// Resolve `Authorization: Bearer <access token>` to an active user.
///
/// # Errors
/// 401 for a missing or invalid token, 403 for a non-active user.
pub async fn require_access(headers: &HeaderMap, state: &AppState) -> Result<Principal, ApiError> {
    let token = extract_bearer_token(headers).ok_or_else(ApiError::unauthorized)?;
    let sessions = state.sessions();
    let claims = sessions.tokens().verify_access_token(&token)?;

    let user = match sessions.store().find_user_by_id(claims.sub).await {
        Ok(Some(user)) => user,
        Ok(None) => {
            debug!("Access token for unknown user {}", claims.sub);
            return Err(ApiError::unauthorized());
        }
        Err(err) => {
            error!("Failed to load user {}: {err}", claims.sub);
            return Err(AuthError::from(err).into());
        }
    };
    if !user.is_active() {
        return Err(ApiError::inactive_account());
    }
    Ok(Principal { user })
}

/// Resolve `Authorization: Bearer <signup token>` to a live signup attempt.
///
/// # Errors
/// 401 for a missing or invalid token, 410 when the attempt is no longer live.
pub async fn require_signup(
    headers: &HeaderMap,
    state: &AppState,
) -> Result<SignupPrincipal, ApiError> {
    let token = extract_bearer_token(headers).ok_or_else(ApiError::unauthorized)?;
    let sessions = state.sessions();
    let claims = sessions.tokens().verify_signup_token(&token)?;

    let attempt = sessions
        .signups()
        .find_live(claims.attempt_id)
        .await?
        .ok_or(AuthError::AttemptNotActive)?;
    if attempt.email != claims.email {
        debug!("Signup token email does not match attempt {}", attempt.id);
        return Err(ApiError::unauthorized());
    }
    Ok(SignupPrincipal { attempt })
}
