//! Login, refresh and logout endpoints.
//!
//! The refresh token travels only in the `tessera_refresh` cookie. Access
//! tokens are returned in the body and presented as bearer tokens.

use axum::{
    Json,
    extract::Extension,
    http::{HeaderMap, StatusCode, header::SET_COOKIE},
    response::IntoResponse,
};
use std::sync::Arc;
use tracing::{error, info};

use super::{
    error::ApiError,
    guards::require_access,
    state::AppState,
    types::{ErrorResponse, LoginRequest, LogoutAllResponse, SessionResponse},
    utils::{clear_refresh_cookie, extract_refresh_token, refresh_cookie, valid_email},
};
use crate::{
    session::{RefreshFailure, SessionGrant},
    signup::normalize_email,
};

/// Response headers for a grant: sets the refresh cookie when the grant
/// carries a new refresh token.
pub(super) fn grant_headers(state: &AppState, grant: &SessionGrant) -> HeaderMap {
    let mut headers = HeaderMap::new();
    if let Some(material) = &grant.refresh {
        match refresh_cookie(state, &material.token) {
            Ok(cookie) => {
                headers.insert(SET_COOKIE, cookie);
            }
            Err(err) => error!("Failed to build refresh cookie: {err}"),
        }
    }
    headers
}

fn clearing_headers(state: &AppState) -> HeaderMap {
    let mut headers = HeaderMap::new();
    if let Ok(cookie) = clear_refresh_cookie(state) {
        headers.insert(SET_COOKIE, cookie);
    }
    headers
}

#[utoipa::path(
    post,
    path = "/v1/auth/login",
    request_body = LoginRequest,
    responses(
        (status = 200, description = "Session opened, refresh cookie set", body = SessionResponse),
        (status = 400, description = "Validation error", body = ErrorResponse),
        (status = 401, description = "Invalid email or password", body = ErrorResponse),
        (status = 403, description = "Account is not active", body = ErrorResponse)
    ),
    tag = "auth"
)]
pub async fn login(
    state: Extension<Arc<AppState>>,
    Json(request): Json<LoginRequest>,
) -> impl IntoResponse {
    let email = normalize_email(&request.email);
    if !valid_email(&email) || request.password.is_empty() {
        return ApiError::bad_request("Email and password are required").into_response();
    }

    match state.sessions().login(&email, &request.password).await {
        Ok(grant) => {
            info!("User {} logged in", grant.user.id);
            let headers = grant_headers(&state, &grant);
            (StatusCode::OK, headers, Json(SessionResponse::from(grant))).into_response()
        }
        Err(failure) => ApiError::from(failure).into_response(),
    }
}

#[utoipa::path(
    post,
    path = "/v1/auth/refresh",
    responses(
        (status = 200, description = "New access token; refresh cookie replaced on rotation", body = SessionResponse),
        (status = 401, description = "No, invalid, revoked or expired session", body = ErrorResponse),
        (status = 500, description = "Internal error", body = ErrorResponse)
    ),
    tag = "auth"
)]
pub async fn refresh(headers: HeaderMap, state: Extension<Arc<AppState>>) -> impl IntoResponse {
    let token = extract_refresh_token(&headers);
    match state.sessions().refresh_session(token.as_deref()).await {
        Ok(grant) => {
            let headers = grant_headers(&state, &grant);
            (StatusCode::OK, headers, Json(SessionResponse::from(grant))).into_response()
        }
        Err(RefreshFailure::Internal) => ApiError::from(RefreshFailure::Internal).into_response(),
        Err(failure) => {
            // Drop the stored credential on any auth failure.
            (clearing_headers(&state), ApiError::from(failure)).into_response()
        }
    }
}

#[utoipa::path(
    post,
    path = "/v1/auth/logout",
    responses(
        (status = 204, description = "Refresh token revoked and cookie cleared")
    ),
    tag = "auth"
)]
pub async fn logout(headers: HeaderMap, state: Extension<Arc<AppState>>) -> impl IntoResponse {
    let token = extract_refresh_token(&headers);
    if let Err(err) = state.sessions().logout(token.as_deref()).await {
        error!("Failed to revoke refresh token on logout: {err}");
    }

    // Always clear the cookie, even if the token was unknown.
    (StatusCode::NO_CONTENT, clearing_headers(&state)).into_response()
}

#[utoipa::path(
    post,
    path = "/v1/auth/logout-all",
    params(
        ("Authorization" = String, Header, description = "Bearer access token")
    ),
    responses(
        (status = 200, description = "Every refresh token of the user revoked", body = LogoutAllResponse),
        (status = 401, description = "Missing or invalid access token", body = ErrorResponse)
    ),
    tag = "auth"
)]
pub async fn logout_all(headers: HeaderMap, state: Extension<Arc<AppState>>) -> impl IntoResponse {
    let principal = match require_access(&headers, &state).await {
        Ok(principal) => principal,
        Err(err) => return err.into_response(),
    };

    match state.sessions().logout_all(principal.user.id).await {
        Ok(revoked) => (
            StatusCode::OK,
            clearing_headers(&state),
            Json(LogoutAllResponse { revoked }),
        )
            .into_response(),
        Err(err) => ApiError::from(err).into_response(),
    }
}
