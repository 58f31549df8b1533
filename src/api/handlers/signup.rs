//! Signup endpoints.
//!
//! Flow Overview:
//! 1) `POST /v1/auth/signup` starts an attempt, or resumes the live one, and
//!    returns a signup token bound to it.
//! 2) `POST /v1/auth/signup/step` records step progress under that token.
//! 3) `POST /v1/auth/signup/complete` creates the account and opens a session.

use axum::{
    Json,
    extract::Extension,
    http::{HeaderMap, StatusCode},
    response::IntoResponse,
};
use std::sync::Arc;
use tracing::info;

use super::{
    error::ApiError,
    guards::require_signup,
    session::grant_headers,
    state::AppState,
    types::{
        ErrorResponse, SessionResponse, SignupRequest, SignupResponse, SignupStepRequest,
        SignupStepResponse,
    },
    utils::{valid_email, valid_name, valid_password},
};
use crate::{session, signup::{normalize_email, steps}};

#[utoipa::path(
    post,
    path = "/v1/auth/signup",
    request_body = SignupRequest,
    responses(
        (status = 201, description = "Signup attempt created", body = SignupResponse),
        (status = 200, description = "Live signup attempt resumed", body = SignupResponse),
        (status = 400, description = "Validation error", body = ErrorResponse),
        (status = 409, description = "An account with this email already exists", body = ErrorResponse),
        (status = 500, description = "Internal error", body = ErrorResponse)
    ),
    tag = "auth"
)]
pub async fn signup(
    state: Extension<Arc<AppState>>,
    Json(request): Json<SignupRequest>,
) -> impl IntoResponse {
    let email = normalize_email(&request.email);
    if !valid_email(&email) {
        return ApiError::bad_request("Invalid email").into_response();
    }
    if !valid_name(&request.first_name) || !valid_name(&request.last_name) {
        return ApiError::bad_request("First and last name are required").into_response();
    }
    if !valid_password(&request.password) {
        return ApiError::bad_request("Password must be at least 8 characters").into_response();
    }

    let request = session::SignupRequest {
        email,
        first_name: request.first_name.trim().to_string(),
        last_name: request.last_name.trim().to_string(),
        password: request.password,
    };
    match state.sessions().signup(request).await {
        Ok(started) => {
            let status = if started.resumed_session {
                StatusCode::OK
            } else {
                StatusCode::CREATED
            };
            (status, Json(SignupResponse::from(started))).into_response()
        }
        Err(failure) => ApiError::from(failure).into_response(),
    }
}

#[utoipa::path(
    post,
    path = "/v1/auth/signup/step",
    request_body = SignupStepRequest,
    params(
        ("Authorization" = String, Header, description = "Bearer signup token")
    ),
    responses(
        (status = 200, description = "Step recorded; new signup token issued", body = SignupStepResponse),
        (status = 400, description = "Validation error", body = ErrorResponse),
        (status = 401, description = "Missing or invalid signup token", body = ErrorResponse),
        (status = 410, description = "Signup attempt is no longer active", body = ErrorResponse)
    ),
    tag = "auth"
)]
pub async fn signup_step(
    headers: HeaderMap,
    state: Extension<Arc<AppState>>,
    Json(request): Json<SignupStepRequest>,
) -> impl IntoResponse {
    let principal = match require_signup(&headers, &state).await {
        Ok(principal) => principal,
        Err(err) => return err.into_response(),
    };
    let completed_ok = request
        .completed_step
        .as_deref()
        .is_none_or(steps::is_valid_tag);
    if !steps::is_valid_tag(&request.next_step) || !completed_ok {
        return ApiError::bad_request("Invalid step").into_response();
    }

    match state
        .sessions()
        .advance_signup(
            principal.attempt.id,
            &request.next_step,
            request.completed_step.as_deref(),
        )
        .await
    {
        Ok(stepped) => (StatusCode::OK, Json(SignupStepResponse::from(stepped))).into_response(),
        Err(err) => ApiError::from(err).into_response(),
    }
}

#[utoipa::path(
    post,
    path = "/v1/auth/signup/complete",
    params(
        ("Authorization" = String, Header, description = "Bearer signup token")
    ),
    responses(
        (status = 201, description = "Account created, session opened", body = SessionResponse),
        (status = 401, description = "Missing or invalid signup token", body = ErrorResponse),
        (status = 409, description = "An account with this email already exists", body = ErrorResponse),
        (status = 410, description = "Signup attempt is no longer active", body = ErrorResponse)
    ),
    tag = "auth"
)]
pub async fn signup_complete(
    headers: HeaderMap,
    state: Extension<Arc<AppState>>,
) -> impl IntoResponse {
    let principal = match require_signup(&headers, &state).await {
        Ok(principal) => principal,
        Err(err) => return err.into_response(),
    };

    match state.sessions().complete_signup(principal.attempt.id).await {
        Ok(grant) => {
            info!(
                "Signup attempt {} completed as user {}",
                principal.attempt.id, grant.user.id
            );
            let headers = grant_headers(&state, &grant);
            (StatusCode::CREATED, headers, Json(SessionResponse::from(grant))).into_response()
        }
        Err(err) => ApiError::from(err).into_response(),
    }
}
