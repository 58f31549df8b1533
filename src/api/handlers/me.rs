use axum::{
    Json,
    extract::Extension,
    http::{HeaderMap, StatusCode},
    response::IntoResponse,
};
use std::sync::Arc;

use super::{
    guards::require_access,
    state::AppState,
    types::{ErrorResponse, UserResponse},
};
use crate::session::UserSummary;

#[utoipa::path(
    get,
    path = "/v1/auth/me",
    params(
        ("Authorization" = String, Header, description = "Bearer access token")
    ),
    responses(
        (status = 200, description = "The authenticated user", body = UserResponse),
        (status = 401, description = "Missing or invalid access token", body = ErrorResponse),
        (status = 403, description = "Account is not active", body = ErrorResponse)
    ),
    tag = "auth"
)]
pub async fn me(headers: HeaderMap, state: Extension<Arc<AppState>>) -> impl IntoResponse {
    match require_access(&headers, &state).await {
        Ok(principal) => {
            let user = UserResponse::from(UserSummary::from(&principal.user));
            (StatusCode::OK, Json(user)).into_response()
        }
        Err(err) => err.into_response(),
    }
}
