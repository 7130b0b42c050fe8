//! User listing and profile handlers

use crate::auth::{ApiResponse, Principal, UserListQuery};
use crate::error::AppError;
use crate::state::AppState;
use axum::{
    extract::{Query, State},
    response::IntoResponse,
    Extension, Json,
};
use std::sync::Arc;

/// List `USER` accounts (admin only)
///
/// # Query Parameters
///
/// * `page` - Page number, default 1
/// * `limit` - Page size, default 10, at most 100
/// * `search` - Prefix of the first or last name
/// * `status` - Account status, default `ACTIVE`
///
/// # Responses
///
/// * `200 OK` - `{ records, metaData }`
/// * `400 Bad Request` - Unknown status
/// * `403 Forbidden` - Missing token or caller is not an admin
#[utoipa::path(
    get,
    path = "/api/v1/user",
    tag = "user",
    params(UserListQuery),
    responses(
        (status = 200, description = "Users retrieved"),
        (status = 400, description = "Invalid query", body = crate::error::ApiError),
        (status = 403, description = "Access denied", body = crate::error::ApiError),
    ),
    security(
        ("bearer_auth" = [])
    )
)]
pub async fn list_users(
    State(state): State<Arc<AppState>>,
    Query(query): Query<UserListQuery>,
) -> Result<impl IntoResponse, AppError> {
    let page = state.accounts.list_users(&query).await?;
    Ok(Json(ApiResponse::data(page)))
}

/// Public profile of the authenticated user
#[utoipa::path(
    get,
    path = "/api/v1/user/me",
    tag = "user",
    responses(
        (status = 200, description = "Profile retrieved", body = broiler_core::UserPublic),
        (status = 403, description = "Missing or invalid token", body = crate::error::ApiError),
        (status = 404, description = "User not found", body = crate::error::ApiError),
    ),
    security(
        ("bearer_auth" = [])
    )
)]
pub async fn me(
    State(state): State<Arc<AppState>>,
    Extension(principal): Extension<Principal>,
) -> Result<impl IntoResponse, AppError> {
    let profile = state.accounts.profile(principal.id).await?;
    Ok(Json(ApiResponse::data(profile)))
}
