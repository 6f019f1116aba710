//! User profile routes.

use axum::{
    Router,
    extract::{Path, State},
    response::Json as ResponseJson,
    routing::{get, post},
};
use db::models::user_profile::{UpsertUserProfile, UserProfile};
use utils::response::ApiResponse;
use uuid::Uuid;

use crate::{AppState, auth::AuthUser, error::ApiError};

/// Create or refresh the caller's profile from their session claims.
pub async fn upsert_me(
    State(state): State<AppState>,
    AuthUser(session): AuthUser,
) -> Result<ResponseJson<ApiResponse<UserProfile>>, ApiError> {
    let data = UpsertUserProfile {
        display_name: session.name,
        email: session.email,
        photo_url: session.picture,
    };
    let profile = state.store().upsert_user(session.user_id, &data).await?;
    Ok(ResponseJson(ApiResponse::success(profile)))
}

pub async fn get_user(
    State(state): State<AppState>,
    _user: AuthUser,
    Path(user_id): Path<Uuid>,
) -> Result<ResponseJson<ApiResponse<UserProfile>>, ApiError> {
    let profile = state.store().find_user(user_id).await?;
    Ok(ResponseJson(ApiResponse::success(profile)))
}

pub fn router(_state: &AppState) -> Router<AppState> {
    Router::new()
        .route("/users/me", post(upsert_me))
        .route("/users/{user_id}", get(get_user))
}
