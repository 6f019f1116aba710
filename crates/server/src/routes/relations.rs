//! Follow requests and follower lists.

use axum::{
    Json, Router,
    extract::{Path, State},
    response::Json as ResponseJson,
    routing::{delete, get, post},
};
use db::models::relation::{CreateRelation, Relation};
use utils::response::ApiResponse;
use uuid::Uuid;

use crate::{AppState, auth::AuthUser, error::ApiError};

pub async fn request_follow(
    State(state): State<AppState>,
    AuthUser(session): AuthUser,
    Json(payload): Json<CreateRelation>,
) -> Result<ResponseJson<ApiResponse<Relation>>, ApiError> {
    let relation = state
        .store()
        .request_follow(session.user_id, payload.to_user_id)
        .await?;
    Ok(ResponseJson(ApiResponse::success(relation)))
}

pub async fn confirm_follow(
    State(state): State<AppState>,
    AuthUser(session): AuthUser,
    Path(relation_id): Path<Uuid>,
) -> Result<ResponseJson<ApiResponse<Relation>>, ApiError> {
    let relation = state
        .store()
        .confirm_follow(session.user_id, relation_id)
        .await?;
    Ok(ResponseJson(ApiResponse::success(relation)))
}

pub async fn delete_relation(
    State(state): State<AppState>,
    AuthUser(session): AuthUser,
    Path(relation_id): Path<Uuid>,
) -> Result<ResponseJson<ApiResponse<()>>, ApiError> {
    state
        .store()
        .delete_relation(session.user_id, relation_id)
        .await?;
    Ok(ResponseJson(ApiResponse::success(())))
}

/// Unconfirmed requests addressed to the caller.
pub async fn pending_requests(
    State(state): State<AppState>,
    AuthUser(session): AuthUser,
) -> Result<ResponseJson<ApiResponse<Vec<Relation>>>, ApiError> {
    let relations = state.store().pending_requests(session.user_id).await?;
    Ok(ResponseJson(ApiResponse::success(relations)))
}

pub async fn followers(
    State(state): State<AppState>,
    AuthUser(session): AuthUser,
) -> Result<ResponseJson<ApiResponse<Vec<Relation>>>, ApiError> {
    let relations = state.store().followers(session.user_id).await?;
    Ok(ResponseJson(ApiResponse::success(relations)))
}

pub async fn following(
    State(state): State<AppState>,
    AuthUser(session): AuthUser,
) -> Result<ResponseJson<ApiResponse<Vec<Relation>>>, ApiError> {
    let relations = state.store().following(session.user_id).await?;
    Ok(ResponseJson(ApiResponse::success(relations)))
}

pub fn router(_state: &AppState) -> Router<AppState> {
    Router::new().nest(
        "/relations",
        Router::new()
            .route("/", post(request_follow))
            .route("/requests", get(pending_requests))
            .route("/followers", get(followers))
            .route("/following", get(following))
            .route("/{relation_id}", delete(delete_relation))
            .route("/{relation_id}/confirm", post(confirm_follow)),
    )
}
