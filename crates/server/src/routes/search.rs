//! Secured search key issuance.
//!
//! Keys are derived from the parent search key and restricted to the caller's
//! own recipes plus those of confirmed follows (`/search/query`), or to the
//! follows alone (`/search/following`).

use axum::{Router, extract::State, response::Json as ResponseJson, routing::get};
use services::services::search_key::{
    KeyRestrictions, SearchKey, generate_secured_api_key, user_filter,
};
use tracing::debug;
use utils::response::ApiResponse;
use uuid::Uuid;

use crate::{AppState, auth::AuthUser, error::ApiError};

async fn issue_key(state: &AppState, user_id: Uuid, include_self: bool) -> Result<SearchKey, ApiError> {
    let search = state.config().search.as_ref().ok_or(ApiError::SearchDisabled)?;

    let following = state.store().following_ids(user_id).await?;
    let filters = user_filter(include_self.then_some(user_id), &following);
    debug!(user_id = %user_id, following = following.len(), "Issuing search key");

    let restrictions = KeyRestrictions::for_user(user_id, filters);
    let key = generate_secured_api_key(&search.api_key, &restrictions)?;
    Ok(SearchKey { key })
}

pub async fn query_key(
    State(state): State<AppState>,
    AuthUser(session): AuthUser,
) -> Result<ResponseJson<ApiResponse<SearchKey>>, ApiError> {
    let key = issue_key(&state, session.user_id, true).await?;
    Ok(ResponseJson(ApiResponse::success(key)))
}

pub async fn following_key(
    State(state): State<AppState>,
    AuthUser(session): AuthUser,
) -> Result<ResponseJson<ApiResponse<SearchKey>>, ApiError> {
    let key = issue_key(&state, session.user_id, false).await?;
    Ok(ResponseJson(ApiResponse::success(key)))
}

pub fn router(_state: &AppState) -> Router<AppState> {
    Router::new()
        .route("/search/query", get(query_key))
        .route("/search/following", get(following_key))
}
