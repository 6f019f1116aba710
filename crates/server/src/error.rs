use axum::{
    http::StatusCode,
    response::{IntoResponse, Json as ResponseJson, Response},
};
use services::services::{recipe_store::RecipeStoreError, search_key::SearchKeyError};
use thiserror::Error;
use tracing::error;
use utils::{response::ApiResponse, session::SessionError};

#[derive(Debug, Error)]
pub enum ApiError {
    #[error(transparent)]
    RecipeStore(#[from] RecipeStoreError),
    #[error(transparent)]
    Session(#[from] SessionError),
    #[error(transparent)]
    SearchKey(#[from] SearchKeyError),
    #[error("search is not configured")]
    SearchDisabled,
    #[error("bad request: {0}")]
    BadRequest(String),
}

impl ApiError {
    fn status(&self) -> StatusCode {
        match self {
            ApiError::RecipeStore(err) => match err {
                RecipeStoreError::RecipeNotFound
                | RecipeStoreError::RelationNotFound
                | RecipeStoreError::UserNotFound => StatusCode::NOT_FOUND,
                RecipeStoreError::Forbidden => StatusCode::FORBIDDEN,
                RecipeStoreError::SelfFollow => StatusCode::BAD_REQUEST,
                RecipeStoreError::Database(_) => StatusCode::INTERNAL_SERVER_ERROR,
            },
            ApiError::Session(_) => StatusCode::UNAUTHORIZED,
            ApiError::SearchKey(_) => StatusCode::INTERNAL_SERVER_ERROR,
            ApiError::SearchDisabled => StatusCode::SERVICE_UNAVAILABLE,
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        let message = if status == StatusCode::INTERNAL_SERVER_ERROR {
            error!(error = %self, "Request failed");
            "Internal server error".to_string()
        } else {
            self.to_string()
        };

        (status, ResponseJson(ApiResponse::<()>::error(&message))).into_response()
    }
}
