//! Bearer session authentication for routes.

use axum::{
    extract::FromRequestParts,
    http::{HeaderMap, header::AUTHORIZATION, request::Parts},
};
use utils::session::{Session, bearer_token, verify_session_token};

use crate::{AppState, error::ApiError};

/// The caller, taken from a verified `Authorization: Bearer` session token.
#[derive(Debug, Clone)]
pub struct AuthUser(pub Session);

impl AuthUser {
    pub fn from_headers(headers: &HeaderMap, state: &AppState) -> Result<Self, ApiError> {
        let header = headers.get(AUTHORIZATION).and_then(|v| v.to_str().ok());
        Self::from_token(bearer_token(header)?, state)
    }

    pub fn from_token(token: &str, state: &AppState) -> Result<Self, ApiError> {
        Ok(Self(verify_session_token(token, state.session_secret())?))
    }
}

impl FromRequestParts<AppState> for AuthUser {
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        Self::from_headers(&parts.headers, state)
    }
}
