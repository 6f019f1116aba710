//! Session tokens: HS256 JWTs whose subject is the user's profile id.

use chrono::{Duration, Utc};
use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, Header, Validation, decode, encode};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("missing bearer token")]
    MissingToken,
    #[error("invalid session token: {0}")]
    InvalidToken(#[from] jsonwebtoken::errors::Error),
    #[error("session subject is not a user id: {0}")]
    InvalidSubject(String),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionClaims {
    pub sub: String,
    pub exp: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub picture: Option<String>,
}

/// The authenticated user behind a verified session token.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Session {
    pub user_id: Uuid,
    pub email: Option<String>,
    pub name: Option<String>,
    pub picture: Option<String>,
}

/// Extract the token from an `Authorization: Bearer <token>` header value.
pub fn bearer_token(header: Option<&str>) -> Result<&str, SessionError> {
    header
        .and_then(|value| value.strip_prefix("Bearer "))
        .map(str::trim)
        .filter(|token| !token.is_empty())
        .ok_or(SessionError::MissingToken)
}

pub fn verify_session_token(token: &str, secret: &[u8]) -> Result<Session, SessionError> {
    let data = decode::<SessionClaims>(
        token,
        &DecodingKey::from_secret(secret),
        &Validation::new(Algorithm::HS256),
    )?;
    let claims = data.claims;
    let user_id =
        Uuid::parse_str(&claims.sub).map_err(|_| SessionError::InvalidSubject(claims.sub.clone()))?;

    Ok(Session {
        user_id,
        email: claims.email,
        name: claims.name,
        picture: claims.picture,
    })
}

/// Sign a token for `user_id` valid for `ttl`.
pub fn issue_session_token(
    user_id: Uuid,
    email: Option<String>,
    ttl: Duration,
    secret: &[u8],
) -> Result<String, SessionError> {
    let claims = SessionClaims {
        sub: user_id.to_string(),
        exp: (Utc::now() + ttl).timestamp(),
        email,
        name: None,
        picture: None,
    };
    Ok(encode(
        &Header::new(Algorithm::HS256),
        &claims,
        &EncodingKey::from_secret(secret),
    )?)
}
