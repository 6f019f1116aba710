//! Secured search keys scoped to the recipes a user may see.

use base64::{Engine, engine::general_purpose::STANDARD as BASE64};
use hmac::{Hmac, Mac};
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use thiserror::Error;
use ts_rs::TS;
use uuid::Uuid;

type HmacSha256 = Hmac<Sha256>;

/// Attribute the search index stores the recipe author under.
const USER_ATTRIBUTE: &str = "userId";

#[derive(Debug, Error)]
pub enum SearchKeyError {
    #[error("parent search key is empty")]
    EmptyParentKey,
}

/// Response body of the key endpoints.
#[derive(Debug, Clone, Serialize, Deserialize, TS)]
pub struct SearchKey {
    pub key: String,
}

/// Restrictions baked into a secured key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyRestrictions {
    pub filters: String,
    pub user_token: String,
}

impl KeyRestrictions {
    pub fn for_user(user_id: Uuid, filters: String) -> Self {
        Self {
            filters,
            user_token: user_id.to_string(),
        }
    }

    /// Encoded query string signed into the key.
    pub fn query_string(&self) -> String {
        format!(
            "filters={}&userToken={}",
            urlencoding::encode(&self.filters),
            urlencoding::encode(&self.user_token)
        )
    }
}

/// Filter expression matching recipes by `me` (if given) or anyone in `following`.
///
/// With nobody to match the filter names the nil id, which no user has.
pub fn user_filter(me: Option<Uuid>, following: &[Uuid]) -> String {
    let clauses: Vec<String> = me
        .into_iter()
        .chain(following.iter().copied())
        .map(|id| format!("{USER_ATTRIBUTE}:{id}"))
        .collect();

    if clauses.is_empty() {
        format!("{USER_ATTRIBUTE}:{}", Uuid::nil())
    } else {
        clauses.join(" OR ")
    }
}

/// Derive a key from `parent_key` that only works with `restrictions` applied.
pub fn generate_secured_api_key(
    parent_key: &str,
    restrictions: &KeyRestrictions,
) -> Result<String, SearchKeyError> {
    if parent_key.is_empty() {
        return Err(SearchKeyError::EmptyParentKey);
    }

    let query = restrictions.query_string();
    let mut mac = <HmacSha256 as Mac>::new_from_slice(parent_key.as_bytes())
        .map_err(|_| SearchKeyError::EmptyParentKey)?;
    mac.update(query.as_bytes());
    let digest = hex::encode(mac.finalize().into_bytes());

    Ok(BASE64.encode(format!("{digest}{query}")))
}
