//! Hosted search client.
//!
//! A [`SearchClient`] is built once per session and shared by reference. It
//! never fetches a key on its own: callers obtain one through
//! [`SearchClient::refresh_credentials`] before searching.

use std::time::Duration;

use async_trait::async_trait;
use backon::{ExponentialBuilder, Retryable};
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize, de::DeserializeOwned};
use thiserror::Error;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use super::search_key::SearchKey;

#[derive(Debug, Clone, Error)]
pub enum SearchError {
    #[error("no search credentials, call refresh_credentials first")]
    MissingCredentials,
    #[error("search credentials rejected")]
    InvalidCredentials,
    #[error("network error: {0}")]
    Transport(String),
    #[error("timeout")]
    Timeout,
    #[error("http {status}: {body}")]
    Http { status: u16, body: String },
    #[error("json error: {0}")]
    Serde(String),
}

impl SearchError {
    /// Returns true if the error is transient and should be retried.
    pub fn should_retry(&self) -> bool {
        match self {
            Self::Transport(_) | Self::Timeout => true,
            Self::Http { status, .. } => *status == 429 || (500..=599).contains(status),
            _ => false,
        }
    }
}

/// Where the client gets its scoped search key from.
#[async_trait]
pub trait SearchKeySource: Send + Sync {
    async fn fetch_key(&self) -> Result<String, SearchError>;
}

/// Which key endpoint of the recipe server to ask.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyScope {
    /// The caller's recipes and those of everyone they follow.
    All,
    /// Only recipes of followed users.
    Following,
}

impl KeyScope {
    fn path(self) -> &'static str {
        match self {
            KeyScope::All => "/api/search/query",
            KeyScope::Following => "/api/search/following",
        }
    }
}

/// Fetches secured keys from the recipe server with a session token.
#[derive(Debug, Clone)]
pub struct KeyEndpoint {
    http: Client,
    url: String,
    session_token: String,
}

impl KeyEndpoint {
    pub fn new(server_url: &str, scope: KeyScope, session_token: String) -> Self {
        Self {
            http: Client::new(),
            url: format!("{}{}", server_url.trim_end_matches('/'), scope.path()),
            session_token,
        }
    }
}

#[async_trait]
impl SearchKeySource for KeyEndpoint {
    async fn fetch_key(&self) -> Result<String, SearchError> {
        let res = self
            .http
            .get(&self.url)
            .bearer_auth(&self.session_token)
            .send()
            .await
            .map_err(map_reqwest_error)?;

        match res.status() {
            s if s.is_success() => res
                .json::<SearchKey>()
                .await
                .map(|body| body.key)
                .map_err(|e| SearchError::Serde(e.to_string())),
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => Err(SearchError::InvalidCredentials),
            s => {
                let status = s.as_u16();
                let body = res.text().await.unwrap_or_default();
                Err(SearchError::Http { status, body })
            }
        }
    }
}

#[derive(Debug, Serialize)]
struct QueryRequest {
    params: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SearchResponse<T> {
    pub hits: Vec<T>,
    #[serde(default)]
    pub nb_hits: usize,
    #[serde(default)]
    pub page: usize,
    #[serde(default)]
    pub nb_pages: usize,
}

/// Encoded search parameters for a text query.
pub fn search_params(query: &str, page: usize, hits_per_page: usize) -> String {
    format!(
        "query={}&page={page}&hitsPerPage={hits_per_page}",
        urlencoding::encode(query)
    )
}

pub struct SearchClient<K: SearchKeySource> {
    http: Client,
    app_id: String,
    index: String,
    base_url: String,
    keys: K,
    api_key: RwLock<Option<String>>,
}

impl<K: SearchKeySource> SearchClient<K> {
    const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);
    pub const DEFAULT_HITS_PER_PAGE: usize = 20;

    pub fn new(app_id: String, index: String, keys: K) -> Result<Self, SearchError> {
        let base_url = format!("https://{app_id}-dsn.algolia.net");
        Self::with_base_url(app_id, index, keys, base_url)
    }

    pub fn with_base_url(
        app_id: String,
        index: String,
        keys: K,
        base_url: String,
    ) -> Result<Self, SearchError> {
        let http = Client::builder()
            .timeout(Self::REQUEST_TIMEOUT)
            .user_agent(concat!("recipe-feed/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| SearchError::Transport(e.to_string()))?;

        Ok(Self {
            http,
            app_id,
            index,
            base_url: base_url.trim_end_matches('/').to_string(),
            keys,
            api_key: RwLock::new(None),
        })
    }

    pub fn index(&self) -> &str {
        &self.index
    }

    pub async fn has_credentials(&self) -> bool {
        self.api_key.read().await.is_some()
    }

    /// Fetch a fresh scoped key and keep it for subsequent searches.
    pub async fn refresh_credentials(&self) -> Result<(), SearchError> {
        let key = self.keys.fetch_key().await?;
        *self.api_key.write().await = Some(key);
        info!(index = %self.index, "Search credentials refreshed");
        Ok(())
    }

    pub async fn clear_credentials(&self) {
        *self.api_key.write().await = None;
    }

    pub async fn search<T: DeserializeOwned>(
        &self,
        query: &str,
        page: usize,
    ) -> Result<SearchResponse<T>, SearchError> {
        let api_key = self
            .api_key
            .read()
            .await
            .clone()
            .ok_or(SearchError::MissingCredentials)?;
        let request = QueryRequest {
            params: search_params(query, page, Self::DEFAULT_HITS_PER_PAGE),
        };

        let result = (|| async { self.send_query(&api_key, &request).await })
            .retry(
                &ExponentialBuilder::default()
                    .with_min_delay(Duration::from_millis(250))
                    .with_max_delay(Duration::from_secs(5))
                    .with_max_times(3)
                    .with_jitter(),
            )
            .when(|e: &SearchError| e.should_retry())
            .notify(|e, dur| {
                warn!(
                    "Search request failed, retrying after {:.2}s: {}",
                    dur.as_secs_f64(),
                    e
                )
            })
            .await;

        if let Err(SearchError::InvalidCredentials) = &result {
            self.clear_credentials().await;
        }
        result
    }

    async fn send_query<T: DeserializeOwned>(
        &self,
        api_key: &str,
        request: &QueryRequest,
    ) -> Result<SearchResponse<T>, SearchError> {
        let url = format!("{}/1/indexes/{}/query", self.base_url, self.index);
        debug!(index = %self.index, params = %request.params, "Sending search query");

        let res = self
            .http
            .post(url)
            .header("X-Algolia-Application-Id", &self.app_id)
            .header("X-Algolia-API-Key", api_key)
            .json(request)
            .send()
            .await
            .map_err(map_reqwest_error)?;

        match res.status() {
            s if s.is_success() => res
                .json::<SearchResponse<T>>()
                .await
                .map_err(|e| SearchError::Serde(e.to_string())),
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => Err(SearchError::InvalidCredentials),
            s => {
                let status = s.as_u16();
                let body = res.text().await.unwrap_or_default();
                Err(SearchError::Http { status, body })
            }
        }
    }
}

fn map_reqwest_error(e: reqwest::Error) -> SearchError {
    if e.is_timeout() {
        SearchError::Timeout
    } else {
        SearchError::Transport(e.to_string())
    }
}
