//! Process configuration read from the environment.

use std::{env, fmt::Display, str::FromStr};

use thiserror::Error;
use tracing::{debug, info};

const DEFAULT_DATABASE_URL: &str = "sqlite://recipes.db";
const DEFAULT_HOST: &str = "127.0.0.1";
const DEFAULT_PORT: u16 = 3001;
const DEFAULT_SEARCH_INDEX: &str = "posts";
const DEFAULT_FEED_PAGE_SIZE: usize = 25;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("{0} must be set")]
    Missing(&'static str),
    #[error("invalid {key}: {message}")]
    Invalid { key: &'static str, message: String },
}

/// Credentials for the hosted search service. Absent when search is not configured.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SearchConfig {
    pub app_id: String,
    pub api_key: String,
    pub index: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    pub database_url: String,
    pub host: String,
    pub port: u16,
    pub session_secret: String,
    pub search: Option<SearchConfig>,
    pub feed_page_size: usize,
}

impl Config {
    pub fn load() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Build a config from any key lookup; `load` uses the process environment.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let var = |key: &str| lookup(key).filter(|value| !value.trim().is_empty());

        let session_secret = var("SESSION_SECRET").ok_or(ConfigError::Missing("SESSION_SECRET"))?;

        let search = match (var("SEARCH_APP_ID"), var("SEARCH_API_KEY")) {
            (Some(app_id), Some(api_key)) => Some(SearchConfig {
                app_id,
                api_key,
                index: var("SEARCH_INDEX").unwrap_or_else(|| DEFAULT_SEARCH_INDEX.to_string()),
            }),
            (None, None) => {
                info!("SEARCH_APP_ID and SEARCH_API_KEY not set, search keys disabled");
                None
            }
            (Some(_), None) => return Err(ConfigError::Missing("SEARCH_API_KEY")),
            (None, Some(_)) => return Err(ConfigError::Missing("SEARCH_APP_ID")),
        };

        let feed_page_size: usize = parse_or("FEED_PAGE_SIZE", var("FEED_PAGE_SIZE"), DEFAULT_FEED_PAGE_SIZE)?;
        if feed_page_size == 0 {
            return Err(ConfigError::Invalid {
                key: "FEED_PAGE_SIZE",
                message: "must be at least 1".to_string(),
            });
        }

        Ok(Self {
            database_url: var("DATABASE_URL").unwrap_or_else(|| DEFAULT_DATABASE_URL.to_string()),
            host: var("HOST").unwrap_or_else(|| DEFAULT_HOST.to_string()),
            port: parse_or("PORT", var("PORT"), DEFAULT_PORT)?,
            session_secret,
            search,
            feed_page_size,
        })
    }

    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

fn parse_or<T>(key: &'static str, value: Option<String>, default: T) -> Result<T, ConfigError>
where
    T: FromStr + Display,
    T::Err: Display,
{
    match value {
        Some(raw) => raw.trim().parse().map_err(|e: T::Err| ConfigError::Invalid {
            key,
            message: e.to_string(),
        }),
        None => {
            debug!("{key} not set, using default: {default}");
            Ok(default)
        }
    }
}
