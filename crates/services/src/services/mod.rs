pub mod config;
pub mod live_query;
pub mod pagination;
pub mod recipe_feed;
pub mod recipe_store;
pub mod search;
pub mod search_key;
