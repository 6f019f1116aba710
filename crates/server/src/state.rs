use std::sync::Arc;

use db::DBService;
use services::services::{config::Config, recipe_feed::RecipeFeed, recipe_store::RecipeStore};

/// Shared state handed to every route.
#[derive(Clone)]
pub struct AppState {
    config: Arc<Config>,
    store: RecipeStore,
    feed: Arc<RecipeFeed>,
}

impl AppState {
    pub fn new(config: Config, db: DBService) -> Self {
        let store = RecipeStore::new(db);
        let feed = Arc::new(store.feed());
        Self {
            config: Arc::new(config),
            store,
            feed,
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn store(&self) -> &RecipeStore {
        &self.store
    }

    pub fn feed(&self) -> Arc<RecipeFeed> {
        Arc::clone(&self.feed)
    }

    pub fn session_secret(&self) -> &[u8] {
        self.config.session_secret.as_bytes()
    }
}
