//! Live recipe feed backed by the local SQLite store.
//!
//! A subscription runs the windowed query once, then re-runs it whenever the
//! store announces a change to one of the queried authors' recipes and sends
//! the difference against the window it last reported.

use std::collections::{HashMap, HashSet};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use db::{DBService, models::recipe::Recipe};
use tokio::sync::broadcast::{self, error::RecvError};
use tracing::{debug, warn};
use uuid::Uuid;

use super::{
    live_query::{BatchSender, LiveSource, Subscription},
    pagination::{ChangeBatch, ChangeEvent, LiveRecord, SubscriptionError},
    recipe_store::StoreChange,
};

const BATCH_CHANNEL_CAPACITY: usize = 16;

impl LiveRecord for Recipe {
    type Id = Uuid;
    type SortKey = DateTime<Utc>;

    fn id(&self) -> Uuid {
        self.id
    }

    fn sort_key(&self) -> DateTime<Utc> {
        self.updated_at
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecipeQuery {
    ByAuthor(Uuid),
    ByAuthors(Vec<Uuid>),
}

impl RecipeQuery {
    pub fn authors(&self) -> &[Uuid] {
        match self {
            RecipeQuery::ByAuthor(user_id) => std::slice::from_ref(user_id),
            RecipeQuery::ByAuthors(user_ids) => user_ids,
        }
    }
}

#[derive(Clone)]
pub struct RecipeFeed {
    db: DBService,
    changes: broadcast::Sender<StoreChange>,
}

struct Window {
    recipes: Vec<Recipe>,
    total: usize,
}

impl RecipeFeed {
    pub fn new(db: DBService, changes: broadcast::Sender<StoreChange>) -> Self {
        Self { db, changes }
    }

    /// Window and total are read in one transaction so `total` counts the same rows the window came from.
    async fn load_window(&self, authors: &[Uuid], limit: usize) -> Result<Window, sqlx::Error> {
        let mut tx = self.db.pool.begin().await?;
        let recipes = Recipe::find_window_by_users(&mut *tx, authors, limit).await?;
        let total = Recipe::count_by_users(&mut *tx, authors).await?;
        tx.commit().await?;
        Ok(Window {
            recipes,
            total: usize::try_from(total).unwrap_or(0),
        })
    }

    async fn follow_changes(
        self,
        authors: HashSet<Uuid>,
        limit: usize,
        initial: Window,
        mut notifications: broadcast::Receiver<StoreChange>,
        sender: BatchSender<Recipe>,
    ) {
        let author_list: Vec<Uuid> = authors.iter().copied().collect();
        let mut resident: HashMap<Uuid, Recipe> =
            initial.recipes.into_iter().map(|r| (r.id, r)).collect();
        let mut total = initial.total;

        loop {
            let refresh = tokio::select! {
                _ = sender.cancelled() => break,
                notification = notifications.recv() => match notification {
                    Ok(StoreChange::Recipe { user_id, .. }) => authors.contains(&user_id),
                    Ok(_) => false,
                    Err(RecvError::Lagged(skipped)) => {
                        warn!(skipped, "Recipe feed lagged behind store changes, re-querying");
                        true
                    }
                    Err(RecvError::Closed) => {
                        sender
                            .fail(SubscriptionError::Terminated("store change feed closed".to_string()))
                            .await;
                        break;
                    }
                },
            };
            if !refresh {
                continue;
            }

            let window = match self.load_window(&author_list, limit).await {
                Ok(window) => window,
                Err(e) => {
                    warn!(error = %e, limit, "Failed to refresh recipe window");
                    sender
                        .fail(SubscriptionError::Terminated(e.to_string()))
                        .await;
                    break;
                }
            };

            let changes = diff_window(&resident, &window.recipes);
            if changes.is_empty() && window.total == total {
                continue;
            }

            let batch = ChangeBatch::new(changes, window.recipes.len()).with_total(window.total);
            resident = window.recipes.into_iter().map(|r| (r.id, r)).collect();
            total = window.total;
            if !sender.send(batch).await {
                break;
            }
        }

        debug!(authors = authors.len(), limit, "Recipe feed subscription finished");
    }
}

#[async_trait]
impl LiveSource for RecipeFeed {
    type Record = Recipe;
    type Query = RecipeQuery;

    async fn subscribe(
        &self,
        query: &RecipeQuery,
        limit: usize,
    ) -> Result<Subscription<Recipe>, SubscriptionError> {
        // Listen before reading so no write between the query and the listener is missed.
        let notifications = self.changes.subscribe();
        let window = self
            .load_window(query.authors(), limit)
            .await
            .map_err(|e| SubscriptionError::Establish(e.to_string()))?;

        let (sender, subscription) = Subscription::channel(BATCH_CHANNEL_CAPACITY);
        let first = ChangeBatch::new(
            window.recipes.iter().cloned().map(ChangeEvent::Added).collect(),
            window.recipes.len(),
        )
        .with_total(window.total);
        sender.send(first).await;

        debug!(
            query = ?query,
            limit,
            window_len = window.recipes.len(),
            total = window.total,
            "Recipe feed subscribed"
        );

        let authors = query.authors().iter().copied().collect();
        tokio::spawn(
            self.clone()
                .follow_changes(authors, limit, window, notifications, sender),
        );
        Ok(subscription)
    }
}

/// Events that turn `previous` into `next`.
pub fn diff_window(previous: &HashMap<Uuid, Recipe>, next: &[Recipe]) -> Vec<ChangeEvent<Recipe>> {
    let mut changes = Vec::new();
    let mut seen = HashSet::with_capacity(next.len());

    for recipe in next {
        seen.insert(recipe.id);
        match previous.get(&recipe.id) {
            None => changes.push(ChangeEvent::Added(recipe.clone())),
            Some(old) if old != recipe => changes.push(ChangeEvent::Modified(recipe.clone())),
            Some(_) => {}
        }
    }

    changes.extend(
        previous
            .keys()
            .filter(|id| !seen.contains(id))
            .map(|id| ChangeEvent::Removed(*id)),
    );
    changes
}
