//! Live recipe feed over a WebSocket.
//!
//! Each connection drives one [`PaginatedLiveQuery`]. Every published page
//! state is pushed to the client as a [`FeedSnapshot`]; the client asks for
//! more with `{"type":"load_more"}`.

use axum::{
    Router,
    extract::{
        Query, State,
        ws::{Message, WebSocket, WebSocketUpgrade},
    },
    http::HeaderMap,
    response::Response,
    routing::get,
};
use db::models::recipe::Recipe;
use futures_util::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use services::services::{
    live_query::PaginatedLiveQuery,
    pagination::PageState,
    recipe_feed::{RecipeFeed, RecipeQuery},
    recipe_store::StoreChange,
};
use tokio::sync::broadcast::{self, error::RecvError};
use tracing::{debug, info, warn};
use ts_rs::TS;
use uuid::Uuid;

use crate::{AppState, auth::AuthUser, error::ApiError};

const MAX_PAGE_SIZE: usize = 100;

#[derive(Debug, Deserialize)]
pub struct FeedParams {
    /// Author whose recipes to follow; defaults to the caller.
    pub user_id: Option<Uuid>,
    /// Follow the recipes of everyone the caller follows instead.
    #[serde(default)]
    pub following: bool,
    pub page_size: Option<usize>,
    /// Session token for clients that cannot set headers on a WebSocket handshake.
    pub token: Option<String>,
}

/// Page state as sent to feed clients.
#[derive(Debug, Clone, Serialize, TS)]
pub struct FeedSnapshot {
    pub items: Vec<Recipe>,
    pub phase: String,
    pub loading: bool,
    pub loading_more: bool,
    pub has_more: bool,
    pub loading_error: Option<String>,
    pub loading_more_error: Option<String>,
}

impl From<&PageState<Recipe>> for FeedSnapshot {
    fn from(state: &PageState<Recipe>) -> Self {
        Self {
            items: state.items().to_vec(),
            phase: state.phase().to_string(),
            loading: state.loading(),
            loading_more: state.loading_more(),
            has_more: state.has_more(),
            loading_error: state.loading_error().map(ToString::to_string),
            loading_more_error: state.loading_more_error().map(ToString::to_string),
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum FeedCommand {
    LoadMore,
}

async fn resolve_query(state: &AppState, user_id: Uuid, params: &FeedParams) -> Result<RecipeQuery, ApiError> {
    if params.following {
        let authors = state.store().following_ids(user_id).await?;
        Ok(RecipeQuery::ByAuthors(authors))
    } else {
        Ok(RecipeQuery::ByAuthor(params.user_id.unwrap_or(user_id)))
    }
}

pub async fn recipe_feed(
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(params): Query<FeedParams>,
) -> Result<Response, ApiError> {
    let AuthUser(session) = match params.token.as_deref() {
        Some(token) => AuthUser::from_token(token, &state)?,
        None => AuthUser::from_headers(&headers, &state)?,
    };

    let page_size = params
        .page_size
        .unwrap_or(state.config().feed_page_size)
        .clamp(1, MAX_PAGE_SIZE);
    let query = resolve_query(&state, session.user_id, &params).await?;

    Ok(ws.on_upgrade(move |socket| async move {
        run_feed(socket, state, session.user_id, params, query, page_size).await
    }))
}

/// One connection's live query plus the follow changes that can reshape it.
struct FeedConnection {
    state: AppState,
    user_id: Uuid,
    params: FeedParams,
    live: PaginatedLiveQuery<RecipeFeed>,
    store_changes: broadcast::Receiver<StoreChange>,
    watch_follows: bool,
}

impl FeedConnection {
    fn open(state: AppState, user_id: Uuid, params: FeedParams, query: RecipeQuery, page_size: usize) -> Self {
        // Subscribed before the query opens so no follow change is missed.
        let store_changes = state.store().subscribe_changes();
        let live = PaginatedLiveQuery::open(state.feed(), query, page_size);
        let watch_follows = params.following;
        Self {
            state,
            user_id,
            params,
            live,
            store_changes,
            watch_follows,
        }
    }

    fn on_command(&self, text: &str) {
        match serde_json::from_str::<FeedCommand>(text) {
            Ok(FeedCommand::LoadMore) => self.live.load_more(),
            Err(e) => warn!(user_id = %self.user_id, error = %e, "Ignoring malformed feed command"),
        }
    }

    /// Reopen the query when the caller's own follows change.
    async fn on_store_change(&mut self, change: Result<StoreChange, RecvError>) {
        let refresh = match change {
            Ok(StoreChange::Relation { from_user_id, .. }) => from_user_id == self.user_id,
            Ok(_) => false,
            Err(RecvError::Lagged(_)) => true,
            Err(RecvError::Closed) => {
                self.watch_follows = false;
                false
            }
        };
        if !refresh {
            return;
        }

        match resolve_query(&self.state, self.user_id, &self.params).await {
            Ok(query) => {
                debug!(user_id = %self.user_id, query = ?query, "Followed authors changed");
                self.live.reopen(query);
            }
            Err(e) => warn!(user_id = %self.user_id, error = %e, "Failed to refresh followed authors"),
        }
    }
}

async fn run_feed(
    socket: WebSocket,
    state: AppState,
    user_id: Uuid,
    params: FeedParams,
    query: RecipeQuery,
    page_size: usize,
) {
    info!(user_id = %user_id, query = ?query, page_size, "Feed connection opened");

    let (mut sink, mut stream) = socket.split();
    let mut connection = FeedConnection::open(state, user_id, params, query, page_size);
    let mut states = connection.live.watch();

    loop {
        let snapshot = FeedSnapshot::from(&**states.borrow_and_update());
        match serde_json::to_string(&snapshot) {
            Ok(json) => {
                if sink.send(Message::Text(json.into())).await.is_err() {
                    debug!(user_id = %user_id, "Feed client went away");
                    break;
                }
            }
            Err(e) => warn!(error = %e, "Failed to serialize feed snapshot"),
        }

        let keep_going = 'wait: loop {
            tokio::select! {
                changed = states.changed() => break 'wait changed.is_ok(),
                message = stream.next() => match message {
                    Some(Ok(Message::Text(text))) => connection.on_command(text.as_str()),
                    Some(Ok(Message::Close(_))) | None => break 'wait false,
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        debug!(user_id = %user_id, error = %e, "Feed socket error");
                        break 'wait false;
                    }
                },
                change = connection.store_changes.recv(), if connection.watch_follows => {
                    connection.on_store_change(change).await;
                }
            }
        };
        if !keep_going {
            break;
        }
    }

    connection.live.close();
    info!(user_id = %user_id, "Feed connection closed");
}

pub fn router(_state: &AppState) -> Router<AppState> {
    Router::new().route("/recipes/feed", get(recipe_feed))
}
