use axum::Router;
use tower_http::{cors::CorsLayer, trace::TraceLayer};

use crate::AppState;

pub mod feed;
pub mod health;
pub mod recipes;
pub mod relations;
pub mod search;
pub mod users;

pub fn router(state: AppState) -> Router {
    let api = Router::new()
        .merge(health::router(&state))
        .merge(users::router(&state))
        .merge(recipes::router(&state))
        .merge(feed::router(&state))
        .merge(relations::router(&state))
        .merge(search::router(&state));

    Router::new()
        .nest("/api", api)
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
