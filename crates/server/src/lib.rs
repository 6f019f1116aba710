pub mod auth;
pub mod error;
pub mod routes;
pub mod state;

pub use state::AppState;
