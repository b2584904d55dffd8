pub mod error;
pub mod perevals;
pub mod users;

use std::sync::Arc;

use axum::{
    Json, Router,
    response::IntoResponse,
    routing::{get, post},
};
use serde_json::json;
use tracing::error;

use pereval_db::Database;

use crate::error::ApiError;

pub type AppState = Arc<AppStateInner>;

pub struct AppStateInner {
    pub db: Database,
}

/// All routes. Collection paths answer with and without a trailing slash.
pub fn router(state: AppState) -> Router {
    Router::new()
        .route(
            "/submitData",
            post(perevals::submit_data).get(perevals::list_perevals),
        )
        .route(
            "/submitData/",
            post(perevals::submit_data).get(perevals::list_perevals),
        )
        .route(
            "/submitData/{id}",
            get(perevals::get_pereval).patch(perevals::update_pereval),
        )
        .route("/users", get(users::list_users).post(users::create_user))
        .route("/users/", get(users::list_users).post(users::create_user))
        .route("/users/search", get(users::search_users))
        .route("/users/search/", get(users::search_users))
        .route("/users/{id}", get(users::get_user).patch(users::update_user))
        .route("/health", get(health))
        .with_state(state)
}

async fn health() -> impl IntoResponse {
    Json(json!({ "status": "ok" }))
}

/// Run blocking DB work off the async runtime.
pub(crate) async fn run_db<F, T>(state: &AppState, f: F) -> Result<T, ApiError>
where
    F: FnOnce(&Database) -> anyhow::Result<T> + Send + 'static,
    T: Send + 'static,
{
    let state = state.clone();
    tokio::task::spawn_blocking(move || f(&state.db))
        .await
        .map_err(|e| {
            error!("spawn_blocking join error: {}", e);
            ApiError::Internal(e.into())
        })?
        .map_err(ApiError::Internal)
}
