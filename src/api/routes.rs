use axum::{
    routing::{delete, get, post, put},
    Router,
};
use std::sync::Arc;
use tower_http::cors::CorsLayer;

use crate::storage::Storage;

use super::analytics::get_analytics;
use super::handlers::{
    create_link, deactivate_link, delete_link, get_link, health_check, list_links,
    verify_password, AppState,
};

pub fn create_api_router(storage: Arc<dyn Storage>, fallback_scan_limit: i64) -> Router {
    let state = Arc::new(AppState {
        storage,
        fallback_scan_limit,
    });

    Router::new()
        .route("/health", get(health_check))
        .route("/links", post(create_link))
        .route("/links", get(list_links))
        .route("/links/{code}", get(get_link))
        .route("/links/{code}", delete(delete_link))
        .route("/links/{code}/deactivate", put(deactivate_link))
        .route("/links/{code}/verify-password", post(verify_password))
        .route("/links/{code}/analytics", get(get_analytics))
        .layer(CorsLayer::permissive())
        .with_state(state)
}
