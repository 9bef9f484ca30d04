use axum::{routing::get, Router};
use std::sync::Arc;

use crate::analytics::{AggregationEngine, EventClassifier};
use crate::storage::Storage;

use super::handlers::{health_check, redirect_link, RedirectState};

pub fn create_redirect_router(
    storage: Arc<dyn Storage>,
    engine: Arc<AggregationEngine>,
    classifier: Arc<EventClassifier>,
) -> Router {
    let state = Arc::new(RedirectState {
        storage,
        engine,
        classifier,
    });

    Router::new()
        .route("/health", get(health_check))
        .route("/{code}", get(redirect_link))
        .with_state(state)
}
