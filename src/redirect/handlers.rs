use axum::{
    extract::{ConnectInfo, Path, State},
    http::{header::HeaderMap, StatusCode},
    response::{IntoResponse, Redirect},
    Json,
};
use serde::Serialize;
use std::net::SocketAddr;
use std::sync::Arc;

use crate::analytics::{extract_client_ip, AggregationEngine, EventClassifier};
use crate::storage::Storage;

pub struct RedirectState {
    pub storage: Arc<dyn Storage>,
    pub engine: Arc<AggregationEngine>,
    pub classifier: Arc<EventClassifier>,
}

/// Redirect to the original URL, recording the click along the way.
///
/// Analytics work never delays or fails the redirect: the plain counter
/// increment only logs on error, and the aggregation runs on a spawned task.
pub async fn redirect_link(
    State(state): State<Arc<RedirectState>>,
    Path(code): Path<String>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
) -> impl IntoResponse {
    let link = match state.storage.get_link(&code).await {
        Ok(Some(link)) => link,
        Ok(None) => return (StatusCode::NOT_FOUND, "Link not found").into_response(),
        Err(err) => {
            tracing::error!(short_code = %code, error = %err, "link lookup failed");
            return (StatusCode::INTERNAL_SERVER_ERROR, "Internal server error").into_response();
        }
    };

    if !link.is_active {
        return (StatusCode::GONE, "This link has been deactivated").into_response();
    }

    if link.is_expired(chrono::Utc::now().timestamp()) {
        return (StatusCode::GONE, "This link has expired").into_response();
    }

    // Protected links are never followed here; the password is verified
    // through the API, and no click is recorded for the refusal.
    if link.is_protected() {
        return (StatusCode::UNAUTHORIZED, "This link is password protected").into_response();
    }

    if let Err(err) = state.storage.increment_clicks(&code, 1).await {
        tracing::warn!(short_code = %code, error = %err, "failed to buffer click increment");
    }

    let user_agent = headers
        .get("user-agent")
        .and_then(|h| h.to_str().ok())
        .unwrap_or("")
        .to_string();
    let referer = headers
        .get("referer")
        .and_then(|h| h.to_str().ok())
        .map(str::to_string);
    let ip = extract_client_ip(&headers, addr.ip());

    let event = state
        .classifier
        .classify(&user_agent, referer.as_deref(), &ip, &code);

    let engine = Arc::clone(&state.engine);
    let tracked = link.clone();
    tokio::spawn(async move {
        if let Err(err) = engine.record_click(&tracked, event).await {
            tracing::warn!(short_code = %tracked.short_code, error = %err, "failed to record click analytics");
        }
    });

    Redirect::temporary(&link.original_url).into_response()
}

/// Health check endpoint
pub async fn health_check() -> impl IntoResponse {
    #[derive(Serialize)]
    struct HealthResponse {
        status: String,
    }

    Json(HealthResponse {
        status: "OK".to_string(),
    })
}
