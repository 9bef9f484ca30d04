//! Redirect integration tests
//!
//! Verify redirect behavior for active, deactivated, expired and missing
//! links, and that a served redirect feeds the analytics pipeline.

use axum::{
    body::Body,
    http::{Request, StatusCode},
};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tower::{Layer, ServiceExt};

use snip::analytics::{AggregationEngine, EventClassifier, GeoIpService};
use snip::password::hash_password;
use snip::redirect::create_redirect_router;
use snip::storage::{SqliteStorage, Storage};

async fn create_test_storage() -> Arc<dyn Storage> {
    let storage = SqliteStorage::new("sqlite::memory:", 1).await.unwrap();
    storage.init().await.unwrap();
    Arc::new(storage)
}

fn test_router(storage: Arc<dyn Storage>) -> axum::Router {
    let geo = Arc::new(GeoIpService::new(None).unwrap());
    let classifier = Arc::new(EventClassifier::new(geo));
    let engine = Arc::new(AggregationEngine::new(Arc::clone(&storage)));
    create_redirect_router(storage, engine, classifier)
}

/// Helper layer to inject ConnectInfo for tests
#[derive(Clone)]
struct TestConnectInfoLayer;

impl<S> Layer<S> for TestConnectInfoLayer {
    type Service = TestConnectInfoMiddleware<S>;

    fn layer(&self, inner: S) -> Self::Service {
        TestConnectInfoMiddleware { inner }
    }
}

#[derive(Clone)]
struct TestConnectInfoMiddleware<S> {
    inner: S,
}

impl<S, B> tower::Service<Request<B>> for TestConnectInfoMiddleware<S>
where
    S: tower::Service<Request<B>> + Clone,
{
    type Response = S::Response;
    type Error = S::Error;
    type Future = S::Future;

    fn poll_ready(
        &mut self,
        cx: &mut std::task::Context<'_>,
    ) -> std::task::Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, mut req: Request<B>) -> Self::Future {
        let addr = SocketAddr::from(([127, 0, 0, 1], 12345));
        req.extensions_mut()
            .insert(axum::extract::connect_info::ConnectInfo(addr));

        self.inner.call(req)
    }
}

fn get(uri: &str) -> Request<Body> {
    Request::builder()
        .uri(uri)
        .header("user-agent", "Mozilla/5.0 (X11; Linux x86_64) Firefox/121.0")
        .body(Body::empty())
        .unwrap()
}

#[tokio::test]
async fn active_link_redirects() {
    let storage = create_test_storage().await;
    storage
        .create_link("active1", "https://example.com/destination", None, None, None)
        .await
        .unwrap();

    let app = test_router(Arc::clone(&storage)).layer(TestConnectInfoLayer);
    let response = app.oneshot(get("/active1")).await.unwrap();

    assert_eq!(response.status(), StatusCode::TEMPORARY_REDIRECT);
    assert_eq!(
        response.headers().get("location").unwrap(),
        "https://example.com/destination"
    );
}

#[tokio::test]
async fn missing_link_is_not_found() {
    let storage = create_test_storage().await;
    let app = test_router(storage).layer(TestConnectInfoLayer);

    let response = app.oneshot(get("/nothere")).await.unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn deactivated_link_is_gone() {
    let storage = create_test_storage().await;
    storage
        .create_link("inactive1", "https://example.com", None, None, None)
        .await
        .unwrap();
    storage.deactivate_link("inactive1").await.unwrap();

    let app = test_router(Arc::clone(&storage)).layer(TestConnectInfoLayer);
    let response = app.oneshot(get("/inactive1")).await.unwrap();

    assert_eq!(response.status(), StatusCode::GONE);
}

#[tokio::test]
async fn expired_link_is_gone_and_untracked() {
    let storage = create_test_storage().await;
    let past = chrono::Utc::now().timestamp() - 60;
    storage
        .create_link("expired1", "https://example.com", None, Some(past), None)
        .await
        .unwrap();

    let app = test_router(Arc::clone(&storage)).layer(TestConnectInfoLayer);
    let response = app.oneshot(get("/expired1")).await.unwrap();

    assert_eq!(response.status(), StatusCode::GONE);

    let link = storage.get_link("expired1").await.unwrap().unwrap();
    assert_eq!(link.clicks, 0);
    assert!(storage.recent_clicks("expired1", 10).await.unwrap().is_empty());
}

#[tokio::test]
async fn protected_link_is_not_followed_or_tracked() {
    let storage = create_test_storage().await;
    let hash = hash_password("secret").unwrap();
    storage
        .create_link("locked1", "https://example.com", None, None, Some(&hash))
        .await
        .unwrap();

    let app = test_router(Arc::clone(&storage)).layer(TestConnectInfoLayer);
    let response = app.oneshot(get("/locked1")).await.unwrap();

    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    assert!(response.headers().get("location").is_none());

    let link = storage.get_link("locked1").await.unwrap().unwrap();
    assert_eq!(link.clicks, 0);
    assert!(storage.recent_clicks("locked1", 10).await.unwrap().is_empty());
}

#[tokio::test]
async fn redirect_feeds_the_analytics_pipeline() {
    let storage = create_test_storage().await;
    storage
        .create_link("tracked1", "https://example.com", None, None, None)
        .await
        .unwrap();

    let app = test_router(Arc::clone(&storage)).layer(TestConnectInfoLayer);
    let response = app.oneshot(get("/tracked1")).await.unwrap();
    assert_eq!(response.status(), StatusCode::TEMPORARY_REDIRECT);

    // The aggregation runs on a spawned task; poll briefly for it to land.
    let mut aggregate = None;
    for _ in 0..50 {
        if let Some(found) = storage.get_aggregate("tracked1").await.unwrap() {
            aggregate = Some(found);
            break;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }

    let (record, _) = aggregate.expect("aggregate not written after redirect");
    assert_eq!(record.totals.clicks, 1);
    assert_eq!(record.breakdowns.browsers.get("Firefox"), Some(&1));

    // The plain counter was incremented synchronously.
    let link = storage.get_link("tracked1").await.unwrap().unwrap();
    assert_eq!(link.clicks, 1);

    let events = storage.recent_clicks("tracked1", 10).await.unwrap();
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].os.name, "Linux");
}
