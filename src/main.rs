use anyhow::Result;
use std::net::SocketAddr;
use std::sync::Arc;
use tracing::info;

use snip::analytics::{AggregationEngine, EventClassifier, GeoIpService};
use snip::api;
use snip::config::Config;
use snip::redirect;
use snip::storage::{CachedStorage, SqliteStorage, Storage};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt::init();

    // Load configuration
    let config = Config::from_env()?;
    info!("Loaded configuration");

    // Initialize storage
    info!("Using SQLite storage: {}", config.database.url);
    let sqlite: Arc<dyn Storage> = Arc::new(SqliteStorage::new(&config.database.url, 5).await?);
    let storage: Arc<dyn Storage> = Arc::new(CachedStorage::new(
        sqlite,
        config.cache.max_entries,
        config.cache.click_flush_secs,
    ));

    // Initialize database
    info!("Initializing database...");
    storage.init().await?;
    info!("Database initialized successfully");

    // Initialize analytics services
    let geo = Arc::new(GeoIpService::new(config.analytics.geoip_db_path.as_deref())?);
    if geo.is_enabled() {
        info!("GeoIP City database loaded");
    } else {
        info!("GeoIP disabled, clicks will carry no location data");
    }
    let classifier = Arc::new(EventClassifier::new(geo));
    let engine = Arc::new(AggregationEngine::new(Arc::clone(&storage)));

    // Create routers
    let api_router = api::create_api_router(
        Arc::clone(&storage),
        config.analytics.fallback_scan_limit,
    );
    let redirect_router = redirect::create_redirect_router(Arc::clone(&storage), engine, classifier);

    // Start API server
    let api_addr = config.api_server.bind_address();
    let api_listener = tokio::net::TcpListener::bind(&api_addr).await?;
    info!("🚀 API server listening on http://{}", api_addr);

    // Start redirect server
    let redirect_addr = config.redirect_server.bind_address();
    let redirect_listener = tokio::net::TcpListener::bind(&redirect_addr).await?;
    info!("🚀 Redirect server listening on http://{}", redirect_addr);

    // Run both servers concurrently; the redirect server needs the peer
    // address for client IP fallback.
    tokio::try_join!(
        axum::serve(api_listener, api_router),
        axum::serve(
            redirect_listener,
            redirect_router.into_make_service_with_connect_info::<SocketAddr>(),
        ),
    )?;

    Ok(())
}
