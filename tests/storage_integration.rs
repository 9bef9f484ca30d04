//! Integration tests for the storage layer
//!
//! Covers link lifecycle, the append-only click log, and the version-guarded
//! aggregate document. All tests run against in-memory SQLite; the pool is
//! limited to a single connection so every query sees the same database.

use std::sync::Arc;

use snip::analytics::models::AggregateRecord;
use snip::analytics::{EventClassifier, GeoIpService};
use snip::storage::{CachedStorage, SqliteStorage, Storage, StorageError};

async fn create_storage() -> Arc<dyn Storage> {
    let storage = SqliteStorage::new("sqlite::memory:", 1).await.unwrap();
    storage.init().await.unwrap();
    Arc::new(storage)
}

fn classifier() -> EventClassifier {
    EventClassifier::new(Arc::new(GeoIpService::new(None).unwrap()))
}

const CHROME_UA: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) \
     AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36";

#[tokio::test]
async fn link_lifecycle() {
    let storage = create_storage().await;

    let link = storage
        .create_link("abc1234", "https://example.com", Some("tester"), None, None)
        .await
        .unwrap();
    assert_eq!(link.short_code, "abc1234");
    assert_eq!(link.original_url, "https://example.com");
    assert!(link.is_active);
    assert_eq!(link.clicks, 0);

    let fetched = storage.get_link("abc1234").await.unwrap().unwrap();
    assert_eq!(fetched.id, link.id);

    assert!(storage.get_link("missing").await.unwrap().is_none());

    assert!(storage.deactivate_link("abc1234").await.unwrap());
    let deactivated = storage.get_link("abc1234").await.unwrap().unwrap();
    assert!(!deactivated.is_active);

    assert!(!storage.deactivate_link("missing").await.unwrap());
}

#[tokio::test]
async fn duplicate_short_code_is_a_conflict() {
    let storage = create_storage().await;

    storage
        .create_link("dup", "https://example.com", None, None, None)
        .await
        .unwrap();

    let err = storage
        .create_link("dup", "https://other.com", None, None, None)
        .await
        .unwrap_err();
    assert!(matches!(err, StorageError::Conflict));
}

#[tokio::test]
async fn concurrent_creation_of_same_code() {
    let storage = create_storage().await;

    let mut handles = vec![];
    for _ in 0..10 {
        let storage = Arc::clone(&storage);
        handles.push(tokio::spawn(async move {
            storage
                .create_link("same_code", "https://example.com", None, None, None)
                .await
        }));
    }

    let mut successes = 0;
    let mut conflicts = 0;
    for handle in handles {
        match handle.await.unwrap() {
            Ok(_) => successes += 1,
            Err(StorageError::Conflict) => conflicts += 1,
            Err(e) => panic!("unexpected error: {:?}", e),
        }
    }

    assert_eq!(successes, 1, "exactly one creation should succeed");
    assert_eq!(conflicts, 9);
}

#[tokio::test]
async fn append_click_stamps_server_time() {
    let storage = create_storage().await;
    storage
        .create_link("abc1234", "https://example.com", None, None, None)
        .await
        .unwrap();

    let mut event = classifier().classify(CHROME_UA, None, "203.0.113.1", "abc1234");
    event.timestamp = 0;

    let before = chrono::Utc::now().timestamp();
    let stored = storage.append_click(&event).await.unwrap();
    let after = chrono::Utc::now().timestamp();

    assert!(stored.timestamp >= before && stored.timestamp <= after);

    let recent = storage.recent_clicks("abc1234", 10).await.unwrap();
    assert_eq!(recent.len(), 1);
    assert_eq!(recent[0].id, stored.id);
    assert_eq!(recent[0].timestamp, stored.timestamp);
    assert_eq!(recent[0].browser.name, "Chrome");
}

#[tokio::test]
async fn unique_ips_deduplicate() {
    let storage = create_storage().await;
    let classifier = classifier();

    for ip in ["203.0.113.1", "203.0.113.1", "203.0.113.2"] {
        let event = classifier.classify(CHROME_UA, None, ip, "abc1234");
        storage.append_click(&event).await.unwrap();
    }

    let ips = storage.unique_ips("abc1234").await.unwrap();
    assert_eq!(ips.len(), 2);
    assert!(ips.contains("203.0.113.1"));
    assert!(ips.contains("203.0.113.2"));
}

#[tokio::test]
async fn aggregate_conditional_writes() {
    let storage = create_storage().await;

    let record = AggregateRecord::empty("abc1234", 100, 200);
    assert!(storage.insert_aggregate("abc1234", &record).await.unwrap());
    // Second insert loses.
    assert!(!storage.insert_aggregate("abc1234", &record).await.unwrap());

    let (fetched, version) = storage.get_aggregate("abc1234").await.unwrap().unwrap();
    assert_eq!(fetched.created_at, 100);
    assert_eq!(version, 0);

    let mut updated = fetched.clone();
    updated.totals.clicks = 1;
    assert!(storage
        .update_aggregate("abc1234", &updated, version)
        .await
        .unwrap());

    // A write against the old version must be rejected.
    assert!(!storage
        .update_aggregate("abc1234", &updated, version)
        .await
        .unwrap());

    let (fetched, version) = storage.get_aggregate("abc1234").await.unwrap().unwrap();
    assert_eq!(fetched.totals.clicks, 1);
    assert_eq!(version, 1);
}

#[tokio::test]
async fn delete_link_removes_clicks_and_aggregate() {
    let storage = create_storage().await;
    storage
        .create_link("abc1234", "https://example.com", None, None, None)
        .await
        .unwrap();

    let event = classifier().classify(CHROME_UA, None, "203.0.113.1", "abc1234");
    storage.append_click(&event).await.unwrap();
    storage
        .insert_aggregate("abc1234", &AggregateRecord::empty("abc1234", 100, 200))
        .await
        .unwrap();

    assert!(storage.delete_link("abc1234").await.unwrap());

    assert!(storage.get_link("abc1234").await.unwrap().is_none());
    assert!(storage.recent_clicks("abc1234", 10).await.unwrap().is_empty());
    assert!(storage.get_aggregate("abc1234").await.unwrap().is_none());

    assert!(!storage.delete_link("abc1234").await.unwrap());
}

#[tokio::test]
async fn cached_storage_buffers_click_counts() {
    let inner = create_storage().await;
    let cached = CachedStorage::new(Arc::clone(&inner), 100, 3600);

    cached
        .create_link("abc1234", "https://example.com", None, None, None)
        .await
        .unwrap();

    cached.increment_clicks("abc1234", 1).await.unwrap();
    cached.increment_clicks("abc1234", 2).await.unwrap();

    // Buffered clicks show up in listings before any flush.
    let links = cached.list_links(10, 0).await.unwrap();
    assert_eq!(links.len(), 1);
    assert_eq!(links[0].clicks, 3);

    // The flush interval has not elapsed, so the database still reads zero.
    let db_link = inner.get_link("abc1234").await.unwrap().unwrap();
    assert_eq!(db_link.clicks, 0);
}

#[tokio::test]
async fn cached_storage_serves_reads_after_delete() {
    let inner = create_storage().await;
    let cached = CachedStorage::new(Arc::clone(&inner), 100, 3600);

    cached
        .create_link("abc1234", "https://example.com", None, None, None)
        .await
        .unwrap();
    assert!(cached.get_link("abc1234").await.unwrap().is_some());

    assert!(cached.delete_link("abc1234").await.unwrap());
    assert!(cached.get_link("abc1234").await.unwrap().is_none());
}
