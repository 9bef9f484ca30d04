use std::collections::HashSet;

use anyhow::Result;
use async_trait::async_trait;
use dashmap::DashMap;
use moka::future::Cache;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time;

use crate::analytics::models::{AggregateRecord, ClickEvent};
use crate::models::Link;
use crate::storage::{Storage, StorageResult};

/// Storage wrapper adding a read cache for link lookups and an in-memory
/// buffer for the plain click counter.
///
/// The click buffer is the simple counter the redirect path falls back on:
/// it keeps working even when the analytics pipeline fails, and it keeps the
/// hot path free of a database write per redirect.
pub struct CachedStorage {
    inner: Arc<dyn Storage>,
    read_cache: Cache<String, Option<Link>>,
    click_buffer: Arc<DashMap<String, u64>>,
    shutdown_tx: watch::Sender<bool>,
}

impl CachedStorage {
    pub fn new(inner: Arc<dyn Storage>, max_cache_entries: u64, flush_interval_secs: u64) -> Self {
        let read_cache = Cache::builder()
            .max_capacity(max_cache_entries)
            .time_to_live(Duration::from_secs(300))
            .build();

        let click_buffer = Arc::new(DashMap::new());
        let (shutdown_tx, mut shutdown_rx) = watch::channel(false);

        let storage = Arc::clone(&inner);
        let buffer = Arc::clone(&click_buffer);
        tokio::spawn(async move {
            // First tick after one full period; an immediate flush of an
            // empty buffer is useless work.
            let period = Duration::from_secs(flush_interval_secs);
            let mut interval = time::interval_at(time::Instant::now() + period, period);
            loop {
                tokio::select! {
                    _ = interval.tick() => {
                        if let Err(e) = flush_click_buffer(&storage, &buffer).await {
                            tracing::error!("Failed to flush click buffer: {}", e);
                        }
                    }
                    _ = shutdown_rx.changed() => {
                        if *shutdown_rx.borrow() {
                            tracing::info!("Shutdown signal received, flushing click buffer...");
                            if let Err(e) = flush_click_buffer(&storage, &buffer).await {
                                tracing::error!("Failed to flush click buffer on shutdown: {}", e);
                            }
                            break;
                        }
                    }
                }
            }
        });

        Self {
            inner,
            read_cache,
            click_buffer,
            shutdown_tx,
        }
    }

    /// Signal shutdown to flush buffered data
    pub fn shutdown(&self) {
        let _ = self.shutdown_tx.send(true);
    }

    fn get_buffered_clicks(&self, short_code: &str) -> u64 {
        self.click_buffer
            .get(short_code)
            .map(|entry| *entry.value())
            .unwrap_or(0)
    }

    async fn invalidate_cache(&self, short_code: &str) {
        self.read_cache.invalidate(short_code).await;
    }
}

/// Flush accumulated clicks to the database
async fn flush_click_buffer(
    storage: &Arc<dyn Storage>,
    buffer: &Arc<DashMap<String, u64>>,
) -> Result<()> {
    // Collect increments while zeroing counts so concurrent writers can continue
    let pending_updates = buffer
        .iter_mut()
        .filter_map(|mut entry| {
            let count = *entry.value();
            if count == 0 {
                return None;
            }

            *entry.value_mut() = 0;
            Some((entry.key().clone(), count))
        })
        .collect::<Vec<(String, u64)>>();

    // Remove empty entries in case no new clicks were buffered meanwhile
    buffer.retain(|_, v| *v > 0);

    for (short_code, count) in pending_updates {
        storage.increment_clicks(&short_code, count).await?;
    }

    Ok(())
}

#[async_trait]
impl Storage for CachedStorage {
    async fn init(&self) -> Result<()> {
        self.inner.init().await
    }

    async fn create_link(
        &self,
        short_code: &str,
        original_url: &str,
        created_by: Option<&str>,
        expires_at: Option<i64>,
        password_hash: Option<&str>,
    ) -> StorageResult<Link> {
        let result = self
            .inner
            .create_link(short_code, original_url, created_by, expires_at, password_hash)
            .await?;

        self.read_cache
            .insert(short_code.to_string(), Some(result.clone()))
            .await;

        Ok(result)
    }

    async fn get_link(&self, short_code: &str) -> Result<Option<Link>> {
        if let Some(cached) = self.read_cache.get(short_code).await {
            return Ok(cached);
        }

        let result = self.inner.get_link(short_code).await?;

        // Cache the database value without buffered clicks to avoid
        // double-counting on flush.
        self.read_cache
            .insert(short_code.to_string(), result.clone())
            .await;

        Ok(result)
    }

    async fn list_links(&self, limit: i64, offset: i64) -> Result<Vec<Link>> {
        let mut links = self.inner.list_links(limit, offset).await?;

        for link in &mut links {
            link.clicks += self.get_buffered_clicks(&link.short_code) as i64;
        }

        Ok(links)
    }

    async fn deactivate_link(&self, short_code: &str) -> Result<bool> {
        let result = self.inner.deactivate_link(short_code).await?;

        if result {
            self.invalidate_cache(short_code).await;
        }

        Ok(result)
    }

    async fn delete_link(&self, short_code: &str) -> Result<bool> {
        let result = self.inner.delete_link(short_code).await?;

        if result {
            self.invalidate_cache(short_code).await;
            self.click_buffer.remove(short_code);
        }

        Ok(result)
    }

    async fn increment_clicks(&self, short_code: &str, amount: u64) -> Result<()> {
        if amount == 0 {
            return Ok(());
        }

        self.click_buffer
            .entry(short_code.to_string())
            .and_modify(|count| *count += amount)
            .or_insert(amount);

        Ok(())
    }

    async fn append_click(&self, event: &ClickEvent) -> Result<ClickEvent> {
        self.inner.append_click(event).await
    }

    async fn unique_ips(&self, short_code: &str) -> Result<HashSet<String>> {
        self.inner.unique_ips(short_code).await
    }

    async fn recent_clicks(&self, short_code: &str, limit: i64) -> Result<Vec<ClickEvent>> {
        self.inner.recent_clicks(short_code, limit).await
    }

    async fn get_aggregate(&self, short_code: &str) -> Result<Option<(AggregateRecord, i64)>> {
        self.inner.get_aggregate(short_code).await
    }

    async fn insert_aggregate(&self, short_code: &str, record: &AggregateRecord) -> Result<bool> {
        self.inner.insert_aggregate(short_code, record).await
    }

    async fn update_aggregate(
        &self,
        short_code: &str,
        record: &AggregateRecord,
        expected_version: i64,
    ) -> Result<bool> {
        self.inner
            .update_aggregate(short_code, record, expected_version)
            .await
    }
}
