use std::collections::HashSet;

use anyhow::Result;
use async_trait::async_trait;
use thiserror::Error;

use crate::analytics::models::{AggregateRecord, ClickEvent};
use crate::models::Link;

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("short code already exists")]
    Conflict,
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

pub type StorageResult<T> = Result<T, StorageError>;

/// Document-store boundary: links, the append-only click log, and the
/// per-short-code aggregate document with conditional overwrite.
#[async_trait]
pub trait Storage: Send + Sync {
    /// Initialize the storage (create tables, etc.)
    async fn init(&self) -> Result<()>;

    /// Create a new link with a caller-provided short code. `password_hash`
    /// is the already-hashed link password, if the link is protected.
    async fn create_link(
        &self,
        short_code: &str,
        original_url: &str,
        created_by: Option<&str>,
        expires_at: Option<i64>,
        password_hash: Option<&str>,
    ) -> StorageResult<Link>;

    /// Get a link by short code.
    async fn get_link(&self, short_code: &str) -> Result<Option<Link>>;

    /// List links, newest first.
    async fn list_links(&self, limit: i64, offset: i64) -> Result<Vec<Link>>;

    /// Soft-disable a link.
    async fn deactivate_link(&self, short_code: &str) -> Result<bool>;

    /// Delete a link together with its click events and aggregate record.
    async fn delete_link(&self, short_code: &str) -> Result<bool>;

    /// Bump the plain click counter on the link.
    async fn increment_clicks(&self, short_code: &str, amount: u64) -> Result<()>;

    /// Append one click event, stamping its timestamp with the store's clock.
    /// Returns the event as stored.
    async fn append_click(&self, event: &ClickEvent) -> Result<ClickEvent>;

    /// Distinct IPs across every click event recorded for the short code.
    /// O(n) over that code's history; invoked once per click, never per read.
    async fn unique_ips(&self, short_code: &str) -> Result<HashSet<String>>;

    /// Most recent click events for the short code, newest first.
    async fn recent_clicks(&self, short_code: &str, limit: i64) -> Result<Vec<ClickEvent>>;

    /// Read the aggregate document and its version counter.
    async fn get_aggregate(&self, short_code: &str) -> Result<Option<(AggregateRecord, i64)>>;

    /// Create the aggregate document if absent. Returns false when another
    /// writer created it first.
    async fn insert_aggregate(&self, short_code: &str, record: &AggregateRecord) -> Result<bool>;

    /// Overwrite the aggregate document only if the stored version still
    /// matches `expected_version`. Returns false on a version conflict.
    async fn update_aggregate(
        &self,
        short_code: &str,
        record: &AggregateRecord,
        expected_version: i64,
    ) -> Result<bool>;
}
