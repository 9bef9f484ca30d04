use std::collections::HashSet;

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use chrono::Utc;
use sqlx::sqlite::SqlitePoolOptions;
use sqlx::SqlitePool;
use std::sync::Arc;

use crate::analytics::models::{
    AggregateRecord, BrowserInfo, ClickEvent, DeviceInfo, DeviceType, OsInfo,
};
use crate::models::Link;
use crate::storage::{Storage, StorageError, StorageResult};

pub struct SqliteStorage {
    pool: Arc<SqlitePool>,
}

impl SqliteStorage {
    pub async fn new(database_url: &str, max_connections: u32) -> Result<Self> {
        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections)
            .connect(database_url)
            .await?;
        Ok(Self {
            pool: Arc::new(pool),
        })
    }
}

/// Flat row shape for click events; nested classifier structs are rebuilt
/// when converting back to a [`ClickEvent`].
#[derive(sqlx::FromRow)]
struct ClickRow {
    id: String,
    short_code: String,
    timestamp: i64,
    ip: String,
    user_agent: String,
    referer: Option<String>,
    device_type: String,
    is_mobile: bool,
    is_tablet: bool,
    is_desktop: bool,
    browser_name: String,
    browser_version: String,
    browser_engine: String,
    os_name: String,
    os_version: String,
    os_platform: String,
    country: Option<String>,
    country_code: Option<String>,
    region: Option<String>,
    city: Option<String>,
    utm_source: Option<String>,
    utm_medium: Option<String>,
    utm_campaign: Option<String>,
    utm_term: Option<String>,
    utm_content: Option<String>,
}

impl From<ClickRow> for ClickEvent {
    fn from(row: ClickRow) -> Self {
        ClickEvent {
            id: row.id,
            short_code: row.short_code,
            timestamp: row.timestamp,
            ip: row.ip,
            user_agent: row.user_agent,
            referer: row.referer,
            device: DeviceInfo {
                kind: DeviceType::parse(&row.device_type).unwrap_or(DeviceType::Desktop),
                is_mobile: row.is_mobile,
                is_tablet: row.is_tablet,
                is_desktop: row.is_desktop,
            },
            browser: BrowserInfo {
                name: row.browser_name,
                version: row.browser_version,
                engine: row.browser_engine,
            },
            os: OsInfo {
                name: row.os_name,
                version: row.os_version,
                platform: row.os_platform,
            },
            country: row.country,
            country_code: row.country_code,
            region: row.region,
            city: row.city,
            utm_source: row.utm_source,
            utm_medium: row.utm_medium,
            utm_campaign: row.utm_campaign,
            utm_term: row.utm_term,
            utm_content: row.utm_content,
        }
    }
}

const LINK_COLUMNS: &str = "id, short_code, original_url, created_at, created_by, expires_at, \
     password_hash, clicks, is_active";

const CLICK_COLUMNS: &str = "id, short_code, timestamp, ip, user_agent, referer, \
     device_type, is_mobile, is_tablet, is_desktop, \
     browser_name, browser_version, browser_engine, \
     os_name, os_version, os_platform, \
     country, country_code, region, city, \
     utm_source, utm_medium, utm_campaign, utm_term, utm_content";

#[async_trait]
impl Storage for SqliteStorage {
    async fn init(&self) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS links (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                short_code TEXT NOT NULL UNIQUE,
                original_url TEXT NOT NULL,
                created_at INTEGER NOT NULL,
                created_by TEXT,
                expires_at INTEGER,
                password_hash TEXT,
                clicks INTEGER NOT NULL DEFAULT 0,
                is_active INTEGER NOT NULL DEFAULT 1
            )
            "#,
        )
        .execute(self.pool.as_ref())
        .await?;

        sqlx::query("CREATE INDEX IF NOT EXISTS idx_links_short_code ON links(short_code)")
            .execute(self.pool.as_ref())
            .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS click_events (
                id TEXT PRIMARY KEY,
                short_code TEXT NOT NULL,
                timestamp INTEGER NOT NULL,
                ip TEXT NOT NULL,
                user_agent TEXT NOT NULL,
                referer TEXT,
                device_type TEXT NOT NULL,
                is_mobile INTEGER NOT NULL,
                is_tablet INTEGER NOT NULL,
                is_desktop INTEGER NOT NULL,
                browser_name TEXT NOT NULL,
                browser_version TEXT NOT NULL,
                browser_engine TEXT NOT NULL,
                os_name TEXT NOT NULL,
                os_version TEXT NOT NULL,
                os_platform TEXT NOT NULL,
                country TEXT,
                country_code TEXT,
                region TEXT,
                city TEXT,
                utm_source TEXT,
                utm_medium TEXT,
                utm_campaign TEXT,
                utm_term TEXT,
                utm_content TEXT
            )
            "#,
        )
        .execute(self.pool.as_ref())
        .await?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_clicks_code_ts \
             ON click_events(short_code, timestamp)",
        )
        .execute(self.pool.as_ref())
        .await?;

        // Aggregate documents are stored whole as JSON; the version column
        // guards conditional overwrites.
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS aggregates (
                short_code TEXT PRIMARY KEY,
                version INTEGER NOT NULL DEFAULT 0,
                data TEXT NOT NULL,
                updated_at INTEGER NOT NULL
            )
            "#,
        )
        .execute(self.pool.as_ref())
        .await?;

        Ok(())
    }

    async fn create_link(
        &self,
        short_code: &str,
        original_url: &str,
        created_by: Option<&str>,
        expires_at: Option<i64>,
        password_hash: Option<&str>,
    ) -> StorageResult<Link> {
        let created_at = Utc::now().timestamp();

        let result = sqlx::query(
            r#"
            INSERT INTO links (short_code, original_url, created_at, created_by, expires_at, password_hash, is_active)
            VALUES (?, ?, ?, ?, ?, ?, 1)
            ON CONFLICT(short_code) DO NOTHING
            "#,
        )
        .bind(short_code)
        .bind(original_url)
        .bind(created_at)
        .bind(created_by)
        .bind(expires_at)
        .bind(password_hash)
        .execute(self.pool.as_ref())
        .await
        .map_err(|e| StorageError::Other(e.into()))?;

        if result.rows_affected() == 0 {
            return Err(StorageError::Conflict);
        }

        let link = sqlx::query_as::<_, Link>(&format!(
            "SELECT {LINK_COLUMNS} FROM links WHERE short_code = ?"
        ))
        .bind(short_code)
        .fetch_one(self.pool.as_ref())
        .await
        .map_err(|e| StorageError::Other(e.into()))?;

        Ok(link)
    }

    async fn get_link(&self, short_code: &str) -> Result<Option<Link>> {
        let link = sqlx::query_as::<_, Link>(&format!(
            "SELECT {LINK_COLUMNS} FROM links WHERE short_code = ?"
        ))
        .bind(short_code)
        .fetch_optional(self.pool.as_ref())
        .await?;

        Ok(link)
    }

    async fn list_links(&self, limit: i64, offset: i64) -> Result<Vec<Link>> {
        let links = sqlx::query_as::<_, Link>(&format!(
            "SELECT {LINK_COLUMNS} FROM links ORDER BY created_at DESC LIMIT ? OFFSET ?"
        ))
        .bind(limit)
        .bind(offset)
        .fetch_all(self.pool.as_ref())
        .await?;

        Ok(links)
    }

    async fn deactivate_link(&self, short_code: &str) -> Result<bool> {
        let result = sqlx::query("UPDATE links SET is_active = 0 WHERE short_code = ?")
            .bind(short_code)
            .execute(self.pool.as_ref())
            .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn delete_link(&self, short_code: &str) -> Result<bool> {
        let mut tx = self.pool.begin().await?;

        let result = sqlx::query("DELETE FROM links WHERE short_code = ?")
            .bind(short_code)
            .execute(&mut *tx)
            .await?;

        if result.rows_affected() == 0 {
            tx.rollback().await?;
            return Ok(false);
        }

        // The aggregate and raw events are owned by the link and go with it.
        sqlx::query("DELETE FROM click_events WHERE short_code = ?")
            .bind(short_code)
            .execute(&mut *tx)
            .await?;
        sqlx::query("DELETE FROM aggregates WHERE short_code = ?")
            .bind(short_code)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        Ok(true)
    }

    async fn increment_clicks(&self, short_code: &str, amount: u64) -> Result<()> {
        sqlx::query("UPDATE links SET clicks = clicks + ? WHERE short_code = ?")
            .bind(amount as i64)
            .bind(short_code)
            .execute(self.pool.as_ref())
            .await?;

        Ok(())
    }

    async fn append_click(&self, event: &ClickEvent) -> Result<ClickEvent> {
        // Server-stamp: whatever timestamp the caller put on the event is
        // replaced by the store's clock at write time.
        let mut stored = event.clone();
        stored.timestamp = Utc::now().timestamp();

        sqlx::query(&format!(
            "INSERT INTO click_events ({CLICK_COLUMNS}) \
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)"
        ))
        .bind(&stored.id)
        .bind(&stored.short_code)
        .bind(stored.timestamp)
        .bind(&stored.ip)
        .bind(&stored.user_agent)
        .bind(&stored.referer)
        .bind(stored.device.kind.as_str())
        .bind(stored.device.is_mobile)
        .bind(stored.device.is_tablet)
        .bind(stored.device.is_desktop)
        .bind(&stored.browser.name)
        .bind(&stored.browser.version)
        .bind(&stored.browser.engine)
        .bind(&stored.os.name)
        .bind(&stored.os.version)
        .bind(&stored.os.platform)
        .bind(&stored.country)
        .bind(&stored.country_code)
        .bind(&stored.region)
        .bind(&stored.city)
        .bind(&stored.utm_source)
        .bind(&stored.utm_medium)
        .bind(&stored.utm_campaign)
        .bind(&stored.utm_term)
        .bind(&stored.utm_content)
        .execute(self.pool.as_ref())
        .await?;

        Ok(stored)
    }

    async fn unique_ips(&self, short_code: &str) -> Result<HashSet<String>> {
        let ips = sqlx::query_scalar::<_, String>(
            "SELECT DISTINCT ip FROM click_events WHERE short_code = ?",
        )
        .bind(short_code)
        .fetch_all(self.pool.as_ref())
        .await?;

        Ok(ips.into_iter().collect())
    }

    async fn recent_clicks(&self, short_code: &str, limit: i64) -> Result<Vec<ClickEvent>> {
        let rows = sqlx::query_as::<_, ClickRow>(&format!(
            "SELECT {CLICK_COLUMNS} FROM click_events \
             WHERE short_code = ? ORDER BY timestamp DESC LIMIT ?"
        ))
        .bind(short_code)
        .bind(limit)
        .fetch_all(self.pool.as_ref())
        .await?;

        Ok(rows.into_iter().map(ClickEvent::from).collect())
    }

    async fn get_aggregate(&self, short_code: &str) -> Result<Option<(AggregateRecord, i64)>> {
        let row = sqlx::query_as::<_, (String, i64)>(
            "SELECT data, version FROM aggregates WHERE short_code = ?",
        )
        .bind(short_code)
        .fetch_optional(self.pool.as_ref())
        .await?;

        match row {
            Some((data, version)) => {
                let record: AggregateRecord = serde_json::from_str(&data)
                    .map_err(|e| anyhow!("corrupt aggregate document for {short_code}: {e}"))?;
                Ok(Some((record, version)))
            }
            None => Ok(None),
        }
    }

    async fn insert_aggregate(&self, short_code: &str, record: &AggregateRecord) -> Result<bool> {
        let data = serde_json::to_string(record)?;

        let result = sqlx::query(
            r#"
            INSERT INTO aggregates (short_code, version, data, updated_at)
            VALUES (?, 0, ?, ?)
            ON CONFLICT(short_code) DO NOTHING
            "#,
        )
        .bind(short_code)
        .bind(data)
        .bind(Utc::now().timestamp())
        .execute(self.pool.as_ref())
        .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn update_aggregate(
        &self,
        short_code: &str,
        record: &AggregateRecord,
        expected_version: i64,
    ) -> Result<bool> {
        let data = serde_json::to_string(record)?;

        let result = sqlx::query(
            r#"
            UPDATE aggregates
            SET data = ?, version = version + 1, updated_at = ?
            WHERE short_code = ? AND version = ?
            "#,
        )
        .bind(data)
        .bind(Utc::now().timestamp())
        .bind(short_code)
        .bind(expected_version)
        .execute(self.pool.as_ref())
        .await?;

        Ok(result.rows_affected() > 0)
    }
}
