use anyhow::{Context, Result};
use std::env;

#[derive(Debug, Clone)]
pub struct Config {
    pub database: DatabaseConfig,
    pub api_server: ServerConfig,
    pub redirect_server: ServerConfig,
    pub analytics: AnalyticsConfig,
    pub cache: CacheConfig,
}

#[derive(Debug, Clone)]
pub struct DatabaseConfig {
    pub url: String,
}

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

impl ServerConfig {
    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

#[derive(Debug, Clone)]
pub struct AnalyticsConfig {
    /// Path to a MaxMind City database. Geo fields degrade to `None` when
    /// unset.
    pub geoip_db_path: Option<String>,
    /// Maximum raw events scanned when rebuilding a summary without an
    /// aggregate document.
    pub fallback_scan_limit: i64,
}

#[derive(Debug, Clone)]
pub struct CacheConfig {
    pub max_entries: u64,
    pub click_flush_secs: u64,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        // Load .env if present; real environment variables win.
        dotenvy::dotenv().ok();

        Ok(Self {
            database: DatabaseConfig {
                url: env::var("DATABASE_URL").unwrap_or_else(|_| "sqlite://./snip.db".to_string()),
            },
            api_server: ServerConfig {
                host: env::var("API_HOST").unwrap_or_else(|_| "0.0.0.0".to_string()),
                port: parse_env("API_PORT", 8080)?,
            },
            redirect_server: ServerConfig {
                host: env::var("REDIRECT_HOST").unwrap_or_else(|_| "0.0.0.0".to_string()),
                port: parse_env("REDIRECT_PORT", 3000)?,
            },
            analytics: AnalyticsConfig {
                geoip_db_path: env::var("GEOIP_CITY_DB_PATH").ok().filter(|p| !p.is_empty()),
                fallback_scan_limit: parse_env("FALLBACK_SCAN_LIMIT", 1000)?,
            },
            cache: CacheConfig {
                max_entries: parse_env("CACHE_MAX_ENTRIES", 10_000)?,
                click_flush_secs: parse_env("CLICK_FLUSH_SECS", 10)?,
            },
        })
    }
}

fn parse_env<T: std::str::FromStr>(name: &str, default: T) -> Result<T>
where
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match env::var(name) {
        Ok(value) => value
            .parse()
            .with_context(|| format!("invalid value for {}", name)),
        Err(_) => Ok(default),
    }
}
