use serde::{Deserialize, Serialize};
use sqlx::FromRow;

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Link {
    pub id: i64,
    pub short_code: String,
    pub original_url: String,
    pub created_at: i64,
    pub created_by: Option<String>,
    pub expires_at: Option<i64>,
    /// Argon2 hash; never serialized into API responses.
    #[serde(skip_serializing, default)]
    pub password_hash: Option<String>,
    pub clicks: i64,
    pub is_active: bool,
}

impl Link {
    pub fn is_expired(&self, now: i64) -> bool {
        self.expires_at.is_some_and(|exp| exp <= now)
    }

    pub fn is_protected(&self) -> bool {
        self.password_hash.is_some()
    }
}

#[derive(Debug, Deserialize)]
pub struct CreateLinkRequest {
    pub url: String,
    pub custom_code: Option<String>,
    pub expires_at: Option<i64>,
    pub password: Option<String>,
}
