use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use rand::distributions::Alphanumeric;
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::models::{CreateLinkRequest, Link};
use crate::password;
use crate::storage::{Storage, StorageError};

pub struct AppState {
    pub storage: Arc<dyn Storage>,
    pub fallback_scan_limit: i64,
}

#[derive(Serialize)]
pub struct ErrorResponse {
    pub error: String,
}

#[derive(Serialize)]
pub struct SuccessResponse {
    pub message: String,
}

#[derive(Deserialize)]
pub struct ListQuery {
    #[serde(default = "default_limit")]
    pub limit: i64,
    #[serde(default)]
    pub offset: i64,
}

fn default_limit() -> i64 {
    50
}

const SHORT_CODE_LEN: usize = 7;

/// Generate a random short code
fn generate_short_code() -> String {
    let rng = rand::thread_rng();
    rng.sample_iter(&Alphanumeric)
        .take(SHORT_CODE_LEN)
        .map(char::from)
        .collect()
}

fn error(status: StatusCode, message: impl Into<String>) -> (StatusCode, Json<ErrorResponse>) {
    (
        status,
        Json(ErrorResponse {
            error: message.into(),
        }),
    )
}

fn validate_url(raw: &str) -> Result<(), (StatusCode, Json<ErrorResponse>)> {
    let parsed = url::Url::parse(raw)
        .map_err(|_| error(StatusCode::BAD_REQUEST, "Invalid URL"))?;

    if parsed.scheme() != "http" && parsed.scheme() != "https" {
        return Err(error(
            StatusCode::BAD_REQUEST,
            "URL must use http or https",
        ));
    }

    Ok(())
}

/// Create a new shortened link
pub async fn create_link(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<CreateLinkRequest>,
) -> Result<(StatusCode, Json<Link>), (StatusCode, Json<ErrorResponse>)> {
    if payload.url.is_empty() {
        return Err(error(StatusCode::BAD_REQUEST, "URL cannot be empty"));
    }
    validate_url(&payload.url)?;

    let password_hash = password::process_new_password(payload.password.as_deref())
        .map_err(|e| error(StatusCode::INTERNAL_SERVER_ERROR, e.to_string()))?;

    if let Some(custom) = payload.custom_code {
        if custom.is_empty() || custom.len() > 20 {
            return Err(error(
                StatusCode::BAD_REQUEST,
                "Custom code must be 1-20 characters",
            ));
        }
        if !custom.chars().all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_') {
            return Err(error(
                StatusCode::BAD_REQUEST,
                "Custom code may only contain letters, digits, '-' and '_'",
            ));
        }

        return match state
            .storage
            .create_link(
                &custom,
                &payload.url,
                None,
                payload.expires_at,
                password_hash.as_deref(),
            )
            .await
        {
            Ok(link) => Ok((StatusCode::CREATED, Json(link))),
            Err(StorageError::Conflict) => {
                Err(error(StatusCode::CONFLICT, "Short code already exists"))
            }
            Err(StorageError::Other(e)) => Err(error(
                StatusCode::INTERNAL_SERVER_ERROR,
                format!("Failed to create link: {}", e),
            )),
        };
    }

    // Generated codes can collide; retry with a fresh code a few times.
    for _ in 0..10 {
        let code = generate_short_code();
        match state
            .storage
            .create_link(
                &code,
                &payload.url,
                None,
                payload.expires_at,
                password_hash.as_deref(),
            )
            .await
        {
            Ok(link) => return Ok((StatusCode::CREATED, Json(link))),
            Err(StorageError::Conflict) => continue,
            Err(StorageError::Other(e)) => {
                return Err(error(
                    StatusCode::INTERNAL_SERVER_ERROR,
                    format!("Failed to create link: {}", e),
                ))
            }
        }
    }

    Err(error(
        StatusCode::INTERNAL_SERVER_ERROR,
        "Failed to generate unique short code",
    ))
}

/// Get a link by code
pub async fn get_link(
    State(state): State<Arc<AppState>>,
    Path(code): Path<String>,
) -> Result<Json<Link>, (StatusCode, Json<ErrorResponse>)> {
    match state.storage.get_link(&code).await {
        Ok(Some(link)) => Ok(Json(link)),
        Ok(None) => Err(error(StatusCode::NOT_FOUND, "Link not found")),
        Err(e) => Err(error(
            StatusCode::INTERNAL_SERVER_ERROR,
            format!("Failed to get link: {}", e),
        )),
    }
}

/// List links
pub async fn list_links(
    State(state): State<Arc<AppState>>,
    Query(query): Query<ListQuery>,
) -> Result<Json<Vec<Link>>, (StatusCode, Json<ErrorResponse>)> {
    match state.storage.list_links(query.limit, query.offset).await {
        Ok(links) => Ok(Json(links)),
        Err(e) => Err(error(
            StatusCode::INTERNAL_SERVER_ERROR,
            format!("Failed to list links: {}", e),
        )),
    }
}

/// Deactivate a link without removing its history
pub async fn deactivate_link(
    State(state): State<Arc<AppState>>,
    Path(code): Path<String>,
) -> Result<Json<SuccessResponse>, (StatusCode, Json<ErrorResponse>)> {
    match state.storage.deactivate_link(&code).await {
        Ok(true) => Ok(Json(SuccessResponse {
            message: "Link deactivated successfully".to_string(),
        })),
        Ok(false) => Err(error(StatusCode::NOT_FOUND, "Link not found")),
        Err(e) => Err(error(
            StatusCode::INTERNAL_SERVER_ERROR,
            format!("Failed to deactivate link: {}", e),
        )),
    }
}

/// Delete a link together with its click events and aggregate
pub async fn delete_link(
    State(state): State<Arc<AppState>>,
    Path(code): Path<String>,
) -> Result<Json<SuccessResponse>, (StatusCode, Json<ErrorResponse>)> {
    match state.storage.delete_link(&code).await {
        Ok(true) => Ok(Json(SuccessResponse {
            message: "Link deleted successfully".to_string(),
        })),
        Ok(false) => Err(error(StatusCode::NOT_FOUND, "Link not found")),
        Err(e) => Err(error(
            StatusCode::INTERNAL_SERVER_ERROR,
            format!("Failed to delete link: {}", e),
        )),
    }
}

#[derive(Deserialize)]
pub struct VerifyPasswordRequest {
    pub password: String,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct VerifyPasswordResponse {
    pub valid: bool,
    /// Destination URL, present only on a successful verification.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub original_url: Option<String>,
}

/// Verify the password of a protected link.
///
/// A wrong password is a normal `valid: false` answer, not an error. The
/// destination is only revealed when the password matches.
pub async fn verify_password(
    State(state): State<Arc<AppState>>,
    Path(code): Path<String>,
    Json(payload): Json<VerifyPasswordRequest>,
) -> Result<Json<VerifyPasswordResponse>, (StatusCode, Json<ErrorResponse>)> {
    let link = match state.storage.get_link(&code).await {
        Ok(Some(link)) => link,
        Ok(None) => return Err(error(StatusCode::NOT_FOUND, "Link not found")),
        Err(e) => {
            return Err(error(
                StatusCode::INTERNAL_SERVER_ERROR,
                format!("Failed to get link: {}", e),
            ))
        }
    };

    if link.is_expired(chrono::Utc::now().timestamp()) {
        return Err(error(StatusCode::GONE, "Link has expired"));
    }

    let Some(hash) = link.password_hash.as_deref() else {
        return Err(error(
            StatusCode::BAD_REQUEST,
            "Link is not password protected",
        ));
    };

    let valid = password::verify_password(&payload.password, hash)
        .map_err(|e| error(StatusCode::INTERNAL_SERVER_ERROR, e.to_string()))?;

    Ok(Json(VerifyPasswordResponse {
        valid,
        original_url: valid.then(|| link.original_url),
    }))
}

/// Health check endpoint
pub async fn health_check() -> Json<SuccessResponse> {
    Json(SuccessResponse {
        message: "OK".to_string(),
    })
}
