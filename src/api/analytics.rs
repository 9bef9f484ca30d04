use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use serde::Serialize;
use std::sync::Arc;

use crate::analytics::fallback;
use crate::analytics::models::{AggregateRecord, LegacySummary};

use super::handlers::{AppState, ErrorResponse};

/// Analytics payload for one short code.
///
/// `Professional` is the incrementally maintained aggregate; `Legacy` is the
/// degraded summary rebuilt from raw events when no aggregate exists yet.
#[derive(Serialize)]
#[serde(untagged)]
pub enum AnalyticsData {
    Professional(AggregateRecord),
    Legacy(LegacySummary),
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AnalyticsResponse {
    pub short_code: String,
    pub data: AnalyticsData,
}

/// Fetch analytics for a short code.
///
/// Never scans raw events when an aggregate document exists; the fallback
/// scan is bounded either way.
pub async fn get_analytics(
    State(state): State<Arc<AppState>>,
    Path(code): Path<String>,
) -> Result<Json<AnalyticsResponse>, (StatusCode, Json<ErrorResponse>)> {
    match state.storage.get_link(&code).await {
        Ok(Some(_)) => {}
        Ok(None) => {
            return Err((
                StatusCode::NOT_FOUND,
                Json(ErrorResponse {
                    error: "Link not found".to_string(),
                }),
            ))
        }
        Err(e) => {
            return Err((
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(ErrorResponse {
                    error: format!("Failed to get link: {}", e),
                }),
            ))
        }
    }

    match state.storage.get_aggregate(&code).await {
        Ok(Some((record, _version))) => Ok(Json(AnalyticsResponse {
            short_code: code,
            data: AnalyticsData::Professional(record),
        })),
        Ok(None) => {
            let summary = fallback::rebuild(state.storage.as_ref(), &code, state.fallback_scan_limit)
                .await
                .map_err(|e| {
                    (
                        StatusCode::INTERNAL_SERVER_ERROR,
                        Json(ErrorResponse {
                            error: format!("Failed to rebuild analytics: {}", e),
                        }),
                    )
                })?;

            Ok(Json(AnalyticsResponse {
                short_code: code,
                data: AnalyticsData::Legacy(summary),
            }))
        }
        Err(e) => Err((
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(ErrorResponse {
                error: format!("Failed to get analytics: {}", e),
            }),
        )),
    }
}
