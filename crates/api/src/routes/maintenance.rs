//! Manual idempotency-marker purge.

use axum::extract::State;
use axum::routing::post;
use axum::{Json, Router};
use serde_json::json;

use duewatch_common::error::AppError;

use crate::middleware::auth::TriggerAuth;
use crate::state::AppState;

pub fn router() -> Router<AppState> {
    Router::new().route("/api/maintenance/purge-markers", post(purge_markers))
}

/// POST /api/maintenance/purge-markers: One bounded retention cleanup pass.
async fn purge_markers(
    _auth: TriggerAuth,
    State(state): State<AppState>,
) -> Result<Json<serde_json::Value>, AppError> {
    let report = state
        .cleanup
        .run()
        .await
        .map_err(|e| AppError::Internal(e.to_string()))?;

    Ok(Json(json!({
        "success": true,
        "message": format!("Deleted {} markers", report.deleted),
        "timestamp": chrono::Utc::now().to_rfc3339(),
        "deleted": report.deleted,
        "truncated": report.truncated,
        "cutoff": report.cutoff.to_rfc3339(),
    })))
}
