//! Manual "run sweep now" trigger, one per domain.

use axum::extract::{Path, Query, State};
use axum::routing::post;
use axum::{Json, Router};
use serde::Deserialize;
use serde_json::json;

use duewatch_common::error::AppError;
use duewatch_common::types::Domain;
use duewatch_engine::dispatcher::SweepKind;

use crate::middleware::auth::TriggerAuth;
use crate::state::AppState;

pub fn router() -> Router<AppState> {
    Router::new().route("/api/sweeps/{domain}", post(run_sweep))
}

#[derive(Debug, Default, Deserialize)]
pub struct SweepParams {
    pub kind: Option<String>,
}

/// POST /api/sweeps/{domain}: Run one sweep of `domain` immediately.
async fn run_sweep(
    _auth: TriggerAuth,
    State(state): State<AppState>,
    Path(domain): Path<String>,
    Query(params): Query<SweepParams>,
) -> Result<Json<serde_json::Value>, AppError> {
    let domain: Domain = domain.parse().map_err(AppError::Validation)?;
    let kind: SweepKind = match params.kind.as_deref() {
        Some(raw) => raw.parse().map_err(AppError::Validation)?,
        None => SweepKind::Regular,
    };

    tracing::info!(%domain, %kind, "Manual sweep requested");

    let report = state
        .dispatcher
        .run_sweep(domain, kind)
        .await
        .map_err(|e| AppError::Internal(e.to_string()))?;

    Ok(Json(json!({
        "success": true,
        "message": report.summary(),
        "timestamp": chrono::Utc::now().to_rfc3339(),
        "report": report,
    })))
}
