//! Liveness probe. Reports the timezone sweeps evaluate calendar days in.

use axum::extract::State;
use axum::routing::get;
use axum::{Json, Router};
use serde_json::json;

use crate::state::AppState;

pub fn router() -> Router<AppState> {
    Router::new().route("/health", get(health_check))
}

async fn health_check(State(state): State<AppState>) -> Json<serde_json::Value> {
    Json(json!({
        "status": "ok",
        "service": "duewatch-api",
        "version": env!("CARGO_PKG_VERSION"),
        "timezone": state.dispatcher.policy().timezone().name(),
        "manual_triggers": state.trigger_token.is_some(),
    }))
}
