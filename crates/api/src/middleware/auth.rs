//! Static bearer-token gate for the operational endpoints.
//!
//! `TriggerAuth` is an Axum extractor: handlers that take it only run when
//! the request carries `Authorization: Bearer <SWEEP_TRIGGER_TOKEN>`.

use axum::extract::FromRequestParts;
use axum::http::request::Parts;

use duewatch_common::error::AppError;

use crate::state::AppState;

/// Proof that the caller presented the configured trigger token.
#[derive(Debug, Clone, Copy)]
pub struct TriggerAuth;

/// Compare without short-circuiting on the first differing byte.
fn tokens_match(presented: &str, expected: &str) -> bool {
    let (a, b) = (presented.as_bytes(), expected.as_bytes());
    if a.len() != b.len() {
        return false;
    }
    a.iter().zip(b).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}

/// Check an `Authorization` header value against the configured token.
pub fn authorize(header: Option<&str>, expected: Option<&str>) -> Result<TriggerAuth, AppError> {
    let Some(expected) = expected else {
        return Err(AppError::Unavailable(
            "Manual triggers are disabled: SWEEP_TRIGGER_TOKEN is not set".to_string(),
        ));
    };

    if let Some(value) = header
        && let Some(token) = value.strip_prefix("Bearer ")
        && tokens_match(token.trim(), expected)
    {
        return Ok(TriggerAuth);
    }

    Err(AppError::Auth(
        "Missing or invalid Authorization header. Use 'Bearer <token>'".to_string(),
    ))
}

impl FromRequestParts<AppState> for TriggerAuth {
    type Rejection = AppError;

    fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> impl std::future::Future<Output = Result<Self, Self::Rejection>> + Send {
        let result = authorize(
            parts
                .headers
                .get("authorization")
                .and_then(|v| v.to_str().ok()),
            state.trigger_token.as_deref(),
        );

        if result.is_err() {
            tracing::warn!(path = %parts.uri.path(), "Rejected manual trigger request");
        }

        async move { result }
    }
}
