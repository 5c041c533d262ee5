pub mod health;
pub mod maintenance;
pub mod sweeps;

use axum::Router;

use crate::state::AppState;

/// Build the complete API router with all routes.
pub fn create_router(state: AppState) -> Router {
    Router::new()
        .merge(health::router())
        .merge(sweeps::router())
        .merge(maintenance::router())
        .with_state(state)
}
