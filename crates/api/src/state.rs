//! Shared application state for the Axum API server.

use std::sync::Arc;

use duewatch_engine::cleanup::RetentionCleanup;
use duewatch_engine::dispatcher::Dispatcher;
use duewatch_engine::runtime::SweepRuntime;

/// Application state shared across all route handlers via Axum `State`.
#[derive(Clone)]
pub struct AppState {
    pub dispatcher: Arc<Dispatcher>,
    pub cleanup: Arc<RetentionCleanup>,
    /// `None` disables the manual endpoints.
    pub trigger_token: Option<Arc<str>>,
}

impl AppState {
    pub fn new(
        dispatcher: Arc<Dispatcher>,
        cleanup: Arc<RetentionCleanup>,
        trigger_token: Option<String>,
    ) -> Self {
        Self {
            dispatcher,
            cleanup,
            trigger_token: trigger_token.map(Arc::from),
        }
    }

    pub fn from_runtime(runtime: SweepRuntime, trigger_token: Option<String>) -> Self {
        Self::new(runtime.dispatcher, runtime.cleanup, trigger_token)
    }
}
