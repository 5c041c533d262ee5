//! Duewatch API server binary entrypoint.

use std::net::SocketAddr;

use tower_http::cors::CorsLayer;
use tower_http::limit::RequestBodyLimitLayer;
use tower_http::trace::TraceLayer;
use tracing_subscriber::EnvFilter;

use duewatch_common::config::AppConfig;
use duewatch_common::db::create_pool;
use duewatch_engine::runtime::SweepRuntime;

use duewatch_api::routes::create_router;
use duewatch_api::state::AppState;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| {
            EnvFilter::new("duewatch_api=debug,duewatch_engine=info,tower_http=debug")
        }))
        .init();

    tracing::info!("Starting Duewatch API server...");

    let config = AppConfig::from_env()?;

    let pool = create_pool(&config.database_url, config.db_max_connections).await?;
    let runtime = SweepRuntime::connect(&config, pool).await?;

    if config.sweep_trigger_token.is_none() {
        tracing::warn!("SWEEP_TRIGGER_TOKEN not set; manual endpoints will answer 503");
    }

    let state = AppState::from_runtime(runtime, config.sweep_trigger_token.clone());

    let app = create_router(state)
        .layer(RequestBodyLimitLayer::new(64 * 1024))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive());

    let addr: SocketAddr = config.api_bind_addr.parse().map_err(|_| {
        anyhow::anyhow!("API_BIND_ADDR must be host:port, got '{}'", config.api_bind_addr)
    })?;
    tracing::info!("API server listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            tokio::signal::ctrl_c().await.ok();
            tracing::info!("Received shutdown signal");
        })
        .await?;

    Ok(())
}
