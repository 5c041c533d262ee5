use duewatch_common::config::AppConfig;
use duewatch_common::db;
use duewatch_engine::runtime::SweepRuntime;
use duewatch_scheduler::schedule::{Scheduler, job_table};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "duewatch_scheduler=info,duewatch_engine=info,duewatch_notifier=info".into()),
        )
        .json()
        .init();

    tracing::info!("Duewatch scheduler starting...");

    let config = AppConfig::from_env()?;

    // Fail fast on a bad cron before touching any infrastructure
    let jobs = job_table(&config.schedules)?;

    let pool = db::create_pool(&config.database_url, config.db_max_connections).await?;
    db::run_migrations(&pool).await?;

    let runtime = SweepRuntime::connect(&config, pool).await?;
    let scheduler = Scheduler::new(runtime, config.timezone, jobs);

    tracing::info!(timezone = %config.timezone, "Scheduler running");

    tokio::select! {
        result = scheduler.run() => {
            if let Err(e) = result {
                tracing::error!(error = %e, "Scheduler exited with error");
                return Err(e);
            }
        }
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("Received shutdown signal, stopping gracefully...");
        }
    }

    tracing::info!("Duewatch scheduler stopped.");
    Ok(())
}
