use redis::Client;
use redis::aio::ConnectionManager;

/// Connect the Redis marker backend and verify it answers before sweeps start.
pub async fn create_redis_pool(redis_url: &str) -> anyhow::Result<ConnectionManager> {
    let client = Client::open(redis_url)?;
    let mut manager = ConnectionManager::new(client).await?;

    let pong: String = redis::cmd("PING").query_async(&mut manager).await?;
    tracing::info!(reply = %pong, "Connected to Redis marker backend");
    Ok(manager)
}
