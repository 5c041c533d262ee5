//! Production wiring: builds the dispatcher and cleanup job from `AppConfig`.

use std::sync::Arc;

use sqlx::PgPool;

use duewatch_common::config::{AppConfig, IdempotencyBackend};
use duewatch_common::redis_pool::create_redis_pool;
use duewatch_notifier::DeliveryChannel;
use duewatch_notifier::chat::{ChatGatewayChannel, PgChatSettingsStore};
use duewatch_notifier::email::EmailQueueChannel;

use crate::cadence::CadencePolicy;
use crate::cleanup::RetentionCleanup;
use crate::dispatcher::Dispatcher;
use crate::idempotency::{IdempotencyLog, PgIdempotencyLog, RedisIdempotencyLog};
use crate::store::PgRecordStore;

/// Shared services used by both the scheduler and the API.
#[derive(Clone)]
pub struct SweepRuntime {
    pub dispatcher: Arc<Dispatcher>,
    pub cleanup: Arc<RetentionCleanup>,
}

impl SweepRuntime {
    pub async fn connect(config: &AppConfig, pool: PgPool) -> anyhow::Result<Self> {
        let log: Arc<dyn IdempotencyLog> = match config.idempotency_backend {
            IdempotencyBackend::Postgres => Arc::new(PgIdempotencyLog::new(pool.clone())),
            IdempotencyBackend::Redis => {
                let conn = create_redis_pool(&config.redis_url).await?;
                Arc::new(RedisIdempotencyLog::new(conn, config.marker_retention_days))
            }
        };

        let store = Arc::new(PgRecordStore::new(pool.clone()));

        let channels: Vec<Arc<dyn DeliveryChannel>> = vec![
            Arc::new(EmailQueueChannel::new(
                pool.clone(),
                config.email_queue_enabled,
            )),
            Arc::new(ChatGatewayChannel::new(
                config.chat_gateway_base_url.clone(),
                config.chat_tenant_id.clone(),
                config.chat_default_country_code.clone(),
                Arc::new(PgChatSettingsStore::new(pool)),
            )),
        ];

        let policy = CadencePolicy::new(config.timezone, config.agenda_window_minutes);
        let dispatcher = Dispatcher::new(store.clone(), store, log.clone(), channels, policy)
            .with_batch_size(config.sweep_batch_size);

        let cleanup = RetentionCleanup::new(
            log,
            config.marker_retention_days,
            config.marker_purge_batch_size,
        );

        tracing::info!(
            backend = ?config.idempotency_backend,
            timezone = %config.timezone,
            batch_size = config.sweep_batch_size,
            "Sweep runtime ready"
        );

        Ok(Self {
            dispatcher: Arc::new(dispatcher),
            cleanup: Arc::new(cleanup),
        })
    }
}
