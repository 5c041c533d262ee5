use chrono_tz::Tz;

/// Where idempotency markers are stored.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IdempotencyBackend {
    /// One row per marker in `notification_markers`; purged by the cleanup job.
    Postgres,
    /// `SET NX EX` keys; retention handled by TTL expiry.
    Redis,
}

impl std::str::FromStr for IdempotencyBackend {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "postgres" | "postgresql" | "pg" => Ok(IdempotencyBackend::Postgres),
            "redis" => Ok(IdempotencyBackend::Redis),
            other => Err(anyhow::anyhow!(
                "IDEMPOTENCY_BACKEND must be 'postgres' or 'redis', got '{}'",
                other
            )),
        }
    }
}

/// Cron expressions for each periodic job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScheduleConfig {
    pub task: String,
    pub task_urgent: String,
    pub agenda: String,
    pub agenda_urgent: String,
    pub financial: String,
    pub financial_urgent: String,
    pub cleanup: String,
}

impl Default for ScheduleConfig {
    fn default() -> Self {
        Self {
            task: "0 8-18/2 * * 1-5".to_string(),
            task_urgent: "30 * * * *".to_string(),
            agenda: "*/30 * * * *".to_string(),
            agenda_urgent: "*/15 * * * *".to_string(),
            financial: "0 8-18/2 * * *".to_string(),
            financial_urgent: "0 * * * *".to_string(),
            cleanup: "0 3 * * *".to_string(),
        }
    }
}

/// Global application configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct AppConfig {
    /// PostgreSQL connection string
    pub database_url: String,

    /// Maximum number of PostgreSQL connections in the pool (default: 10)
    pub db_max_connections: u32,

    /// Redis connection string (only used by the Redis idempotency backend)
    pub redis_url: String,

    pub idempotency_backend: IdempotencyBackend,

    /// Zone used for calendar-day math and cron evaluation
    pub timezone: Tz,

    /// Candidate page size per record store query (default: 200)
    pub sweep_batch_size: usize,

    /// Tolerance window for agenda checkpoints, in minutes (default: 30)
    pub agenda_window_minutes: i64,

    /// How long idempotency markers are kept (default: 30 days)
    pub marker_retention_days: i64,

    /// Maximum markers deleted per cleanup invocation (default: 500)
    pub marker_purge_batch_size: usize,

    /// Whether the outbound mail queue is set up
    pub email_queue_enabled: bool,

    /// Chat gateway REST root
    pub chat_gateway_base_url: String,

    /// Row in `chat_gateway_settings` holding the gateway credentials
    pub chat_tenant_id: String,

    /// Country prefix applied when normalizing phone numbers
    pub chat_default_country_code: String,

    /// Static bearer token for the manual sweep endpoints. `None` disables them.
    pub sweep_trigger_token: Option<String>,

    /// API listen address
    pub api_bind_addr: String,

    pub schedules: ScheduleConfig,
}

impl AppConfig {
    /// Load configuration from environment variables.
    pub fn from_env() -> anyhow::Result<Self> {
        dotenvy::dotenv().ok();
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build configuration from an arbitrary key lookup.
    pub fn from_lookup<F>(lookup: F) -> anyhow::Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = ScheduleConfig::default();
        let parsed = |key: &str, default: &str| lookup(key).unwrap_or_else(|| default.to_string());

        let timezone_name = parsed("SCHEDULER_TIMEZONE", "America/Sao_Paulo");
        let timezone: Tz = timezone_name.parse().map_err(|_| {
            anyhow::anyhow!(
                "SCHEDULER_TIMEZONE must be an IANA zone name, got '{}'",
                timezone_name
            )
        })?;

        Ok(Self {
            database_url: lookup("DATABASE_URL")
                .ok_or_else(|| anyhow::anyhow!("DATABASE_URL environment variable is required"))?,
            db_max_connections: parsed("DB_MAX_CONNECTIONS", "10")
                .parse()
                .map_err(|_| anyhow::anyhow!("DB_MAX_CONNECTIONS must be a valid u32"))?,
            redis_url: parsed("REDIS_URL", "redis://localhost:6379"),
            idempotency_backend: parsed("IDEMPOTENCY_BACKEND", "postgres").parse()?,
            timezone,
            sweep_batch_size: parsed("SWEEP_BATCH_SIZE", "200")
                .parse()
                .map_err(|_| anyhow::anyhow!("SWEEP_BATCH_SIZE must be a valid usize"))?,
            agenda_window_minutes: parsed("AGENDA_WINDOW_MINUTES", "30")
                .parse()
                .map_err(|_| anyhow::anyhow!("AGENDA_WINDOW_MINUTES must be a valid i64"))?,
            marker_retention_days: parsed("MARKER_RETENTION_DAYS", "30")
                .parse()
                .map_err(|_| anyhow::anyhow!("MARKER_RETENTION_DAYS must be a valid i64"))?,
            marker_purge_batch_size: parsed("MARKER_PURGE_BATCH_SIZE", "500")
                .parse()
                .map_err(|_| anyhow::anyhow!("MARKER_PURGE_BATCH_SIZE must be a valid usize"))?,
            email_queue_enabled: parsed("EMAIL_QUEUE_ENABLED", "true")
                .parse()
                .map_err(|_| anyhow::anyhow!("EMAIL_QUEUE_ENABLED must be true or false"))?,
            chat_gateway_base_url: parsed("CHAT_GATEWAY_BASE_URL", "https://api.z-api.io"),
            chat_tenant_id: parsed("CHAT_TENANT_ID", "default"),
            chat_default_country_code: parsed("CHAT_DEFAULT_COUNTRY_CODE", "55"),
            sweep_trigger_token: lookup("SWEEP_TRIGGER_TOKEN").filter(|t| !t.trim().is_empty()),
            api_bind_addr: parsed("API_BIND_ADDR", "0.0.0.0:3000"),
            schedules: ScheduleConfig {
                task: parsed("SCHEDULE_TASK", &defaults.task),
                task_urgent: parsed("SCHEDULE_TASK_URGENT", &defaults.task_urgent),
                agenda: parsed("SCHEDULE_AGENDA", &defaults.agenda),
                agenda_urgent: parsed("SCHEDULE_AGENDA_URGENT", &defaults.agenda_urgent),
                financial: parsed("SCHEDULE_FINANCIAL", &defaults.financial),
                financial_urgent: parsed("SCHEDULE_FINANCIAL_URGENT", &defaults.financial_urgent),
                cleanup: parsed("SCHEDULE_CLEANUP", &defaults.cleanup),
            },
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_defaults() {
        let config = AppConfig::from_lookup(lookup_from(&[("DATABASE_URL", "postgres://x")]))
            .unwrap();
        assert_eq!(config.idempotency_backend, IdempotencyBackend::Postgres);
        assert_eq!(config.timezone, chrono_tz::America::Sao_Paulo);
        assert_eq!(config.marker_retention_days, 30);
        assert_eq!(config.marker_purge_batch_size, 500);
        assert_eq!(config.agenda_window_minutes, 30);
        assert!(config.email_queue_enabled);
        assert!(config.sweep_trigger_token.is_none());
        assert_eq!(config.schedules, ScheduleConfig::default());
    }

    #[test]
    fn test_database_url_required() {
        assert!(AppConfig::from_lookup(lookup_from(&[])).is_err());
    }

    #[test]
    fn test_overrides() {
        let config = AppConfig::from_lookup(lookup_from(&[
            ("DATABASE_URL", "postgres://x"),
            ("IDEMPOTENCY_BACKEND", "Redis"),
            ("SCHEDULER_TIMEZONE", "UTC"),
            ("SWEEP_TRIGGER_TOKEN", "s3cret"),
            ("SCHEDULE_AGENDA", "*/10 * * * *"),
        ]))
        .unwrap();
        assert_eq!(config.idempotency_backend, IdempotencyBackend::Redis);
        assert_eq!(config.timezone, chrono_tz::UTC);
        assert_eq!(config.sweep_trigger_token.as_deref(), Some("s3cret"));
        assert_eq!(config.schedules.agenda, "*/10 * * * *");
    }

    #[test]
    fn test_invalid_values_rejected() {
        assert!(
            AppConfig::from_lookup(lookup_from(&[
                ("DATABASE_URL", "postgres://x"),
                ("SCHEDULER_TIMEZONE", "Mars/Olympus"),
            ]))
            .is_err()
        );
        assert!(
            AppConfig::from_lookup(lookup_from(&[
                ("DATABASE_URL", "postgres://x"),
                ("IDEMPOTENCY_BACKEND", "sqlite"),
            ]))
            .is_err()
        );
        assert!(
            AppConfig::from_lookup(lookup_from(&[
                ("DATABASE_URL", "postgres://x"),
                ("SWEEP_BATCH_SIZE", "lots"),
            ]))
            .is_err()
        );
    }
}
