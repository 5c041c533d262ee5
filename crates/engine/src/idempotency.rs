//! Idempotency log: one marker per record + bucket + calendar day.
//!
//! Marker existence is the only thing the dispatcher consults before sending.
//! Writes are create-if-absent so two overlapping sweeps can't both win the
//! same key:
//! - Postgres: `INSERT ... ON CONFLICT DO NOTHING`, rows-affected decides
//! - Redis: `SET key value NX EX retention`, TTL handles retention

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use redis::aio::ConnectionManager;
use sqlx::PgPool;

use duewatch_common::types::{Domain, IdempotencyMarker};

use crate::store::StoreError;

/// Deterministic key `{domain}:{record_id}:{bucket}:{YYYY-MM-DD}`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct MarkerKey {
    pub domain: Domain,
    pub record_id: String,
    pub bucket: String,
    pub date: NaiveDate,
}

impl MarkerKey {
    pub fn new(
        domain: Domain,
        record_id: impl Into<String>,
        bucket: impl Into<String>,
        date: NaiveDate,
    ) -> Self {
        Self {
            domain,
            record_id: record_id.into(),
            bucket: bucket.into(),
            date,
        }
    }

    pub fn as_key(&self) -> String {
        format!(
            "{}:{}:{}:{}",
            self.domain.tag(),
            self.record_id,
            self.bucket,
            self.date.format("%Y-%m-%d")
        )
    }

    pub fn marker(&self, fired_at: DateTime<Utc>) -> IdempotencyMarker {
        IdempotencyMarker {
            key: self.as_key(),
            domain: self.domain,
            record_id: self.record_id.clone(),
            bucket: self.bucket.clone(),
            fired_at,
        }
    }
}

impl std::fmt::Display for MarkerKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.as_key())
    }
}

#[async_trait]
pub trait IdempotencyLog: Send + Sync {
    async fn has_fired(&self, key: &MarkerKey) -> Result<bool, StoreError>;

    /// Atomically create the marker if absent. `true` means this caller won
    /// the key and owns the send.
    async fn try_claim(&self, key: &MarkerKey, at: DateTime<Utc>) -> Result<bool, StoreError>;

    /// Unconditional write; repeating it is harmless.
    async fn mark_fired(&self, key: &MarkerKey, at: DateTime<Utc>) -> Result<(), StoreError>;

    /// Delete at most `limit` markers fired before `cutoff`.
    async fn purge_older_than(
        &self,
        cutoff: DateTime<Utc>,
        limit: usize,
    ) -> Result<u64, StoreError>;
}

/// Postgres-backed marker table.
#[derive(Clone)]
pub struct PgIdempotencyLog {
    pool: PgPool,
}

impl PgIdempotencyLog {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl IdempotencyLog for PgIdempotencyLog {
    async fn has_fired(&self, key: &MarkerKey) -> Result<bool, StoreError> {
        let exists: bool = sqlx::query_scalar(
            "SELECT EXISTS(SELECT 1 FROM notification_markers WHERE key = $1)",
        )
        .bind(key.as_key())
        .fetch_one(&self.pool)
        .await?;

        Ok(exists)
    }

    async fn try_claim(&self, key: &MarkerKey, at: DateTime<Utc>) -> Result<bool, StoreError> {
        let result = sqlx::query(
            r#"
            INSERT INTO notification_markers (key, domain, record_id, bucket, fired_at)
            VALUES ($1, $2, $3, $4, $5)
            ON CONFLICT (key) DO NOTHING
            "#,
        )
        .bind(key.as_key())
        .bind(key.domain.tag())
        .bind(&key.record_id)
        .bind(&key.bucket)
        .bind(at)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    async fn mark_fired(&self, key: &MarkerKey, at: DateTime<Utc>) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO notification_markers (key, domain, record_id, bucket, fired_at)
            VALUES ($1, $2, $3, $4, $5)
            ON CONFLICT (key) DO UPDATE SET fired_at = EXCLUDED.fired_at
            "#,
        )
        .bind(key.as_key())
        .bind(key.domain.tag())
        .bind(&key.record_id)
        .bind(&key.bucket)
        .bind(at)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn purge_older_than(
        &self,
        cutoff: DateTime<Utc>,
        limit: usize,
    ) -> Result<u64, StoreError> {
        let result = sqlx::query(
            r#"
            DELETE FROM notification_markers
            WHERE key IN (
                SELECT key FROM notification_markers
                WHERE fired_at < $1
                ORDER BY fired_at
                LIMIT $2
            )
            "#,
        )
        .bind(cutoff)
        .bind(limit as i64)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected())
    }
}

/// Redis-backed markers; retention is the key TTL.
#[derive(Clone)]
pub struct RedisIdempotencyLog {
    conn: ConnectionManager,
    ttl_secs: u64,
}

impl RedisIdempotencyLog {
    pub fn new(conn: ConnectionManager, retention_days: i64) -> Self {
        Self {
            conn,
            ttl_secs: (retention_days.max(1) as u64) * 86_400,
        }
    }

    fn redis_key(key: &MarkerKey) -> String {
        format!("notification:marker:{}", key.as_key())
    }
}

#[async_trait]
impl IdempotencyLog for RedisIdempotencyLog {
    async fn has_fired(&self, key: &MarkerKey) -> Result<bool, StoreError> {
        let mut conn = self.conn.clone();
        let exists: bool = redis::cmd("EXISTS")
            .arg(Self::redis_key(key))
            .query_async(&mut conn)
            .await?;
        Ok(exists)
    }

    async fn try_claim(&self, key: &MarkerKey, at: DateTime<Utc>) -> Result<bool, StoreError> {
        let mut conn = self.conn.clone();
        let value = serde_json::to_string(&key.marker(at))?;

        // Some("OK") when set, None when the key already existed
        let result: Option<String> = redis::cmd("SET")
            .arg(Self::redis_key(key))
            .arg(value)
            .arg("NX")
            .arg("EX")
            .arg(self.ttl_secs)
            .query_async(&mut conn)
            .await?;

        Ok(result.is_some())
    }

    async fn mark_fired(&self, key: &MarkerKey, at: DateTime<Utc>) -> Result<(), StoreError> {
        let mut conn = self.conn.clone();
        let value = serde_json::to_string(&key.marker(at))?;

        let _: () = redis::cmd("SET")
            .arg(Self::redis_key(key))
            .arg(value)
            .arg("EX")
            .arg(self.ttl_secs)
            .query_async(&mut conn)
            .await?;

        Ok(())
    }

    async fn purge_older_than(
        &self,
        _cutoff: DateTime<Utc>,
        _limit: usize,
    ) -> Result<u64, StoreError> {
        Ok(0)
    }
}
