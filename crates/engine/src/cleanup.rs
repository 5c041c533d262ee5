//! Retention cleanup: deletes idempotency markers past the retention window,
//! bounded per invocation.

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;

use crate::idempotency::IdempotencyLog;
use crate::store::StoreError;

const DEFAULT_RETENTION_DAYS: i64 = 30;
const DEFAULT_BATCH_LIMIT: usize = 500;

#[derive(Debug, Clone, Serialize)]
pub struct CleanupReport {
    pub cutoff: DateTime<Utc>,
    pub deleted: u64,
    /// Whether the batch limit was hit (more markers may remain).
    pub truncated: bool,
}

pub struct RetentionCleanup {
    log: Arc<dyn IdempotencyLog>,
    retention: Duration,
    batch_limit: usize,
}

impl RetentionCleanup {
    pub fn new(log: Arc<dyn IdempotencyLog>, retention_days: i64, batch_limit: usize) -> Self {
        Self {
            log,
            retention: Duration::days(retention_days.max(1)),
            batch_limit: batch_limit.max(1),
        }
    }

    pub fn with_defaults(log: Arc<dyn IdempotencyLog>) -> Self {
        Self::new(log, DEFAULT_RETENTION_DAYS, DEFAULT_BATCH_LIMIT)
    }

    pub async fn run(&self) -> Result<CleanupReport, StoreError> {
        self.run_at(Utc::now()).await
    }

    pub async fn run_at(&self, now: DateTime<Utc>) -> Result<CleanupReport, StoreError> {
        let cutoff = now - self.retention;
        let deleted = self.log.purge_older_than(cutoff, self.batch_limit).await?;
        let truncated = deleted >= self.batch_limit as u64;

        tracing::info!(%cutoff, deleted, truncated, "Marker retention cleanup finished");

        Ok(CleanupReport {
            cutoff,
            deleted,
            truncated,
        })
    }
}
