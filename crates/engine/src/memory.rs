//! In-process record store and idempotency log.
//!
//! Used by the API test harness and the dispatcher tests; each has switches
//! to simulate an unreachable backend.

use std::collections::HashMap;
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use duewatch_common::types::{IdempotencyMarker, PendingRecord, RosterMember};

use crate::idempotency::{IdempotencyLog, MarkerKey};
use crate::store::{CandidatePage, CandidateQuery, RecordStore, RosterDirectory, StoreError};

#[derive(Default)]
pub struct MemoryRecordStore {
    records: Mutex<Vec<PendingRecord>>,
    members: Mutex<Vec<RosterMember>>,
    fail_fetch: AtomicBool,
    fail_fan_out: AtomicBool,
}

impl MemoryRecordStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_record(&self, record: PendingRecord) {
        if let Ok(mut records) = self.records.lock() {
            records.push(record);
        }
    }

    pub fn add_member(&self, member: RosterMember) {
        if let Ok(mut members) = self.members.lock() {
            members.push(member);
        }
    }

    /// Make `fetch_candidates` fail.
    pub fn fail_fetch(&self, fail: bool) {
        self.fail_fetch.store(fail, Ordering::SeqCst);
    }

    /// Make the roster-wide lookups (`active_members*`) fail.
    pub fn fail_fan_out(&self, fail: bool) {
        self.fail_fan_out.store(fail, Ordering::SeqCst);
    }

    fn poisoned() -> StoreError {
        StoreError::Unavailable("memory store lock poisoned".to_string())
    }

    fn active_where(
        &self,
        keep: impl Fn(&RosterMember) -> bool,
    ) -> Result<Vec<RosterMember>, StoreError> {
        if self.fail_fan_out.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("roster offline".to_string()));
        }
        let members = self.members.lock().map_err(|_| Self::poisoned())?;
        Ok(members
            .iter()
            .filter(|m| m.active && keep(m))
            .cloned()
            .collect())
    }
}

#[async_trait]
impl RecordStore for MemoryRecordStore {
    async fn fetch_candidates(&self, query: &CandidateQuery) -> Result<CandidatePage, StoreError> {
        if self.fail_fetch.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("record store offline".to_string()));
        }

        let records = self.records.lock().map_err(|_| Self::poisoned())?;
        let mut matching: Vec<&PendingRecord> = records
            .iter()
            .filter(|r| r.domain() == query.domain)
            .filter(|r| query.after_id.as_deref().is_none_or(|after| r.id() > after))
            .collect();
        matching.sort_by(|a, b| a.id().cmp(b.id()));

        let page: Vec<&PendingRecord> = matching.into_iter().take(query.limit).collect();
        let next_cursor = if page.len() >= query.limit {
            page.last().map(|r| r.id().to_string())
        } else {
            None
        };

        Ok(CandidatePage {
            records: page
                .into_iter()
                .filter(|r| query.accepts(r))
                .cloned()
                .collect(),
            next_cursor,
        })
    }
}

#[async_trait]
impl RosterDirectory for MemoryRecordStore {
    async fn member(&self, id: &str) -> Result<Option<RosterMember>, StoreError> {
        let members = self.members.lock().map_err(|_| Self::poisoned())?;
        Ok(members.iter().find(|m| m.id == id).cloned())
    }

    async fn active_members(&self) -> Result<Vec<RosterMember>, StoreError> {
        self.active_where(|_| true)
    }

    async fn active_members_in_levels(
        &self,
        levels: &[String],
    ) -> Result<Vec<RosterMember>, StoreError> {
        self.active_where(|m| {
            m.hierarchy_level
                .as_ref()
                .is_some_and(|level| levels.contains(level))
        })
    }
}

#[derive(Default)]
pub struct MemoryIdempotencyLog {
    markers: Mutex<HashMap<String, IdempotencyMarker>>,
    fail_writes: AtomicBool,
}

impl MemoryIdempotencyLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make `try_claim` and `mark_fired` fail.
    pub fn fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    pub fn insert(&self, marker: IdempotencyMarker) {
        if let Ok(mut markers) = self.markers.lock() {
            markers.insert(marker.key.clone(), marker);
        }
    }

    pub fn contains(&self, key: &str) -> bool {
        self.markers
            .lock()
            .map(|m| m.contains_key(key))
            .unwrap_or(false)
    }

    pub fn keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = self
            .markers
            .lock()
            .map(|m| m.keys().cloned().collect())
            .unwrap_or_default();
        keys.sort();
        keys
    }

    pub fn len(&self) -> usize {
        self.markers.lock().map(|m| m.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn check_writable(&self) -> Result<(), StoreError> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("marker log offline".to_string()));
        }
        Ok(())
    }
}

#[async_trait]
impl IdempotencyLog for MemoryIdempotencyLog {
    async fn has_fired(&self, key: &MarkerKey) -> Result<bool, StoreError> {
        Ok(self.contains(&key.as_key()))
    }

    async fn try_claim(&self, key: &MarkerKey, at: DateTime<Utc>) -> Result<bool, StoreError> {
        self.check_writable()?;
        let mut markers = self
            .markers
            .lock()
            .map_err(|_| StoreError::Unavailable("marker log lock poisoned".to_string()))?;

        let k = key.as_key();
        if markers.contains_key(&k) {
            return Ok(false);
        }
        markers.insert(k, key.marker(at));
        Ok(true)
    }

    async fn mark_fired(&self, key: &MarkerKey, at: DateTime<Utc>) -> Result<(), StoreError> {
        self.check_writable()?;
        self.insert(key.marker(at));
        Ok(())
    }

    async fn purge_older_than(
        &self,
        cutoff: DateTime<Utc>,
        limit: usize,
    ) -> Result<u64, StoreError> {
        let mut markers = self
            .markers
            .lock()
            .map_err(|_| StoreError::Unavailable("marker log lock poisoned".to_string()))?;

        let mut expired: Vec<(DateTime<Utc>, String)> = markers
            .values()
            .filter(|m| m.fired_at < cutoff)
            .map(|m| (m.fired_at, m.key.clone()))
            .collect();
        expired.sort();

        let mut deleted = 0u64;
        for (_, key) in expired.into_iter().take(limit) {
            markers.remove(&key);
            deleted += 1;
        }
        Ok(deleted)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, NaiveDate};
    use duewatch_common::types::{Domain, Priority, RecordStatus, Task};

    fn task(id: &str, due_at: DateTime<Utc>) -> PendingRecord {
        PendingRecord::Task(Task {
            id: id.to_string(),
            title: id.to_string(),
            description: None,
            status: RecordStatus::Pending,
            priority: Priority::Medium,
            due_at,
            assigned_to: None,
            created_by: None,
            participants: vec![],
        })
    }

    #[tokio::test]
    async fn test_paging_walks_all_records_by_id() {
        let store = MemoryRecordStore::new();
        let now = Utc::now();
        for id in ["T3", "T1", "T5", "T2", "T4"] {
            store.add_record(task(id, now + Duration::days(1)));
        }

        let mut query = CandidateQuery::for_sweep(Domain::Task, now, Priority::Low, 2);
        let mut seen = Vec::new();
        loop {
            let page = store.fetch_candidates(&query).await.unwrap();
            seen.extend(page.records.iter().map(|r| r.id().to_string()));
            match page.next_cursor {
                Some(cursor) => query = query.after(Some(cursor)),
                None => break,
            }
        }
        assert_eq!(seen, vec!["T1", "T2", "T3", "T4", "T5"]);
    }

    #[tokio::test]
    async fn test_claim_is_create_if_absent() {
        let log = MemoryIdempotencyLog::new();
        let date = NaiveDate::from_ymd_opt(2026, 10, 18).unwrap();
        let key = MarkerKey::new(Domain::Task, "T1", "3d", date);

        assert!(!log.has_fired(&key).await.unwrap());
        assert!(log.try_claim(&key, Utc::now()).await.unwrap());
        assert!(!log.try_claim(&key, Utc::now()).await.unwrap());
        assert!(log.has_fired(&key).await.unwrap());

        log.mark_fired(&key, Utc::now()).await.unwrap();
        assert_eq!(log.len(), 1);
    }

    #[tokio::test]
    async fn test_purge_removes_oldest_first_up_to_limit() {
        let log = MemoryIdempotencyLog::new();
        let now = Utc::now();
        let date = NaiveDate::from_ymd_opt(2026, 9, 1).unwrap();
        for (i, age) in [40, 35, 31, 10].iter().enumerate() {
            let key = MarkerKey::new(Domain::Task, format!("T{}", i), "1d", date);
            log.insert(key.marker(now - Duration::days(*age)));
        }

        let cutoff = now - Duration::days(30);
        assert_eq!(log.purge_older_than(cutoff, 2).await.unwrap(), 2);
        assert_eq!(log.keys(), vec!["task:T2:1d:2026-09-01", "task:T3:1d:2026-09-01"]);
        assert_eq!(log.purge_older_than(cutoff, 2).await.unwrap(), 1);
        assert_eq!(log.len(), 1);
    }
}
