//! Record store: read path for sweep candidates and roster lookups.
//!
//! Raw rows are written by the CRUD layer with free-form status/priority
//! labels; they are normalized to enums here and never compared as strings
//! downstream. Rows that fail to normalize are logged and skipped.

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use sqlx::PgPool;
use thiserror::Error;

use duewatch_common::types::{
    AgendaEvent, Domain, FinancialDue, NotificationPreference, Participant, PendingRecord,
    Priority, RecordStatus, RosterMember, Task,
};

/// Failures reading or writing shared state.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Redis error: {0}")]
    Redis(#[from] redis::RedisError),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Store unavailable: {0}")]
    Unavailable(String),
}

/// One page of a candidate scan.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CandidateQuery {
    pub domain: Domain,
    /// Exclusive lower bound on the due/start instant.
    pub due_after: Option<DateTime<Utc>>,
    /// Inclusive upper bound on the due/start instant.
    pub due_before: DateTime<Utc>,
    pub min_priority: Priority,
    /// Keyset cursor: only ids strictly greater than this.
    pub after_id: Option<String>,
    pub limit: usize,
}

impl CandidateQuery {
    /// Query covering every checkpoint of `domain` as seen from `now`.
    ///
    /// - Tasks: anything due within 8 days, overdue included
    /// - Agenda: events starting in the next 25 hours
    /// - Financial: anything due within 31 days, overdue included
    pub fn for_sweep(domain: Domain, now: DateTime<Utc>, min_priority: Priority, limit: usize) -> Self {
        let (due_after, due_before) = match domain {
            Domain::Task => (None, now + Duration::days(8)),
            Domain::Agenda => (Some(now), now + Duration::hours(25)),
            Domain::Financial => (None, now + Duration::days(31)),
        };

        Self {
            domain,
            due_after,
            due_before,
            min_priority,
            after_id: None,
            limit: limit.max(1),
        }
    }

    pub fn after(mut self, cursor: Option<String>) -> Self {
        self.after_id = cursor;
        self
    }

    /// Whether a normalized record belongs in this query's result.
    pub fn accepts(&self, record: &PendingRecord) -> bool {
        let due = record.due_at();
        record.domain() == self.domain
            && !record.status().is_terminal()
            && record.priority() >= self.min_priority
            && due <= self.due_before
            && self.due_after.is_none_or(|after| due > after)
    }
}

/// Records from one page plus the cursor for the next one.
#[derive(Debug, Clone, Default)]
pub struct CandidatePage {
    pub records: Vec<PendingRecord>,
    /// `None` once the scan is exhausted.
    pub next_cursor: Option<String>,
}

/// Source of notification candidates.
#[async_trait]
pub trait RecordStore: Send + Sync {
    async fn fetch_candidates(&self, query: &CandidateQuery) -> Result<CandidatePage, StoreError>;
}

/// Point lookups into the org-wide roster.
#[async_trait]
pub trait RosterDirectory: Send + Sync {
    async fn member(&self, id: &str) -> Result<Option<RosterMember>, StoreError>;

    async fn active_members(&self) -> Result<Vec<RosterMember>, StoreError>;

    async fn active_members_in_levels(
        &self,
        levels: &[String],
    ) -> Result<Vec<RosterMember>, StoreError>;
}

/// Parse a participant list stored either as an array of ids or as an array
/// of `{member_id|id|user_id, notification|preference}` objects.
pub fn parse_participants(value: &serde_json::Value) -> Vec<Participant> {
    let Some(items) = value.as_array() else {
        return Vec::new();
    };

    items
        .iter()
        .filter_map(|item| match item {
            serde_json::Value::String(id) if !id.is_empty() => Some(Participant::new(id.clone())),
            serde_json::Value::Object(map) => {
                let id = ["member_id", "id", "user_id", "userId"]
                    .iter()
                    .find_map(|k| map.get(*k).and_then(|v| v.as_str()))
                    .filter(|id| !id.is_empty())?;
                let notification = ["notification", "preference", "notificationPreference"]
                    .iter()
                    .find_map(|k| map.get(*k).and_then(|v| v.as_str()))
                    .and_then(NotificationPreference::parse);
                Some(Participant {
                    member_id: id.to_string(),
                    notification,
                })
            }
            _ => None,
        })
        .collect()
}

/// Parse a JSON array of strings, ignoring anything else.
pub fn parse_string_list(value: &serde_json::Value) -> Vec<String> {
    value
        .as_array()
        .map(|items| {
            items
                .iter()
                .filter_map(|v| v.as_str())
                .filter(|s| !s.trim().is_empty())
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default()
}

fn normalize(
    domain: Domain,
    id: &str,
    status: &str,
    priority: &str,
) -> Option<(RecordStatus, Priority)> {
    let Some(status) = RecordStatus::parse(status) else {
        tracing::warn!(%domain, record_id = %id, status, "Skipping record with unknown status");
        return None;
    };
    let Some(priority) = Priority::parse(priority) else {
        tracing::warn!(%domain, record_id = %id, priority, "Skipping record with unknown priority");
        return None;
    };
    Some((status, priority))
}

#[derive(Debug, sqlx::FromRow)]
struct TaskRow {
    id: String,
    title: String,
    description: Option<String>,
    status: String,
    priority: String,
    due_at: DateTime<Utc>,
    assigned_to: Option<String>,
    created_by: Option<String>,
    participants: serde_json::Value,
}

impl TaskRow {
    fn into_record(self) -> Option<PendingRecord> {
        let (status, priority) = normalize(Domain::Task, &self.id, &self.status, &self.priority)?;
        Some(PendingRecord::Task(Task {
            participants: parse_participants(&self.participants),
            id: self.id,
            title: self.title,
            description: self.description,
            status,
            priority,
            due_at: self.due_at,
            assigned_to: self.assigned_to,
            created_by: self.created_by,
        }))
    }
}

#[derive(Debug, sqlx::FromRow)]
struct AgendaRow {
    id: String,
    title: String,
    location: Option<String>,
    status: String,
    priority: String,
    start_at: DateTime<Utc>,
    organizer_id: Option<String>,
    participants: serde_json::Value,
    notify_all: bool,
    hierarchy_levels: serde_json::Value,
    extra_recipient_ids: serde_json::Value,
}

impl AgendaRow {
    fn into_record(self) -> Option<PendingRecord> {
        let (status, priority) =
            normalize(Domain::Agenda, &self.id, &self.status, &self.priority)?;
        Some(PendingRecord::Agenda(AgendaEvent {
            participants: parse_participants(&self.participants),
            hierarchy_levels: parse_string_list(&self.hierarchy_levels),
            extra_recipient_ids: parse_string_list(&self.extra_recipient_ids),
            id: self.id,
            title: self.title,
            location: self.location,
            status,
            priority,
            start_at: self.start_at,
            organizer_id: self.organizer_id,
            notify_all: self.notify_all,
        }))
    }
}

#[derive(Debug, sqlx::FromRow)]
struct FinancialRow {
    id: String,
    description: String,
    amount_cents: i64,
    status: String,
    priority: String,
    due_at: DateTime<Utc>,
    owner_id: Option<String>,
    responsible_id: Option<String>,
}

impl FinancialRow {
    fn into_record(self) -> Option<PendingRecord> {
        let (status, priority) =
            normalize(Domain::Financial, &self.id, &self.status, &self.priority)?;
        Some(PendingRecord::Financial(FinancialDue {
            id: self.id,
            description: self.description,
            amount_cents: self.amount_cents,
            status,
            priority,
            due_at: self.due_at,
            owner_id: self.owner_id,
            responsible_id: self.responsible_id,
        }))
    }
}

#[derive(Debug, sqlx::FromRow)]
struct RosterRow {
    id: String,
    name: String,
    email: Option<String>,
    phone: Option<String>,
    hierarchy_level: Option<String>,
    notification_preference: Option<String>,
    active: bool,
}

impl From<RosterRow> for RosterMember {
    fn from(row: RosterRow) -> Self {
        RosterMember {
            notification_preference: row
                .notification_preference
                .as_deref()
                .and_then(NotificationPreference::parse),
            id: row.id,
            name: row.name,
            email: row.email.filter(|e| !e.trim().is_empty()),
            phone: row.phone.filter(|p| !p.trim().is_empty()),
            hierarchy_level: row.hierarchy_level,
            active: row.active,
        }
    }
}

const ROSTER_COLUMNS: &str =
    "id, name, email, phone, hierarchy_level, notification_preference, active";

/// Postgres-backed record store and roster directory.
#[derive(Clone)]
pub struct PgRecordStore {
    pool: PgPool,
}

impl PgRecordStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    fn page<R>(
        rows: Vec<R>,
        query: &CandidateQuery,
        id_of: impl Fn(&R) -> String,
        convert: impl Fn(R) -> Option<PendingRecord>,
    ) -> CandidatePage {
        let next_cursor = if rows.len() >= query.limit {
            rows.last().map(&id_of)
        } else {
            None
        };

        let records = rows
            .into_iter()
            .filter_map(convert)
            .filter(|r| query.accepts(r))
            .collect();

        CandidatePage {
            records,
            next_cursor,
        }
    }

    async fn fetch_tasks(&self, query: &CandidateQuery) -> Result<CandidatePage, StoreError> {
        let rows: Vec<TaskRow> = sqlx::query_as(
            r#"
            SELECT id, title, description, status, priority, due_at,
                   assigned_to, created_by, participants
            FROM tasks
            WHERE due_at <= $1
              AND ($2::timestamptz IS NULL OR due_at > $2)
              AND ($3::text IS NULL OR id > $3)
              AND lower(status) <> ALL($4)
            ORDER BY id
            LIMIT $5
            "#,
        )
        .bind(query.due_before)
        .bind(query.due_after)
        .bind(query.after_id.as_deref())
        .bind(RecordStatus::TERMINAL_LABELS)
        .bind(query.limit as i64)
        .fetch_all(&self.pool)
        .await?;

        Ok(Self::page(rows, query, |r| r.id.clone(), TaskRow::into_record))
    }

    async fn fetch_agenda(&self, query: &CandidateQuery) -> Result<CandidatePage, StoreError> {
        let rows: Vec<AgendaRow> = sqlx::query_as(
            r#"
            SELECT id, title, location, status, priority, start_at, organizer_id,
                   participants, notify_all, hierarchy_levels, extra_recipient_ids
            FROM agenda_events
            WHERE start_at <= $1
              AND ($2::timestamptz IS NULL OR start_at > $2)
              AND ($3::text IS NULL OR id > $3)
              AND lower(status) <> ALL($4)
            ORDER BY id
            LIMIT $5
            "#,
        )
        .bind(query.due_before)
        .bind(query.due_after)
        .bind(query.after_id.as_deref())
        .bind(RecordStatus::TERMINAL_LABELS)
        .bind(query.limit as i64)
        .fetch_all(&self.pool)
        .await?;

        Ok(Self::page(rows, query, |r| r.id.clone(), AgendaRow::into_record))
    }

    async fn fetch_financial(&self, query: &CandidateQuery) -> Result<CandidatePage, StoreError> {
        let rows: Vec<FinancialRow> = sqlx::query_as(
            r#"
            SELECT id, description, amount_cents, status, priority, due_at,
                   owner_id, responsible_id
            FROM financial_dues
            WHERE due_at <= $1
              AND ($2::timestamptz IS NULL OR due_at > $2)
              AND ($3::text IS NULL OR id > $3)
              AND lower(status) <> ALL($4)
            ORDER BY id
            LIMIT $5
            "#,
        )
        .bind(query.due_before)
        .bind(query.due_after)
        .bind(query.after_id.as_deref())
        .bind(RecordStatus::TERMINAL_LABELS)
        .bind(query.limit as i64)
        .fetch_all(&self.pool)
        .await?;

        Ok(Self::page(
            rows,
            query,
            |r| r.id.clone(),
            FinancialRow::into_record,
        ))
    }
}

#[async_trait]
impl RecordStore for PgRecordStore {
    async fn fetch_candidates(&self, query: &CandidateQuery) -> Result<CandidatePage, StoreError> {
        match query.domain {
            Domain::Task => self.fetch_tasks(query).await,
            Domain::Agenda => self.fetch_agenda(query).await,
            Domain::Financial => self.fetch_financial(query).await,
        }
    }
}

#[async_trait]
impl RosterDirectory for PgRecordStore {
    async fn member(&self, id: &str) -> Result<Option<RosterMember>, StoreError> {
        let row: Option<RosterRow> = sqlx::query_as(&format!(
            "SELECT {} FROM roster_members WHERE id = $1",
            ROSTER_COLUMNS
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(RosterMember::from))
    }

    async fn active_members(&self) -> Result<Vec<RosterMember>, StoreError> {
        let rows: Vec<RosterRow> = sqlx::query_as(&format!(
            "SELECT {} FROM roster_members WHERE active = true ORDER BY name, id",
            ROSTER_COLUMNS
        ))
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(RosterMember::from).collect())
    }

    async fn active_members_in_levels(
        &self,
        levels: &[String],
    ) -> Result<Vec<RosterMember>, StoreError> {
        if levels.is_empty() {
            return Ok(Vec::new());
        }

        let rows: Vec<RosterRow> = sqlx::query_as(&format!(
            "SELECT {} FROM roster_members \
             WHERE active = true AND hierarchy_level = ANY($1) \
             ORDER BY name, id",
            ROSTER_COLUMNS
        ))
        .bind(levels)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(RosterMember::from).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_participants_accepts_ids_and_objects() {
        let value = serde_json::json!([
            "u1",
            {"member_id": "u2", "notification": "whatsapp"},
            {"userId": "u3", "preference": "nenhum"},
            {"name": "no id"},
            42,
            ""
        ]);
        let participants = parse_participants(&value);
        assert_eq!(participants.len(), 3);
        assert_eq!(participants[0], Participant::new("u1"));
        assert_eq!(
            participants[1].notification,
            Some(NotificationPreference::Chat)
        );
        assert_eq!(participants[2].member_id, "u3");
        assert_eq!(
            participants[2].notification,
            Some(NotificationPreference::None)
        );
    }

    #[test]
    fn test_parse_participants_non_array() {
        assert!(parse_participants(&serde_json::json!(null)).is_empty());
        assert!(parse_participants(&serde_json::json!({"u1": true})).is_empty());
    }

    #[test]
    fn test_parse_string_list() {
        let value = serde_json::json!(["gerente", " ", 3, "diretor"]);
        assert_eq!(parse_string_list(&value), vec!["gerente", "diretor"]);
    }

    #[test]
    fn test_row_normalization() {
        let row = TaskRow {
            id: "T1".to_string(),
            title: "Report".to_string(),
            description: None,
            status: "Pendente".to_string(),
            priority: "URGENTE".to_string(),
            due_at: Utc::now(),
            assigned_to: Some("u1".to_string()),
            created_by: None,
            participants: serde_json::json!(["u2"]),
        };
        let record = row.into_record().unwrap();
        assert_eq!(record.priority(), Priority::Urgent);
        assert_eq!(record.status(), RecordStatus::Pending);

        let bad = TaskRow {
            id: "T2".to_string(),
            title: "Report".to_string(),
            description: None,
            status: "Pendente".to_string(),
            priority: "someday".to_string(),
            due_at: Utc::now(),
            assigned_to: None,
            created_by: None,
            participants: serde_json::json!([]),
        };
        assert!(bad.into_record().is_none());
    }

    #[test]
    fn test_query_windows() {
        let now = Utc::now();
        let q = CandidateQuery::for_sweep(Domain::Agenda, now, Priority::Low, 50);
        assert_eq!(q.due_after, Some(now));
        assert_eq!(q.due_before, now + Duration::hours(25));

        let q = CandidateQuery::for_sweep(Domain::Task, now, Priority::High, 0);
        assert_eq!(q.due_after, None);
        assert_eq!(q.limit, 1);
    }

    #[test]
    fn test_query_accepts_filters_priority_and_window() {
        let now = Utc::now();
        let q = CandidateQuery::for_sweep(Domain::Task, now, Priority::High, 50);
        let make = |priority, due_at| {
            PendingRecord::Task(Task {
                id: "T".to_string(),
                title: "t".to_string(),
                description: None,
                status: RecordStatus::Pending,
                priority,
                due_at,
                assigned_to: None,
                created_by: None,
                participants: vec![],
            })
        };
        assert!(q.accepts(&make(Priority::Urgent, now - Duration::days(3))));
        assert!(q.accepts(&make(Priority::High, now + Duration::days(5))));
        assert!(!q.accepts(&make(Priority::Medium, now + Duration::days(1))));
        assert!(!q.accepts(&make(Priority::Urgent, now + Duration::days(9))));
    }
}
