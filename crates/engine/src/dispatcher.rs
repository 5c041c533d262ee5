//! Notification dispatcher: one domain sweep, end to end.
//!
//! Steps per candidate record:
//! 1. Evaluate the cadence policy (ineligible → next)
//! 2. Check the idempotency log (already fired → next)
//! 3. Resolve recipients (none → next, no marker written)
//! 4. Claim the marker atomically (lost claim or write error → next)
//! 5. Compose one message per recipient and hand it to every channel the
//!    recipient's preference allows
//!
//! Only a candidate fetch failure aborts the sweep. Everything after that is
//! recovered per record or per delivery and shows up in the report.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use chrono_tz::Tz;
use serde::Serialize;
use thiserror::Error;

use duewatch_common::types::{
    ChannelType, Domain, NotificationKind, NotificationMessage, NotificationPreference,
    PendingRecord, Priority, Recipient, RecordRef,
};
use duewatch_notifier::DeliveryChannel;

use crate::cadence::{Bucket, CadencePolicy, Evaluation};
use crate::idempotency::{IdempotencyLog, MarkerKey};
use crate::resolver::RecipientResolver;
use crate::store::{CandidateQuery, RecordStore, RosterDirectory, StoreError};

/// Default candidate page size.
const DEFAULT_BATCH_SIZE: usize = 200;

/// Which slice of a domain a sweep covers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SweepKind {
    /// Every priority.
    Regular,
    /// `High` and `Urgent` only.
    Urgent,
}

impl SweepKind {
    pub fn min_priority(&self) -> Priority {
        match self {
            SweepKind::Regular => Priority::Low,
            SweepKind::Urgent => Priority::High,
        }
    }
}

impl std::fmt::Display for SweepKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SweepKind::Regular => write!(f, "regular"),
            SweepKind::Urgent => write!(f, "urgent"),
        }
    }
}

impl std::str::FromStr for SweepKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "regular" | "normal" => Ok(SweepKind::Regular),
            "urgent" => Ok(SweepKind::Urgent),
            other => Err(format!("Unknown sweep kind: {}", other)),
        }
    }
}

/// Result of handing one message to one channel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DeliveryOutcome {
    pub record_id: String,
    pub recipient_id: String,
    pub channel: ChannelType,
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Aggregate counters for one sweep.
#[derive(Debug, Clone, Serialize)]
pub struct SweepReport {
    pub domain: Domain,
    pub kind: SweepKind,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub candidates: u32,
    pub ineligible: u32,
    pub already_fired: u32,
    /// Records whose recipients all resolved to nobody or muted members.
    pub no_recipients: u32,
    pub skipped_on_error: u32,
    pub records_notified: u32,
    pub sent: u32,
    pub failed: u32,
    /// Deliveries skipped because the channel isn't set up.
    pub unconfigured: u32,
    pub deliveries: Vec<DeliveryOutcome>,
}

impl SweepReport {
    fn new(domain: Domain, kind: SweepKind, started_at: DateTime<Utc>) -> Self {
        Self {
            domain,
            kind,
            started_at,
            finished_at: started_at,
            candidates: 0,
            ineligible: 0,
            already_fired: 0,
            no_recipients: 0,
            skipped_on_error: 0,
            records_notified: 0,
            sent: 0,
            failed: 0,
            unconfigured: 0,
            deliveries: Vec::new(),
        }
    }

    pub fn summary(&self) -> String {
        format!(
            "{} {} sweep complete: {} sent, {} failed, {} records notified",
            self.domain, self.kind, self.sent, self.failed, self.records_notified
        )
    }
}

#[derive(Debug, Error)]
pub enum SweepError {
    #[error("Failed to fetch candidates: {0}")]
    Fetch(#[from] StoreError),
}

/// Runs sweeps for any domain against injected store, log and channels.
pub struct Dispatcher {
    store: Arc<dyn RecordStore>,
    resolver: RecipientResolver,
    log: Arc<dyn IdempotencyLog>,
    channels: Vec<Arc<dyn DeliveryChannel>>,
    policy: CadencePolicy,
    batch_size: usize,
}

impl Dispatcher {
    pub fn new(
        store: Arc<dyn RecordStore>,
        roster: Arc<dyn RosterDirectory>,
        log: Arc<dyn IdempotencyLog>,
        channels: Vec<Arc<dyn DeliveryChannel>>,
        policy: CadencePolicy,
    ) -> Self {
        Self {
            store,
            resolver: RecipientResolver::new(roster),
            log,
            channels,
            policy,
            batch_size: DEFAULT_BATCH_SIZE,
        }
    }

    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size.max(1);
        self
    }

    pub fn policy(&self) -> &CadencePolicy {
        &self.policy
    }

    /// Run one sweep of `domain` now.
    pub async fn run_sweep(
        &self,
        domain: Domain,
        kind: SweepKind,
    ) -> Result<SweepReport, SweepError> {
        self.run_sweep_at(domain, kind, Utc::now()).await
    }

    /// Run one sweep of `domain` as if the clock read `now`.
    pub async fn run_sweep_at(
        &self,
        domain: Domain,
        kind: SweepKind,
        now: DateTime<Utc>,
    ) -> Result<SweepReport, SweepError> {
        let mut report = SweepReport::new(domain, kind, Utc::now());
        let mut query =
            CandidateQuery::for_sweep(domain, now, kind.min_priority(), self.batch_size);

        loop {
            let page = match self.store.fetch_candidates(&query).await {
                Ok(page) => page,
                Err(e) => {
                    tracing::error!(%domain, %kind, error = %e, "Candidate fetch failed, aborting sweep");
                    return Err(SweepError::Fetch(e));
                }
            };

            for record in &page.records {
                report.candidates += 1;
                self.process_record(record, now, &mut report).await;
            }

            match page.next_cursor {
                Some(cursor) if query.after_id.as_deref() != Some(cursor.as_str()) => {
                    query = query.after(Some(cursor));
                }
                _ => break,
            }
        }

        report.finished_at = Utc::now();

        tracing::info!(
            %domain,
            %kind,
            candidates = report.candidates,
            records_notified = report.records_notified,
            sent = report.sent,
            failed = report.failed,
            already_fired = report.already_fired,
            "Sweep finished"
        );

        Ok(report)
    }

    async fn process_record(
        &self,
        record: &PendingRecord,
        now: DateTime<Utc>,
        report: &mut SweepReport,
    ) {
        let domain = record.domain();

        let Some(evaluation) = self.policy.evaluate(record, now) else {
            tracing::debug!(%domain, record_id = %record.id(), "Not at a checkpoint");
            report.ineligible += 1;
            return;
        };

        let key = MarkerKey::new(
            domain,
            record.id(),
            evaluation.bucket.label(),
            evaluation.marker_date,
        );

        match self.log.has_fired(&key).await {
            Ok(true) => {
                tracing::debug!(marker = %key, "Already fired");
                report.already_fired += 1;
                return;
            }
            Ok(false) => {}
            Err(e) => {
                tracing::error!(marker = %key, error = %e, "Marker lookup failed, skipping record");
                report.skipped_on_error += 1;
                return;
            }
        }

        let mut recipients = self.resolver.resolve(record).await;
        recipients.retain(|r| r.preference != NotificationPreference::None);
        if recipients.is_empty() {
            tracing::debug!(%domain, record_id = %record.id(), "No dispatchable recipients");
            report.no_recipients += 1;
            return;
        }

        match self.log.try_claim(&key, now).await {
            Ok(true) => {}
            Ok(false) => {
                tracing::debug!(marker = %key, "Marker claimed by a concurrent sweep");
                report.already_fired += 1;
                return;
            }
            Err(e) => {
                tracing::error!(marker = %key, error = %e, "Marker write failed, skipping record");
                report.skipped_on_error += 1;
                return;
            }
        }

        for recipient in &recipients {
            let message = compose_message(record, &evaluation, recipient, self.policy.timezone());
            self.deliver(&message, recipient, report).await;
        }

        report.records_notified += 1;
    }

    async fn deliver(
        &self,
        message: &NotificationMessage,
        recipient: &Recipient,
        report: &mut SweepReport,
    ) {
        for channel in &self.channels {
            let channel_type = channel.channel_type();
            let wanted = match channel_type {
                ChannelType::Email => recipient.preference.wants_email(),
                ChannelType::Chat => recipient.preference.wants_chat(),
            };
            if !wanted {
                continue;
            }

            let result = channel.deliver(message, recipient).await;
            let outcome = DeliveryOutcome {
                record_id: message.source.id.clone(),
                recipient_id: recipient.id.clone(),
                channel: channel_type,
                success: result.is_ok(),
                error: result.as_ref().err().map(ToString::to_string),
            };

            match result {
                Ok(()) => {
                    tracing::info!(
                        record_id = %message.source.id,
                        recipient_id = %recipient.id,
                        channel = %channel_type,
                        bucket = %message.bucket,
                        "Notification delivered"
                    );
                    report.sent += 1;
                }
                Err(e) if e.is_not_configured() => {
                    tracing::debug!(channel = %channel_type, "Channel not configured, skipping");
                    report.unconfigured += 1;
                }
                Err(e) => {
                    tracing::warn!(
                        record_id = %message.source.id,
                        recipient_id = %recipient.id,
                        channel = %channel_type,
                        error = %e,
                        "Delivery failed"
                    );
                    report.failed += 1;
                }
            }

            report.deliveries.push(outcome);
        }
    }
}

/// Format cents as Brazilian reais, e.g. `R$ 1.250,00`.
pub fn format_brl(amount_cents: i64) -> String {
    let sign = if amount_cents < 0 { "-" } else { "" };
    let cents = amount_cents.unsigned_abs();
    let whole = (cents / 100).to_string();

    let mut grouped = String::with_capacity(whole.len() + whole.len() / 3);
    for (i, c) in whole.chars().enumerate() {
        if i > 0 && (whole.len() - i) % 3 == 0 {
            grouped.push('.');
        }
        grouped.push(c);
    }

    format!("{}R$ {},{:02}", sign, grouped, cents % 100)
}

fn days_phrase(days: i64) -> String {
    match days {
        0 => "today".to_string(),
        1 => "tomorrow".to_string(),
        n => format!("in {} days", n),
    }
}

fn overdue_phrase(days: i64) -> String {
    match days {
        0 => "was due earlier today".to_string(),
        1 => "is 1 day overdue".to_string(),
        n => format!("is {} days overdue", n),
    }
}

fn minutes_phrase(minutes: i64) -> String {
    match minutes {
        60 => "in 1 hour".to_string(),
        m if m > 60 && m % 60 == 0 => format!("in {} hours", m / 60),
        m => format!("in {} minutes", m),
    }
}

/// Build the channel-agnostic message for one recipient.
pub fn compose_message(
    record: &PendingRecord,
    evaluation: &Evaluation,
    recipient: &Recipient,
    timezone: Tz,
) -> NotificationMessage {
    let local_due = record.due_at().with_timezone(&timezone);
    let due_display = local_due.format("%d/%m/%Y %H:%M").to_string();
    let overdue_days = (-evaluation.days_until).max(0);

    let (kind, subject, body, details) = match record {
        PendingRecord::Task(task) if evaluation.is_overdue => (
            NotificationKind::TaskOverdue,
            format!("Overdue task: {}", task.title),
            format!("{} {}.", task.title, overdue_phrase(overdue_days)),
            serde_json::json!({ "description": task.description }),
        ),
        PendingRecord::Task(task) => {
            let due = format!("due {}", days_phrase(evaluation.days_until));
            (
                NotificationKind::TaskReminder,
                format!("Reminder: task {}", due),
                format!("{} is {}.", task.title, due),
                serde_json::json!({ "description": task.description }),
            )
        }
        PendingRecord::Agenda(event) => {
            let time = local_due.format("%H:%M");
            let when = if evaluation.is_today {
                format!("today at {}", time)
            } else if evaluation.is_tomorrow {
                format!("tomorrow at {}", time)
            } else {
                due_display.clone()
            };
            // Checkpoint, not the raw remainder, so the phrasing is stable
            // within the tolerance window.
            let starts = match evaluation.bucket {
                Bucket::MinutesBefore(m) => minutes_phrase(m),
                _ => minutes_phrase(evaluation.minutes_until),
            };
            (
                NotificationKind::AgendaReminder,
                format!("Upcoming event {}: {}", when, event.title),
                format!("{} starts {}, {}.", event.title, starts, when),
                serde_json::json!({ "location": event.location }),
            )
        }
        PendingRecord::Financial(due) if evaluation.is_overdue => {
            let amount = format_brl(due.amount_cents);
            (
                NotificationKind::FinancialOverdue,
                format!("Overdue payment: {}", due.description),
                format!("{} ({}) {}.", due.description, amount, overdue_phrase(overdue_days)),
                serde_json::json!({ "amount": amount, "amount_cents": due.amount_cents }),
            )
        }
        PendingRecord::Financial(due) => {
            let amount = format_brl(due.amount_cents);
            let when = days_phrase(evaluation.days_until);
            (
                NotificationKind::FinancialReminder,
                format!("Payment due {}: {}", when, due.description),
                format!("{} ({}) is due {}.", due.description, amount, when),
                serde_json::json!({ "amount": amount, "amount_cents": due.amount_cents }),
            )
        }
    };

    NotificationMessage {
        kind,
        subject,
        body,
        priority: record.priority(),
        source: RecordRef {
            domain: record.domain(),
            id: record.id().to_string(),
        },
        record_title: record.title().to_string(),
        due_at: record.due_at(),
        due_display,
        bucket: evaluation.bucket.label(),
        recipient_id: recipient.id.clone(),
        recipient_name: recipient.name.clone(),
        is_today: matches!(record, PendingRecord::Agenda(_)) && evaluation.is_today,
        is_tomorrow: matches!(record, PendingRecord::Agenda(_)) && evaluation.is_tomorrow,
        details,
    }
}
