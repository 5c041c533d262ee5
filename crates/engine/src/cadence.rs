//! Cadence policy: decides whether a record is due for a reminder right now.
//!
//! Every domain notifies at discrete checkpoints rather than "any time below a
//! threshold", so repeated sweeps inside the same checkpoint collapse onto the
//! same bucket (and therefore the same idempotency key).
//!
//! - Tasks: days until due (calendar days in the scheduler timezone)
//! - Agenda events: minutes until start, matched against hour/half-hour
//!   checkpoints with a tolerance window equal to the sweep interval
//! - Financial dues: days until due, negative once overdue

use chrono::{DateTime, Duration, NaiveDate, Utc};
use chrono_tz::Tz;

use duewatch_common::types::{PendingRecord, Priority};

/// Task checkpoints, in days before due.
const TASK_URGENT_DAYS: &[i64] = &[7, 3, 1, 0];
const TASK_HIGH_DAYS: &[i64] = &[5, 1, 0];
const TASK_MEDIUM_DAYS: &[i64] = &[3, 1, 0];

/// Agenda checkpoints, in minutes before start.
const AGENDA_URGENT_MINUTES: &[i64] = &[1440, 240, 60, 30];
const AGENDA_HIGH_MINUTES: &[i64] = &[1440, 120, 30];
const AGENDA_MEDIUM_MINUTES: &[i64] = &[1440, 60];
const AGENDA_LOW_MINUTES: &[i64] = &[1440];

/// Financial checkpoints, in days before due.
const FINANCIAL_URGENT_DAYS: &[i64] = &[30, 15, 10, 7, 5, 3, 1, 0];
const FINANCIAL_HIGH_DAYS: &[i64] = &[20, 15, 10, 7, 3, 1, 0];
const FINANCIAL_MEDIUM_DAYS: &[i64] = &[15, 10, 7, 5, 3, 1, 0];
const FINANCIAL_LOW_DAYS: &[i64] = &[10, 7, 5, 3, 1, 0];

/// A named cadence checkpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Bucket {
    DaysBefore(i64),
    MinutesBefore(i64),
    /// Days past due; 0 means due earlier today.
    Overdue(i64),
}

impl Bucket {
    /// Label used in idempotency keys ("3d", "24h", "30m", "overdue-2d").
    pub fn label(&self) -> String {
        match self {
            Bucket::DaysBefore(days) => format!("{}d", days),
            Bucket::MinutesBefore(minutes) if minutes % 60 == 0 => format!("{}h", minutes / 60),
            Bucket::MinutesBefore(minutes) => format!("{}m", minutes),
            Bucket::Overdue(days) => format!("overdue-{}d", days),
        }
    }

    pub fn is_overdue(&self) -> bool {
        matches!(self, Bucket::Overdue(_))
    }
}

impl std::fmt::Display for Bucket {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.label())
    }
}

fn overdue_bucket(days_until: i64) -> Bucket {
    Bucket::Overdue((-days_until).max(0))
}

/// Task rule: overdue always fires; Low fires from one day out; the other
/// priorities fire on their checkpoint days.
pub fn task_bucket(priority: Priority, days_until: i64, is_overdue: bool) -> Option<Bucket> {
    if is_overdue {
        return Some(overdue_bucket(days_until));
    }

    let checkpoints = match priority {
        Priority::Urgent => TASK_URGENT_DAYS,
        Priority::High => TASK_HIGH_DAYS,
        Priority::Medium => TASK_MEDIUM_DAYS,
        Priority::Low => {
            return (days_until <= 1).then_some(Bucket::DaysBefore(days_until.max(0)));
        }
    };

    checkpoints
        .contains(&days_until)
        .then_some(Bucket::DaysBefore(days_until))
}

pub fn should_notify_task(priority: Priority, days_until: i64, is_overdue: bool) -> bool {
    task_bucket(priority, days_until, is_overdue).is_some()
}

fn agenda_checkpoints(priority: Priority) -> &'static [i64] {
    match priority {
        Priority::Urgent => AGENDA_URGENT_MINUTES,
        Priority::High => AGENDA_HIGH_MINUTES,
        Priority::Medium => AGENDA_MEDIUM_MINUTES,
        Priority::Low => AGENDA_LOW_MINUTES,
    }
}

/// Agenda rule: the first checkpoint `c` (ascending) with
/// `c - window < minutes_until <= c`. Events already started never match.
pub fn agenda_bucket(priority: Priority, minutes_until: i64, window_minutes: i64) -> Option<Bucket> {
    if minutes_until <= 0 {
        return None;
    }
    let window = window_minutes.max(1);

    let mut checkpoints = agenda_checkpoints(priority).to_vec();
    checkpoints.sort_unstable();

    checkpoints
        .into_iter()
        .find(|&c| minutes_until <= c && minutes_until > c - window)
        .map(Bucket::MinutesBefore)
}

/// Exact checkpoint test on hours remaining (24, 4, 2, 1, 0.5).
pub fn should_notify_agenda(priority: Priority, hours_until: f64) -> bool {
    let minutes = (hours_until * 60.0).round() as i64;
    agenda_checkpoints(priority).contains(&minutes)
}

/// Financial rule: overdue always fires; otherwise checkpoint days that widen
/// with priority.
pub fn financial_bucket(priority: Priority, days_until: i64, is_overdue: bool) -> Option<Bucket> {
    if is_overdue {
        return Some(overdue_bucket(days_until));
    }

    let checkpoints = match priority {
        Priority::Urgent => FINANCIAL_URGENT_DAYS,
        Priority::High => FINANCIAL_HIGH_DAYS,
        Priority::Medium => FINANCIAL_MEDIUM_DAYS,
        Priority::Low => FINANCIAL_LOW_DAYS,
    };

    checkpoints
        .contains(&days_until)
        .then_some(Bucket::DaysBefore(days_until))
}

pub fn should_notify_financial(priority: Priority, days_until: i64, is_overdue: bool) -> bool {
    financial_bucket(priority, days_until, is_overdue).is_some()
}

/// Outcome of a positive cadence decision.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Evaluation {
    pub bucket: Bucket,
    /// Calendar day the marker key is scoped to. Day buckets use the sweep
    /// date; minute buckets use the date of the checkpoint instant, so every
    /// sweep inside one tolerance window lands on the same key.
    pub marker_date: NaiveDate,
    pub days_until: i64,
    pub minutes_until: i64,
    pub is_overdue: bool,
    pub is_today: bool,
    pub is_tomorrow: bool,
}

/// Timezone-aware wrapper over the per-domain rules.
#[derive(Debug, Clone, Copy)]
pub struct CadencePolicy {
    timezone: Tz,
    agenda_window_minutes: i64,
}

impl CadencePolicy {
    pub fn new(timezone: Tz, agenda_window_minutes: i64) -> Self {
        Self {
            timezone,
            agenda_window_minutes: agenda_window_minutes.max(1),
        }
    }

    pub fn timezone(&self) -> Tz {
        self.timezone
    }

    pub fn local_date(&self, at: DateTime<Utc>) -> NaiveDate {
        at.with_timezone(&self.timezone).date_naive()
    }

    /// Calendar days from `now` to `due` in the scheduler timezone.
    pub fn days_until(&self, due: DateTime<Utc>, now: DateTime<Utc>) -> i64 {
        (self.local_date(due) - self.local_date(now)).num_days()
    }

    /// Decide whether `record` should be notified at `now`.
    pub fn evaluate(&self, record: &PendingRecord, now: DateTime<Utc>) -> Option<Evaluation> {
        if record.status().is_terminal() {
            return None;
        }

        let due = record.due_at();
        let priority = record.priority();
        let today = self.local_date(now);
        let due_date = self.local_date(due);
        let days_until = self.days_until(due, now);
        let minutes_until = (due - now).num_minutes();

        let (bucket, is_overdue) = match record {
            PendingRecord::Task(_) => {
                let overdue = due < now;
                (task_bucket(priority, days_until, overdue)?, overdue)
            }
            PendingRecord::Agenda(_) => (
                agenda_bucket(priority, minutes_until, self.agenda_window_minutes)?,
                false,
            ),
            PendingRecord::Financial(_) => {
                let overdue = days_until < 0;
                (financial_bucket(priority, days_until, overdue)?, overdue)
            }
        };

        let marker_date = match bucket {
            Bucket::MinutesBefore(minutes) => self.local_date(due - Duration::minutes(minutes)),
            Bucket::DaysBefore(_) | Bucket::Overdue(_) => today,
        };

        Some(Evaluation {
            bucket,
            marker_date,
            days_until,
            minutes_until,
            is_overdue,
            is_today: due_date == today,
            is_tomorrow: today.succ_opt() == Some(due_date),
        })
    }
}
