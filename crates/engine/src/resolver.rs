//! Recipient resolver: expands one record into the people to notify.
//!
//! Order of resolution (later steps skip identities already present):
//! 1. Owner / assignee (preference defaults to email)
//! 2. Explicit participants, minus anyone whose preference is `None`; an
//!    opted-out participant stays out even if a later step matches them
//! 3. Every active roster member when `notify_all` is set
//! 4. Active roster members in the listed hierarchy levels
//! 5. Extra recipient ids (agenda) / responsible party (financial)
//!
//! A failing lookup only drops that step's contribution.

use std::collections::HashSet;
use std::sync::Arc;

use duewatch_common::types::{
    NotificationPreference, Participant, PendingRecord, Recipient, RosterMember,
};

use crate::store::{RosterDirectory, StoreError};

/// Ordered, identity-deduplicated recipient list.
#[derive(Default)]
struct RecipientSet {
    seen: HashSet<String>,
    recipients: Vec<Recipient>,
}

impl RecipientSet {
    fn push(&mut self, recipient: Recipient) -> bool {
        if self.seen.insert(recipient.id.clone()) {
            self.recipients.push(recipient);
            true
        } else {
            false
        }
    }

    /// Reserve `id` without adding a recipient, so later steps can't add it.
    fn suppress(&mut self, id: &str) {
        self.seen.insert(id.to_string());
    }

    fn contains(&self, id: &str) -> bool {
        self.seen.contains(id)
    }

    fn into_vec(self) -> Vec<Recipient> {
        self.recipients
    }
}

pub struct RecipientResolver {
    roster: Arc<dyn RosterDirectory>,
}

impl RecipientResolver {
    pub fn new(roster: Arc<dyn RosterDirectory>) -> Self {
        Self { roster }
    }

    /// Resolve every recipient for `record`, deduplicated by member id.
    pub async fn resolve(&self, record: &PendingRecord) -> Vec<Recipient> {
        let mut set = RecipientSet::default();

        if let Some(owner_id) = record.owner_id() {
            self.add_member(record, "owner", owner_id, NotificationPreference::Email, &mut set)
                .await;
        }

        match record {
            PendingRecord::Task(task) => {
                self.add_participants(record, &task.participants, &mut set)
                    .await;
            }
            PendingRecord::Agenda(event) => {
                self.add_participants(record, &event.participants, &mut set)
                    .await;

                if event.notify_all {
                    let members = self.roster.active_members().await;
                    Self::add_all(record, "notify_all", members, &mut set);
                }

                if !event.hierarchy_levels.is_empty() {
                    let members = self
                        .roster
                        .active_members_in_levels(&event.hierarchy_levels)
                        .await;
                    Self::add_all(record, "hierarchy", members, &mut set);
                }

                for id in &event.extra_recipient_ids {
                    self.add_member(record, "extra", id, NotificationPreference::Email, &mut set)
                        .await;
                }
            }
            PendingRecord::Financial(due) => {
                if let Some(responsible) = due.responsible_id.as_deref() {
                    self.add_member(
                        record,
                        "responsible",
                        responsible,
                        NotificationPreference::Email,
                        &mut set,
                    )
                    .await;
                }
            }
        }

        set.into_vec()
    }

    async fn add_member(
        &self,
        record: &PendingRecord,
        step: &'static str,
        member_id: &str,
        default: NotificationPreference,
        set: &mut RecipientSet,
    ) {
        if member_id.is_empty() || set.contains(member_id) {
            return;
        }

        match self.roster.member(member_id).await {
            Ok(Some(member)) => {
                set.push(Recipient::from_member(&member, default));
            }
            Ok(None) => {
                tracing::warn!(
                    domain = %record.domain(),
                    record_id = %record.id(),
                    member_id,
                    step,
                    "Recipient not found in roster"
                );
            }
            Err(e) => {
                tracing::warn!(
                    domain = %record.domain(),
                    record_id = %record.id(),
                    member_id,
                    step,
                    error = %e,
                    "Roster lookup failed, continuing"
                );
            }
        }
    }

    async fn add_participants(
        &self,
        record: &PendingRecord,
        participants: &[Participant],
        set: &mut RecipientSet,
    ) {
        for participant in participants {
            if set.contains(&participant.member_id) {
                continue;
            }

            let member = match self.roster.member(&participant.member_id).await {
                Ok(Some(member)) => member,
                Ok(None) => {
                    tracing::warn!(
                        record_id = %record.id(),
                        member_id = %participant.member_id,
                        "Participant not found in roster"
                    );
                    continue;
                }
                Err(e) => {
                    tracing::warn!(
                        record_id = %record.id(),
                        member_id = %participant.member_id,
                        error = %e,
                        "Participant lookup failed, continuing"
                    );
                    continue;
                }
            };

            let preference = participant
                .notification
                .or(member.notification_preference)
                .unwrap_or(NotificationPreference::Email);
            if preference == NotificationPreference::None {
                set.suppress(&participant.member_id);
                continue;
            }

            let mut recipient = Recipient::from_member(&member, preference);
            recipient.preference = preference;
            set.push(recipient);
        }
    }

    fn add_all(
        record: &PendingRecord,
        step: &'static str,
        members: Result<Vec<RosterMember>, StoreError>,
        set: &mut RecipientSet,
    ) {
        match members {
            Ok(members) => {
                for member in members.iter().filter(|m| m.active) {
                    set.push(Recipient::from_member(member, NotificationPreference::Email));
                }
            }
            Err(e) => {
                tracing::warn!(
                    domain = %record.domain(),
                    record_id = %record.id(),
                    step,
                    error = %e,
                    "Roster fan-out failed, continuing"
                );
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryRecordStore;
    use chrono::Utc;
    use duewatch_common::types::{AgendaEvent, FinancialDue, Priority, RecordStatus, Task};

    fn member(id: &str, level: &str, pref: Option<NotificationPreference>) -> RosterMember {
        RosterMember {
            id: id.to_string(),
            name: id.to_uppercase(),
            email: Some(format!("{}@x.com", id)),
            phone: None,
            hierarchy_level: Some(level.to_string()),
            notification_preference: pref,
            active: true,
        }
    }

    fn roster() -> Arc<MemoryRecordStore> {
        let store = MemoryRecordStore::new();
        store.add_member(member("u1", "staff", None));
        store.add_member(member("u2", "staff", Some(NotificationPreference::Chat)));
        store.add_member(member("u3", "manager", Some(NotificationPreference::None)));
        store.add_member(member("u4", "director", Some(NotificationPreference::Both)));
        let mut inactive = member("u5", "manager", None);
        inactive.active = false;
        store.add_member(inactive);
        Arc::new(store)
    }

    fn task(assigned: &str, participants: Vec<Participant>) -> PendingRecord {
        PendingRecord::Task(Task {
            id: "T1".to_string(),
            title: "Report".to_string(),
            description: None,
            status: RecordStatus::Pending,
            priority: Priority::High,
            due_at: Utc::now(),
            assigned_to: Some(assigned.to_string()),
            created_by: Some("u4".to_string()),
            participants,
        })
    }

    fn event() -> AgendaEvent {
        AgendaEvent {
            id: "E1".to_string(),
            title: "Board meeting".to_string(),
            location: None,
            status: RecordStatus::Scheduled,
            priority: Priority::Medium,
            start_at: Utc::now(),
            organizer_id: Some("u1".to_string()),
            participants: vec![],
            notify_all: false,
            hierarchy_levels: vec![],
            extra_recipient_ids: vec![],
        }
    }

    fn ids(recipients: &[Recipient]) -> Vec<&str> {
        recipients.iter().map(|r| r.id.as_str()).collect()
    }

    #[tokio::test]
    async fn test_owner_in_participants_is_deduplicated() {
        let resolver = RecipientResolver::new(roster());
        let record = task("u1", vec![Participant::new("u1"), Participant::new("u2")]);
        let recipients = resolver.resolve(&record).await;
        assert_eq!(ids(&recipients), vec!["u1", "u2"]);
    }

    #[tokio::test]
    async fn test_owner_preference_defaults_to_email() {
        let resolver = RecipientResolver::new(roster());
        let recipients = resolver.resolve(&task("u1", vec![])).await;
        assert_eq!(recipients[0].preference, NotificationPreference::Email);
    }

    #[tokio::test]
    async fn test_participants_with_none_preference_are_dropped() {
        let resolver = RecipientResolver::new(roster());
        let mut muted = Participant::new("u4");
        muted.notification = Some(NotificationPreference::None);
        let record = task("u1", vec![Participant::new("u3"), muted]);
        let recipients = resolver.resolve(&record).await;
        assert_eq!(ids(&recipients), vec!["u1"]);
    }

    #[tokio::test]
    async fn test_event_opt_out_survives_fan_out() {
        let resolver = RecipientResolver::new(roster());
        let mut muted = Participant::new("u4");
        muted.notification = Some(NotificationPreference::None);
        let mut e = event();
        e.participants = vec![muted];
        e.notify_all = true;
        e.hierarchy_levels = vec!["director".to_string()];
        e.extra_recipient_ids = vec!["u4".to_string()];
        let recipients = resolver.resolve(&PendingRecord::Agenda(e)).await;
        assert!(!ids(&recipients).contains(&"u4"));
        assert_eq!(ids(&recipients), vec!["u1", "u2", "u3"]);
    }

    #[tokio::test]
    async fn test_participant_override_wins_over_roster() {
        let resolver = RecipientResolver::new(roster());
        let mut p = Participant::new("u2");
        p.notification = Some(NotificationPreference::Email);
        let recipients = resolver.resolve(&task("u1", vec![p])).await;
        assert_eq!(recipients[1].preference, NotificationPreference::Email);
    }

    #[tokio::test]
    async fn test_task_owner_falls_back_to_creator() {
        let resolver = RecipientResolver::new(roster());
        let PendingRecord::Task(mut t) = task("u1", vec![]) else {
            unreachable!()
        };
        t.assigned_to = None;
        let recipients = resolver.resolve(&PendingRecord::Task(t)).await;
        assert_eq!(ids(&recipients), vec!["u4"]);
    }

    #[tokio::test]
    async fn test_agenda_fan_out_order() {
        let resolver = RecipientResolver::new(roster());
        let mut e = event();
        e.participants = vec![Participant::new("u2")];
        e.hierarchy_levels = vec!["manager".to_string(), "director".to_string()];
        e.extra_recipient_ids = vec!["u4".to_string(), "ghost".to_string()];
        let recipients = resolver.resolve(&PendingRecord::Agenda(e)).await;
        // u3 and u5: u3 is an active manager, u5 is inactive
        assert_eq!(ids(&recipients), vec!["u1", "u2", "u3", "u4"]);
    }

    #[tokio::test]
    async fn test_agenda_notify_all_skips_inactive() {
        let resolver = RecipientResolver::new(roster());
        let mut e = event();
        e.notify_all = true;
        let recipients = resolver.resolve(&PendingRecord::Agenda(e)).await;
        assert_eq!(recipients.len(), 4);
        assert!(!ids(&recipients).contains(&"u5"));
    }

    #[tokio::test]
    async fn test_financial_includes_responsible() {
        let resolver = RecipientResolver::new(roster());
        let due = FinancialDue {
            id: "F1".to_string(),
            description: "Rent".to_string(),
            amount_cents: 120_000,
            status: RecordStatus::Pending,
            priority: Priority::High,
            due_at: Utc::now(),
            owner_id: Some("u1".to_string()),
            responsible_id: Some("u2".to_string()),
        };
        let recipients = resolver.resolve(&PendingRecord::Financial(due)).await;
        assert_eq!(ids(&recipients), vec!["u1", "u2"]);
    }

    #[tokio::test]
    async fn test_roster_failure_keeps_partial_set() {
        let store = roster();
        store.fail_fan_out(true);
        let resolver = RecipientResolver::new(store);
        let mut e = event();
        e.notify_all = true;
        e.extra_recipient_ids = vec!["u2".to_string()];
        let recipients = resolver.resolve(&PendingRecord::Agenda(e)).await;
        assert_eq!(ids(&recipients), vec!["u1", "u2"]);
    }
}
