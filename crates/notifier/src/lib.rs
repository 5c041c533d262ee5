//! Delivery channels for reminder notifications.
//!
//! Each channel takes a fully composed `NotificationMessage` plus the resolved
//! `Recipient` and either hands it off or reports a typed `DeliveryError`:
//! - Email: one document per message in the outbound `mail` queue table,
//!   polled by an external mail sender
//! - Chat: synchronous send-text call to a WhatsApp gateway, every attempt
//!   appended to an audit log

pub mod channel;
pub mod chat;
pub mod email;
pub mod templates;

pub use channel::{DeliveryChannel, DeliveryError};

#[cfg(test)]
pub(crate) mod test_support {
    use chrono::{TimeZone, Utc};

    use duewatch_common::types::{
        Domain, NotificationKind, NotificationMessage, NotificationPreference, Priority,
        Recipient, RecordRef,
    };

    pub fn sample_message(kind: NotificationKind) -> NotificationMessage {
        NotificationMessage {
            kind,
            subject: "Reminder: task due in 3 days".to_string(),
            body: "Quarterly report is due in 3 days.".to_string(),
            priority: Priority::Urgent,
            source: RecordRef {
                domain: Domain::Task,
                id: "T1".to_string(),
            },
            record_title: "Quarterly report".to_string(),
            due_at: Utc.with_ymd_and_hms(2026, 10, 21, 17, 0, 0).unwrap(),
            due_display: "21/10/2026 14:00".to_string(),
            bucket: "3d".to_string(),
            recipient_id: "u1".to_string(),
            recipient_name: "Ana".to_string(),
            is_today: false,
            is_tomorrow: false,
            details: serde_json::json!({}),
        }
    }

    pub fn sample_recipient() -> Recipient {
        Recipient {
            id: "u1".to_string(),
            name: "Ana".to_string(),
            email: Some("u1@x.com".to_string()),
            phone: Some("(11) 98765-4321".to_string()),
            role: None,
            preference: NotificationPreference::Both,
        }
    }
}
