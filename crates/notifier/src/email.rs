//! Email channel: writes one document per message into the outbound `mail`
//! queue table. An external mail sender polls the queue and performs SMTP
//! delivery; a successful insert is all this channel reports.

use async_trait::async_trait;
use serde::Serialize;
use sqlx::PgPool;
use uuid::Uuid;

use duewatch_common::types::{ChannelType, NotificationMessage, Recipient};

use crate::channel::{DeliveryChannel, DeliveryError};
use crate::templates;

/// Queue document body: `{subject, html}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MailContent {
    pub subject: String,
    pub html: String,
}

/// One outbound queue entry: `{to, message: {subject, html}}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MailDocument {
    pub to: String,
    pub message: MailContent,
}

impl MailDocument {
    pub fn build(message: &NotificationMessage, address: &str) -> Self {
        Self {
            to: address.to_string(),
            message: MailContent {
                subject: message.subject.clone(),
                html: templates::email_html(message),
            },
        }
    }
}

/// Mail-queue backed delivery channel.
pub struct EmailQueueChannel {
    pool: PgPool,
    enabled: bool,
}

impl EmailQueueChannel {
    pub fn new(pool: PgPool, enabled: bool) -> Self {
        Self { pool, enabled }
    }

    async fn enqueue(&self, document: &MailDocument) -> Result<Uuid, DeliveryError> {
        let id = Uuid::new_v4();
        sqlx::query(
            r#"
            INSERT INTO mail (id, "to", message, created_at)
            VALUES ($1, $2, $3, NOW())
            "#,
        )
        .bind(id)
        .bind(&document.to)
        .bind(serde_json::json!(document.message))
        .execute(&self.pool)
        .await?;

        Ok(id)
    }
}

/// Pick the address to mail, or explain why there is none.
fn mail_address(recipient: &Recipient) -> Result<&str, DeliveryError> {
    recipient
        .email
        .as_deref()
        .map(str::trim)
        .filter(|e| e.contains('@'))
        .ok_or_else(|| DeliveryError::MissingContact {
            recipient_id: recipient.id.clone(),
            channel: ChannelType::Email,
        })
}

#[async_trait]
impl DeliveryChannel for EmailQueueChannel {
    fn channel_type(&self) -> ChannelType {
        ChannelType::Email
    }

    async fn deliver(
        &self,
        message: &NotificationMessage,
        recipient: &Recipient,
    ) -> Result<(), DeliveryError> {
        if !self.enabled {
            return Err(DeliveryError::NotConfigured {
                channel: ChannelType::Email,
            });
        }

        let address = mail_address(recipient)?;
        let document = MailDocument::build(message, address);
        let mail_id = self.enqueue(&document).await?;

        tracing::info!(
            mail_id = %mail_id,
            recipient_id = %recipient.id,
            record_id = %message.source.id,
            kind = %message.kind,
            "Email queued"
        );

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{sample_message, sample_recipient};
    use duewatch_common::types::NotificationKind;

    #[test]
    fn test_mail_document_shape() {
        let message = sample_message(NotificationKind::TaskReminder);
        let doc = MailDocument::build(&message, "u1@x.com");
        let value = serde_json::to_value(&doc).unwrap();

        assert_eq!(value["to"], "u1@x.com");
        assert_eq!(value["message"]["subject"], "Reminder: task due in 3 days");
        assert!(
            value["message"]["html"]
                .as_str()
                .unwrap()
                .contains("Quarterly report")
        );
    }

    #[test]
    fn test_mail_address_requires_email() {
        let mut recipient = sample_recipient();
        assert_eq!(mail_address(&recipient).unwrap(), "u1@x.com");

        recipient.email = None;
        assert!(matches!(
            mail_address(&recipient),
            Err(DeliveryError::MissingContact { .. })
        ));

        recipient.email = Some("not-an-address".to_string());
        assert!(mail_address(&recipient).is_err());
    }

    #[tokio::test]
    async fn test_disabled_channel_reports_not_configured() {
        // Lazy pool never connects; the disabled check happens first.
        let pool = PgPool::connect_lazy("postgres://localhost/unused").unwrap();
        let channel = EmailQueueChannel::new(pool, false);
        let result = channel
            .deliver(
                &sample_message(NotificationKind::TaskReminder),
                &sample_recipient(),
            )
            .await;
        assert!(matches!(result, Err(DeliveryError::NotConfigured { .. })));
    }
}
