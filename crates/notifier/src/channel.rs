use async_trait::async_trait;
use thiserror::Error;

use duewatch_common::types::{ChannelType, NotificationMessage, Recipient};

/// Why a single delivery attempt did not go through.
#[derive(Debug, Error)]
pub enum DeliveryError {
    #[error("{channel} channel is not configured")]
    NotConfigured { channel: ChannelType },

    #[error("Recipient {recipient_id} has no {channel} contact")]
    MissingContact {
        recipient_id: String,
        channel: ChannelType,
    },

    #[error("Mail queue write failed: {0}")]
    Queue(#[from] sqlx::Error),

    #[error("Gateway request failed: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("Gateway returned HTTP {status}: {body}")]
    Gateway { status: u16, body: String },

    #[error("Channel settings error: {0}")]
    Settings(String),
}

impl DeliveryError {
    /// Channel-missing failures are expected in partially configured tenants
    /// and are logged at a lower level than real send failures.
    pub fn is_not_configured(&self) -> bool {
        matches!(self, DeliveryError::NotConfigured { .. })
    }
}

/// A downstream transport for composed notifications.
#[async_trait]
pub trait DeliveryChannel: Send + Sync {
    fn channel_type(&self) -> ChannelType;

    /// Enqueue or transmit one message for one recipient.
    async fn deliver(
        &self,
        message: &NotificationMessage,
        recipient: &Recipient,
    ) -> Result<(), DeliveryError>;
}
