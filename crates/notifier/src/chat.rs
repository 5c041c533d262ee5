//! Chat channel: WhatsApp gateway (Z-API style send-text endpoint).
//!
//! Credentials are read per tenant from `chat_gateway_settings` on every
//! delivery so that enabling/disabling the integration takes effect on the next
//! sweep. Every attempt, successful or not, is appended to `chat_delivery_log`
//! with the raw gateway response.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use sqlx::PgPool;
use uuid::Uuid;

use duewatch_common::types::{ChannelType, NotificationKind, NotificationMessage, Recipient};

use crate::channel::{DeliveryChannel, DeliveryError};
use crate::templates;

/// Per-tenant gateway credentials.
#[derive(Debug, Clone, PartialEq, Eq, sqlx::FromRow)]
pub struct GatewayCredentials {
    pub instance_id: String,
    pub api_token: String,
    pub client_token: String,
    pub enabled: bool,
}

impl GatewayCredentials {
    fn usable(&self) -> bool {
        self.enabled
            && !self.instance_id.trim().is_empty()
            && !self.api_token.trim().is_empty()
            && !self.client_token.trim().is_empty()
    }
}

/// One gateway attempt as written to the audit log.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChatAttempt {
    pub recipient_id: String,
    pub phone: String,
    pub message_kind: NotificationKind,
    pub success: bool,
    pub status_code: Option<u16>,
    pub response: String,
}

/// Credential lookup plus audit trail for the chat channel.
#[async_trait]
pub trait ChatSettingsStore: Send + Sync {
    async fn credentials(
        &self,
        tenant_id: &str,
    ) -> Result<Option<GatewayCredentials>, DeliveryError>;

    async fn record_attempt(&self, attempt: &ChatAttempt) -> Result<(), DeliveryError>;
}

/// Postgres-backed settings/audit store.
pub struct PgChatSettingsStore {
    pool: PgPool,
}

impl PgChatSettingsStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl ChatSettingsStore for PgChatSettingsStore {
    async fn credentials(
        &self,
        tenant_id: &str,
    ) -> Result<Option<GatewayCredentials>, DeliveryError> {
        sqlx::query_as::<_, GatewayCredentials>(
            r#"
            SELECT instance_id, api_token, client_token, enabled
            FROM chat_gateway_settings
            WHERE tenant_id = $1
            "#,
        )
        .bind(tenant_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| DeliveryError::Settings(e.to_string()))
    }

    async fn record_attempt(&self, attempt: &ChatAttempt) -> Result<(), DeliveryError> {
        sqlx::query(
            r#"
            INSERT INTO chat_delivery_log
                (id, recipient_id, phone, message_kind, success, status_code, response, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, NOW())
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(&attempt.recipient_id)
        .bind(&attempt.phone)
        .bind(attempt.message_kind.to_string())
        .bind(attempt.success)
        .bind(attempt.status_code.map(i32::from))
        .bind(&attempt.response)
        .execute(&self.pool)
        .await
        .map_err(|e| DeliveryError::Settings(e.to_string()))?;

        Ok(())
    }
}

/// Normalize a stored phone number to digits with a country prefix.
///
/// - `+` prefixed numbers are taken as already international
/// - local numbers (10 or 11 digits: area code + subscriber) get
///   `country_code` prepended
/// - numbers already starting with `country_code` and long enough are kept
///
/// Returns `None` when nothing dialable remains.
pub fn normalize_phone(raw: &str, country_code: &str) -> Option<String> {
    let trimmed = raw.trim();
    let international = trimmed.starts_with('+') || trimmed.starts_with("00");
    let digits: String = trimmed.chars().filter(|c| c.is_ascii_digit()).collect();
    let digits = digits.trim_start_matches('0');

    if digits.is_empty() {
        return None;
    }

    if international {
        return (digits.len() >= 8).then(|| digits.to_string());
    }

    match digits.len() {
        10 | 11 => Some(format!("{}{}", country_code, digits)),
        n if n >= 12 && digits.starts_with(country_code) => Some(digits.to_string()),
        _ => None,
    }
}

/// WhatsApp gateway delivery channel.
pub struct ChatGatewayChannel {
    client: reqwest::Client,
    base_url: String,
    tenant_id: String,
    country_code: String,
    settings: Arc<dyn ChatSettingsStore>,
}

impl ChatGatewayChannel {
    pub fn new(
        base_url: impl Into<String>,
        tenant_id: impl Into<String>,
        country_code: impl Into<String>,
        settings: Arc<dyn ChatSettingsStore>,
    ) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(15))
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());

        Self {
            client,
            base_url: base_url.into(),
            tenant_id: tenant_id.into(),
            country_code: country_code.into(),
            settings,
        }
    }

    fn send_text_url(&self, credentials: &GatewayCredentials) -> String {
        format!(
            "{}/instances/{}/token/{}/send-text",
            self.base_url.trim_end_matches('/'),
            credentials.instance_id,
            credentials.api_token
        )
    }

    async fn audit(&self, attempt: ChatAttempt) {
        if let Err(e) = self.settings.record_attempt(&attempt).await {
            tracing::warn!(
                recipient_id = %attempt.recipient_id,
                error = %e,
                "Failed to append chat delivery audit entry"
            );
        }
    }
}

#[async_trait]
impl DeliveryChannel for ChatGatewayChannel {
    fn channel_type(&self) -> ChannelType {
        ChannelType::Chat
    }

    async fn deliver(
        &self,
        message: &NotificationMessage,
        recipient: &Recipient,
    ) -> Result<(), DeliveryError> {
        let phone = recipient
            .phone
            .as_deref()
            .and_then(|raw| normalize_phone(raw, &self.country_code))
            .ok_or_else(|| DeliveryError::MissingContact {
                recipient_id: recipient.id.clone(),
                channel: ChannelType::Chat,
            })?;

        let credentials = self
            .settings
            .credentials(&self.tenant_id)
            .await?
            .filter(GatewayCredentials::usable)
            .ok_or(DeliveryError::NotConfigured {
                channel: ChannelType::Chat,
            })?;

        let text = templates::chat_text(message);
        let body = serde_json::json!({
            "phone": phone,
            "message": text,
        });

        let sent = self
            .client
            .post(self.send_text_url(&credentials))
            .header("Client-Token", &credentials.client_token)
            .json(&body)
            .send()
            .await;

        let response = match sent {
            Ok(response) => response,
            Err(e) => {
                self.audit(ChatAttempt {
                    recipient_id: recipient.id.clone(),
                    phone,
                    message_kind: message.kind,
                    success: false,
                    status_code: None,
                    response: e.to_string(),
                })
                .await;
                return Err(DeliveryError::Transport(e));
            }
        };

        let status = response.status();
        let raw = response.text().await.unwrap_or_default();

        self.audit(ChatAttempt {
            recipient_id: recipient.id.clone(),
            phone,
            message_kind: message.kind,
            success: status.is_success(),
            status_code: Some(status.as_u16()),
            response: raw.clone(),
        })
        .await;

        if !status.is_success() {
            return Err(DeliveryError::Gateway {
                status: status.as_u16(),
                body: raw,
            });
        }

        tracing::info!(
            recipient_id = %recipient.id,
            record_id = %message.source.id,
            kind = %message.kind,
            "Chat message sent"
        );

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{sample_message, sample_recipient};
    use std::sync::Mutex;

    #[derive(Default)]
    struct FakeSettings {
        credentials: Option<GatewayCredentials>,
        attempts: Mutex<Vec<ChatAttempt>>,
    }

    #[async_trait]
    impl ChatSettingsStore for FakeSettings {
        async fn credentials(
            &self,
            _tenant_id: &str,
        ) -> Result<Option<GatewayCredentials>, DeliveryError> {
            Ok(self.credentials.clone())
        }

        async fn record_attempt(&self, attempt: &ChatAttempt) -> Result<(), DeliveryError> {
            self.attempts.lock().unwrap().push(attempt.clone());
            Ok(())
        }
    }

    fn channel(settings: Arc<FakeSettings>) -> ChatGatewayChannel {
        ChatGatewayChannel::new("http://127.0.0.1:9", "default", "55", settings)
    }

    fn configured() -> Arc<FakeSettings> {
        Arc::new(FakeSettings {
            credentials: Some(GatewayCredentials {
                instance_id: "INST".to_string(),
                api_token: "TOK".to_string(),
                client_token: "CLI".to_string(),
                enabled: true,
            }),
            ..Default::default()
        })
    }

    /// Local stand-in for the gateway: records each send-text call and
    /// answers with a fixed status and body.
    struct FakeGateway {
        status: axum::http::StatusCode,
        reply: &'static str,
        calls: Mutex<Vec<(String, Option<String>, serde_json::Value)>>,
    }

    async fn send_text(
        axum::extract::State(gateway): axum::extract::State<Arc<FakeGateway>>,
        axum::extract::Path((instance, token)): axum::extract::Path<(String, String)>,
        headers: axum::http::HeaderMap,
        axum::Json(body): axum::Json<serde_json::Value>,
    ) -> (axum::http::StatusCode, &'static str) {
        let client_token = headers
            .get("client-token")
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        gateway
            .calls
            .lock()
            .unwrap()
            .push((format!("{}/{}", instance, token), client_token, body));
        (gateway.status, gateway.reply)
    }

    async fn spawn_gateway(status: u16, reply: &'static str) -> (String, Arc<FakeGateway>) {
        let gateway = Arc::new(FakeGateway {
            status: axum::http::StatusCode::from_u16(status).unwrap(),
            reply,
            calls: Mutex::new(Vec::new()),
        });
        let app = axum::Router::new()
            .route(
                "/instances/{instance}/token/{token}/send-text",
                axum::routing::post(send_text),
            )
            .with_state(gateway.clone());

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        (format!("http://{}", addr), gateway)
    }

    #[test]
    fn test_normalize_local_number_gets_country_code() {
        assert_eq!(
            normalize_phone("(11) 98765-4321", "55").as_deref(),
            Some("5511987654321")
        );
        assert_eq!(
            normalize_phone("11 3456-7890", "55").as_deref(),
            Some("551134567890")
        );
    }

    #[test]
    fn test_normalize_keeps_prefixed_numbers() {
        assert_eq!(
            normalize_phone("5511987654321", "55").as_deref(),
            Some("5511987654321")
        );
        assert_eq!(
            normalize_phone("+1 (415) 555-0100", "55").as_deref(),
            Some("14155550100")
        );
        assert_eq!(
            normalize_phone("0055 11 98765 4321", "55").as_deref(),
            Some("5511987654321")
        );
    }

    #[test]
    fn test_normalize_rejects_garbage() {
        assert_eq!(normalize_phone("", "55"), None);
        assert_eq!(normalize_phone("n/a", "55"), None);
        assert_eq!(normalize_phone("12345", "55"), None);
    }

    #[test]
    fn test_send_text_url() {
        let chat = ChatGatewayChannel::new(
            "https://api.z-api.io/",
            "default",
            "55",
            Arc::new(FakeSettings::default()),
        );
        let creds = GatewayCredentials {
            instance_id: "INST".to_string(),
            api_token: "TOK".to_string(),
            client_token: "CLI".to_string(),
            enabled: true,
        };
        assert_eq!(
            chat.send_text_url(&creds),
            "https://api.z-api.io/instances/INST/token/TOK/send-text"
        );
    }

    #[tokio::test]
    async fn test_missing_credentials_is_not_configured() {
        let settings = Arc::new(FakeSettings::default());
        let result = channel(settings.clone())
            .deliver(
                &sample_message(NotificationKind::TaskReminder),
                &sample_recipient(),
            )
            .await;
        assert!(matches!(result, Err(DeliveryError::NotConfigured { .. })));
        assert!(settings.attempts.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_disabled_credentials_is_not_configured() {
        let settings = Arc::new(FakeSettings {
            credentials: Some(GatewayCredentials {
                instance_id: "INST".to_string(),
                api_token: "TOK".to_string(),
                client_token: "CLI".to_string(),
                enabled: false,
            }),
            ..Default::default()
        });
        let result = channel(settings)
            .deliver(
                &sample_message(NotificationKind::TaskReminder),
                &sample_recipient(),
            )
            .await;
        assert!(matches!(result, Err(DeliveryError::NotConfigured { .. })));
    }

    #[tokio::test]
    async fn test_missing_phone_is_missing_contact() {
        let mut recipient = sample_recipient();
        recipient.phone = None;
        let result = channel(Arc::new(FakeSettings::default()))
            .deliver(&sample_message(NotificationKind::TaskReminder), &recipient)
            .await;
        assert!(matches!(
            result,
            Err(DeliveryError::MissingContact {
                channel: ChannelType::Chat,
                ..
            })
        ));
    }

    #[tokio::test]
    async fn test_transport_failure_is_audited() {
        // Port 9 (discard) on loopback is closed in test environments.
        let settings = Arc::new(FakeSettings {
            credentials: Some(GatewayCredentials {
                instance_id: "INST".to_string(),
                api_token: "TOK".to_string(),
                client_token: "CLI".to_string(),
                enabled: true,
            }),
            ..Default::default()
        });
        let result = channel(settings.clone())
            .deliver(
                &sample_message(NotificationKind::AgendaReminder),
                &sample_recipient(),
            )
            .await;
        assert!(result.is_err());

        let attempts = settings.attempts.lock().unwrap();
        assert_eq!(attempts.len(), 1);
        assert!(!attempts[0].success);
        assert_eq!(attempts[0].phone, "5511987654321");
        assert_eq!(attempts[0].message_kind, NotificationKind::AgendaReminder);
    }

    #[tokio::test]
    async fn test_gateway_success_is_audited() {
        let (base_url, gateway) = spawn_gateway(200, r#"{"messageId":"abc"}"#).await;
        let settings = configured();
        let chat = ChatGatewayChannel::new(base_url, "default", "55", settings.clone());
        let message = sample_message(NotificationKind::TaskReminder);

        chat.deliver(&message, &sample_recipient()).await.unwrap();

        let calls = gateway.calls.lock().unwrap();
        assert_eq!(calls.len(), 1);
        let (path, client_token, body) = &calls[0];
        assert_eq!(path, "INST/TOK");
        assert_eq!(client_token.as_deref(), Some("CLI"));
        assert_eq!(body["phone"], "5511987654321");
        assert_eq!(body["message"], templates::chat_text(&message));

        let attempts = settings.attempts.lock().unwrap();
        assert_eq!(attempts.len(), 1);
        assert!(attempts[0].success);
        assert_eq!(attempts[0].status_code, Some(200));
        assert_eq!(attempts[0].response, r#"{"messageId":"abc"}"#);
    }

    #[tokio::test]
    async fn test_gateway_rejection_is_audited_with_body() {
        let (base_url, gateway) = spawn_gateway(400, r#"{"error":"phone not on whatsapp"}"#).await;
        let settings = configured();
        let chat = ChatGatewayChannel::new(base_url, "default", "55", settings.clone());

        let result = chat
            .deliver(
                &sample_message(NotificationKind::FinancialOverdue),
                &sample_recipient(),
            )
            .await;

        match result {
            Err(DeliveryError::Gateway { status, body }) => {
                assert_eq!(status, 400);
                assert_eq!(body, r#"{"error":"phone not on whatsapp"}"#);
            }
            other => panic!("expected gateway error, got {:?}", other),
        }
        assert_eq!(gateway.calls.lock().unwrap().len(), 1);

        let attempts = settings.attempts.lock().unwrap();
        assert_eq!(attempts.len(), 1);
        assert!(!attempts[0].success);
        assert_eq!(attempts[0].status_code, Some(400));
        assert_eq!(attempts[0].response, r#"{"error":"phone not on whatsapp"}"#);
        assert_eq!(attempts[0].message_kind, NotificationKind::FinancialOverdue);
    }
}
