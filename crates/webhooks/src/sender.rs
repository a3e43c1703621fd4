use std::time::Duration;

use {
    async_trait::async_trait,
    reqwest::Client,
    serde::{Deserialize, Serialize},
    tracing::debug,
};

use relaygate_store::WebhookEvent;

/// Body POSTed to a tenant's webhook.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WebhookPayload {
    pub event: String,
    /// Unix seconds when the event was recorded.
    pub timestamp: i64,
    pub data: serde_json::Value,
}

impl From<&WebhookEvent> for WebhookPayload {
    fn from(record: &WebhookEvent) -> Self {
        Self {
            event: record.event_type.clone(),
            timestamp: record.created_at / 1000,
            data: record.payload.clone(),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum DeliveryError {
    #[error("delivery timed out after {0:?}")]
    Timeout(Duration),
    #[error("webhook responded with status {0}")]
    Status(u16),
    #[error("transport error: {0}")]
    Transport(#[from] reqwest::Error),
}

/// Delivers one payload to one URL. Every error is terminal for the attempt.
#[async_trait]
pub trait WebhookSender: Send + Sync {
    async fn send(&self, url: &str, payload: &WebhookPayload) -> Result<(), DeliveryError>;
}

/// JSON-over-HTTP sender backed by a shared `reqwest` client.
#[derive(Clone)]
pub struct HttpSender {
    client: Client,
}

impl HttpSender {
    pub fn new(user_agent: &str) -> anyhow::Result<Self> {
        let client = Client::builder()
            .user_agent(user_agent)
            .redirect(reqwest::redirect::Policy::none())
            .build()?;
        Ok(Self { client })
    }
}

#[async_trait]
impl WebhookSender for HttpSender {
    async fn send(&self, url: &str, payload: &WebhookPayload) -> Result<(), DeliveryError> {
        let resp = self.client.post(url).json(payload).send().await?;
        let status = resp.status();
        debug!(url, event = %payload.event, status = status.as_u16(), "webhook response");
        if !status.is_success() {
            return Err(DeliveryError::Status(status.as_u16()));
        }
        Ok(())
    }
}
