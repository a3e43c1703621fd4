use std::{fmt, str::FromStr};

use {
    async_trait::async_trait,
    serde::{Deserialize, Serialize},
};

use relaygate_common::EventType;

/// Delivery state of an outbox record. Only `Pending` ever changes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeliveryStatus {
    Pending,
    Sent,
    Failed,
}

impl DeliveryStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Sent => "sent",
            Self::Failed => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::Pending)
    }
}

impl fmt::Display for DeliveryStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DeliveryStatus {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "sent" => Ok(Self::Sent),
            "failed" => Ok(Self::Failed),
            other => anyhow::bail!("unknown delivery status: {other}"),
        }
    }
}

/// A queued notification for one tenant.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WebhookEvent {
    pub id: i64,
    pub tenant_id: String,
    /// Event name as stored; compared verbatim against subscriptions.
    pub event_type: String,
    pub payload: serde_json::Value,
    /// Milliseconds since the Unix epoch.
    pub created_at: i64,
    pub status: DeliveryStatus,
}

/// Durable queue of not-yet-delivered events.
#[async_trait]
pub trait Outbox: Send + Sync {
    /// Store a new pending record and return its id.
    async fn enqueue(
        &self,
        tenant_id: &str,
        event_type: EventType,
        payload: &serde_json::Value,
    ) -> anyhow::Result<i64>;

    /// Up to `limit` pending records, oldest first.
    async fn fetch_pending(&self, limit: u32) -> anyhow::Result<Vec<WebhookEvent>>;

    /// pending → sent. No-op for records that are already terminal.
    async fn mark_sent(&self, id: i64) -> anyhow::Result<()>;

    /// pending → failed. No-op for records that are already terminal.
    async fn mark_failed(&self, id: i64) -> anyhow::Result<()>;
}
