use std::{path::PathBuf, sync::Arc};

use {anyhow::Result, async_trait::async_trait, tokio::sync::mpsc};

use relaygate_common::EventType;

/// Where an engine keeps one tenant's device keys and protocol state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoragePartition {
    pub tenant_id: String,
    pub path: PathBuf,
}

impl StoragePartition {
    pub fn new(root: impl Into<PathBuf>, tenant_id: &str) -> Self {
        Self {
            tenant_id: tenant_id.to_string(),
            path: root.into().join(tenant_id),
        }
    }
}

/// Something the protocol engine wants the gateway to know about.
#[derive(Debug, Clone, PartialEq)]
pub enum EngineEvent {
    /// A domain occurrence (message, receipt, presence, login state, ...).
    Event {
        kind: EventType,
        data: serde_json::Value,
    },
    /// A fresh login challenge replacing any earlier one.
    PairingChallenge(String),
}

/// Sending half handed to a connection at construction time.
#[derive(Debug, Clone)]
pub struct EventSink {
    tx: mpsc::UnboundedSender<EngineEvent>,
}

impl EventSink {
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<EngineEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }

    /// Returns false once the receiving side is gone.
    pub fn emit(&self, kind: EventType, data: serde_json::Value) -> bool {
        self.tx.send(EngineEvent::Event { kind, data }).is_ok()
    }

    pub fn pairing_challenge(&self, code: impl Into<String>) -> bool {
        self.tx
            .send(EngineEvent::PairingChallenge(code.into()))
            .is_ok()
    }
}

/// One tenant's live link to the messaging network.
#[async_trait]
pub trait Connection: Send + Sync {
    /// Establish the link. Resolves once the socket is up; authentication may
    /// still be pending (a pairing challenge is emitted in that case).
    async fn connect(&self) -> Result<()>;

    /// Drop the link without touching the paired device.
    async fn disconnect(&self);

    fn is_connected(&self) -> bool;

    /// Whether the device is paired and authenticated.
    fn is_logged_in(&self) -> bool;

    /// Resolved network identity, once authenticated.
    fn jid(&self) -> Option<String>;

    /// Request a linking code for `phone`, announcing `client_name` to the
    /// user's device.
    async fn pair_phone(&self, phone: &str, client_name: &str) -> Result<String>;

    /// Unpair the device on the network side.
    async fn logout(&self) -> Result<()>;
}

/// Builds connections bound to a storage partition.
#[async_trait]
pub trait ConnectionFactory: Send + Sync {
    /// Engine identifier (e.g. "loopback").
    fn id(&self) -> &str;

    async fn create(
        &self,
        partition: StoragePartition,
        events: EventSink,
    ) -> Result<Arc<dyn Connection>>;
}
