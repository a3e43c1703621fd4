use std::sync::Arc;

use {
    serde_json::Value,
    tokio::{sync::mpsc, task::JoinHandle},
    tracing::{debug, warn},
};

use {
    relaygate_channels::EngineEvent,
    relaygate_common::EventType,
    relaygate_store::{Outbox, TenantStore},
};

/// Consumes one connection's engine events.
///
/// Failures are logged and swallowed: nothing the router does may block or
/// fail the engine that produced the event.
#[derive(Clone)]
pub struct EventRouter {
    tenants: Arc<dyn TenantStore>,
    outbox: Arc<dyn Outbox>,
}

impl EventRouter {
    pub fn new(tenants: Arc<dyn TenantStore>, outbox: Arc<dyn Outbox>) -> Self {
        Self { tenants, outbox }
    }

    /// Drain `events` on a background task until the sending side is dropped.
    pub fn spawn(
        &self,
        tenant_id: String,
        events: mpsc::UnboundedReceiver<EngineEvent>,
    ) -> JoinHandle<()> {
        let router = self.clone();
        tokio::spawn(async move { router.run(&tenant_id, events).await })
    }

    pub async fn run(&self, tenant_id: &str, mut events: mpsc::UnboundedReceiver<EngineEvent>) {
        while let Some(event) = events.recv().await {
            self.handle(tenant_id, event).await;
        }
        debug!(tenant_id, "engine event stream closed");
    }

    pub async fn handle(&self, tenant_id: &str, event: EngineEvent) {
        match event {
            EngineEvent::PairingChallenge(code) => {
                if let Err(e) = self.tenants.set_qr_code(tenant_id, &code).await {
                    warn!(tenant_id, error = %e, "failed to persist pairing challenge");
                }
            },
            EngineEvent::Event { kind, data } => self.handle_event(tenant_id, kind, data).await,
        }
    }

    async fn handle_event(&self, tenant_id: &str, kind: EventType, data: Value) {
        match self.outbox.enqueue(tenant_id, kind, &data).await {
            Ok(id) => debug!(tenant_id, event = %kind, event_id = id, "webhook event queued"),
            Err(e) => {
                warn!(tenant_id, event = %kind, error = %e, "failed to enqueue webhook event");
            },
        }

        if kind == EventType::Connected
            && let Some(jid) = data.get("jid").and_then(Value::as_str)
            && !jid.is_empty()
            && let Err(e) = self.tenants.set_jid(tenant_id, jid).await
        {
            warn!(tenant_id, error = %e, "failed to persist jid");
        }

        if kind.ends_session()
            && let Err(e) = self.tenants.set_connected(tenant_id, false).await
        {
            warn!(tenant_id, error = %e, "failed to clear connected flag");
        }
    }
}
