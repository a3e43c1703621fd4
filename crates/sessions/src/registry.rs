use std::{collections::HashMap, path::PathBuf, sync::Arc, time::Duration};

use {
    anyhow::Context,
    serde::Serialize,
    tokio::{sync::RwLock, task::JoinHandle},
    tracing::{debug, info, warn},
};

use {
    relaygate_channels::{Connection, ConnectionFactory, EventSink, StoragePartition},
    relaygate_store::{Outbox, Tenant, TenantStore},
};

use crate::{
    error::{Result, SessionError},
    router::EventRouter,
};

// ── Types ────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct RegistryOptions {
    /// Parent directory of the per-tenant storage partitions.
    pub storage_root: PathBuf,
    /// Display identity announced when pairing by phone number.
    pub client_name: String,
}

/// Returned by a successful connect.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ConnectSummary {
    pub webhook: String,
    pub jid: String,
    /// Subscription hint echoed back to the caller.
    pub events: Option<Vec<String>>,
    pub details: String,
}

/// Point-in-time view of a tenant's session.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionStatus {
    pub id: String,
    pub name: String,
    pub connected: bool,
    pub logged_in: bool,
    pub jid: String,
    pub webhook: String,
    pub events: String,
}

// ── Registry ─────────────────────────────────────────────────────────────────

/// How long a retired connection's router may take to drain its queue.
const ROUTER_DRAIN_TIMEOUT: Duration = Duration::from_secs(5);

/// A live connection and the task routing its events.
struct Session {
    conn: Arc<dyn Connection>,
    router: JoinHandle<()>,
}

impl Session {
    /// Disconnect, release the connection and wait for its router to finish,
    /// so no event of this connection touches tenant state afterwards.
    async fn retire(self, tenant_id: &str) {
        let Self { conn, mut router } = self;
        conn.disconnect().await;
        drop(conn);
        if tokio::time::timeout(ROUTER_DRAIN_TIMEOUT, &mut router)
            .await
            .is_err()
        {
            warn!(tenant_id, "event router did not drain in time, aborting");
            router.abort();
        }
    }
}

/// Owns the tenant id → live connection map.
pub struct SessionRegistry {
    sessions: RwLock<HashMap<String, Session>>,
    factory: Arc<dyn ConnectionFactory>,
    tenants: Arc<dyn TenantStore>,
    router: EventRouter,
    options: RegistryOptions,
}

impl SessionRegistry {
    pub fn new(
        factory: Arc<dyn ConnectionFactory>,
        tenants: Arc<dyn TenantStore>,
        outbox: Arc<dyn Outbox>,
        options: RegistryOptions,
    ) -> Self {
        let router = EventRouter::new(Arc::clone(&tenants), outbox);
        Self {
            sessions: RwLock::new(HashMap::new()),
            factory,
            tenants,
            router,
            options,
        }
    }

    /// Start a connection for `tenant`.
    ///
    /// `subscribe` is echoed back in the summary. `immediate` is accepted for
    /// API compatibility and has no effect.
    pub async fn connect(
        &self,
        tenant: &Tenant,
        subscribe: Option<Vec<String>>,
        immediate: bool,
    ) -> Result<ConnectSummary> {
        let mut sessions = self.sessions.write().await;

        if sessions
            .get(&tenant.id)
            .is_some_and(|session| session.conn.is_connected())
        {
            return Err(SessionError::AlreadyConnected);
        }

        // A dead entry's pending events (its `Disconnected` included) must be
        // applied before this connect persists anything.
        if let Some(stale) = sessions.remove(&tenant.id) {
            debug!(tenant_id = %tenant.id, "replacing dead session");
            stale.retire(&tenant.id).await;
        }

        debug!(tenant_id = %tenant.id, engine = self.factory.id(), immediate, "connecting");

        let (sink, events) = EventSink::channel();
        let partition = StoragePartition::new(&self.options.storage_root, &tenant.id);
        let conn = self
            .factory
            .create(partition, sink)
            .await
            .context("failed to create client")
            .map_err(SessionError::Connection)?;
        let router = self.router.spawn(tenant.id.clone(), events);

        // On failure `conn` is dropped here, closing the router's stream.
        conn.connect()
            .await
            .context("failed to connect")
            .map_err(SessionError::Connection)?;

        sessions.insert(tenant.id.clone(), Session {
            conn: Arc::clone(&conn),
            router,
        });

        if let Err(e) = self.tenants.set_connected(&tenant.id, true).await {
            warn!(tenant_id = %tenant.id, error = %e, "failed to persist connected flag");
        }

        let mut jid = tenant.jid.clone();
        if conn.is_logged_in()
            && let Some(resolved) = conn.jid()
        {
            if let Err(e) = self.tenants.set_jid(&tenant.id, &resolved).await {
                warn!(tenant_id = %tenant.id, error = %e, "failed to persist jid");
            }
            jid = resolved;
        }

        info!(tenant_id = %tenant.id, logged_in = conn.is_logged_in(), "session connected");

        Ok(ConnectSummary {
            webhook: tenant.webhook.clone(),
            jid,
            events: subscribe,
            details: "Connected!".into(),
        })
    }

    /// Tear down the tenant's connection, keeping the device paired.
    pub async fn disconnect(&self, tenant: &Tenant) -> Result<()> {
        let mut sessions = self.sessions.write().await;

        let session = sessions.get(&tenant.id).ok_or(SessionError::NoSession)?;
        if !session.conn.is_connected() {
            return Err(SessionError::NotConnected);
        }

        if let Some(session) = sessions.remove(&tenant.id) {
            session.retire(&tenant.id).await;
        }

        if let Err(e) = self.tenants.set_connected(&tenant.id, false).await {
            warn!(tenant_id = %tenant.id, error = %e, "failed to persist connected flag");
        }

        info!(tenant_id = %tenant.id, "session disconnected");
        Ok(())
    }

    /// Unpair the device on the network, then forget the session.
    pub async fn logout(&self, tenant: &Tenant) -> Result<()> {
        let mut sessions = self.sessions.write().await;

        let conn = &sessions
            .get(&tenant.id)
            .ok_or(SessionError::NoSession)?
            .conn;
        if !conn.is_connected() {
            return Err(SessionError::NotConnected);
        }
        if !conn.is_logged_in() {
            return Err(SessionError::NotAuthenticated);
        }

        conn.logout()
            .await
            .context("failed to logout")
            .map_err(SessionError::Connection)?;
        if let Some(session) = sessions.remove(&tenant.id) {
            session.retire(&tenant.id).await;
        }

        if let Err(e) = self.tenants.set_connected(&tenant.id, false).await {
            warn!(tenant_id = %tenant.id, error = %e, "failed to persist connected flag");
        }
        if let Err(e) = self.tenants.set_jid(&tenant.id, "").await {
            warn!(tenant_id = %tenant.id, error = %e, "failed to clear jid");
        }

        info!(tenant_id = %tenant.id, "session logged out");
        Ok(())
    }

    pub async fn status(&self, tenant: &Tenant) -> SessionStatus {
        let sessions = self.sessions.read().await;
        let (connected, logged_in) = sessions
            .get(&tenant.id)
            .map(|session| (session.conn.is_connected(), session.conn.is_logged_in()))
            .unwrap_or((false, false));

        SessionStatus {
            id: tenant.id.clone(),
            name: tenant.name.clone(),
            connected,
            logged_in,
            jid: tenant.jid.clone(),
            webhook: tenant.webhook.clone(),
            events: tenant.events.clone(),
        }
    }

    /// Latest pairing challenge. Read from the store because the engine
    /// delivers challenges asynchronously.
    pub async fn qr(&self, tenant: &Tenant) -> Result<String> {
        let sessions = self.sessions.read().await;

        let conn = &sessions
            .get(&tenant.id)
            .ok_or(SessionError::NoSession)?
            .conn;
        if !conn.is_connected() {
            return Err(SessionError::NotConnected);
        }
        if conn.is_logged_in() {
            return Err(SessionError::AlreadyAuthenticated);
        }

        let fresh = self
            .tenants
            .get_tenant(&tenant.id)
            .await
            .map_err(SessionError::Persistence)?
            .ok_or(SessionError::TenantNotFound)?;
        Ok(fresh.qr_code)
    }

    /// Request a phone linking code as an alternative to the QR challenge.
    pub async fn pair_phone(&self, tenant: &Tenant, phone: &str) -> Result<String> {
        let sessions = self.sessions.read().await;

        let conn = &sessions
            .get(&tenant.id)
            .ok_or(SessionError::NoSession)?
            .conn;
        if conn.is_logged_in() {
            return Err(SessionError::AlreadyAuthenticated);
        }

        conn.pair_phone(phone, &self.options.client_name)
            .await
            .context("failed to pair phone")
            .map_err(SessionError::Connection)
    }

    /// Reconnect every tenant whose persisted flag says it was connected.
    ///
    /// Each tenant is connected on its own task; a failure clears that
    /// tenant's flag and never affects the others.
    pub async fn reconnect_all(self: &Arc<Self>) -> Vec<JoinHandle<()>> {
        let tenants = match self.tenants.list_connected().await {
            Ok(tenants) => tenants,
            Err(e) => {
                warn!(error = %e, "failed to list connected tenants");
                return Vec::new();
            },
        };

        info!(count = tenants.len(), "reconnecting tenants");

        tenants
            .into_iter()
            .map(|tenant| {
                let registry = Arc::clone(self);
                tokio::spawn(async move {
                    match registry.connect(&tenant, None, false).await {
                        Ok(_) => info!(tenant_id = %tenant.id, "tenant reconnected"),
                        Err(SessionError::AlreadyConnected) => {
                            debug!(tenant_id = %tenant.id, "tenant already connected");
                        },
                        Err(e) => {
                            warn!(tenant_id = %tenant.id, error = %e, "failed to reconnect tenant");
                            if let Err(e) = registry.tenants.set_connected(&tenant.id, false).await
                            {
                                warn!(tenant_id = %tenant.id, error = %e, "failed to clear connected flag");
                            }
                        },
                    }
                })
            })
            .collect()
    }

    /// Delete a tenant, tearing down its live connection first.
    pub async fn remove_tenant(&self, tenant_id: &str) -> Result<()> {
        let mut sessions = self.sessions.write().await;

        if let Some(session) = sessions.remove(tenant_id) {
            session.retire(tenant_id).await;
            info!(tenant_id, "session torn down for tenant removal");
        }

        let deleted = self
            .tenants
            .delete_tenant(tenant_id)
            .await
            .map_err(SessionError::Persistence)?;
        if !deleted {
            return Err(SessionError::TenantNotFound);
        }
        Ok(())
    }

    /// Disconnect every live connection. Persisted `connected` flags are left
    /// as they are so the next start reconnects the same tenants.
    pub async fn shutdown(&self) {
        let drained: Vec<_> = self.sessions.write().await.drain().collect();
        let count = drained.len();
        for (tenant_id, session) in drained {
            debug!(%tenant_id, "disconnecting");
            session.retire(&tenant_id).await;
        }
        info!(count, "session registry shut down");
    }

    /// Whether the tenant has an entry that reports itself connected.
    pub async fn is_live(&self, tenant_id: &str) -> bool {
        self.sessions
            .read()
            .await
            .get(tenant_id)
            .is_some_and(|session| session.conn.is_connected())
    }

    pub async fn has_session(&self, tenant_id: &str) -> bool {
        self.sessions.read().await.contains_key(tenant_id)
    }

    pub async fn session_count(&self) -> usize {
        self.sessions.read().await.len()
    }

    /// Tenant ids with an entry, sorted.
    pub async fn live_tenants(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.sessions.read().await.keys().cloned().collect();
        ids.sort();
        ids
    }
}
