use std::{
    sync::{Arc, Mutex},
    time::Instant,
};

use {
    anyhow::Context,
    tokio::task::JoinHandle,
    tracing::{debug, info},
};

use {
    relaygate_channels::{ConnectionFactory, loopback::LoopbackEngine},
    relaygate_config::{DatabaseConfig, EngineConfig, EngineKind, RelaygateConfig},
    relaygate_sessions::{RegistryOptions, SessionRegistry},
    relaygate_store::{Outbox, SqliteStore},
    relaygate_webhooks::{Dispatcher, DispatcherOptions, HttpSender, WebhookSettings},
};

// ── Store ────────────────────────────────────────────────────────────────────

/// Open the configured SQLite database, creating its directory if needed.
pub async fn open_store(config: &DatabaseConfig) -> anyhow::Result<SqliteStore> {
    let path = config.resolved_path();
    if let Some(parent) = path.parent()
        && !parent.as_os_str().is_empty()
    {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("failed to create {}", parent.display()))?;
    }
    SqliteStore::open(&config.url()).await
}

/// Instantiate the configured protocol engine.
pub fn build_engine(config: &EngineConfig) -> Arc<dyn ConnectionFactory> {
    match config.kind {
        EngineKind::Loopback => Arc::new(LoopbackEngine::new()),
    }
}

// ── Gateway state ────────────────────────────────────────────────────────────

/// Shared gateway runtime state, wrapped in Arc for use across async tasks.
pub struct GatewayState {
    /// Server version string.
    pub version: String,
    pub started_at: Instant,
    pub store: SqliteStore,
    /// Live connections, one per tenant.
    pub registry: Arc<SessionRegistry>,
    /// Outbox drain loop.
    pub dispatcher: Dispatcher,
    pub webhooks: WebhookSettings,
    /// Reconnect sweep tasks still owned by the gateway.
    reconnects: Mutex<Vec<JoinHandle<()>>>,
}

impl GatewayState {
    /// Wire store, registry and dispatcher from config. Nothing is started.
    pub fn new(
        config: &RelaygateConfig,
        store: SqliteStore,
        engine: Arc<dyn ConnectionFactory>,
    ) -> anyhow::Result<Arc<Self>> {
        let outbox: Arc<dyn Outbox> = Arc::new(store.clone());
        let tenants = Arc::new(store.clone());

        let registry = Arc::new(SessionRegistry::new(
            engine,
            tenants.clone(),
            Arc::clone(&outbox),
            RegistryOptions {
                storage_root: config.engine.resolved_data_dir(),
                client_name: config.engine.client_name.clone(),
            },
        ));

        let sender = HttpSender::new(&config.webhooks.user_agent)
            .context("failed to build webhook HTTP client")?;
        let dispatcher = Dispatcher::new(
            outbox,
            tenants.clone(),
            Arc::new(sender),
            DispatcherOptions::from(&config.webhooks),
        );

        Ok(Arc::new(Self {
            version: env!("CARGO_PKG_VERSION").to_string(),
            started_at: Instant::now(),
            store,
            registry,
            dispatcher,
            webhooks: WebhookSettings::new(tenants),
            reconnects: Mutex::new(Vec::new()),
        }))
    }

    /// Start background work: the dispatcher, then (optionally) the reconnect
    /// sweep for tenants that were connected when the process last stopped.
    pub async fn start(&self, reconnect: bool) {
        self.dispatcher.start();
        if reconnect {
            let handles = self.registry.reconnect_all().await;
            info!(count = handles.len(), "reconnect sweep scheduled");
            self.reconnects
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner())
                .extend(handles);
        }
    }

    /// Cancel unfinished reconnects, stop the dispatcher (letting its batch
    /// finish), then release every live connection.
    pub async fn shutdown(&self) {
        let pending = std::mem::take(
            &mut *self
                .reconnects
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner()),
        );
        for handle in pending {
            handle.abort();
            if let Err(e) = handle.await
                && !e.is_cancelled()
            {
                debug!(error = %e, "reconnect task failed");
            }
        }

        self.dispatcher.stop().await;
        self.registry.shutdown().await;
    }

    pub fn uptime_secs(&self) -> u64 {
        self.started_at.elapsed().as_secs()
    }
}
