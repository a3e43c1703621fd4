//! In-process protocol engine.
//!
//! Behaves like a real engine from the gateway's point of view (connect,
//! pairing challenges, linking codes, login/logout events) without touching
//! the network. Paired devices live in memory for the lifetime of the
//! [`LoopbackEngine`], so a disconnect/connect cycle resumes the session
//! while a logout forces a new pairing.

use std::{
    collections::{HashMap, HashSet},
    sync::{
        Arc, Mutex, Weak,
        atomic::{AtomicBool, AtomicUsize, Ordering},
    },
    time::Duration,
};

use {
    anyhow::{Result, bail},
    async_trait::async_trait,
    rand::Rng,
    serde_json::json,
    tracing::{debug, info},
};

use relaygate_common::EventType;

use crate::connection::{Connection, ConnectionFactory, EventSink, StoragePartition};

const CODE_ALPHABET: &[u8] = b"ABCDEFGHJKLMNPQRSTUVWXYZ23456789";

fn random_code(len: usize) -> String {
    let mut rng = rand::rng();
    (0..len)
        .map(|_| CODE_ALPHABET[rng.random_range(0..CODE_ALPHABET.len())] as char)
        .collect()
}

#[derive(Default)]
struct Shared {
    /// tenant_id → paired JID
    devices: HashMap<String, String>,
    /// Tenants whose next connect attempt fails.
    fail_next: HashSet<String>,
    /// tenant_id → most recently created connection
    live: HashMap<String, Weak<LoopbackConnection>>,
    connect_delay: Option<Duration>,
}

/// Factory for [`LoopbackConnection`]s plus the knobs tests use to drive them.
#[derive(Clone, Default)]
pub struct LoopbackEngine {
    shared: Arc<Mutex<Shared>>,
    created: Arc<AtomicUsize>,
}

impl LoopbackEngine {
    pub fn new() -> Self {
        Self::default()
    }

    fn with_shared<T>(&self, f: impl FnOnce(&mut Shared) -> T) -> T {
        let mut guard = self
            .shared
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        f(&mut guard)
    }

    /// Mark a tenant's partition as already paired with `jid`.
    pub fn pair_device(&self, tenant_id: &str, jid: &str) {
        self.with_shared(|s| s.devices.insert(tenant_id.into(), jid.into()));
    }

    pub fn paired_jid(&self, tenant_id: &str) -> Option<String> {
        self.with_shared(|s| s.devices.get(tenant_id).cloned())
    }

    /// Make the next connect attempt for `tenant_id` fail.
    pub fn fail_next_connect(&self, tenant_id: &str) {
        self.with_shared(|s| s.fail_next.insert(tenant_id.into()));
    }

    /// Delay every connect attempt, simulating a slow network handshake.
    pub fn set_connect_delay(&self, delay: Duration) {
        self.with_shared(|s| s.connect_delay = Some(delay));
    }

    /// Number of connections handed out so far.
    pub fn connections_created(&self) -> usize {
        self.created.load(Ordering::SeqCst)
    }

    fn live(&self, tenant_id: &str) -> Option<Arc<LoopbackConnection>> {
        self.with_shared(|s| s.live.get(tenant_id).and_then(Weak::upgrade))
    }

    /// Complete pairing for the tenant's live connection, as if the user had
    /// scanned the challenge. Returns false when no connection is up.
    pub fn authenticate(&self, tenant_id: &str, jid: &str) -> bool {
        let Some(conn) = self.live(tenant_id) else {
            return false;
        };
        if !conn.is_connected() {
            return false;
        }
        self.pair_device(tenant_id, jid);
        conn.set_jid(Some(jid.to_string()));
        conn.events.emit(EventType::Connected, json!({ "jid": jid }));
        true
    }

    /// Drop the tenant's live connection from the network side.
    pub fn sever(&self, tenant_id: &str) -> bool {
        let Some(conn) = self.live(tenant_id) else {
            return false;
        };
        conn.connected.store(false, Ordering::SeqCst);
        conn.events
            .emit(EventType::Disconnected, json!({ "reason": "stream closed" }));
        true
    }

    /// Push an arbitrary event through the tenant's live connection.
    pub fn inject(&self, tenant_id: &str, kind: EventType, data: serde_json::Value) -> bool {
        self.live(tenant_id)
            .is_some_and(|conn| conn.events.emit(kind, data))
    }
}

#[async_trait]
impl ConnectionFactory for LoopbackEngine {
    fn id(&self) -> &str {
        "loopback"
    }

    async fn create(
        &self,
        partition: StoragePartition,
        events: EventSink,
    ) -> Result<Arc<dyn Connection>> {
        let conn = Arc::new(LoopbackConnection {
            partition,
            events,
            engine: self.clone(),
            connected: AtomicBool::new(false),
            jid: Mutex::new(None),
        });
        self.created.fetch_add(1, Ordering::SeqCst);
        let tenant_id = conn.partition.tenant_id.clone();
        self.with_shared(|s| s.live.insert(tenant_id, Arc::downgrade(&conn)));
        Ok(conn)
    }
}

/// A simulated connection bound to one partition.
pub struct LoopbackConnection {
    partition: StoragePartition,
    events: EventSink,
    engine: LoopbackEngine,
    connected: AtomicBool,
    jid: Mutex<Option<String>>,
}

impl LoopbackConnection {
    fn set_jid(&self, jid: Option<String>) {
        *self
            .jid
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner()) = jid;
    }

    fn tenant_id(&self) -> &str {
        &self.partition.tenant_id
    }
}

#[async_trait]
impl Connection for LoopbackConnection {
    async fn connect(&self) -> Result<()> {
        let (fail, delay) = self.engine.with_shared(|s| {
            (s.fail_next.remove(self.tenant_id()), s.connect_delay)
        });
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        if fail {
            bail!("handshake rejected for {}", self.partition.path.display());
        }

        self.connected.store(true, Ordering::SeqCst);

        match self.engine.paired_jid(self.tenant_id()) {
            Some(jid) => {
                self.set_jid(Some(jid.clone()));
                info!(tenant_id = %self.tenant_id(), %jid, "loopback session resumed");
                self.events.emit(EventType::Connected, json!({ "jid": jid }));
            },
            None => {
                let code = format!("2@{}", random_code(24));
                debug!(tenant_id = %self.tenant_id(), "loopback issuing pairing challenge");
                self.events.pairing_challenge(code.clone());
                self.events.emit(EventType::Qr, json!({ "code": code }));
            },
        }
        Ok(())
    }

    async fn disconnect(&self) {
        self.connected.store(false, Ordering::SeqCst);
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    fn is_logged_in(&self) -> bool {
        self.is_connected() && self.jid().is_some()
    }

    fn jid(&self) -> Option<String> {
        self.jid
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    async fn pair_phone(&self, phone: &str, client_name: &str) -> Result<String> {
        if !self.is_connected() {
            bail!("websocket not connected");
        }
        if self.is_logged_in() {
            bail!("device already paired");
        }
        let digits = phone.trim_start_matches('+');
        if digits.is_empty() || !digits.chars().all(|c| c.is_ascii_digit()) {
            bail!("invalid phone number: {phone}");
        }
        let code = random_code(8);
        debug!(tenant_id = %self.tenant_id(), client = client_name, "loopback linking code issued");
        Ok(format!("{}-{}", &code[..4], &code[4..]))
    }

    async fn logout(&self) -> Result<()> {
        if !self.is_logged_in() {
            bail!("not logged in");
        }
        let tenant_id = self.tenant_id().to_string();
        self.engine.with_shared(|s| s.devices.remove(&tenant_id));
        self.set_jid(None);
        self.connected.store(false, Ordering::SeqCst);
        Ok(())
    }
}
