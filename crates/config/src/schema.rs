/// Config schema types (server, database, webhooks, engine).
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Root configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RelaygateConfig {
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    pub webhooks: WebhooksConfig,
    pub engine: EngineConfig,
    /// Reconnect tenants whose persisted `connected` flag is set on startup.
    pub reconnect_on_start: bool,
}

impl Default for RelaygateConfig {
    fn default() -> Self {
        Self {
            server: ServerConfig::default(),
            database: DatabaseConfig::default(),
            webhooks: WebhooksConfig::default(),
            engine: EngineConfig::default(),
            reconnect_on_start: true,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub bind: String,
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: "127.0.0.1".into(),
            port: 8080,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    /// SQLite file. Defaults to `<data_dir>/relaygate.db`.
    pub path: Option<PathBuf>,
}

impl DatabaseConfig {
    pub fn resolved_path(&self) -> PathBuf {
        self.path
            .clone()
            .unwrap_or_else(|| crate::loader::data_dir().join("relaygate.db"))
    }

    /// sqlx connection URL for the resolved path.
    pub fn url(&self) -> String {
        format!("sqlite://{}?mode=rwc", self.resolved_path().display())
    }
}

/// Outbox polling and delivery settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WebhooksConfig {
    pub poll_interval_secs: u64,
    /// Maximum records fetched per tick.
    pub batch_size: u32,
    /// Per-attempt delivery timeout.
    pub timeout_secs: u64,
    pub user_agent: String,
}

impl Default for WebhooksConfig {
    fn default() -> Self {
        Self {
            poll_interval_secs: 2,
            batch_size: 50,
            timeout_secs: 10,
            user_agent: format!("relaygate/{}", env!("CARGO_PKG_VERSION")),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EngineKind {
    #[default]
    Loopback,
}

/// Protocol engine selection and its storage partitions.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub kind: EngineKind,
    /// Parent directory of the per-tenant storage partitions.
    /// Defaults to `<data_dir>/sessions`.
    pub data_dir: Option<PathBuf>,
    /// Display identity announced when pairing by phone number.
    pub client_name: String,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            kind: EngineKind::default(),
            data_dir: None,
            client_name: "Chrome (Linux)".into(),
        }
    }
}

impl EngineConfig {
    pub fn resolved_data_dir(&self) -> PathBuf {
        self.data_dir
            .clone()
            .unwrap_or_else(|| crate::loader::data_dir().join("sessions"))
    }
}
