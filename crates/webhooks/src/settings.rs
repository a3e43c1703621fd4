use std::sync::Arc;

use {
    anyhow::{Result, bail},
    serde::{Deserialize, Serialize},
    tracing::info,
};

use relaygate_store::{Tenant, TenantStore};

use crate::filter::normalize;

/// A tenant's webhook destination and subscribed event names.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct WebhookConfig {
    pub webhook: String,
    pub subscribe: Vec<String>,
}

impl From<&Tenant> for WebhookConfig {
    fn from(tenant: &Tenant) -> Self {
        Self {
            webhook: tenant.webhook.clone(),
            subscribe: tenant
                .subscribed_events()
                .into_iter()
                .map(str::to_string)
                .collect(),
        }
    }
}

/// Reads and writes per-tenant webhook configuration.
#[derive(Clone)]
pub struct WebhookSettings {
    tenants: Arc<dyn TenantStore>,
}

impl WebhookSettings {
    pub fn new(tenants: Arc<dyn TenantStore>) -> Self {
        Self { tenants }
    }

    pub async fn get(&self, tenant_id: &str) -> Result<WebhookConfig> {
        let Some(tenant) = self.tenants.get_tenant(tenant_id).await? else {
            bail!("tenant not found: {tenant_id}");
        };
        Ok(WebhookConfig::from(&tenant))
    }

    /// Store `url` and the supported subset of `events`. Unknown event names
    /// are dropped silently.
    pub async fn set(&self, tenant_id: &str, url: &str, events: &[String]) -> Result<WebhookConfig> {
        let joined = normalize(events);
        self.tenants.set_webhook(tenant_id, url, &joined).await?;
        info!(tenant_id, url, events = %joined, "webhook configured");
        Ok(WebhookConfig {
            webhook: url.to_string(),
            subscribe: split(&joined),
        })
    }

    /// Like [`set`](Self::set) when `active`; otherwise clears the webhook.
    pub async fn update(
        &self,
        tenant_id: &str,
        url: &str,
        events: &[String],
        active: bool,
    ) -> Result<WebhookConfig> {
        if active {
            self.set(tenant_id, url, events).await
        } else {
            self.clear(tenant_id).await?;
            Ok(WebhookConfig::default())
        }
    }

    pub async fn clear(&self, tenant_id: &str) -> Result<()> {
        self.tenants.set_webhook(tenant_id, "", "").await?;
        info!(tenant_id, "webhook cleared");
        Ok(())
    }
}

fn split(joined: &str) -> Vec<String> {
    if joined.is_empty() {
        return Vec::new();
    }
    joined.split(',').map(str::to_string).collect()
}
