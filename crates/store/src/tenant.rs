use {
    async_trait::async_trait,
    serde::{Deserialize, Serialize},
};

/// One registered account of the gateway.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Tenant {
    pub id: String,
    pub name: String,
    /// Secret API callers authenticate with. Unique across tenants.
    pub token: String,
    /// Delivery destination; empty disables delivery.
    pub webhook: String,
    /// Network identity resolved after login; empty when logged out.
    pub jid: String,
    /// Latest unconsumed pairing challenge.
    pub qr_code: String,
    /// Last known connection state, used by the startup reconnect sweep.
    pub connected: bool,
    /// Epoch seconds after which the tenant is inactive (0 = never).
    pub expiration: i64,
    /// Comma-separated subscribed event names, or containing `All`.
    pub events: String,
    pub proxy_url: String,
}

impl Tenant {
    pub fn has_webhook(&self) -> bool {
        !self.webhook.is_empty()
    }

    /// Subscribed event names; an empty string yields an empty list.
    pub fn subscribed_events(&self) -> Vec<&str> {
        if self.events.is_empty() {
            return Vec::new();
        }
        self.events.split(',').collect()
    }
}

#[derive(Debug, Clone, Default)]
pub struct NewTenant {
    pub name: String,
    pub token: String,
    pub webhook: Option<String>,
    pub events: Option<String>,
}

/// Partial update; `None` leaves the field unchanged.
#[derive(Debug, Clone, Default)]
pub struct TenantUpdate {
    pub name: Option<String>,
    pub token: Option<String>,
    pub webhook: Option<String>,
    pub events: Option<String>,
}

impl TenantUpdate {
    pub fn apply(self, tenant: &mut Tenant) {
        if let Some(name) = self.name {
            tenant.name = name;
        }
        if let Some(token) = self.token {
            tenant.token = token;
        }
        if let Some(webhook) = self.webhook {
            tenant.webhook = webhook;
        }
        if let Some(events) = self.events {
            tenant.events = events;
        }
    }
}

#[async_trait]
pub trait TenantStore: Send + Sync {
    // ---- records ----
    async fn create_tenant(&self, new: NewTenant) -> anyhow::Result<Tenant>;
    async fn get_tenant(&self, id: &str) -> anyhow::Result<Option<Tenant>>;
    async fn get_tenant_by_token(&self, token: &str) -> anyhow::Result<Option<Tenant>>;
    async fn list_tenants(&self) -> anyhow::Result<Vec<Tenant>>;
    async fn update_tenant(
        &self,
        id: &str,
        update: TenantUpdate,
    ) -> anyhow::Result<Option<Tenant>>;
    /// Returns false if no such tenant existed.
    async fn delete_tenant(&self, id: &str) -> anyhow::Result<bool>;

    // ---- session state ----
    async fn list_connected(&self) -> anyhow::Result<Vec<Tenant>>;
    async fn set_connected(&self, id: &str, connected: bool) -> anyhow::Result<()>;
    async fn set_jid(&self, id: &str, jid: &str) -> anyhow::Result<()>;
    async fn set_qr_code(&self, id: &str, code: &str) -> anyhow::Result<()>;

    // ---- webhook ----
    async fn set_webhook(&self, id: &str, url: &str, events: &str) -> anyhow::Result<()>;
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tenant(events: &str) -> Tenant {
        Tenant {
            id: "t".into(),
            name: "n".into(),
            token: "tok".into(),
            webhook: String::new(),
            jid: String::new(),
            qr_code: String::new(),
            connected: false,
            expiration: 0,
            events: events.into(),
            proxy_url: String::new(),
        }
    }

    #[test]
    fn empty_event_string_has_no_subscriptions() {
        assert!(tenant("").subscribed_events().is_empty());
        assert_eq!(tenant("Message,All").subscribed_events(), vec![
            "Message", "All"
        ]);
    }

    #[test]
    fn update_touches_only_given_fields() {
        let mut t = tenant("Message");
        TenantUpdate {
            webhook: Some("https://x/hook".into()),
            ..Default::default()
        }
        .apply(&mut t);
        assert_eq!(t.webhook, "https://x/hook");
        assert_eq!(t.events, "Message");
        assert_eq!(t.name, "n");
    }
}
