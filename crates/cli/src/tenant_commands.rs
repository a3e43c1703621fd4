use std::sync::Arc;

use {
    anyhow::{Result, bail},
    clap::Subcommand,
};

use {
    relaygate_config::RelaygateConfig,
    relaygate_gateway::open_store,
    relaygate_store::{NewTenant, SqliteStore, Tenant, TenantStore},
    relaygate_webhooks::{WebhookSettings, filter::normalize},
};

#[derive(Subcommand)]
pub enum TenantAction {
    /// Register a new tenant.
    Add {
        #[arg(long)]
        name: String,
        /// Secret the tenant authenticates with. Must be unique.
        #[arg(long)]
        token: String,
        #[arg(long)]
        webhook: Option<String>,
        /// Comma-separated event names (e.g. "Message,ReadReceipt" or "All").
        #[arg(long)]
        events: Option<String>,
    },
    /// List registered tenants.
    List,
    /// Delete a tenant.
    Remove { id: String },
    /// Configure or clear a tenant's webhook.
    Webhook {
        id: String,
        #[arg(long, required_unless_present = "clear")]
        url: Option<String>,
        #[arg(long, value_delimiter = ',')]
        events: Vec<String>,
        #[arg(long, conflicts_with_all = ["url", "events"])]
        clear: bool,
    },
}

pub async fn handle_tenants(action: TenantAction, config: &RelaygateConfig) -> Result<()> {
    let store = open_store(&config.database).await?;
    match action {
        TenantAction::Add {
            name,
            token,
            webhook,
            events,
        } => add(&store, name, token, webhook, events).await,
        TenantAction::List => list(&store).await,
        TenantAction::Remove { id } => remove(&store, &id).await,
        TenantAction::Webhook {
            id,
            url,
            events,
            clear,
        } => webhook(store, &id, url, &events, clear).await,
    }
}

async fn add(
    store: &SqliteStore,
    name: String,
    token: String,
    webhook: Option<String>,
    events: Option<String>,
) -> Result<()> {
    let events = events.map(|raw| {
        let names: Vec<&str> = raw.split(',').map(str::trim).collect();
        normalize(&names)
    });
    let tenant = store
        .create_tenant(NewTenant {
            name,
            token,
            webhook,
            events,
        })
        .await?;
    println!("Created tenant {} ({})", tenant.name, tenant.id);
    Ok(())
}

async fn list(store: &SqliteStore) -> Result<()> {
    let tenants = store.list_tenants().await?;
    if tenants.is_empty() {
        println!("No tenants registered.");
        return Ok(());
    }
    for tenant in &tenants {
        println!("{}", describe(tenant));
    }
    Ok(())
}

fn describe(tenant: &Tenant) -> String {
    let webhook = if tenant.has_webhook() {
        tenant.webhook.as_str()
    } else {
        "-"
    };
    let jid = if tenant.jid.is_empty() {
        "-"
    } else {
        tenant.jid.as_str()
    };
    format!(
        "{}  {:<16} connected={:<5} jid={} webhook={} events={}",
        tenant.id, tenant.name, tenant.connected, jid, webhook, tenant.events
    )
}

async fn remove(store: &SqliteStore, id: &str) -> Result<()> {
    if !store.delete_tenant(id).await? {
        bail!("tenant not found: {id}");
    }
    println!("Removed tenant {id}");
    Ok(())
}

async fn webhook(
    store: SqliteStore,
    id: &str,
    url: Option<String>,
    events: &[String],
    clear: bool,
) -> Result<()> {
    if store.get_tenant(id).await?.is_none() {
        bail!("tenant not found: {id}");
    }
    let settings = WebhookSettings::new(Arc::new(store));
    let url = url.unwrap_or_default();
    let config = settings.update(id, &url, events, !clear).await?;
    if config.webhook.is_empty() {
        println!("Webhook cleared for {id}");
    } else {
        println!(
            "Webhook for {id}: {} [{}]",
            config.webhook,
            config.subscribe.join(",")
        );
    }
    Ok(())
}
