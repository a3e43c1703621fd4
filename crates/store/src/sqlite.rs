use std::str::FromStr;

use {
    anyhow::{Context, Result},
    async_trait::async_trait,
    sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions},
    tracing::debug,
};

use relaygate_common::{EventType, time::now_ms};

use crate::{
    outbox::{DeliveryStatus, Outbox, WebhookEvent},
    tenant::{NewTenant, Tenant, TenantStore, TenantUpdate},
};

const TENANT_COLUMNS: &str =
    "id, name, token, webhook, jid, qr_code, connected, expiration, events, proxy_url";

/// SQLite-backed tenant store and outbox.
#[derive(Clone)]
pub struct SqliteStore {
    pool: SqlitePool,
}

#[derive(sqlx::FromRow)]
struct TenantRow {
    id: String,
    name: String,
    token: String,
    webhook: String,
    jid: String,
    qr_code: String,
    connected: i32,
    expiration: i64,
    events: String,
    proxy_url: String,
}

impl From<TenantRow> for Tenant {
    fn from(r: TenantRow) -> Self {
        Self {
            id: r.id,
            name: r.name,
            token: r.token,
            webhook: r.webhook,
            jid: r.jid,
            qr_code: r.qr_code,
            connected: r.connected != 0,
            expiration: r.expiration,
            events: r.events,
            proxy_url: r.proxy_url,
        }
    }
}

#[derive(sqlx::FromRow)]
struct EventRow {
    id: i64,
    tenant_id: String,
    event_type: String,
    payload: String,
    created_at: i64,
    status: String,
}

impl TryFrom<EventRow> for WebhookEvent {
    type Error = anyhow::Error;

    fn try_from(r: EventRow) -> Result<Self> {
        let payload = serde_json::from_str(&r.payload)
            .unwrap_or_else(|_| serde_json::Value::String(r.payload.clone()));
        Ok(Self {
            id: r.id,
            tenant_id: r.tenant_id,
            event_type: r.event_type,
            payload,
            created_at: r.created_at,
            status: DeliveryStatus::from_str(&r.status)?,
        })
    }
}

impl SqliteStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Open (creating if needed) the database at `url` and initialise tables.
    pub async fn open(url: &str) -> Result<Self> {
        let options = SqliteConnectOptions::from_str(url)
            .with_context(|| format!("invalid database url: {url}"))?
            .create_if_missing(true);
        let pool = SqlitePoolOptions::new()
            .max_connections(8)
            .connect_with(options)
            .await
            .with_context(|| format!("failed to open {url}"))?;
        Self::init(&pool).await?;
        Ok(Self::new(pool))
    }

    /// Private in-memory database, for tests and throwaway runs.
    ///
    /// Pinned to a single connection that never expires: every sqlite
    /// `:memory:` connection is its own database.
    pub async fn in_memory() -> Result<Self> {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect("sqlite::memory:")
            .await?;
        Self::init(&pool).await?;
        Ok(Self::new(pool))
    }

    /// Create the `tenants` and `webhook_events` tables if they don't exist.
    pub async fn init(pool: &SqlitePool) -> Result<()> {
        sqlx::query(
            r#"CREATE TABLE IF NOT EXISTS tenants (
                id         TEXT PRIMARY KEY,
                name       TEXT NOT NULL,
                token      TEXT NOT NULL UNIQUE,
                webhook    TEXT NOT NULL DEFAULT '',
                jid        TEXT NOT NULL DEFAULT '',
                qr_code    TEXT NOT NULL DEFAULT '',
                connected  INTEGER NOT NULL DEFAULT 0,
                expiration INTEGER NOT NULL DEFAULT 0,
                events     TEXT NOT NULL DEFAULT '',
                proxy_url  TEXT NOT NULL DEFAULT ''
            )"#,
        )
        .execute(pool)
        .await?;

        sqlx::query(
            r#"CREATE TABLE IF NOT EXISTS webhook_events (
                id         INTEGER PRIMARY KEY AUTOINCREMENT,
                tenant_id  TEXT NOT NULL,
                event_type TEXT NOT NULL,
                payload    TEXT NOT NULL,
                created_at INTEGER NOT NULL,
                status     TEXT NOT NULL DEFAULT 'pending'
            )"#,
        )
        .execute(pool)
        .await?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_webhook_events_pending
             ON webhook_events (status, created_at, id)",
        )
        .execute(pool)
        .await?;

        debug!("tenant and outbox tables ready");
        Ok(())
    }

    /// Fetch a single outbox record regardless of status.
    pub async fn get_event(&self, id: i64) -> Result<Option<WebhookEvent>> {
        sqlx::query_as::<_, EventRow>("SELECT * FROM webhook_events WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?
            .map(WebhookEvent::try_from)
            .transpose()
    }

    pub async fn count_pending(&self) -> Result<i64> {
        let count: i64 =
            sqlx::query_scalar("SELECT COUNT(*) FROM webhook_events WHERE status = 'pending'")
                .fetch_one(&self.pool)
                .await?;
        Ok(count)
    }

    async fn fetch_tenant(&self, column: &str, value: &str) -> Result<Option<Tenant>> {
        let sql = format!("SELECT {TENANT_COLUMNS} FROM tenants WHERE {column} = ?");
        let row = sqlx::query_as::<_, TenantRow>(&sql)
            .bind(value)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.map(Into::into))
    }

    async fn set_status(&self, id: i64, status: DeliveryStatus) -> Result<()> {
        sqlx::query("UPDATE webhook_events SET status = ? WHERE id = ? AND status = 'pending'")
            .bind(status.as_str())
            .bind(id)
            .execute(&self.pool)
            .await
            .with_context(|| format!("failed to mark webhook event {id} {status}"))?;
        Ok(())
    }
}

#[async_trait]
impl TenantStore for SqliteStore {
    async fn create_tenant(&self, new: NewTenant) -> Result<Tenant> {
        let id = uuid::Uuid::new_v4().simple().to_string();
        sqlx::query("INSERT INTO tenants (id, name, token, webhook, events) VALUES (?, ?, ?, ?, ?)")
            .bind(&id)
            .bind(&new.name)
            .bind(&new.token)
            .bind(new.webhook.unwrap_or_default())
            .bind(new.events.unwrap_or_default())
            .execute(&self.pool)
            .await
            .context("failed to create tenant")?;
        self.fetch_tenant("id", &id)
            .await?
            .context("tenant vanished after insert")
    }

    async fn get_tenant(&self, id: &str) -> Result<Option<Tenant>> {
        self.fetch_tenant("id", id).await
    }

    async fn get_tenant_by_token(&self, token: &str) -> Result<Option<Tenant>> {
        self.fetch_tenant("token", token).await
    }

    async fn list_tenants(&self) -> Result<Vec<Tenant>> {
        let sql = format!("SELECT {TENANT_COLUMNS} FROM tenants ORDER BY name ASC");
        let rows = sqlx::query_as::<_, TenantRow>(&sql)
            .fetch_all(&self.pool)
            .await?;
        Ok(rows.into_iter().map(Into::into).collect())
    }

    async fn update_tenant(&self, id: &str, update: TenantUpdate) -> Result<Option<Tenant>> {
        let Some(mut tenant) = self.get_tenant(id).await? else {
            return Ok(None);
        };
        update.apply(&mut tenant);
        sqlx::query("UPDATE tenants SET name = ?, token = ?, webhook = ?, events = ? WHERE id = ?")
            .bind(&tenant.name)
            .bind(&tenant.token)
            .bind(&tenant.webhook)
            .bind(&tenant.events)
            .bind(id)
            .execute(&self.pool)
            .await
            .context("failed to update tenant")?;
        Ok(Some(tenant))
    }

    async fn delete_tenant(&self, id: &str) -> Result<bool> {
        let result = sqlx::query("DELETE FROM tenants WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn list_connected(&self) -> Result<Vec<Tenant>> {
        let sql = format!("SELECT {TENANT_COLUMNS} FROM tenants WHERE connected = 1");
        let rows = sqlx::query_as::<_, TenantRow>(&sql)
            .fetch_all(&self.pool)
            .await?;
        Ok(rows.into_iter().map(Into::into).collect())
    }

    async fn set_connected(&self, id: &str, connected: bool) -> Result<()> {
        sqlx::query("UPDATE tenants SET connected = ? WHERE id = ?")
            .bind(i32::from(connected))
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn set_jid(&self, id: &str, jid: &str) -> Result<()> {
        sqlx::query("UPDATE tenants SET jid = ? WHERE id = ?")
            .bind(jid)
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn set_qr_code(&self, id: &str, code: &str) -> Result<()> {
        sqlx::query("UPDATE tenants SET qr_code = ? WHERE id = ?")
            .bind(code)
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn set_webhook(&self, id: &str, url: &str, events: &str) -> Result<()> {
        sqlx::query("UPDATE tenants SET webhook = ?, events = ? WHERE id = ?")
            .bind(url)
            .bind(events)
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}

#[async_trait]
impl Outbox for SqliteStore {
    async fn enqueue(
        &self,
        tenant_id: &str,
        event_type: EventType,
        payload: &serde_json::Value,
    ) -> Result<i64> {
        let body = serde_json::to_string(payload)?;
        let result = sqlx::query(
            "INSERT INTO webhook_events (tenant_id, event_type, payload, created_at, status)
             VALUES (?, ?, ?, ?, 'pending')",
        )
        .bind(tenant_id)
        .bind(event_type.as_str())
        .bind(body)
        .bind(now_ms())
        .execute(&self.pool)
        .await
        .context("failed to enqueue webhook event")?;
        Ok(result.last_insert_rowid())
    }

    async fn fetch_pending(&self, limit: u32) -> Result<Vec<WebhookEvent>> {
        sqlx::query_as::<_, EventRow>(
            "SELECT * FROM webhook_events WHERE status = 'pending'
             ORDER BY created_at ASC, id ASC LIMIT ?",
        )
        .bind(i64::from(limit))
        .fetch_all(&self.pool)
        .await?
        .into_iter()
        .map(WebhookEvent::try_from)
        .collect()
    }

    async fn mark_sent(&self, id: i64) -> Result<()> {
        self.set_status(id, DeliveryStatus::Sent).await
    }

    async fn mark_failed(&self, id: i64) -> Result<()> {
        self.set_status(id, DeliveryStatus::Failed).await
    }
}

#[cfg(test)]
mod tests {
    use {super::*, serde_json::json};

    async fn store() -> SqliteStore {
        SqliteStore::in_memory().await.unwrap()
    }

    fn new_tenant(name: &str, token: &str) -> NewTenant {
        NewTenant {
            name: name.into(),
            token: token.into(),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn create_and_lookup_tenant() {
        let store = store().await;
        let created = store
            .create_tenant(NewTenant {
                name: "acme".into(),
                token: "secret".into(),
                webhook: Some("https://x/hook".into()),
                events: Some("Message".into()),
            })
            .await
            .unwrap();

        assert_eq!(created.id.len(), 32);
        assert!(!created.connected);
        assert_eq!(created.webhook, "https://x/hook");

        let by_id = store.get_tenant(&created.id).await.unwrap().unwrap();
        assert_eq!(by_id, created);
        let by_token = store.get_tenant_by_token("secret").await.unwrap().unwrap();
        assert_eq!(by_token.id, created.id);
        assert!(store.get_tenant("missing").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn duplicate_token_is_rejected() {
        let store = store().await;
        store.create_tenant(new_tenant("a", "same")).await.unwrap();
        assert!(store.create_tenant(new_tenant("b", "same")).await.is_err());
    }

    #[tokio::test]
    async fn session_state_updates() {
        let store = store().await;
        let a = store.create_tenant(new_tenant("a", "ta")).await.unwrap();
        let b = store.create_tenant(new_tenant("b", "tb")).await.unwrap();

        store.set_connected(&a.id, true).await.unwrap();
        store.set_jid(&a.id, "1@s.whatsapp.net").await.unwrap();
        store.set_qr_code(&b.id, "2@challenge").await.unwrap();

        let connected = store.list_connected().await.unwrap();
        assert_eq!(connected.len(), 1);
        assert_eq!(connected[0].id, a.id);
        assert_eq!(connected[0].jid, "1@s.whatsapp.net");
        assert_eq!(
            store.get_tenant(&b.id).await.unwrap().unwrap().qr_code,
            "2@challenge"
        );

        store.set_connected(&a.id, false).await.unwrap();
        assert!(store.list_connected().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn update_and_delete_tenant() {
        let store = store().await;
        let t = store.create_tenant(new_tenant("a", "ta")).await.unwrap();

        let updated = store
            .update_tenant(&t.id, TenantUpdate {
                name: Some("renamed".into()),
                ..Default::default()
            })
            .await
            .unwrap()
            .unwrap();
        assert_eq!(updated.name, "renamed");
        assert_eq!(updated.token, "ta");

        store.set_webhook(&t.id, "https://y", "All").await.unwrap();
        let reloaded = store.get_tenant(&t.id).await.unwrap().unwrap();
        assert_eq!(reloaded.webhook, "https://y");
        assert_eq!(reloaded.events, "All");

        assert!(store.delete_tenant(&t.id).await.unwrap());
        assert!(!store.delete_tenant(&t.id).await.unwrap());
        assert!(
            store
                .update_tenant(&t.id, TenantUpdate::default())
                .await
                .unwrap()
                .is_none()
        );
    }

    #[tokio::test]
    async fn pending_fetch_is_oldest_first_and_bounded() {
        let store = store().await;
        let mut ids = Vec::new();
        for n in 0..5 {
            ids.push(
                store
                    .enqueue("t", EventType::Message, &json!({ "n": n }))
                    .await
                    .unwrap(),
            );
        }

        let batch = store.fetch_pending(3).await.unwrap();
        assert_eq!(batch.iter().map(|e| e.id).collect::<Vec<_>>(), ids[..3]);
        assert_eq!(batch[0].payload, json!({ "n": 0 }));
        assert_eq!(batch[0].event_type, "Message");
        assert_eq!(batch[0].status, DeliveryStatus::Pending);
        assert_eq!(store.count_pending().await.unwrap(), 5);
    }

    #[tokio::test]
    async fn terminal_records_never_change_or_reappear() {
        let store = store().await;
        let sent = store
            .enqueue("t", EventType::Presence, &json!({}))
            .await
            .unwrap();
        let failed = store
            .enqueue("t", EventType::Presence, &json!({}))
            .await
            .unwrap();

        store.mark_sent(sent).await.unwrap();
        store.mark_failed(failed).await.unwrap();
        // Attempts to move terminal records are ignored.
        store.mark_failed(sent).await.unwrap();
        store.mark_sent(failed).await.unwrap();

        assert_eq!(
            store.get_event(sent).await.unwrap().unwrap().status,
            DeliveryStatus::Sent
        );
        assert_eq!(
            store.get_event(failed).await.unwrap().unwrap().status,
            DeliveryStatus::Failed
        );
        assert!(store.fetch_pending(10).await.unwrap().is_empty());
    }
}
