use std::{
    sync::{Arc, Mutex, MutexGuard},
    time::Duration,
};

use {
    anyhow::Result,
    tokio::{task::JoinHandle, time::MissedTickBehavior},
    tokio_util::sync::CancellationToken,
    tracing::{debug, info, warn},
};

use {
    relaygate_config::WebhooksConfig,
    relaygate_store::{Outbox, TenantStore, WebhookEvent},
};

use crate::{
    filter::is_subscribed,
    sender::{DeliveryError, WebhookPayload, WebhookSender},
};

#[derive(Debug, Clone)]
pub struct DispatcherOptions {
    pub poll_interval: Duration,
    pub batch_size: u32,
    /// Upper bound for a single delivery attempt.
    pub timeout: Duration,
}

impl Default for DispatcherOptions {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(2),
            batch_size: 50,
            timeout: Duration::from_secs(10),
        }
    }
}

impl From<&WebhooksConfig> for DispatcherOptions {
    fn from(config: &WebhooksConfig) -> Self {
        Self {
            poll_interval: Duration::from_secs(config.poll_interval_secs.max(1)),
            batch_size: config.batch_size.max(1),
            timeout: Duration::from_secs(config.timeout_secs.max(1)),
        }
    }
}

/// What happened to one outbox record.
#[derive(Debug)]
enum Outcome {
    Delivered,
    /// Tenant is not subscribed to this event type; consumed without sending.
    Filtered,
    NoTenant,
    NoWebhook,
    Failed,
}

impl Outcome {
    fn is_sent(&self) -> bool {
        matches!(self, Self::Delivered | Self::Filtered)
    }
}

struct Running {
    cancel: CancellationToken,
    handle: JoinHandle<()>,
}

/// Background loop draining the outbox into tenants' webhooks.
pub struct Dispatcher {
    inner: Arc<Inner>,
    running: Mutex<Option<Running>>,
}

struct Inner {
    outbox: Arc<dyn Outbox>,
    tenants: Arc<dyn TenantStore>,
    sender: Arc<dyn WebhookSender>,
    options: DispatcherOptions,
}

impl Dispatcher {
    pub fn new(
        outbox: Arc<dyn Outbox>,
        tenants: Arc<dyn TenantStore>,
        sender: Arc<dyn WebhookSender>,
        options: DispatcherOptions,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                outbox,
                tenants,
                sender,
                options,
            }),
            running: Mutex::new(None),
        }
    }

    fn running(&self) -> MutexGuard<'_, Option<Running>> {
        self.running
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Spawn the polling loop. Calling it while the loop runs is a no-op.
    pub fn start(&self) {
        let mut running = self.running();
        if running.is_some() {
            warn!("webhook dispatcher already running");
            return;
        }

        let cancel = CancellationToken::new();
        let inner = Arc::clone(&self.inner);
        let token = cancel.clone();
        let handle = tokio::spawn(async move { inner.run(token).await });

        info!(
            interval_ms = self.inner.options.poll_interval.as_millis() as u64,
            batch = self.inner.options.batch_size,
            "webhook dispatcher started"
        );
        *running = Some(Running { cancel, handle });
    }

    /// Signal the loop to exit and wait until its current batch has finished.
    pub async fn stop(&self) {
        let Some(Running { cancel, handle }) = self.running().take() else {
            return;
        };
        cancel.cancel();
        if let Err(e) = handle.await {
            warn!(error = %e, "webhook dispatcher task ended abnormally");
        }
        info!("webhook dispatcher stopped");
    }

    pub fn is_running(&self) -> bool {
        self.running().is_some()
    }

    /// Run a single dispatch pass and return how many records it handled.
    pub async fn process_pending(&self) -> Result<usize> {
        self.inner.process_pending().await
    }
}

impl Inner {
    async fn run(&self, cancel: CancellationToken) {
        let mut interval = tokio::time::interval(self.options.poll_interval);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = interval.tick() => {
                    // The batch runs outside the select, so cancellation
                    // only takes effect between ticks.
                    if let Err(e) = self.process_pending().await {
                        warn!(error = %e, "failed to fetch pending webhook events");
                    }
                },
            }
        }
    }

    async fn process_pending(&self) -> Result<usize> {
        let batch = self.outbox.fetch_pending(self.options.batch_size).await?;
        if batch.is_empty() {
            return Ok(0);
        }
        debug!(count = batch.len(), "dispatching webhook events");

        for record in &batch {
            let outcome = self.dispatch(record).await;
            let marked = if outcome.is_sent() {
                self.outbox.mark_sent(record.id).await
            } else {
                self.outbox.mark_failed(record.id).await
            };
            if let Err(e) = marked {
                warn!(event_id = record.id, error = %e, "failed to update webhook event status");
            }
        }
        Ok(batch.len())
    }

    async fn dispatch(&self, record: &WebhookEvent) -> Outcome {
        let tenant = match self.tenants.get_tenant(&record.tenant_id).await {
            Ok(Some(tenant)) => tenant,
            Ok(None) => {
                warn!(event_id = record.id, tenant_id = %record.tenant_id, "tenant not found for webhook event");
                return Outcome::NoTenant;
            },
            Err(e) => {
                warn!(event_id = record.id, tenant_id = %record.tenant_id, error = %e, "failed to load tenant");
                return Outcome::NoTenant;
            },
        };

        if !tenant.has_webhook() {
            debug!(event_id = record.id, tenant_id = %tenant.id, "tenant has no webhook");
            return Outcome::NoWebhook;
        }

        if !is_subscribed(&tenant.events, &record.event_type) {
            debug!(
                event_id = record.id,
                tenant_id = %tenant.id,
                event = %record.event_type,
                "tenant not subscribed, skipping"
            );
            return Outcome::Filtered;
        }

        let payload = WebhookPayload::from(record);
        let timeout = self.options.timeout;
        let result = match tokio::time::timeout(
            timeout,
            self.sender.send(&tenant.webhook, &payload),
        )
        .await
        {
            Ok(result) => result,
            Err(_) => Err(DeliveryError::Timeout(timeout)),
        };

        match result {
            Ok(()) => {
                debug!(event_id = record.id, tenant_id = %tenant.id, event = %payload.event, "webhook delivered");
                Outcome::Delivered
            },
            Err(e) => {
                warn!(event_id = record.id, tenant_id = %tenant.id, error = %e, "webhook delivery failed");
                Outcome::Failed
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use {
        super::*,
        async_trait::async_trait,
        mockito::Matcher,
        relaygate_common::EventType,
        relaygate_store::{DeliveryStatus, NewTenant, SqliteStore, Tenant},
        serde_json::json,
        std::sync::atomic::{AtomicUsize, Ordering},
    };

    use crate::sender::HttpSender;

    #[derive(Default)]
    struct RecordingSender {
        sent: Mutex<Vec<(String, WebhookPayload)>>,
        /// Deliveries begun, counted before any delay.
        started: AtomicUsize,
        fail_with: Option<u16>,
        delay: Option<Duration>,
    }

    impl RecordingSender {
        fn calls(&self) -> Vec<(String, WebhookPayload)> {
            self.sent.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl WebhookSender for RecordingSender {
        async fn send(&self, url: &str, payload: &WebhookPayload) -> Result<(), DeliveryError> {
            self.started.fetch_add(1, Ordering::SeqCst);
            if let Some(delay) = self.delay {
                tokio::time::sleep(delay).await;
            }
            self.sent
                .lock()
                .unwrap()
                .push((url.to_string(), payload.clone()));
            match self.fail_with {
                Some(code) => Err(DeliveryError::Status(code)),
                None => Ok(()),
            }
        }
    }

    fn options() -> DispatcherOptions {
        DispatcherOptions {
            poll_interval: Duration::from_millis(10),
            batch_size: 50,
            timeout: Duration::from_secs(10),
        }
    }

    fn dispatcher(store: &SqliteStore, sender: Arc<dyn WebhookSender>) -> Dispatcher {
        Dispatcher::new(
            Arc::new(store.clone()),
            Arc::new(store.clone()),
            sender,
            options(),
        )
    }

    async fn tenant(store: &SqliteStore, webhook: &str, events: &str) -> Tenant {
        store
            .create_tenant(NewTenant {
                name: "acme".into(),
                token: format!("tok-{webhook}-{events}"),
                webhook: Some(webhook.into()),
                events: Some(events.into()),
            })
            .await
            .unwrap()
    }

    async fn status(store: &SqliteStore, id: i64) -> DeliveryStatus {
        store.get_event(id).await.unwrap().unwrap().status
    }

    #[tokio::test]
    async fn wildcard_delivers_every_type() {
        let store = SqliteStore::in_memory().await.unwrap();
        let t = tenant(&store, "https://x/hook", "Message,All").await;
        let sender = Arc::new(RecordingSender::default());
        let d = dispatcher(&store, sender.clone());

        let mut ids = Vec::new();
        for kind in [EventType::Presence, EventType::CallOffer, EventType::Message] {
            ids.push(store.enqueue(&t.id, kind, &json!({})).await.unwrap());
        }

        assert_eq!(d.process_pending().await.unwrap(), 3);

        for id in ids {
            assert_eq!(status(&store, id).await, DeliveryStatus::Sent);
        }
        let events: Vec<_> = sender.calls().into_iter().map(|(_, p)| p.event).collect();
        assert_eq!(events, vec!["Presence", "CallOffer", "Message"]);
    }

    #[tokio::test]
    async fn unsubscribed_event_is_sent_without_delivery() {
        let store = SqliteStore::in_memory().await.unwrap();
        let t = tenant(&store, "https://x/hook", "Message").await;
        let sender = Arc::new(RecordingSender::default());
        let d = dispatcher(&store, sender.clone());
        let id = store
            .enqueue(&t.id, EventType::Presence, &json!({}))
            .await
            .unwrap();

        d.process_pending().await.unwrap();

        assert_eq!(status(&store, id).await, DeliveryStatus::Sent);
        assert!(sender.calls().is_empty());
    }

    #[tokio::test]
    async fn empty_webhook_fails_without_delivery() {
        let store = SqliteStore::in_memory().await.unwrap();
        let t = tenant(&store, "", "All").await;
        let sender = Arc::new(RecordingSender::default());
        let d = dispatcher(&store, sender.clone());
        let id = store
            .enqueue(&t.id, EventType::Message, &json!({}))
            .await
            .unwrap();

        d.process_pending().await.unwrap();

        assert_eq!(status(&store, id).await, DeliveryStatus::Failed);
        assert!(sender.calls().is_empty());
    }

    #[tokio::test]
    async fn missing_tenant_fails_record() {
        let store = SqliteStore::in_memory().await.unwrap();
        let sender = Arc::new(RecordingSender::default());
        let d = dispatcher(&store, sender.clone());
        let id = store
            .enqueue("ghost", EventType::Message, &json!({}))
            .await
            .unwrap();

        d.process_pending().await.unwrap();

        assert_eq!(status(&store, id).await, DeliveryStatus::Failed);
        assert!(sender.calls().is_empty());
    }

    #[tokio::test]
    async fn delivery_error_is_terminal_and_isolated() {
        let store = SqliteStore::in_memory().await.unwrap();
        let broken = tenant(&store, "https://broken/hook", "All").await;
        let fine = tenant(&store, "https://fine/hook", "All").await;
        let failing = Arc::new(RecordingSender {
            fail_with: Some(500),
            ..Default::default()
        });
        let d = dispatcher(&store, failing.clone());

        let first = store
            .enqueue(&broken.id, EventType::Message, &json!({}))
            .await
            .unwrap();
        let second = store
            .enqueue(&fine.id, EventType::Message, &json!({}))
            .await
            .unwrap();

        assert_eq!(d.process_pending().await.unwrap(), 2);
        assert_eq!(failing.calls().len(), 2);
        assert_eq!(status(&store, first).await, DeliveryStatus::Failed);
        assert_eq!(status(&store, second).await, DeliveryStatus::Failed);
    }

    #[tokio::test]
    async fn slow_sender_times_out_as_failed() {
        let store = SqliteStore::in_memory().await.unwrap();
        let t = tenant(&store, "https://x/hook", "All").await;
        let slow = Arc::new(RecordingSender {
            delay: Some(Duration::from_secs(5)),
            ..Default::default()
        });
        let d = Dispatcher::new(
            Arc::new(store.clone()),
            Arc::new(store.clone()),
            slow,
            DispatcherOptions {
                timeout: Duration::from_millis(50),
                ..options()
            },
        );
        let id = store
            .enqueue(&t.id, EventType::Message, &json!({}))
            .await
            .unwrap();

        d.process_pending().await.unwrap();

        assert_eq!(status(&store, id).await, DeliveryStatus::Failed);
    }

    #[tokio::test]
    async fn terminal_records_are_never_reselected() {
        let store = SqliteStore::in_memory().await.unwrap();
        let t = tenant(&store, "https://x/hook", "Message").await;
        let sender = Arc::new(RecordingSender::default());
        let d = dispatcher(&store, sender.clone());
        store
            .enqueue(&t.id, EventType::Message, &json!({}))
            .await
            .unwrap();

        assert_eq!(d.process_pending().await.unwrap(), 1);
        assert_eq!(d.process_pending().await.unwrap(), 0);
        assert_eq!(sender.calls().len(), 1);
    }

    #[tokio::test]
    async fn batch_size_bounds_one_pass() {
        let store = SqliteStore::in_memory().await.unwrap();
        let t = tenant(&store, "https://x/hook", "All").await;
        let sender = Arc::new(RecordingSender::default());
        let d = Dispatcher::new(
            Arc::new(store.clone()),
            Arc::new(store.clone()),
            sender.clone(),
            DispatcherOptions {
                batch_size: 2,
                ..options()
            },
        );
        for _ in 0..3 {
            store
                .enqueue(&t.id, EventType::Message, &json!({}))
                .await
                .unwrap();
        }

        assert_eq!(d.process_pending().await.unwrap(), 2);
        assert_eq!(store.count_pending().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn message_reaches_webhook_exactly_once() {
        let store = SqliteStore::in_memory().await.unwrap();
        let t = tenant(&store, "https://x/hook", "Message").await;
        let sender = Arc::new(RecordingSender::default());
        let d = dispatcher(&store, sender.clone());
        let id = store
            .enqueue(&t.id, EventType::Message, &json!({ "text": "hello" }))
            .await
            .unwrap();

        d.process_pending().await.unwrap();

        assert_eq!(status(&store, id).await, DeliveryStatus::Sent);
        let calls = sender.calls();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].0, "https://x/hook");
        assert_eq!(calls[0].1.event, "Message");
        assert_eq!(calls[0].1.data, json!({ "text": "hello" }));
    }

    #[tokio::test]
    async fn http_delivery_posts_once_to_tenant_webhook() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/hook")
            .match_body(Matcher::PartialJson(json!({ "event": "Message" })))
            .with_status(204)
            .expect(1)
            .create_async()
            .await;

        let store = SqliteStore::in_memory().await.unwrap();
        let t = tenant(&store, &format!("{}/hook", server.url()), "Message").await;
        let sender = Arc::new(HttpSender::new("relaygate-test").unwrap());
        let d = dispatcher(&store, sender);
        let id = store
            .enqueue(&t.id, EventType::Message, &json!({ "text": "hello" }))
            .await
            .unwrap();

        d.process_pending().await.unwrap();
        d.process_pending().await.unwrap();

        mock.assert_async().await;
        assert_eq!(status(&store, id).await, DeliveryStatus::Sent);
    }

    #[tokio::test]
    async fn background_loop_drains_and_stops_cleanly() {
        let store = SqliteStore::in_memory().await.unwrap();
        let t = tenant(&store, "https://x/hook", "All").await;
        let sender = Arc::new(RecordingSender::default());
        let d = dispatcher(&store, sender.clone());

        d.start();
        d.start();
        assert!(d.is_running());

        let id = store
            .enqueue(&t.id, EventType::Message, &json!({}))
            .await
            .unwrap();
        for _ in 0..200 {
            if status(&store, id).await == DeliveryStatus::Sent {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(status(&store, id).await, DeliveryStatus::Sent);

        d.stop().await;
        assert!(!d.is_running());
        d.stop().await;

        let late = store
            .enqueue(&t.id, EventType::Message, &json!({}))
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(status(&store, late).await, DeliveryStatus::Pending);
        assert_eq!(sender.calls().len(), 1);
    }

    #[tokio::test]
    async fn stop_waits_for_delivery_in_flight() {
        let store = SqliteStore::in_memory().await.unwrap();
        let t = tenant(&store, "https://x/hook", "All").await;
        let sender = Arc::new(RecordingSender {
            delay: Some(Duration::from_millis(300)),
            ..Default::default()
        });
        let d = dispatcher(&store, sender.clone());
        let id = store
            .enqueue(&t.id, EventType::Message, &json!({}))
            .await
            .unwrap();

        d.start();
        for _ in 0..200 {
            if sender.started.load(Ordering::SeqCst) > 0 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        assert_eq!(sender.started.load(Ordering::SeqCst), 1);

        d.stop().await;

        assert!(!d.is_running());
        assert_eq!(status(&store, id).await, DeliveryStatus::Sent);
        assert_eq!(sender.calls().len(), 1);
    }
}
