//! Persistence for tenant records and the webhook outbox.
//!
//! The gateway only talks to the [`TenantStore`] and [`Outbox`] traits;
//! [`SqliteStore`] implements both on one sqlx pool.

pub mod outbox;
pub mod sqlite;
pub mod tenant;

pub use {
    outbox::{DeliveryStatus, Outbox, WebhookEvent},
    sqlite::SqliteStore,
    tenant::{NewTenant, Tenant, TenantStore, TenantUpdate},
};
