//! Outbound webhook delivery: the dispatcher that drains the outbox, the
//! sender contract it delivers through, and per-tenant webhook settings.

pub mod dispatcher;
pub mod filter;
pub mod sender;
pub mod settings;

pub use {
    dispatcher::{Dispatcher, DispatcherOptions},
    filter::is_subscribed,
    sender::{DeliveryError, HttpSender, WebhookPayload, WebhookSender},
    settings::{WebhookConfig, WebhookSettings},
};
