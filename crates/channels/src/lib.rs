//! Connection capability.
//!
//! A protocol engine implements [`ConnectionFactory`] and hands out one
//! [`Connection`] per tenant. Connections never call back into the gateway;
//! they push typed [`EngineEvent`] values into the [`EventSink`] they were
//! built with, and whoever holds the receiving end decides what to do.

pub mod connection;
pub mod loopback;

pub use connection::{Connection, ConnectionFactory, EngineEvent, EventSink, StoragePartition};
