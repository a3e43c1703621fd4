//! Session registry: one live connection per tenant, plus the event router
//! that turns engine events into persisted tenant state and outbox records.
//!
//! Every lifecycle operation (connect, disconnect, logout) holds the registry
//! lock for its whole body, network round-trip included, so two operations
//! can never interleave on the connection map.

pub mod error;
pub mod registry;
pub mod router;

pub use {
    error::SessionError,
    registry::{ConnectSummary, RegistryOptions, SessionRegistry, SessionStatus},
    router::EventRouter,
};
