//! Types shared by every relaygate crate.

pub mod time;
pub mod types;

pub use types::{EventType, UnknownEventType};
