//! Gateway process wiring.
//!
//! Lifecycle:
//! 1. Open the SQLite store and build the configured protocol engine
//! 2. Wire the session registry and the webhook dispatcher around them
//! 3. Start the dispatcher and the reconnect sweep
//! 4. Serve `/health` until a shutdown signal arrives
//! 5. Stop the dispatcher, then release every live connection

pub mod server;
pub mod state;

pub use {
    server::{build_gateway_app, start_gateway},
    state::{GatewayState, build_engine, open_store},
};
