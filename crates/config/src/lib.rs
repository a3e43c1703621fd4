//! Configuration loading: discovery, `${ENV}` substitution, and the schema
//! for every relaygate section.

pub mod env_subst;
pub mod loader;
pub mod schema;

pub use {
    loader::{data_dir, discover_and_load, load_config, set_config_dir},
    schema::{
        DatabaseConfig, EngineConfig, EngineKind, RelaygateConfig, ServerConfig, WebhooksConfig,
    },
};
