pub mod catalog;
pub mod config;
pub mod datastore;
mod db;
pub mod migration;
pub mod query;
pub mod store;
mod triggers;
mod write;

pub use strata_core::*;

pub use catalog::{catalog_json, catalog_registry};
pub use config::{DatabaseConfig, LimitsConfig, PoolConfig, StoreLimits, StrataConfig};
pub use datastore::{default_sqlite_path, load_or_init_config, open_store};
pub use store::EntityStore;
