pub mod app_context;
pub mod codec;
pub mod config;
pub mod consumer;
pub mod events;
pub mod health;
pub mod kafka_source;
pub mod metrics;
pub mod metrics_consts;
pub mod reconciler;
pub mod schema_registry;
pub mod store;
pub mod test_utils;
pub mod types;
