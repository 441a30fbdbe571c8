pub mod delivery_config;
pub mod dispatch;
pub mod engine;
pub mod handler;
pub mod memory_store;
pub mod retry;
pub mod scope;
pub mod store;
