// src/services/core/infrastructure/mod.rs

pub mod cache_manager;
pub mod persistence_gateway;
pub mod store;

pub use cache_manager::{CacheBackend, CacheManager, CacheTtl, MemoryCache};
pub use persistence_gateway::PersistenceGateway;
pub use store::{RetryPolicy, Store};
