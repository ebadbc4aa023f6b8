//! Tenant Cache Storage - Stores and Federation
//!
//! Defines the single-tenant store contract, an in-memory TTL store, and the
//! federation that lazily creates one store per tenant.

pub mod cache;

pub use cache::{loader_fn, FnLoader, MemoryStore, TenantCache, TenantStore, ValueLoader};

// Re-export core types for convenience
pub use tenantcache_core::{
    handler, CacheError, CacheEvent, CacheKey, CacheResult, EventHandler, FederationStats,
    StoreConfig, StoreError, StoreStats, Ttl,
};
