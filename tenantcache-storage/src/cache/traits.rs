//! Tenant store trait and value loader seam.
//!
//! This module defines the contract a single-tenant store must satisfy to be
//! managed by the federation, and the loader trait used to populate the cache
//! on a miss.

use std::future::Future;

use async_trait::async_trait;
use tenantcache_core::{
    CacheEvent, CacheKey, CacheResult, EventHandler, StoreConfig, StoreStats, Ttl,
};

/// Single-tenant, TTL-based key/value store.
///
/// The federation creates one instance per tenant through [`TenantStore::open`]
/// and never shares an instance between tenants. Implementations must be
/// thread-safe; every method takes `&self`.
///
/// # Events
///
/// Handlers attached through [`TenantStore::subscribe`] must be invoked
/// after the store has released its internal locks, so a handler may call
/// back into the same store.
pub trait TenantStore: Send + Sync + 'static {
    /// Payload type held by the store.
    type Value: Clone + Send + Sync + 'static;

    /// Construct an empty store.
    fn open(config: StoreConfig) -> Self
    where
        Self: Sized;

    /// Store a value. `None` applies the store's default TTL; `Ttl::NEVER`
    /// keeps the entry until it is deleted or flushed.
    fn set(&self, key: CacheKey, value: Self::Value, ttl: Option<Ttl>) -> CacheResult<bool>;

    /// Read a live value. Counts a hit or a miss.
    fn get(&self, key: &CacheKey) -> CacheResult<Option<Self::Value>>;

    /// Whether a live value exists. Does not touch hit/miss counters.
    fn has(&self, key: &CacheKey) -> CacheResult<bool>;

    /// Remove the given keys, returning how many live entries were removed.
    fn delete(&self, keys: &[CacheKey]) -> CacheResult<u64>;

    /// Remove every entry and reset the counters.
    fn clear_all(&self) -> CacheResult<()>;

    /// Remove every expired entry, returning how many were removed.
    fn check_expired(&self) -> CacheResult<u64>;

    /// Attach a handler to an event.
    fn subscribe(&self, event: CacheEvent, handler: EventHandler<Self::Value>)
        -> CacheResult<()>;

    /// Statistics snapshot.
    fn stats(&self) -> CacheResult<StoreStats>;
}

/// Loader invoked on a cache miss to produce the value to store.
#[async_trait]
pub trait ValueLoader<V: Send + 'static>: Send + Sync {
    /// Produce the value for `key` in `tenant`.
    async fn load(&self, tenant: &str, key: &CacheKey) -> CacheResult<V>;
}

/// Adapter turning an async closure into a [`ValueLoader`].
pub struct FnLoader<F> {
    f: F,
}

/// Wrap `f` as a loader. The closure receives owned copies of the tenant
/// name and key so the returned future is `'static`.
///
/// ```ignore
/// let loader = loader_fn(|tenant, key| async move {
///     db.fetch(&tenant, &key).await
/// });
/// let value = cache.get_or_load("acme", &key, &loader).await?;
/// ```
pub fn loader_fn<F>(f: F) -> FnLoader<F> {
    FnLoader { f }
}

#[async_trait]
impl<V, F, Fut> ValueLoader<V> for FnLoader<F>
where
    V: Send + 'static,
    F: Fn(String, CacheKey) -> Fut + Send + Sync,
    Fut: Future<Output = CacheResult<V>> + Send,
{
    async fn load(&self, tenant: &str, key: &CacheKey) -> CacheResult<V> {
        (self.f)(tenant.to_string(), key.clone()).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tenantcache_core::CacheError;

    #[tokio::test]
    async fn test_fn_loader_receives_tenant_and_key() {
        let loader = loader_fn(|tenant: String, key: CacheKey| async move {
            Ok::<_, CacheError>(format!("{}:{}", tenant, key))
        });
        let value = loader.load("acme", &CacheKey::from(7)).await.unwrap();
        assert_eq!(value, "acme:7");
    }

    #[tokio::test]
    async fn test_fn_loader_propagates_failure() {
        let loader = loader_fn(|tenant: String, key: CacheKey| async move {
            Err::<String, _>(CacheError::loader_failed(tenant, key, "backend down"))
        });
        let err = loader.load("acme", &CacheKey::from("k")).await.unwrap_err();
        assert!(format!("{}", err).contains("backend down"));
    }
}
