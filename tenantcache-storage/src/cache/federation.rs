//! Tenant federation: one lazily created store per tenant.
//!
//! The federation owns every tenant store, the default TTL they are created
//! with, and the event registry that is replayed onto each store. Reads
//! optionally fall through to a [`ValueLoader`] on a miss.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use tenantcache_core::{
    CacheEvent, CacheKey, CacheResult, EventHandler, EventRegistry, FederationStats,
    StoreConfig, StoreError, Ttl,
};

use super::traits::{TenantStore, ValueLoader};

/// Tenant-aware cache built from one store per tenant.
///
/// Stores are created on first access to a tenant name and live until
/// [`TenantCache::flush_all`]. Every handler registered through
/// [`TenantCache::on`] is attached to every store, including stores created
/// later.
///
/// # Lock order
///
/// `stores` is always taken before `events`. Store methods that fire events
/// are never called while either lock is held.
///
/// # Example
///
/// ```ignore
/// let cache: TenantCache<MemoryStore<String>> = TenantCache::new(Ttl::minutes(10));
///
/// cache.set("acme", "greeting".into(), "hello".to_string(), None)?;
/// let hit = cache.get_sync("acme", &"greeting".into())?;
///
/// // Populate on miss
/// let loaded = cache.get_or_load("acme", &"user:1".into(), &loader).await?;
/// ```
pub struct TenantCache<S: TenantStore> {
    stores: RwLock<HashMap<String, Arc<S>>>,
    events: RwLock<EventRegistry<S::Value>>,
    default_ttl: Ttl,
}

impl<S: TenantStore> TenantCache<S> {
    /// Create an empty federation. `default_ttl` of zero means entries never
    /// expire unless a write says otherwise.
    pub fn new(default_ttl: Ttl) -> Self {
        Self {
            stores: RwLock::new(HashMap::new()),
            events: RwLock::new(EventRegistry::new()),
            default_ttl,
        }
    }

    pub fn default_ttl(&self) -> Ttl {
        self.default_ttl
    }

    /// Store for `tenant`, creating it (and attaching every registered
    /// handler) on first access.
    pub fn store(&self, tenant: &str) -> CacheResult<Arc<S>> {
        if let Some(store) = self
            .stores
            .read()
            .map_err(|_| StoreError::LockPoisoned)?
            .get(tenant)
        {
            return Ok(Arc::clone(store));
        }

        let mut stores = self.stores.write().map_err(|_| StoreError::LockPoisoned)?;
        // Another caller may have created it between the two locks.
        if let Some(store) = stores.get(tenant) {
            return Ok(Arc::clone(store));
        }

        let store = Arc::new(S::open(StoreConfig::for_ttl(self.default_ttl)));
        let events = self.events.read().map_err(|_| StoreError::LockPoisoned)?;
        for (event, handler) in events.iter() {
            store.subscribe(event, Arc::clone(handler))?;
        }
        stores.insert(tenant.to_string(), Arc::clone(&store));

        tracing::debug!(
            tenant = %tenant,
            default_ttl = %self.default_ttl,
            handlers = events.len(),
            "Created tenant store"
        );
        Ok(store)
    }

    /// Read a cached value without ever invoking a loader.
    pub fn get_sync(&self, tenant: &str, key: &CacheKey) -> CacheResult<Option<S::Value>> {
        self.store(tenant)?.get(key)
    }

    /// Read a cached value, populating it through `loader` on a miss.
    ///
    /// Without a loader a miss returns `Ok(None)` and stores nothing.
    pub async fn get(
        &self,
        tenant: &str,
        key: &CacheKey,
        loader: Option<&dyn ValueLoader<S::Value>>,
    ) -> CacheResult<Option<S::Value>> {
        match loader {
            Some(loader) => self.get_or_load(tenant, key, loader).await.map(Some),
            None => self.get_sync(tenant, key),
        }
    }

    /// Read a cached value; on a miss invoke `loader`, store its result with
    /// the default TTL and return it.
    ///
    /// Concurrent misses on the same key are not coalesced: each caller runs
    /// its own loader and the last write wins.
    pub async fn get_or_load<L>(
        &self,
        tenant: &str,
        key: &CacheKey,
        loader: &L,
    ) -> CacheResult<S::Value>
    where
        L: ValueLoader<S::Value> + ?Sized,
    {
        if let Some(value) = self.get_sync(tenant, key)? {
            return Ok(value);
        }

        let value = loader.load(tenant, key).await.map_err(|e| {
            tracing::warn!(tenant = %tenant, key = %key, error = %e, "Loader failed");
            e
        })?;
        // Resolve the store again: a flush_all may have run while loading.
        self.set(tenant, key.clone(), value.clone(), None)?;
        Ok(value)
    }

    /// Store a value. `None` applies the federation's default TTL.
    pub fn set(
        &self,
        tenant: &str,
        key: CacheKey,
        value: S::Value,
        ttl: Option<Ttl>,
    ) -> CacheResult<bool> {
        let ttl = ttl.unwrap_or(self.default_ttl);
        self.store(tenant)?.set(key, value, Some(ttl))
    }

    /// Remove keys from a tenant's store, returning how many were removed.
    pub fn delete(&self, tenant: &str, keys: &[CacheKey]) -> CacheResult<u64> {
        self.store(tenant)?.delete(keys)
    }

    /// Clear one tenant's entries. The store itself, and its handlers, stay
    /// registered.
    pub fn flush(&self, tenant: &str) -> CacheResult<()> {
        self.store(tenant)?.clear_all()
    }

    /// Clear and unregister every tenant store. The next access to any tenant
    /// creates a fresh store.
    pub fn flush_all(&self) -> CacheResult<()> {
        let drained: Vec<(String, Arc<S>)> = self
            .stores
            .write()
            .map_err(|_| StoreError::LockPoisoned)?
            .drain()
            .collect();

        for (_, store) in &drained {
            store.clear_all()?;
        }
        tracing::debug!(tenants = drained.len(), "Flushed all tenant stores");
        Ok(())
    }

    /// Register a handler for `event` on every current and future store.
    pub fn on(&self, event: CacheEvent, handler: EventHandler<S::Value>) -> CacheResult<()> {
        let stores = self.stores.read().map_err(|_| StoreError::LockPoisoned)?;
        self.events
            .write()
            .map_err(|_| StoreError::LockPoisoned)?
            .register(event, Arc::clone(&handler));
        for store in stores.values() {
            store.subscribe(event, Arc::clone(&handler))?;
        }
        Ok(())
    }

    /// Statistics snapshot for every registered tenant store.
    pub fn stats(&self) -> CacheResult<FederationStats> {
        let stores = self.stores.read().map_err(|_| StoreError::LockPoisoned)?;
        stores
            .iter()
            .map(|(tenant, store)| Ok((tenant.clone(), store.stats()?)))
            .collect()
    }

    /// Sweep expired entries in every store, returning the total removed.
    pub fn check_expired(&self) -> CacheResult<u64> {
        let stores: Vec<Arc<S>> = self
            .stores
            .read()
            .map_err(|_| StoreError::LockPoisoned)?
            .values()
            .cloned()
            .collect();
        stores
            .iter()
            .try_fold(0u64, |total, store| Ok(total + store.check_expired()?))
    }

    /// Names of every registered tenant, sorted.
    pub fn tenants(&self) -> CacheResult<Vec<String>> {
        let mut names: Vec<String> = self
            .stores
            .read()
            .map_err(|_| StoreError::LockPoisoned)?
            .keys()
            .cloned()
            .collect();
        names.sort();
        Ok(names)
    }

    /// Whether `tenant` currently has a store. Does not create one.
    pub fn contains_tenant(&self, tenant: &str) -> CacheResult<bool> {
        Ok(self
            .stores
            .read()
            .map_err(|_| StoreError::LockPoisoned)?
            .contains_key(tenant))
    }
}

impl<S: TenantStore> std::fmt::Debug for TenantCache<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let tenants = self.stores.read().map(|s| s.len()).unwrap_or_default();
        f.debug_struct("TenantCache")
            .field("tenants", &tenants)
            .field("default_ttl", &self.default_ttl)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::memory::MemoryStore;
    use crate::cache::traits::loader_fn;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;
    use tenantcache_core::{handler, CacheError};

    type Cache = TenantCache<MemoryStore<String>>;

    fn key(k: &str) -> CacheKey {
        CacheKey::from(k)
    }

    fn counter() -> (Arc<AtomicUsize>, EventHandler<String>) {
        let count = Arc::new(AtomicUsize::new(0));
        let seen = Arc::clone(&count);
        let h = handler(move |_, _| {
            seen.fetch_add(1, Ordering::SeqCst);
        });
        (count, h)
    }

    #[test]
    fn test_lazy_creation_is_idempotent() {
        let cache = Cache::new(Ttl::NEVER);
        assert!(!cache.contains_tenant("acme").unwrap());

        let first = cache.store("acme").unwrap();
        cache.set("acme", key("k"), "v".to_string(), None).unwrap();
        let second = cache.store("acme").unwrap();

        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(cache.tenants().unwrap(), vec!["acme".to_string()]);
    }

    #[test]
    fn test_get_creates_store_without_side_effects() {
        let cache = Cache::new(Ttl::NEVER);
        assert_eq!(cache.get_sync("acme", &key("missing")).unwrap(), None);
        assert!(cache.contains_tenant("acme").unwrap());
        assert_eq!(cache.stats().unwrap().get("acme").unwrap().keys, 0);
    }

    #[test]
    fn test_tenants_are_isolated() {
        let cache = Cache::new(Ttl::NEVER);
        cache.set("a", key("k"), "from-a".to_string(), None).unwrap();
        cache.set("b", key("k"), "from-b".to_string(), None).unwrap();

        assert_eq!(cache.get_sync("a", &key("k")).unwrap().as_deref(), Some("from-a"));
        assert_eq!(cache.get_sync("b", &key("k")).unwrap().as_deref(), Some("from-b"));
        assert_eq!(cache.delete("a", &[key("k")]).unwrap(), 1);
        assert!(cache.get_sync("b", &key("k")).unwrap().is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn test_default_and_explicit_ttl() {
        let cache = Cache::new(Ttl::from_secs(1));
        cache.set("t", key("short"), "s".to_string(), None).unwrap();
        cache
            .set("t", key("forever"), "f".to_string(), Some(Ttl::NEVER))
            .unwrap();

        // One TTL plus two check periods.
        tokio::time::sleep(Duration::from_millis(1400)).await;

        assert_eq!(cache.get_sync("t", &key("short")).unwrap(), None);
        assert_eq!(cache.get_sync("t", &key("forever")).unwrap().as_deref(), Some("f"));
    }

    #[tokio::test]
    async fn test_loader_populates_on_miss_only() {
        let cache = Cache::new(Ttl::NEVER);
        let calls = Arc::new(AtomicUsize::new(0));
        let loader = {
            let calls = Arc::clone(&calls);
            loader_fn(move |tenant: String, key: CacheKey| {
                let calls = Arc::clone(&calls);
                async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Ok::<_, CacheError>(format!("{}/{}", tenant, key))
                }
            })
        };

        let first = cache.get_or_load("acme", &key("k"), &loader).await.unwrap();
        let second = cache.get("acme", &key("k"), Some(&loader)).await.unwrap();

        assert_eq!(first, "acme/k");
        assert_eq!(second.as_deref(), Some("acme/k"));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(cache.get_sync("acme", &key("k")).unwrap().as_deref(), Some("acme/k"));
    }

    #[tokio::test]
    async fn test_get_without_loader_returns_none() {
        let cache = Cache::new(Ttl::NEVER);
        let value = cache.get("acme", &key("k"), None).await.unwrap();
        assert_eq!(value, None);
        assert_eq!(cache.stats().unwrap().get("acme").unwrap().keys, 0);
    }

    #[tokio::test]
    async fn test_loader_failure_propagates_and_stores_nothing() {
        let cache = Cache::new(Ttl::NEVER);
        let loader = loader_fn(|tenant: String, key: CacheKey| async move {
            Err::<String, _>(CacheError::loader_failed(tenant, key, "unreachable"))
        });

        let err = cache.get_or_load("acme", &key("k"), &loader).await.unwrap_err();
        assert!(matches!(err, CacheError::Store(StoreError::LoaderFailed { .. })));
        assert_eq!(cache.get_sync("acme", &key("k")).unwrap(), None);
    }

    /// Concurrent misses each run their own loader. There is no single-flight
    /// coalescing; this test pins that behavior down.
    #[tokio::test]
    async fn test_concurrent_misses_are_not_coalesced() {
        let cache = Cache::new(Ttl::NEVER);
        let calls = Arc::new(AtomicUsize::new(0));
        let loader = {
            let calls = Arc::clone(&calls);
            loader_fn(move |_tenant: String, _key: CacheKey| {
                let calls = Arc::clone(&calls);
                async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    tokio::task::yield_now().await;
                    Ok::<_, CacheError>("loaded".to_string())
                }
            })
        };

        let k = key("k");
        let (a, b) = tokio::join!(
            cache.get_or_load("acme", &k, &loader),
            cache.get_or_load("acme", &k, &loader),
        );
        assert_eq!(a.unwrap(), "loaded");
        assert_eq!(b.unwrap(), "loaded");
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_flush_keeps_store_and_handlers() {
        let cache = Cache::new(Ttl::NEVER);
        let (sets, on_set) = counter();
        cache.on(CacheEvent::Set, on_set).unwrap();

        cache.set("acme", key("a"), "1".to_string(), None).unwrap();
        let before = cache.store("acme").unwrap();
        cache.flush("acme").unwrap();

        assert_eq!(cache.get_sync("acme", &key("a")).unwrap(), None);
        assert!(Arc::ptr_eq(&before, &cache.store("acme").unwrap()));

        cache.set("acme", key("b"), "2".to_string(), None).unwrap();
        // One handler, two writes: no duplicate attachment after the flush.
        assert_eq!(sets.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_flush_all_recreates_stores() {
        let cache = Cache::new(Ttl::NEVER);
        let (sets, on_set) = counter();
        cache.on(CacheEvent::Set, on_set).unwrap();

        cache.set("a", key("k"), "1".to_string(), None).unwrap();
        cache.set("b", key("k"), "1".to_string(), None).unwrap();
        let old = cache.store("a").unwrap();

        cache.flush_all().unwrap();
        assert!(cache.stats().unwrap().is_empty());
        assert!(cache.tenants().unwrap().is_empty());

        assert_eq!(cache.get_sync("a", &key("k")).unwrap(), None);
        let fresh = cache.store("a").unwrap();
        assert!(!Arc::ptr_eq(&old, &fresh));

        cache.set("a", key("k2"), "2".to_string(), None).unwrap();
        assert_eq!(sets.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_expired_handler_reaches_existing_and_future_stores() {
        let cache = Cache::new(Ttl::from_secs(1));
        let (early_count, early) = counter();
        cache.on(CacheEvent::Expired, early).unwrap();

        cache.set("s1", key("k"), "v".to_string(), None).unwrap();

        let (late_count, late) = counter();
        cache.on(CacheEvent::Expired, late).unwrap();

        cache.set("s2", key("k"), "v".to_string(), None).unwrap();

        tokio::time::sleep(Duration::from_millis(1500)).await;
        assert_eq!(cache.check_expired().unwrap(), 0);

        assert_eq!(early_count.load(Ordering::SeqCst), 2);
        assert_eq!(late_count.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_handlers_for_distinct_events_stay_separate() {
        let cache = Cache::new(Ttl::NEVER);
        let (sets, on_set) = counter();
        let (dels, on_del) = counter();
        cache.on(CacheEvent::Set, on_set).unwrap();
        cache.on(CacheEvent::Del, on_del).unwrap();

        cache.set("acme", key("k"), "v".to_string(), None).unwrap();
        assert_eq!(sets.load(Ordering::SeqCst), 1);
        assert_eq!(dels.load(Ordering::SeqCst), 0);

        cache.delete("acme", &[key("k")]).unwrap();
        assert_eq!(sets.load(Ordering::SeqCst), 1);
        assert_eq!(dels.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_stats_per_tenant() {
        let cache = Cache::new(Ttl::NEVER);
        cache.set("a", key("k"), "v".to_string(), None).unwrap();
        cache.get_sync("a", &key("k")).unwrap();
        cache.get_sync("b", &key("k")).unwrap();

        let stats = cache.stats().unwrap();
        assert_eq!(stats.len(), 2);
        assert_eq!(stats.get("a").unwrap().hits, 1);
        assert_eq!(stats.get("b").unwrap().misses, 1);
        assert_eq!(stats.totals().hits + stats.totals().misses, 2);
    }
}
