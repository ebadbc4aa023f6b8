//! In-memory TTL store.
//!
//! Entries carry an optional deadline measured on the tokio clock, so tests
//! can drive expiry with a paused runtime. Expired entries are dropped lazily
//! when read and eagerly by a background sweep that runs every
//! `check_period` while a tokio runtime is available.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, RwLock, Weak};
use std::time::Duration;

use chrono::{DateTime, Utc};
use tenantcache_core::{
    CacheEvent, CacheKey, CacheResult, EventHandler, EventRegistry, StoreConfig, StoreError,
    StoreStats, Ttl,
};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};

use super::traits::TenantStore;

struct Entry<V> {
    value: V,
    expires_at: Option<Instant>,
}

impl<V> Entry<V> {
    fn is_expired(&self, now: Instant) -> bool {
        self.expires_at.is_some_and(|deadline| deadline <= now)
    }
}

/// Event raised while the entry lock was held, fired after it is released.
type PendingEvent<V> = (CacheEvent, Option<CacheKey>, Option<V>);

#[derive(Default)]
struct Counters {
    hits: AtomicU64,
    misses: AtomicU64,
    expirations: AtomicU64,
}

impl Counters {
    fn reset(&self) {
        self.hits.store(0, Ordering::Relaxed);
        self.misses.store(0, Ordering::Relaxed);
        self.expirations.store(0, Ordering::Relaxed);
    }
}

struct StoreInner<V> {
    config: StoreConfig,
    entries: Mutex<HashMap<CacheKey, Entry<V>>>,
    handlers: RwLock<EventRegistry<V>>,
    counters: Counters,
    created_at: DateTime<Utc>,
}

impl<V: Clone + Send + Sync + 'static> StoreInner<V> {
    fn entries(&self) -> CacheResult<std::sync::MutexGuard<'_, HashMap<CacheKey, Entry<V>>>> {
        self.entries
            .lock()
            .map_err(|_| StoreError::LockPoisoned.into())
    }

    fn fire(&self, events: Vec<PendingEvent<V>>) -> CacheResult<()> {
        if events.is_empty() {
            return Ok(());
        }
        // Snapshot the handler lists so a handler may subscribe re-entrantly.
        let registry = self
            .handlers
            .read()
            .map_err(|_| StoreError::LockPoisoned)?
            .clone();
        for (event, key, value) in events {
            registry.emit(event, key.as_ref(), value.as_ref());
        }
        Ok(())
    }

    fn check_expired(&self) -> CacheResult<u64> {
        let now = Instant::now();
        let expired: Vec<PendingEvent<V>> = {
            let mut entries = self.entries()?;
            let keys: Vec<CacheKey> = entries
                .iter()
                .filter(|(_, entry)| entry.is_expired(now))
                .map(|(key, _)| key.clone())
                .collect();
            keys.into_iter()
                .filter_map(|key| {
                    entries
                        .remove(&key)
                        .map(|entry| (CacheEvent::Expired, Some(key), Some(entry.value)))
                })
                .collect()
        };
        let count = expired.len() as u64;
        self.counters.expirations.fetch_add(count, Ordering::Relaxed);
        self.fire(expired)?;
        Ok(count)
    }

    /// Deadline for an entry written now. A lifetime past the clock's range
    /// never expires.
    fn deadline(&self, ttl: Option<Ttl>) -> Option<Instant> {
        ttl.unwrap_or(self.config.default_ttl)
            .as_duration()
            .and_then(|lifetime| Instant::now().checked_add(lifetime))
    }
}

/// Thread-safe in-memory store with per-entry TTLs and change events.
pub struct MemoryStore<V> {
    inner: Arc<StoreInner<V>>,
    sweeper: Option<JoinHandle<()>>,
}

impl<V: Clone + Send + Sync + 'static> MemoryStore<V> {
    /// Create a store. The expiry sweep only starts when called from within a
    /// tokio runtime and the config has a check period.
    pub fn new(config: StoreConfig) -> Self {
        let inner = Arc::new(StoreInner {
            config,
            entries: Mutex::new(HashMap::new()),
            handlers: RwLock::new(EventRegistry::new()),
            counters: Counters::default(),
            created_at: Utc::now(),
        });
        let sweeper = config
            .check_period
            .and_then(|period| spawn_sweeper(Arc::downgrade(&inner), period));
        Self { inner, sweeper }
    }

    pub fn config(&self) -> &StoreConfig {
        &self.inner.config
    }

    /// Whether a background sweep task is running for this store.
    pub fn has_sweeper(&self) -> bool {
        self.sweeper.is_some()
    }

    /// Remaining lifetime of a live entry. `Some(None)` means it never expires.
    pub fn ttl_remaining(&self, key: &CacheKey) -> CacheResult<Option<Option<Duration>>> {
        let now = Instant::now();
        let entries = self.inner.entries()?;
        Ok(entries
            .get(key)
            .filter(|entry| !entry.is_expired(now))
            .map(|entry| entry.expires_at.map(|deadline| deadline - now)))
    }
}

fn spawn_sweeper<V>(inner: Weak<StoreInner<V>>, period: Duration) -> Option<JoinHandle<()>>
where
    V: Clone + Send + Sync + 'static,
{
    let handle = tokio::runtime::Handle::try_current().ok()?;
    if Instant::now().checked_add(period).is_none() {
        tracing::debug!(?period, "Check period out of clock range, not sweeping");
        return None;
    }
    Some(handle.spawn(async move {
        let mut ticker = tokio::time::interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        // The first tick completes immediately.
        ticker.tick().await;
        loop {
            ticker.tick().await;
            let Some(inner) = inner.upgrade() else {
                break;
            };
            match inner.check_expired() {
                Ok(0) => {}
                Ok(count) => tracing::trace!(count, "Swept expired entries"),
                Err(e) => tracing::warn!(error = %e, "Expiry sweep failed"),
            }
        }
    }))
}

impl<V> Drop for MemoryStore<V> {
    fn drop(&mut self) {
        if let Some(sweeper) = self.sweeper.take() {
            sweeper.abort();
        }
    }
}

impl<V: Clone + Send + Sync + 'static> TenantStore for MemoryStore<V> {
    type Value = V;

    fn open(config: StoreConfig) -> Self {
        Self::new(config)
    }

    fn set(&self, key: CacheKey, value: V, ttl: Option<Ttl>) -> CacheResult<bool> {
        let expires_at = self.inner.deadline(ttl);
        {
            let mut entries = self.inner.entries()?;
            entries.insert(
                key.clone(),
                Entry {
                    value: value.clone(),
                    expires_at,
                },
            );
        }
        self.inner
            .fire(vec![(CacheEvent::Set, Some(key), Some(value))])?;
        Ok(true)
    }

    fn get(&self, key: &CacheKey) -> CacheResult<Option<V>> {
        let now = Instant::now();
        let (found, expired) = {
            let mut entries = self.inner.entries()?;
            match entries.get(key).map(|entry| entry.is_expired(now)) {
                Some(true) => (None, entries.remove(key).map(|e| e.value)),
                Some(false) => (entries.get(key).map(|e| e.value.clone()), None),
                None => (None, None),
            }
        };

        let counter = if found.is_some() {
            &self.inner.counters.hits
        } else {
            &self.inner.counters.misses
        };
        counter.fetch_add(1, Ordering::Relaxed);

        if let Some(old) = expired {
            self.inner.counters.expirations.fetch_add(1, Ordering::Relaxed);
            self.inner
                .fire(vec![(CacheEvent::Expired, Some(key.clone()), Some(old))])?;
        }
        Ok(found)
    }

    fn has(&self, key: &CacheKey) -> CacheResult<bool> {
        let now = Instant::now();
        let expired = {
            let mut entries = self.inner.entries()?;
            match entries.get(key).map(|entry| entry.is_expired(now)) {
                Some(true) => entries.remove(key).map(|e| e.value),
                Some(false) => return Ok(true),
                None => return Ok(false),
            }
        };
        if let Some(old) = expired {
            self.inner.counters.expirations.fetch_add(1, Ordering::Relaxed);
            self.inner
                .fire(vec![(CacheEvent::Expired, Some(key.clone()), Some(old))])?;
        }
        Ok(false)
    }

    fn delete(&self, keys: &[CacheKey]) -> CacheResult<u64> {
        let now = Instant::now();
        let mut events = Vec::new();
        let mut removed = 0u64;
        {
            let mut entries = self.inner.entries()?;
            for key in keys {
                if let Some(entry) = entries.remove(key) {
                    if entry.is_expired(now) {
                        events.push((CacheEvent::Expired, Some(key.clone()), Some(entry.value)));
                    } else {
                        removed += 1;
                        events.push((CacheEvent::Del, Some(key.clone()), Some(entry.value)));
                    }
                }
            }
        }
        let expired = events.len() as u64 - removed;
        self.inner
            .counters
            .expirations
            .fetch_add(expired, Ordering::Relaxed);
        self.inner.fire(events)?;
        Ok(removed)
    }

    fn clear_all(&self) -> CacheResult<()> {
        self.inner.entries()?.clear();
        self.inner.counters.reset();
        self.inner.fire(vec![(CacheEvent::Flush, None, None)])
    }

    fn check_expired(&self) -> CacheResult<u64> {
        self.inner.check_expired()
    }

    fn subscribe(&self, event: CacheEvent, handler: EventHandler<V>) -> CacheResult<()> {
        self.inner
            .handlers
            .write()
            .map_err(|_| StoreError::LockPoisoned)?
            .register(event, handler);
        Ok(())
    }

    fn stats(&self) -> CacheResult<StoreStats> {
        let now = Instant::now();
        let entries = self.inner.entries()?;
        let (keys, key_bytes) = entries
            .iter()
            .filter(|(_, entry)| !entry.is_expired(now))
            .fold((0u64, 0u64), |(n, bytes), (key, _)| {
                (n + 1, bytes + key.byte_len() as u64)
            });
        Ok(StoreStats {
            hits: self.inner.counters.hits.load(Ordering::Relaxed),
            misses: self.inner.counters.misses.load(Ordering::Relaxed),
            keys,
            key_bytes,
            expirations: self.inner.counters.expirations.load(Ordering::Relaxed),
            created_at: self.inner.created_at,
        })
    }
}
