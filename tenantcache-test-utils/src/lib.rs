//! Tenant Cache Test Utilities
//!
//! Shared test infrastructure for the tenant cache workspace:
//! - Mock loaders that count and script their results
//! - An event recorder for handler assertions
//! - Proptest generators for keys, tenant names, TTLs and JSON values
//! - Custom assertions over `CacheResult`

pub use tenantcache_core::{
    handler, CacheError, CacheEvent, CacheKey, CacheResult, EventHandler, FederationStats,
    ProtocolError, StoreError, StoreStats, Ttl,
};
pub use tenantcache_storage::ValueLoader;

use async_trait::async_trait;
use serde_json::Value;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

// ============================================================================
// MOCK LOADERS
// ============================================================================

/// Loader that returns a fixed value and counts its invocations.
#[derive(Debug, Clone)]
pub struct CountingLoader {
    value: Value,
    calls: Arc<AtomicUsize>,
}

impl CountingLoader {
    pub fn new(value: Value) -> Self {
        Self {
            value,
            calls: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// How many times `load` has run, across all clones.
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ValueLoader<Value> for CountingLoader {
    async fn load(&self, _tenant: &str, _key: &CacheKey) -> CacheResult<Value> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.value.clone())
    }
}

/// Loader that always fails with a loader error.
#[derive(Debug, Clone)]
pub struct FailingLoader {
    reason: String,
}

impl FailingLoader {
    pub fn new(reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
        }
    }
}

#[async_trait]
impl ValueLoader<Value> for FailingLoader {
    async fn load(&self, tenant: &str, key: &CacheKey) -> CacheResult<Value> {
        Err(CacheError::loader_failed(tenant, key, &self.reason))
    }
}

// ============================================================================
// EVENT RECORDER
// ============================================================================

/// Records every event delivered to the handlers it hands out.
#[derive(Debug, Clone, Default)]
pub struct EventRecorder {
    seen: Arc<Mutex<Vec<(CacheEvent, Option<CacheKey>)>>>,
}

impl EventRecorder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Handler that records `event` with the key it was fired for.
    pub fn handler<V: 'static>(&self, event: CacheEvent) -> EventHandler<V> {
        let seen = Arc::clone(&self.seen);
        handler(move |key: Option<&CacheKey>, _value: Option<&V>| {
            if let Ok(mut seen) = seen.lock() {
                seen.push((event, key.cloned()));
            }
        })
    }

    /// Every recorded `(event, key)` pair, in delivery order.
    pub fn events(&self) -> Vec<(CacheEvent, Option<CacheKey>)> {
        self.seen.lock().map(|seen| seen.clone()).unwrap_or_default()
    }

    /// How many times `event` was recorded.
    pub fn count(&self, event: CacheEvent) -> usize {
        self.events().iter().filter(|(e, _)| *e == event).count()
    }

    pub fn clear(&self) {
        if let Ok(mut seen) = self.seen.lock() {
            seen.clear();
        }
    }
}

// ============================================================================
// PROPTEST GENERATORS
// ============================================================================

pub mod generators {
    //! Proptest strategies for tenant cache types.

    use super::*;
    use proptest::prelude::*;

    /// Generate a string or integer cache key.
    pub fn arb_cache_key() -> impl Strategy<Value = CacheKey> {
        prop_oneof![
            any::<i64>().prop_map(CacheKey::Int),
            "[a-z0-9:_-]{1,24}".prop_map(CacheKey::Str),
        ]
    }

    /// Generate a tenant name.
    pub fn arb_tenant_name() -> impl Strategy<Value = String> {
        "[a-z][a-z0-9-]{0,15}"
    }

    /// Generate a finite, non-zero TTL.
    pub fn arb_finite_ttl() -> impl Strategy<Value = Ttl> {
        (1u64..=86_400).prop_map(Ttl::from_secs)
    }

    /// Generate any TTL, including `Ttl::NEVER`.
    pub fn arb_ttl() -> impl Strategy<Value = Ttl> {
        prop_oneof![Just(Ttl::NEVER), arb_finite_ttl()]
    }

    /// Generate a small JSON value.
    pub fn arb_json_value() -> impl Strategy<Value = Value> {
        let leaf = prop_oneof![
            Just(Value::Null),
            any::<bool>().prop_map(Value::Bool),
            any::<i64>().prop_map(Value::from),
            "[ -~]{0,16}".prop_map(Value::String),
        ];
        leaf.prop_recursive(3, 16, 4, |inner| {
            prop_oneof![
                prop::collection::vec(inner.clone(), 0..4).prop_map(Value::Array),
                prop::collection::btree_map("[a-z]{1,6}", inner, 0..4)
                    .prop_map(|m| Value::Object(m.into_iter().collect())),
            ]
        })
    }
}

// ============================================================================
// FIXTURES
// ============================================================================

pub mod fixtures {
    //! Pre-built values for common test scenarios.

    use super::*;
    use serde_json::json;

    /// Tenant names used across scenario tests.
    pub const TENANTS: [&str; 3] = ["acme", "globex", "initech"];

    /// A JSON user record.
    pub fn user_record(id: i64) -> Value {
        json!({"id": id, "name": format!("user-{}", id), "active": true})
    }

    /// `count` string keys of the form `item:N`.
    pub fn item_keys(count: usize) -> Vec<CacheKey> {
        (0..count).map(|n| CacheKey::from(format!("item:{}", n))).collect()
    }
}

// ============================================================================
// CUSTOM ASSERTIONS
// ============================================================================

pub mod assertions {
    //! Assertion helpers for tenant cache results.

    use super::*;

    /// Assert that a CacheResult is Ok.
    #[track_caller]
    pub fn assert_ok<T: std::fmt::Debug>(result: &CacheResult<T>) {
        assert!(result.is_ok(), "Expected Ok, got Err: {:?}", result);
    }

    /// Assert that a CacheResult is a request timeout.
    #[track_caller]
    pub fn assert_timed_out<T: std::fmt::Debug>(result: &CacheResult<T>) {
        match result {
            Err(CacheError::Protocol(ProtocolError::RequestTimedOut { .. })) => {}
            other => panic!("Expected RequestTimedOut, got: {:?}", other),
        }
    }

    /// Assert that a CacheResult is a missing-key rejection.
    #[track_caller]
    pub fn assert_missing_key<T: std::fmt::Debug>(result: &CacheResult<T>) {
        match result {
            Err(CacheError::Protocol(ProtocolError::MissingKey { .. })) => {}
            other => panic!("Expected MissingKey, got: {:?}", other),
        }
    }

    /// Assert that a CacheResult is a loader failure, locally or relayed by
    /// the owner.
    #[track_caller]
    pub fn assert_loader_failed<T: std::fmt::Debug>(result: &CacheResult<T>) {
        match result {
            Err(CacheError::Store(StoreError::LoaderFailed { .. })) => {}
            Err(CacheError::Protocol(ProtocolError::Remote { message, .. }))
                if message.contains("Loader failed") => {}
            other => panic!("Expected LoaderFailed, got: {:?}", other),
        }
    }

    /// Assert the number of live keys reported for `tenant`.
    #[track_caller]
    pub fn assert_tenant_keys(stats: &FederationStats, tenant: &str, expected: u64) {
        match stats.get(tenant) {
            Some(store) => assert_eq!(
                store.keys, expected,
                "Wrong key count for tenant {}",
                tenant
            ),
            None => panic!("No statistics for tenant {}", tenant),
        }
    }
}
