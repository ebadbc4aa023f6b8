//! Tenant Cache Core - Shared Types
//!
//! Pure data structures shared by the store, federation and cluster crates:
//! cache keys, TTLs, statistics snapshots, cache events, configuration and
//! errors. This crate contains no I/O and no runtime.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::time::Duration;

pub mod config;
pub mod error;
pub mod event;

pub use config::{ClusterConfig, StoreConfig};
pub use error::{CacheError, CacheResult, ConfigError, ProtocolError, StoreError};
pub use event::{handler, CacheEvent, EventHandler, EventRegistry};

// ============================================================================
// KEYS
// ============================================================================

/// Key of a cached entry within one tenant store.
///
/// Keys are either strings or integers. On the wire they serialize as the
/// bare JSON string or number, so `"7"` and `7` are distinct keys.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(untagged)]
pub enum CacheKey {
    Int(i64),
    Str(String),
}

impl CacheKey {
    /// Approximate size of the key in bytes, used for statistics.
    pub fn byte_len(&self) -> usize {
        match self {
            CacheKey::Int(_) => std::mem::size_of::<i64>(),
            CacheKey::Str(s) => s.len(),
        }
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CacheKey::Int(n) => write!(f, "{}", n),
            CacheKey::Str(s) => f.write_str(s),
        }
    }
}

impl From<&str> for CacheKey {
    fn from(value: &str) -> Self {
        CacheKey::Str(value.to_string())
    }
}

impl From<String> for CacheKey {
    fn from(value: String) -> Self {
        CacheKey::Str(value)
    }
}

impl From<i64> for CacheKey {
    fn from(value: i64) -> Self {
        CacheKey::Int(value)
    }
}

impl From<i32> for CacheKey {
    fn from(value: i32) -> Self {
        CacheKey::Int(value as i64)
    }
}

impl From<u32> for CacheKey {
    fn from(value: u32) -> Self {
        CacheKey::Int(value as i64)
    }
}

// ============================================================================
// TTL
// ============================================================================

/// Time-to-live in whole seconds. Zero means the entry never expires.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct Ttl(u64);

impl Ttl {
    /// Entries stored with this TTL never expire.
    pub const NEVER: Ttl = Ttl(0);

    pub const fn from_secs(secs: u64) -> Self {
        Ttl(secs)
    }

    /// TTL of the given number of minutes.
    pub const fn minutes(minutes: u64) -> Self {
        Ttl(60 * minutes)
    }

    /// TTL of the given number of hours.
    pub const fn hours(hours: u64) -> Self {
        Ttl(60 * 60 * hours)
    }

    pub const fn as_secs(&self) -> u64 {
        self.0
    }

    pub const fn is_never(&self) -> bool {
        self.0 == 0
    }

    /// Lifetime of an entry, or `None` if it never expires.
    pub fn as_duration(&self) -> Option<Duration> {
        if self.is_never() {
            None
        } else {
            Some(Duration::from_secs(self.0))
        }
    }

    /// Expiry sweep period for a store using this TTL as its default.
    ///
    /// One fifth of the TTL, so four sweeps happen per TTL period.
    /// `None` when the TTL never expires.
    pub fn check_period(&self) -> Option<Duration> {
        if self.is_never() {
            None
        } else {
            Some(Duration::from_millis(self.0.saturating_mul(200)))
        }
    }
}

impl fmt::Display for Ttl {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_never() {
            f.write_str("never")
        } else {
            write!(f, "{}s", self.0)
        }
    }
}

// ============================================================================
// STATISTICS
// ============================================================================

/// Statistics snapshot of a single tenant store.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoreStats {
    /// Reads that found a live entry.
    pub hits: u64,
    /// Reads that found nothing or an expired entry.
    pub misses: u64,
    /// Live entries currently stored.
    pub keys: u64,
    /// Approximate bytes used by keys.
    pub key_bytes: u64,
    /// Entries removed because their TTL ran out.
    pub expirations: u64,
    /// When the store was created.
    pub created_at: DateTime<Utc>,
}

impl StoreStats {
    /// Calculate the hit rate (0.0 to 1.0).
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }
}

/// Statistics for every registered tenant store, keyed by tenant name.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FederationStats {
    tenants: BTreeMap<String, StoreStats>,
}

impl FederationStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, tenant: impl Into<String>, stats: StoreStats) {
        self.tenants.insert(tenant.into(), stats);
    }

    pub fn get(&self, tenant: &str) -> Option<&StoreStats> {
        self.tenants.get(tenant)
    }

    pub fn len(&self) -> usize {
        self.tenants.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tenants.is_empty()
    }

    /// Tenant names in sorted order.
    pub fn tenants(&self) -> impl Iterator<Item = &str> {
        self.tenants.keys().map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &StoreStats)> {
        self.tenants.iter().map(|(k, v)| (k.as_str(), v))
    }

    /// Sum of all tenant counters. `created_at` is the oldest store's.
    pub fn totals(&self) -> StoreStats {
        let mut totals = StoreStats::default();
        let mut oldest: Option<DateTime<Utc>> = None;
        for stats in self.tenants.values() {
            totals.hits += stats.hits;
            totals.misses += stats.misses;
            totals.keys += stats.keys;
            totals.key_bytes += stats.key_bytes;
            totals.expirations += stats.expirations;
            oldest = Some(match oldest {
                Some(t) if t <= stats.created_at => t,
                _ => stats.created_at,
            });
        }
        if let Some(t) = oldest {
            totals.created_at = t;
        }
        totals
    }
}

impl FromIterator<(String, StoreStats)> for FederationStats {
    fn from_iter<I: IntoIterator<Item = (String, StoreStats)>>(iter: I) -> Self {
        Self {
            tenants: iter.into_iter().collect(),
        }
    }
}
