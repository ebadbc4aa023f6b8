//! Configuration types

use crate::{CacheResult, ConfigError, Ttl};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Construction parameters for a single tenant store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoreConfig {
    /// TTL applied when a write does not carry its own.
    pub default_ttl: Ttl,
    /// How often the store sweeps expired entries. `None` disables the sweep.
    pub check_period: Option<Duration>,
}

impl StoreConfig {
    /// Store config derived from a default TTL, sweeping at one fifth of it.
    pub fn for_ttl(default_ttl: Ttl) -> Self {
        Self {
            default_ttl,
            check_period: default_ttl.check_period(),
        }
    }
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self::for_ttl(Ttl::NEVER)
    }
}

/// Configuration shared by the owner and proxy sides of a cluster cache.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClusterConfig {
    /// Namespace stamped on every message. Lets several independent caches
    /// share one channel; `None` accepts any namespace.
    pub namespace: Option<String>,
    /// TTL used when a caller does not supply one.
    pub default_ttl: Ttl,
    /// How long a proxy waits for a reply. `None` waits forever.
    pub request_timeout: Option<Duration>,
}

impl Default for ClusterConfig {
    fn default() -> Self {
        Self {
            namespace: None,
            default_ttl: Ttl::minutes(10),
            request_timeout: Some(Duration::from_secs(30)),
        }
    }
}

impl ClusterConfig {
    /// Create a new cluster config with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the message namespace.
    pub fn with_namespace(mut self, namespace: impl Into<String>) -> Self {
        self.namespace = Some(namespace.into());
        self
    }

    /// Set the default TTL.
    pub fn with_default_ttl(mut self, ttl: Ttl) -> Self {
        self.default_ttl = ttl;
        self
    }

    /// Set (or clear) the proxy request timeout.
    pub fn with_request_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.request_timeout = timeout;
        self
    }

    /// Create from environment variables with fallback to defaults.
    ///
    /// Environment variables:
    /// - `TENANTCACHE_NAMESPACE`: message namespace (default: none)
    /// - `TENANTCACHE_DEFAULT_TTL_SECS`: default TTL, 0 = never (default: 600)
    /// - `TENANTCACHE_REQUEST_TIMEOUT_MS`: proxy reply timeout, 0 = wait forever (default: 30000)
    pub fn from_env() -> Self {
        let defaults = Self::default();

        Self {
            namespace: std::env::var("TENANTCACHE_NAMESPACE")
                .ok()
                .filter(|s| !s.is_empty())
                .or(defaults.namespace),
            default_ttl: std::env::var("TENANTCACHE_DEFAULT_TTL_SECS")
                .ok()
                .and_then(|s| s.parse().ok())
                .map(Ttl::from_secs)
                .unwrap_or(defaults.default_ttl),
            request_timeout: match std::env::var("TENANTCACHE_REQUEST_TIMEOUT_MS")
                .ok()
                .and_then(|s| s.parse::<u64>().ok())
            {
                Some(0) => None,
                Some(ms) => Some(Duration::from_millis(ms)),
                None => defaults.request_timeout,
            },
        }
    }

    /// Validate the configuration.
    ///
    /// Validates:
    /// - namespace, when set, is non-empty and free of whitespace
    /// - request_timeout, when set, is positive
    pub fn validate(&self) -> CacheResult<()> {
        if let Some(namespace) = &self.namespace {
            if namespace.is_empty() || namespace.chars().any(char::is_whitespace) {
                return Err(ConfigError::InvalidValue {
                    field: "namespace".to_string(),
                    value: namespace.clone(),
                    reason: "namespace must be non-empty and contain no whitespace".to_string(),
                }
                .into());
            }
        }

        if let Some(timeout) = self.request_timeout {
            if timeout.is_zero() {
                return Err(ConfigError::InvalidValue {
                    field: "request_timeout".to_string(),
                    value: format!("{:?}", timeout),
                    reason: "request_timeout must be positive; use None to wait forever"
                        .to_string(),
                }
                .into());
            }
        }

        Ok(())
    }

    /// Store config for tenant stores created under this cluster config.
    pub fn store_config(&self) -> StoreConfig {
        StoreConfig::for_ttl(self.default_ttl)
    }
}
