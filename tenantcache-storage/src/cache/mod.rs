//! Tenant-aware cache layer.
//!
//! This module provides the per-tenant federation and the store contract it
//! manages.
//!
//! # Tenant Isolation
//!
//! Every tenant name maps to its own [`TenantStore`] instance, so entries for
//! different tenants never collide even under the same key. Stores are
//! created lazily on first access and dropped only by
//! [`TenantCache::flush_all`].
//!
//! # Events
//!
//! Handlers registered on the federation are attached to every store,
//! including stores created after registration.
//!
//! # Example
//!
//! ```ignore
//! let cache: TenantCache<MemoryStore<Value>> = TenantCache::new(Ttl::minutes(5));
//!
//! cache.on(CacheEvent::Expired, handler(|key, _| {
//!     tracing::debug!(?key, "entry expired");
//! }))?;
//!
//! cache.set("acme", "plan".into(), json!("gold"), None)?;
//! let plan = cache.get_sync("acme", &"plan".into())?;
//! ```

pub mod federation;
pub mod memory;
pub mod traits;

pub use federation::TenantCache;
pub use memory::MemoryStore;
pub use traits::{loader_fn, FnLoader, TenantStore, ValueLoader};
