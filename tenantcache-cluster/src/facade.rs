//! Role-aware cache façade.
//!
//! Callers use one API regardless of role. On the owner every operation runs
//! against the local federation; on a proxy it becomes a request to the
//! owner.

use std::sync::Arc;

use serde_json::Value;
use tenantcache_core::{
    CacheEvent, CacheKey, CacheResult, ClusterConfig, EventHandler, FederationStats,
    ProtocolError, Ttl,
};
use tenantcache_storage::{MemoryStore, TenantCache, TenantStore, ValueLoader};
use tokio::task::JoinHandle;

use crate::channel::{MessageSink, PeerLink};
use crate::owner::OwnerNode;
use crate::proxy::ProxyNode;

/// Which side of the protocol a process plays.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Role {
    /// Holds the federation and serves requests.
    Owner,
    /// Forwards every operation to the owner.
    Proxy,
}

enum Node<S: TenantStore<Value = Value>> {
    Owner(Arc<OwnerNode<S>>),
    Proxy(Arc<ProxyNode>),
}

/// Tenant cache shared across processes.
pub struct ClusterCache<S: TenantStore<Value = Value> = MemoryStore<Value>> {
    config: ClusterConfig,
    node: Node<S>,
}

impl<S: TenantStore<Value = Value>> ClusterCache<S> {
    /// Build a cache for `role`. `outbound` is only used by proxies; a proxy
    /// built without one fails every operation with
    /// [`ProtocolError::ChannelUnavailable`].
    pub fn new(
        role: Role,
        config: ClusterConfig,
        outbound: Option<Arc<dyn MessageSink>>,
    ) -> CacheResult<Self> {
        config.validate()?;
        let node = match role {
            Role::Owner => {
                let cache = Arc::new(TenantCache::new(config.default_ttl));
                Node::Owner(Arc::new(OwnerNode::new(cache, config.namespace.clone())))
            }
            Role::Proxy => Node::Proxy(Arc::new(ProxyNode::new(config.clone(), outbound))),
        };
        tracing::debug!(role = ?role, namespace = ?config.namespace, "Cluster cache created");
        Ok(Self { config, node })
    }

    pub fn owner(config: ClusterConfig) -> CacheResult<Self> {
        Self::new(Role::Owner, config, None)
    }

    pub fn proxy(config: ClusterConfig, outbound: Arc<dyn MessageSink>) -> CacheResult<Self> {
        Self::new(Role::Proxy, config, Some(outbound))
    }

    /// Proxy connected to the owner through `link`. Replies arriving on the
    /// link are routed by a background task.
    pub fn connect(config: ClusterConfig, link: PeerLink) -> CacheResult<Self> {
        let (outbound, inbound) = link.into_parts();
        let cache = Self::proxy(config, outbound)?;
        if let Node::Proxy(proxy) = &cache.node {
            proxy.listen(inbound);
        }
        Ok(cache)
    }

    pub fn role(&self) -> Role {
        match self.node {
            Node::Owner(_) => Role::Owner,
            Node::Proxy(_) => Role::Proxy,
        }
    }

    pub fn config(&self) -> &ClusterConfig {
        &self.config
    }

    /// The local federation, on the owner.
    pub fn federation(&self) -> Option<&Arc<TenantCache<S>>> {
        match &self.node {
            Node::Owner(owner) => Some(owner.cache()),
            Node::Proxy(_) => None,
        }
    }

    pub fn owner_node(&self) -> Option<&Arc<OwnerNode<S>>> {
        match &self.node {
            Node::Owner(owner) => Some(owner),
            Node::Proxy(_) => None,
        }
    }

    pub fn proxy_node(&self) -> Option<&Arc<ProxyNode>> {
        match &self.node {
            Node::Owner(_) => None,
            Node::Proxy(proxy) => Some(proxy),
        }
    }

    /// Start serving a newly reachable proxy. Owner only.
    pub fn attach_peer(&self, link: PeerLink) -> CacheResult<JoinHandle<()>> {
        match &self.node {
            Node::Owner(owner) => Ok(owner.attach_peer(link)),
            Node::Proxy(_) => Err(owner_only("attach_peer")),
        }
    }

    /// Read a cached value. Never invokes a loader.
    pub async fn get(&self, tenant: &str, key: &CacheKey) -> CacheResult<Option<Value>> {
        match &self.node {
            Node::Owner(owner) => owner.cache().get_sync(tenant, key),
            Node::Proxy(proxy) => proxy.get(tenant, key).await,
        }
    }

    /// Read a cached value, running `loader` on a miss and storing its result
    /// with the default TTL.
    ///
    /// On a proxy the loader runs locally and its result is sent to the owner
    /// as a `set`.
    pub async fn get_or_load<L>(&self, tenant: &str, key: &CacheKey, loader: &L) -> CacheResult<Value>
    where
        L: ValueLoader<Value> + ?Sized,
    {
        match &self.node {
            Node::Owner(owner) => owner.cache().get_or_load(tenant, key, loader).await,
            Node::Proxy(proxy) => {
                if let Some(value) = proxy.get(tenant, key).await? {
                    return Ok(value);
                }
                let value = loader.load(tenant, key).await?;
                proxy.set(tenant, key.clone(), value.clone(), None).await?;
                Ok(value)
            }
        }
    }

    /// Store a value. `None` applies the default TTL; `Ttl::NEVER` never
    /// expires.
    pub async fn set(
        &self,
        tenant: &str,
        key: CacheKey,
        value: Value,
        ttl: Option<Ttl>,
    ) -> CacheResult<bool> {
        match &self.node {
            Node::Owner(owner) => owner.cache().set(tenant, key, value, ttl),
            Node::Proxy(proxy) => proxy.set(tenant, key, value, ttl).await,
        }
    }

    pub async fn delete(&self, tenant: &str, key: &CacheKey) -> CacheResult<u64> {
        match &self.node {
            Node::Owner(owner) => owner.cache().delete(tenant, std::slice::from_ref(key)),
            Node::Proxy(proxy) => proxy.delete(tenant, key).await,
        }
    }

    /// Clear one tenant's entries.
    pub async fn flush(&self, tenant: &str) -> CacheResult<()> {
        match &self.node {
            Node::Owner(owner) => owner.cache().flush(tenant),
            Node::Proxy(proxy) => proxy.flush(tenant).await.map(|_| ()),
        }
    }

    /// Clear and unregister every tenant store.
    pub async fn flush_all(&self) -> CacheResult<()> {
        match &self.node {
            Node::Owner(owner) => owner.cache().flush_all(),
            Node::Proxy(proxy) => proxy.flush_all().await.map(|_| ()),
        }
    }

    pub async fn stats(&self) -> CacheResult<FederationStats> {
        match &self.node {
            Node::Owner(owner) => owner.cache().stats(),
            Node::Proxy(proxy) => proxy.stats().await,
        }
    }

    /// Register an event handler on every current and future tenant store.
    /// Owner only: proxies hold no stores.
    pub fn on(&self, event: CacheEvent, handler: EventHandler<Value>) -> CacheResult<()> {
        match &self.node {
            Node::Owner(owner) => owner.cache().on(event, handler),
            Node::Proxy(_) => Err(owner_only("on")),
        }
    }
}

impl<S: TenantStore<Value = Value>> std::fmt::Debug for ClusterCache<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClusterCache")
            .field("role", &self.role())
            .field("config", &self.config)
            .finish()
    }
}

fn owner_only(operation: &str) -> tenantcache_core::CacheError {
    ProtocolError::OwnerOnly {
        operation: operation.to_string(),
    }
    .into()
}
