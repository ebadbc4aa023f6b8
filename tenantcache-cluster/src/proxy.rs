//! Proxy side: forwards operations to the owner and correlates replies.

use std::sync::{Arc, Weak};

use serde_json::Value;
use tenantcache_core::{
    CacheKey, CacheResult, ClusterConfig, FederationStats, ProtocolError, Ttl,
};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::channel::MessageSink;
use crate::message::{decode, decode_value, Inbound, Method, Reply, Request, ALL_TENANTS};
use crate::pending::PendingTable;

/// Process that reaches the cache through the owner.
pub struct ProxyNode {
    config: ClusterConfig,
    outbound: Option<Arc<dyn MessageSink>>,
    pending: PendingTable,
}

impl ProxyNode {
    /// Create a proxy. Without an outbound sink every operation fails with
    /// [`ProtocolError::ChannelUnavailable`].
    pub fn new(config: ClusterConfig, outbound: Option<Arc<dyn MessageSink>>) -> Self {
        Self {
            config,
            outbound,
            pending: PendingTable::new(),
        }
    }

    pub fn config(&self) -> &ClusterConfig {
        &self.config
    }

    /// Requests sent and not yet answered.
    pub fn pending(&self) -> &PendingTable {
        &self.pending
    }

    fn request(&self, method: Method, tenant: &str) -> Request {
        Request::new(self.config.namespace.clone(), method, tenant)
    }

    async fn call(&self, request: Request) -> CacheResult<Option<Value>> {
        let outbound = self
            .outbound
            .as_ref()
            .ok_or(ProtocolError::ChannelUnavailable)?;
        let method = request.method;
        let message = request.to_value()?;
        let pending = self.pending.register(request.signature())?;

        tracing::trace!(signature = %pending.signature(), "Sending request");
        outbound.send(message)?;

        let body = pending.wait(self.config.request_timeout).await?;
        body.into_result(method)
    }

    pub async fn get(&self, tenant: &str, key: &CacheKey) -> CacheResult<Option<Value>> {
        self.call(self.request(Method::Get, tenant).with_key(key.clone()))
            .await
    }

    /// Store a value. `None` sends the configured default TTL.
    pub async fn set(
        &self,
        tenant: &str,
        key: CacheKey,
        value: Value,
        ttl: Option<Ttl>,
    ) -> CacheResult<bool> {
        let request = self
            .request(Method::Set, tenant)
            .with_key(key)
            .with_value(value)
            .with_ttl(ttl.unwrap_or(self.config.default_ttl));
        let value = self.call(request).await?;
        decode_value(Method::Set, value)
    }

    pub async fn delete(&self, tenant: &str, key: &CacheKey) -> CacheResult<u64> {
        let value = self
            .call(self.request(Method::Delete, tenant).with_key(key.clone()))
            .await?;
        decode_value(Method::Delete, value)
    }

    /// Clear one tenant on the owner, returning the owner's statistics
    /// afterwards.
    pub async fn flush(&self, tenant: &str) -> CacheResult<FederationStats> {
        let value = self.call(self.request(Method::Flush, tenant)).await?;
        decode_value(Method::Flush, value)
    }

    /// Clear every tenant on the owner, returning the owner's statistics
    /// afterwards.
    pub async fn flush_all(&self) -> CacheResult<FederationStats> {
        let value = self
            .call(self.request(Method::FlushAll, ALL_TENANTS))
            .await?;
        decode_value(Method::FlushAll, value)
    }

    pub async fn stats(&self) -> CacheResult<FederationStats> {
        let value = self
            .call(self.request(Method::GetStats, ALL_TENANTS))
            .await?;
        decode_value(Method::GetStats, value)
    }

    /// Process one raw inbound message. Returns `true` if it completed a
    /// pending request.
    pub fn handle_message(&self, message: &Value) -> bool {
        let reply = match decode::<Reply>(message, self.config.namespace.as_deref()) {
            Inbound::Accepted(reply) => reply,
            Inbound::Foreign | Inbound::OtherNamespace(_) => return false,
            Inbound::Malformed(reason) => {
                tracing::warn!(reason = %reason, "Dropping malformed reply");
                return false;
            }
        };

        let resolved = self.pending.resolve(&reply.signature, reply.body);
        if !resolved {
            tracing::debug!(signature = %reply.signature, "Reply matched no pending request");
        }
        resolved
    }

    /// Route replies arriving on `inbound` until it closes or the proxy is
    /// dropped.
    pub fn listen(self: &Arc<Self>, mut inbound: mpsc::UnboundedReceiver<Value>) -> JoinHandle<()> {
        let proxy: Weak<Self> = Arc::downgrade(self);
        tokio::spawn(async move {
            while let Some(message) = inbound.recv().await {
                let Some(proxy) = proxy.upgrade() else {
                    break;
                };
                proxy.handle_message(&message);
            }
            tracing::debug!("Proxy listener stopped");
        })
    }
}

impl std::fmt::Debug for ProxyNode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProxyNode")
            .field("config", &self.config)
            .field("connected", &self.outbound.is_some())
            .field("pending", &self.pending.len())
            .finish()
    }
}
