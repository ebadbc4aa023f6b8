//! Owner side: holds the federation and serves proxy requests.

use std::sync::Arc;

use serde_json::Value;
use tenantcache_core::{CacheError, CacheResult, ProtocolError, StoreError};
use tenantcache_storage::{TenantCache, TenantStore};
use tokio::task::JoinHandle;

use crate::channel::PeerLink;
use crate::message::{decode, ErrorKind, Inbound, Method, Reply, ReplyBody, Request};

/// Process that owns the tenant cache.
///
/// Requests are answered from the local federation. Each request gets at
/// most one reply; foreign and other-namespace messages get none.
pub struct OwnerNode<S: TenantStore<Value = Value>> {
    cache: Arc<TenantCache<S>>,
    namespace: Option<String>,
}

impl<S: TenantStore<Value = Value>> OwnerNode<S> {
    pub fn new(cache: Arc<TenantCache<S>>, namespace: Option<String>) -> Self {
        Self { cache, namespace }
    }

    pub fn cache(&self) -> &Arc<TenantCache<S>> {
        &self.cache
    }

    pub fn namespace(&self) -> Option<&str> {
        self.namespace.as_deref()
    }

    /// Process one raw inbound message, returning the encoded reply if the
    /// message was a request addressed to this owner.
    pub async fn handle_message(&self, message: &Value) -> Option<Value> {
        let request = match decode::<Request>(message, self.namespace()) {
            Inbound::Accepted(request) => request,
            Inbound::Foreign => return None,
            Inbound::OtherNamespace(namespace) => {
                tracing::trace!(namespace = %namespace, "Ignoring request for other namespace");
                return None;
            }
            Inbound::Malformed(reason) => {
                tracing::warn!(reason = %reason, "Dropping malformed request");
                return None;
            }
        };

        let reply = self.handle_request(&request).await;
        match reply.to_value() {
            Ok(encoded) => Some(encoded),
            Err(e) => {
                tracing::error!(signature = %reply.signature, error = %e, "Failed to encode reply");
                None
            }
        }
    }

    /// Serve a decoded request.
    pub async fn handle_request(&self, request: &Request) -> Reply {
        let signature = request.signature();
        let body = match self.dispatch(request).await {
            Ok(value) => ReplyBody::ok(value),
            Err(e) => {
                tracing::debug!(
                    signature = %signature,
                    method = %request.method,
                    error = %e,
                    "Request failed"
                );
                ReplyBody::error(error_kind(&e), e.to_string())
            }
        };
        Reply::new(self.namespace.clone(), signature, body)
    }

    async fn dispatch(&self, request: &Request) -> CacheResult<Option<Value>> {
        let tenant = request.tenant_name.as_str();
        let key = match (&request.key, request.method.requires_key()) {
            (Some(key), _) => Some(key),
            (None, true) => {
                return Err(ProtocolError::MissingKey {
                    method: request.method.to_string(),
                }
                .into())
            }
            (None, false) => None,
        };

        match (request.method, key) {
            (Method::Get, Some(key)) => self.cache.get(tenant, key, None).await,
            (Method::Set, Some(key)) => {
                let value = request.value.clone().unwrap_or(Value::Null);
                let stored = self.cache.set(tenant, key.clone(), value, request.ttl)?;
                Ok(Some(Value::Bool(stored)))
            }
            (Method::Delete, Some(key)) => {
                let removed = self.cache.delete(tenant, std::slice::from_ref(key))?;
                Ok(Some(Value::from(removed)))
            }
            (Method::GetStats, _) => self.stats_value().map(Some),
            (Method::Flush, _) => {
                self.cache.flush(tenant)?;
                self.stats_value().map(Some)
            }
            (Method::FlushAll, _) => {
                self.cache.flush_all()?;
                self.stats_value().map(Some)
            }
            (Method::Get | Method::Set | Method::Delete, None) => Ok(None),
        }
    }

    fn stats_value(&self) -> CacheResult<Value> {
        let stats = self.cache.stats()?;
        serde_json::to_value(&stats).map_err(|e| {
            ProtocolError::Malformed {
                reason: format!("Failed to encode stats: {}", e),
            }
            .into()
        })
    }

    /// Serve requests arriving on `link` until its inbound side closes.
    pub fn attach_peer(self: &Arc<Self>, link: PeerLink) -> JoinHandle<()> {
        let owner = Arc::clone(self);
        let peer = link.peer;
        let (outbound, mut inbound) = link.into_parts();

        tokio::spawn(async move {
            tracing::debug!(peer = %peer, "Peer attached");
            while let Some(message) = inbound.recv().await {
                let Some(reply) = owner.handle_message(&message).await else {
                    continue;
                };
                if let Err(e) = outbound.send(reply) {
                    tracing::warn!(peer = %peer, error = %e, "Failed to reply, detaching peer");
                    break;
                }
            }
            tracing::debug!(peer = %peer, "Peer detached");
        })
    }
}

impl<S: TenantStore<Value = Value>> std::fmt::Debug for OwnerNode<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OwnerNode")
            .field("namespace", &self.namespace)
            .field("cache", &self.cache)
            .finish()
    }
}

fn error_kind(error: &CacheError) -> ErrorKind {
    match error {
        CacheError::Protocol(ProtocolError::MissingKey { .. }) => {
            ErrorKind::MissingKey
        }
        CacheError::Store(StoreError::LoaderFailed { .. }) => ErrorKind::LoaderFailed,
        _ => ErrorKind::Internal,
    }
}
