//! Tenant Cache Cluster - Cross-Process Sharing
//!
//! One process, the owner, holds the tenant federation. Every other process
//! runs a proxy that turns cache operations into request messages and waits
//! for the owner's correlated reply.
//!
//! # Wire format
//!
//! Requests:
//!
//! ```json
//! {"tenantCache": true, "namespace": "ns", "method": "set", "tenantName": "acme",
//!  "key": "user:1", "value": {"name": "Ada"}, "ttl": 60, "token": "<uuid>"}
//! ```
//!
//! Replies:
//!
//! ```json
//! {"tenantCache": true, "namespace": "ns", "signature": "acme_set_user:1_<uuid>",
//!  "body": {"value": true}}
//! ```
//!
//! Error replies carry `body.error` and `body.errorKind`.

pub mod channel;
pub mod facade;
pub mod message;
pub mod owner;
pub mod pending;
pub mod proxy;
pub mod stream;
pub mod telemetry;

pub use channel::{duplex, MessageSink, PeerId, PeerLink};
pub use facade::{ClusterCache, Role};
pub use message::{
    accepts_namespace, ErrorKind, Method, Reply, ReplyBody, Request, Signature, ALL_TENANTS,
    PROTOCOL_TAG,
};
pub use owner::OwnerNode;
pub use pending::{PendingReply, PendingTable};
pub use proxy::ProxyNode;
pub use stream::spawn_stream_link;
pub use telemetry::init_tracing;

// Re-export the types callers need alongside the façade
pub use tenantcache_core::{
    handler, CacheError, CacheEvent, CacheKey, CacheResult, ClusterConfig, FederationStats,
    ProtocolError, StoreStats, Ttl,
};
pub use tenantcache_storage::{loader_fn, MemoryStore, TenantCache, ValueLoader};
