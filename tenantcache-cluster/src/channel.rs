//! Message channels between the owner and its proxies.
//!
//! The protocol only needs two capabilities from a transport: post a JSON
//! message to the peer, and receive the peer's messages in order. Sending is
//! the [`MessageSink`] trait; receiving is a tokio unbounded receiver.

use std::fmt;
use std::sync::Arc;

use serde_json::Value;
use tenantcache_core::{CacheResult, ProtocolError};
use tokio::sync::mpsc;

/// Outbound half of a peer connection.
pub trait MessageSink: Send + Sync {
    /// Post `message` to the peer. Fails with
    /// [`ProtocolError::ChannelUnavailable`] once the peer is gone.
    fn send(&self, message: Value) -> CacheResult<()>;
}

impl MessageSink for mpsc::UnboundedSender<Value> {
    fn send(&self, message: Value) -> CacheResult<()> {
        mpsc::UnboundedSender::send(self, message)
            .map_err(|_| ProtocolError::ChannelUnavailable.into())
    }
}

/// Identifier of a peer, used in logs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PeerId(pub u32);

impl fmt::Display for PeerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "peer-{}", self.0)
    }
}

/// One side of a bidirectional connection.
pub struct PeerLink {
    /// The peer at the other end.
    pub peer: PeerId,
    pub outbound: Arc<dyn MessageSink>,
    pub inbound: mpsc::UnboundedReceiver<Value>,
}

impl PeerLink {
    pub fn new(
        peer: PeerId,
        outbound: Arc<dyn MessageSink>,
        inbound: mpsc::UnboundedReceiver<Value>,
    ) -> Self {
        Self {
            peer,
            outbound,
            inbound,
        }
    }

    /// Split into the outbound sink and the inbound receiver.
    pub fn into_parts(self) -> (Arc<dyn MessageSink>, mpsc::UnboundedReceiver<Value>) {
        (self.outbound, self.inbound)
    }
}

impl fmt::Debug for PeerLink {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PeerLink").field("peer", &self.peer).finish()
    }
}

/// In-process connection between `a` and `b`.
///
/// Returns `(a's link, b's link)`: what `a` sends arrives on `b`'s inbound
/// receiver and vice versa.
pub fn duplex(a: PeerId, b: PeerId) -> (PeerLink, PeerLink) {
    let (to_b, from_a) = mpsc::unbounded_channel();
    let (to_a, from_b) = mpsc::unbounded_channel();
    (
        PeerLink::new(b, Arc::new(to_b), from_b),
        PeerLink::new(a, Arc::new(to_a), from_a),
    )
}
