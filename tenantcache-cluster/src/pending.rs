//! Outstanding proxy requests awaiting a reply.

use std::sync::Arc;
use std::time::Duration;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use tenantcache_core::{CacheResult, ProtocolError};
use tokio::sync::oneshot;

use crate::message::{ReplyBody, Signature};

type Slots = DashMap<Signature, oneshot::Sender<ReplyBody>>;

/// Table of requests sent to the owner and not yet answered.
///
/// Each entry is removed exactly once: by the matching reply, or by the
/// [`PendingReply`] guard when the waiter times out or is dropped.
#[derive(Debug, Clone, Default)]
pub struct PendingTable {
    slots: Arc<Slots>,
}

impl PendingTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reserve a slot for `signature`.
    pub fn register(&self, signature: Signature) -> CacheResult<PendingReply> {
        let (tx, rx) = oneshot::channel();
        match self.slots.entry(signature.clone()) {
            Entry::Occupied(_) => Err(ProtocolError::DuplicateSignature {
                signature: signature.to_string(),
            }
            .into()),
            Entry::Vacant(slot) => {
                slot.insert(tx);
                Ok(PendingReply {
                    signature,
                    receiver: rx,
                    slots: Arc::clone(&self.slots),
                })
            }
        }
    }

    /// Hand `body` to the waiter registered under `signature`.
    ///
    /// Returns `false` when nobody is waiting, e.g. for a duplicate or late
    /// reply.
    pub fn resolve(&self, signature: &Signature, body: ReplyBody) -> bool {
        match self.slots.remove(signature) {
            Some((_, tx)) => tx.send(body).is_ok(),
            None => false,
        }
    }

    pub fn contains(&self, signature: &Signature) -> bool {
        self.slots.contains_key(signature)
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }
}

/// Guard for one pending request. Dropping it releases the slot.
#[derive(Debug)]
pub struct PendingReply {
    signature: Signature,
    receiver: oneshot::Receiver<ReplyBody>,
    slots: Arc<Slots>,
}

impl PendingReply {
    pub fn signature(&self) -> &Signature {
        &self.signature
    }

    /// Wait for the reply, giving up after `timeout` if one is set.
    pub async fn wait(mut self, timeout: Option<Duration>) -> CacheResult<ReplyBody> {
        let received = match timeout {
            Some(after) => match tokio::time::timeout(after, &mut self.receiver).await {
                Ok(received) => received,
                Err(_) => {
                    tracing::debug!(signature = %self.signature, ?after, "Request timed out");
                    return Err(ProtocolError::RequestTimedOut {
                        signature: self.signature.to_string(),
                        after,
                    }
                    .into());
                }
            },
            None => (&mut self.receiver).await,
        };

        received.map_err(|_| {
            ProtocolError::ReplyDropped {
                signature: self.signature.to_string(),
            }
            .into()
        })
    }
}

impl Drop for PendingReply {
    fn drop(&mut self) {
        self.slots.remove(&self.signature);
    }
}
