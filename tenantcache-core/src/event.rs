//! Cache events and the handler registry.
//!
//! Stores emit a [`CacheEvent`] whenever an entry is set, deleted, expires,
//! or when the whole store is flushed. Handlers are registered per event in
//! an [`EventRegistry`], which the federation owns and replays onto every
//! store it creates.

use crate::{CacheKey, StoreError};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

/// Kind of change a store reports to its subscribers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CacheEvent {
    /// An entry was written. Handlers receive the key and new value.
    Set,
    /// An entry was deleted explicitly. Handlers receive the key and old value.
    Del,
    /// An entry outlived its TTL. Handlers receive the key and old value.
    Expired,
    /// The whole store was cleared. Handlers receive neither key nor value.
    Flush,
}

impl CacheEvent {
    pub const ALL: [CacheEvent; 4] = [
        CacheEvent::Set,
        CacheEvent::Del,
        CacheEvent::Expired,
        CacheEvent::Flush,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            CacheEvent::Set => "set",
            CacheEvent::Del => "del",
            CacheEvent::Expired => "expired",
            CacheEvent::Flush => "flush",
        }
    }
}

impl fmt::Display for CacheEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CacheEvent {
    type Err = StoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "set" => Ok(CacheEvent::Set),
            "del" | "delete" => Ok(CacheEvent::Del),
            "expired" => Ok(CacheEvent::Expired),
            "flush" => Ok(CacheEvent::Flush),
            _ => Err(StoreError::UnknownEvent {
                name: s.to_string(),
            }),
        }
    }
}

/// Callback attached to a store event: `(key, value)`.
pub type EventHandler<V> = Arc<dyn Fn(Option<&CacheKey>, Option<&V>) + Send + Sync>;

/// Wrap a closure as an [`EventHandler`].
///
/// Going through this function lets the compiler infer the closure's
/// argument types, including their lifetimes.
pub fn handler<V, F>(f: F) -> EventHandler<V>
where
    F: Fn(Option<&CacheKey>, Option<&V>) + Send + Sync + 'static,
{
    Arc::new(f)
}

/// Ordered handler lists keyed by event.
pub struct EventRegistry<V> {
    handlers: HashMap<CacheEvent, Vec<EventHandler<V>>>,
}

impl<V> EventRegistry<V> {
    pub fn new() -> Self {
        Self {
            handlers: HashMap::new(),
        }
    }

    /// Append a handler to the list for `event`.
    pub fn register(&mut self, event: CacheEvent, handler: EventHandler<V>) {
        self.handlers.entry(event).or_default().push(handler);
    }

    /// Handlers registered for `event`, in registration order.
    pub fn handlers(&self, event: CacheEvent) -> &[EventHandler<V>] {
        self.handlers.get(&event).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Every `(event, handler)` pair, each event's handlers in order.
    pub fn iter(&self) -> impl Iterator<Item = (CacheEvent, &EventHandler<V>)> {
        CacheEvent::ALL
            .into_iter()
            .flat_map(move |event| self.handlers(event).iter().map(move |h| (event, h)))
    }

    /// Total number of registered handlers across all events.
    pub fn len(&self) -> usize {
        self.handlers.values().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Invoke every handler registered for `event`.
    pub fn emit(&self, event: CacheEvent, key: Option<&CacheKey>, value: Option<&V>) {
        for handler in self.handlers(event) {
            handler(key, value);
        }
    }
}

impl<V> Default for EventRegistry<V> {
    fn default() -> Self {
        Self::new()
    }
}

impl<V> Clone for EventRegistry<V> {
    fn clone(&self) -> Self {
        Self {
            handlers: self.handlers.clone(),
        }
    }
}

impl<V> fmt::Debug for EventRegistry<V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let counts: HashMap<&str, usize> = self
            .handlers
            .iter()
            .map(|(event, list)| (event.as_str(), list.len()))
            .collect();
        f.debug_struct("EventRegistry")
            .field("handlers", &counts)
            .finish()
    }
}
