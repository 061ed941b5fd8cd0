//! Handler bindings keyed by (channel, symbol)

use super::channel::{Channel, SubscriptionKey};
use crate::errors::Result;

use serde_json::Value;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

/// One decoded data frame as handed to a handler
#[derive(Debug, Clone, PartialEq)]
pub struct StreamEvent {
    pub channel: Channel,
    /// Hyphen form (`SOL-USDC`); empty for account streams
    pub symbol: String,
    /// Stream identifier exactly as received
    pub stream: String,
    pub data: Value,
}

/// Handlers run on the receive task; an `Err` is logged and never stops the loop
pub type Handler = Arc<dyn Fn(&StreamEvent) -> Result<()> + Send + Sync>;

/// Shared between the facade and the dispatcher. Handlers are cloned out
/// under the lock and invoked after it is released.
#[derive(Clone, Default)]
pub struct SubscriptionRegistry {
    entries: Arc<Mutex<HashMap<SubscriptionKey, Handler>>>,
}

impl std::fmt::Debug for SubscriptionRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SubscriptionRegistry")
            .field("keys", &self.keys())
            .finish()
    }
}

impl SubscriptionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<SubscriptionKey, Handler>> {
        self.entries.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Insert or replace; returns the handler previously bound to the key
    pub fn register(&self, key: SubscriptionKey, handler: Handler) -> Option<Handler> {
        self.lock().insert(key, handler)
    }

    /// Exact key first, then the channel-only key
    pub fn lookup(&self, channel: Channel, symbol: &str) -> Option<Handler> {
        let entries = self.lock();
        entries
            .get(&SubscriptionKey::new(channel, symbol))
            .or_else(|| entries.get(&SubscriptionKey::channel_only(channel)))
            .cloned()
    }

    pub fn contains(&self, key: &SubscriptionKey) -> bool {
        self.lock().contains_key(key)
    }

    /// Removes the exact key only
    pub fn remove(&self, key: &SubscriptionKey) -> Option<Handler> {
        self.lock().remove(key)
    }

    pub fn clear(&self) {
        self.lock().clear();
    }

    /// Sorted for stable output
    pub fn keys(&self) -> Vec<SubscriptionKey> {
        let mut keys: Vec<_> = self.lock().keys().cloned().collect();
        keys.sort();
        keys
    }

    /// Copy of every binding, used to restore subscriptions after reconnect
    pub fn snapshot(&self) -> Vec<(SubscriptionKey, Handler)> {
        let mut entries: Vec<_> = self
            .lock()
            .iter()
            .map(|(key, handler)| (key.clone(), Arc::clone(handler)))
            .collect();
        entries.sort_by(|a, b| a.0.cmp(&b.0));
        entries
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    pub fn has_private_subscriptions(&self) -> bool {
        self.lock().keys().any(|key| key.channel.requires_auth())
    }
}
