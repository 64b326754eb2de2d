//! Typed publish/subscribe channel for shared configuration.
//!
//! Subscribers hold a [`Subscription`]; dropping it unsubscribes, which ties
//! the subscription to the lifetime of whatever component owns it.

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use tracing::{debug, warn};

type Subscriber<T> = Arc<dyn Fn(&T) + Send + Sync>;

struct BusInner<T> {
    subscribers: RwLock<BTreeMap<u64, Subscriber<T>>>,
    latest: RwLock<Option<T>>,
    next_id: AtomicU64,
}

/// Publish/subscribe channel carrying values of type `T`.
pub struct ConfigBus<T> {
    inner: Arc<BusInner<T>>,
}

impl<T> Clone for ConfigBus<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T> Default for ConfigBus<T> {
    fn default() -> Self {
        Self {
            inner: Arc::new(BusInner {
                subscribers: RwLock::new(BTreeMap::new()),
                latest: RwLock::new(None),
                next_id: AtomicU64::new(1),
            }),
        }
    }
}

impl<T: Clone + Send + Sync + 'static> ConfigBus<T> {
    /// Creates an empty bus.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a subscriber. It stays registered until the returned
    /// [`Subscription`] is dropped or unsubscribed.
    #[must_use = "dropping the subscription unsubscribes immediately"]
    pub fn subscribe<F>(&self, callback: F) -> Subscription
    where
        F: Fn(&T) + Send + Sync + 'static,
    {
        let id = self.inner.next_id.fetch_add(1, Ordering::SeqCst);
        self.inner.subscribers.write().insert(id, Arc::new(callback));
        debug!(subscription = id, "Config subscriber registered");

        let weak: Weak<BusInner<T>> = Arc::downgrade(&self.inner);
        Subscription {
            id,
            remove: Some(Box::new(move |id| {
                if let Some(inner) = weak.upgrade() {
                    inner.subscribers.write().remove(&id);
                }
            })),
        }
    }

    /// Delivers `value` to every live subscriber and remembers it.
    ///
    /// Subscribers run in registration order; a panicking subscriber is
    /// logged and does not prevent delivery to the rest.
    pub fn publish(&self, value: &T) {
        *self.inner.latest.write() = Some(value.clone());
        let subscribers: Vec<(u64, Subscriber<T>)> = self
            .inner
            .subscribers
            .read()
            .iter()
            .map(|(id, s)| (*id, Arc::clone(s)))
            .collect();

        for (id, subscriber) in subscribers {
            let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| subscriber(value)));
            if let Err(e) = result {
                warn!(subscription = id, "Config subscriber panicked: {:?}", e);
            }
        }
    }

    /// The most recently published value.
    #[must_use]
    pub fn latest(&self) -> Option<T> {
        self.inner.latest.read().clone()
    }

    /// Number of live subscribers.
    #[must_use]
    pub fn subscriber_count(&self) -> usize {
        self.inner.subscribers.read().len()
    }
}

impl<T> std::fmt::Debug for ConfigBus<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConfigBus")
            .field("subscribers", &self.inner.subscribers.read().len())
            .finish_non_exhaustive()
    }
}

/// Handle to a registered subscriber.
pub struct Subscription {
    id: u64,
    remove: Option<Box<dyn FnOnce(u64) + Send + Sync>>,
}

impl Subscription {
    /// The subscription identifier.
    #[must_use]
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Removes the subscriber now.
    pub fn unsubscribe(mut self) {
        self.detach();
    }

    fn detach(&mut self) {
        if let Some(remove) = self.remove.take() {
            remove(self.id);
            debug!(subscription = self.id, "Config subscriber removed");
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.detach();
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription").field("id", &self.id).finish()
    }
}

/// The model configuration shared across the application.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ModelConfig {
    /// LLM provider, e.g. `ollama` or `openai`.
    pub provider: String,
    /// Model name for the provider.
    pub model: String,
    /// Transcription model, when configured.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub whisper_model: Option<String>,
}

impl ModelConfig {
    /// Creates a model configuration.
    #[must_use]
    pub fn new(provider: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            provider: provider.into(),
            model: model.into(),
            whisper_model: None,
        }
    }

    /// Returns true if a provider and model are both set.
    #[must_use]
    pub fn is_complete(&self) -> bool {
        !self.provider.trim().is_empty() && !self.model.trim().is_empty()
    }
}
