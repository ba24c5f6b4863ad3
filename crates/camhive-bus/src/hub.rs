//! Keyed in-memory fan-out.
//!
//! Subscriber-map mutations and delivery both happen under a mutex that is
//! never held across an await. Delivery is a non-blocking `try_send`: a full
//! queue drops the message for that subscriber only, so one stalled consumer
//! never delays publishers or the other subscribers of the same key. Because
//! delivery and `unsubscribe` share the lock, a queue receives nothing once
//! its unsubscribe has returned.

use std::collections::HashMap;
use std::fmt::Debug;
use std::hash::Hash;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, Weak};
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;

/// Outcome of a bounded read on a [`Subscription`].
#[derive(Debug, Clone, PartialEq)]
pub enum Delivery<T> {
    Message(T),
    /// Nothing arrived within the wait window.
    Timeout,
    /// The hub is shutting down (or the subscription was dropped from it).
    Shutdown,
}

enum Envelope<T> {
    Message(T),
    Shutdown,
}

struct Slot<T> {
    id: u64,
    tx: mpsc::Sender<Envelope<T>>,
}

type SubscriberMap<K, T> = HashMap<K, Vec<Slot<T>>>;

struct Shared<K, T> {
    subscribers: Mutex<SubscriberMap<K, T>>,
    closing: AtomicBool,
    next_id: AtomicU64,
    capacity: usize,
}

impl<K, T> Shared<K, T>
where
    K: Eq + Hash,
{
    fn lock(&self) -> MutexGuard<'_, SubscriberMap<K, T>> {
        self.subscribers
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn remove(&self, key: &K, id: u64) -> bool {
        let mut subs = self.lock();
        let Some(slots) = subs.get_mut(key) else {
            return false;
        };
        let before = slots.len();
        slots.retain(|slot| slot.id != id);
        let removed = slots.len() != before;
        if slots.is_empty() {
            subs.remove(key);
        }
        removed
    }
}

/// Generic keyed pub/sub hub. Cloning shares the same subscriber map.
pub struct Hub<K, T> {
    shared: Arc<Shared<K, T>>,
}

impl<K, T> Clone for Hub<K, T> {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
        }
    }
}

impl<K, T> Hub<K, T>
where
    K: Eq + Hash + Clone + Debug + Send + 'static,
    T: Clone + Send + 'static,
{
    pub fn new(capacity: usize) -> Self {
        Self {
            shared: Arc::new(Shared {
                subscribers: Mutex::new(HashMap::new()),
                closing: AtomicBool::new(false),
                next_id: AtomicU64::new(1),
                capacity: capacity.max(1),
            }),
        }
    }

    pub fn subscribe(&self, key: K) -> Subscription<K, T> {
        let (tx, rx) = mpsc::channel(self.shared.capacity);
        let id = self.shared.next_id.fetch_add(1, Ordering::Relaxed);

        if self.is_closing() {
            // Late subscribers see the sentinel straight away.
            let _ = tx.try_send(Envelope::Shutdown);
            return Subscription {
                id,
                key,
                rx,
                hub: Weak::new(),
            };
        }

        {
            let mut subs = self.shared.lock();
            subs.entry(key.clone()).or_default().push(Slot { id, tx });
        }
        tracing::debug!(key = ?key, subscription_id = id, "subscribed");

        Subscription {
            id,
            key,
            rx,
            hub: Arc::downgrade(&self.shared),
        }
    }

    /// Detach `subscription` from `key`. Removes the key entirely once its last
    /// subscriber leaves. Returns whether anything was removed.
    pub fn unsubscribe(&self, key: &K, subscription: &Subscription<K, T>) -> bool {
        let removed = self.shared.remove(key, subscription.id);
        if removed {
            tracing::debug!(key = ?key, subscription_id = subscription.id, "unsubscribed");
        }
        removed
    }

    /// Deliver `message` to every queue subscribed to `key`. Returns the number
    /// of queues that accepted it. Zero subscribers is a silent no-op.
    pub async fn publish(&self, key: &K, message: T) -> usize {
        self.publish_to(std::slice::from_ref(key), message).await
    }

    /// Deliver to the union of subscribers across `keys` in one call.
    pub async fn publish_to(&self, keys: &[K], message: T) -> usize {
        if self.is_closing() {
            return 0;
        }

        let mut delivered = 0;
        let mut dropped = 0;
        {
            let subs = self.shared.lock();
            for slot in keys.iter().filter_map(|key| subs.get(key)).flatten() {
                match slot.tx.try_send(Envelope::Message(message.clone())) {
                    Ok(()) => delivered += 1,
                    Err(TrySendError::Full(_)) => dropped += 1,
                    Err(TrySendError::Closed(_)) => {}
                }
            }
        }

        if dropped > 0 {
            tracing::warn!(keys = ?keys, dropped, "subscriber queue full, message dropped");
        }
        delivered
    }

    /// Mark the hub closing, push the shutdown sentinel into every live queue
    /// and clear the subscriber map. Later publishes are no-ops.
    pub fn close(&self) {
        if self.shared.closing.swap(true, Ordering::SeqCst) {
            return;
        }

        let drained: SubscriberMap<K, T> = std::mem::take(&mut *self.shared.lock());
        let mut notified = 0;
        for slots in drained.values() {
            for slot in slots {
                // A full queue still ends: the sender is dropped below, so the
                // reader sees the channel close once it drains.
                if slot.tx.try_send(Envelope::Shutdown).is_ok() {
                    notified += 1;
                }
            }
        }
        tracing::info!(keys = drained.len(), notified, "hub closed");
    }

    pub fn is_closing(&self) -> bool {
        self.shared.closing.load(Ordering::SeqCst)
    }

    pub fn subscriber_count(&self, key: &K) -> usize {
        self.shared.lock().get(key).map(Vec::len).unwrap_or(0)
    }

    pub fn key_count(&self) -> usize {
        self.shared.lock().len()
    }

    pub fn total_subscribers(&self) -> usize {
        self.shared.lock().values().map(Vec::len).sum()
    }
}

/// A subscriber queue. Dropping it unsubscribes, so every exit path of a
/// long-lived reader (close, error, cancellation) releases its map entry.
pub struct Subscription<K, T>
where
    K: Eq + Hash,
{
    id: u64,
    key: K,
    rx: mpsc::Receiver<Envelope<T>>,
    hub: Weak<Shared<K, T>>,
}

impl<K, T> Subscription<K, T>
where
    K: Eq + Hash,
{
    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn key(&self) -> &K {
        &self.key
    }

    /// Wait at most `wait` for the next message.
    pub async fn recv_timeout(&mut self, wait: Duration) -> Delivery<T> {
        match tokio::time::timeout(wait, self.rx.recv()).await {
            Err(_) => Delivery::Timeout,
            Ok(Some(Envelope::Message(message))) => Delivery::Message(message),
            Ok(Some(Envelope::Shutdown)) | Ok(None) => Delivery::Shutdown,
        }
    }

    /// Non-blocking read; `None` when the queue is currently empty.
    pub fn try_recv(&mut self) -> Option<Delivery<T>> {
        match self.rx.try_recv() {
            Ok(Envelope::Message(message)) => Some(Delivery::Message(message)),
            Ok(Envelope::Shutdown) => Some(Delivery::Shutdown),
            Err(mpsc::error::TryRecvError::Empty) => None,
            Err(mpsc::error::TryRecvError::Disconnected) => Some(Delivery::Shutdown),
        }
    }
}

impl<K, T> Drop for Subscription<K, T>
where
    K: Eq + Hash,
{
    fn drop(&mut self) {
        if let Some(shared) = self.hub.upgrade() {
            shared.remove(&self.key, self.id);
        }
    }
}
