//! Topic-keyed publish/subscribe.
//!
//! The driver callback runs on a thread owned by the vendor library, so
//! [`EventBus::publish`] must never block or await. Each subscriber owns an
//! unbounded channel; publishing clones the event into every channel
//! registered for the topic and returns immediately.
//!
//! Dropping a [`Subscription`] unregisters it. A topic whose last subscriber
//! goes away is removed from the registry.

use std::collections::HashMap;
use std::hash::Hash;
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::task::{Context, Poll};

use futures::Stream;
use parking_lot::Mutex;
use tokio::sync::mpsc;

struct Subscriber<E> {
    id: u64,
    sender: mpsc::UnboundedSender<E>,
}

struct Registry<K, E> {
    topics: Mutex<HashMap<K, Vec<Subscriber<E>>>>,
    next_id: AtomicU64,
}

/// Fan-out event bus, cheap to clone.
pub struct EventBus<K, E> {
    registry: Arc<Registry<K, E>>,
}

impl<K, E> Clone for EventBus<K, E> {
    fn clone(&self) -> Self {
        Self {
            registry: Arc::clone(&self.registry),
        }
    }
}

impl<K, E> Default for EventBus<K, E>
where
    K: Eq + Hash + Clone,
    E: Clone,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<K, E> EventBus<K, E>
where
    K: Eq + Hash + Clone,
    E: Clone,
{
    pub fn new() -> Self {
        Self {
            registry: Arc::new(Registry {
                topics: Mutex::new(HashMap::new()),
                next_id: AtomicU64::new(0),
            }),
        }
    }

    /// Register a new subscriber for `topic`.
    ///
    /// The subscription only receives events published after this call.
    pub fn subscribe(&self, topic: K) -> Subscription<K, E> {
        let id = self.registry.next_id.fetch_add(1, Ordering::Relaxed);
        let (sender, receiver) = mpsc::unbounded_channel();

        self.registry
            .topics
            .lock()
            .entry(topic.clone())
            .or_default()
            .push(Subscriber { id, sender });

        Subscription {
            topic,
            id,
            receiver,
            registry: Arc::downgrade(&self.registry),
        }
    }

    /// Deliver `event` to every current subscriber of `topic`.
    ///
    /// Returns the number of subscribers the event was handed to. Safe to
    /// call from any thread, including threads not owned by tokio.
    pub fn publish(&self, topic: &K, event: E) -> usize {
        let topics = self.registry.topics.lock();
        let Some(subscribers) = topics.get(topic) else {
            return 0;
        };

        subscribers
            .iter()
            .filter(|subscriber| subscriber.sender.send(event.clone()).is_ok())
            .count()
    }

    /// Number of live subscriptions for `topic`.
    pub fn subscriber_count(&self, topic: &K) -> usize {
        self.registry
            .topics
            .lock()
            .get(topic)
            .map_or(0, |subscribers| subscribers.len())
    }

    /// Number of topics with at least one subscriber.
    pub fn topic_count(&self) -> usize {
        self.registry.topics.lock().len()
    }
}

/// Stream of events for one topic.
///
/// Events are buffered without bound until consumed.
pub struct Subscription<K: Eq + Hash, E> {
    topic: K,
    id: u64,
    receiver: mpsc::UnboundedReceiver<E>,
    registry: Weak<Registry<K, E>>,
}

impl<K: Eq + Hash, E> Subscription<K, E> {
    pub fn topic(&self) -> &K {
        &self.topic
    }

    /// Wait for the next event.
    ///
    /// Returns `None` once the bus has been dropped and the buffer is empty.
    pub async fn recv(&mut self) -> Option<E> {
        self.receiver.recv().await
    }

    /// Take a buffered event without waiting.
    pub fn try_recv(&mut self) -> Option<E> {
        self.receiver.try_recv().ok()
    }
}

// No field is structurally pinned.
impl<K: Eq + Hash, E> Unpin for Subscription<K, E> {}

impl<K: Eq + Hash, E> Stream for Subscription<K, E> {
    type Item = E;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<E>> {
        self.get_mut().receiver.poll_recv(cx)
    }
}

impl<K: Eq + Hash, E> Drop for Subscription<K, E> {
    fn drop(&mut self) {
        let Some(registry) = self.registry.upgrade() else {
            return;
        };
        let mut topics = registry.topics.lock();
        if let Some(subscribers) = topics.get_mut(&self.topic) {
            subscribers.retain(|subscriber| subscriber.id != self.id);
            if subscribers.is_empty() {
                topics.remove(&self.topic);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::StreamExt;

    #[tokio::test]
    async fn test_every_subscriber_receives_every_event() {
        let bus: EventBus<i32, &'static str> = EventBus::new();
        let mut first = bus.subscribe(1);
        let mut second = bus.subscribe(1);

        assert_eq!(bus.publish(&1, "a"), 2);
        assert_eq!(bus.publish(&1, "b"), 2);

        assert_eq!(first.next().await, Some("a"));
        assert_eq!(first.next().await, Some("b"));
        assert_eq!(second.recv().await, Some("a"));
        assert_eq!(second.recv().await, Some("b"));
    }

    #[test]
    fn test_publish_without_subscribers_is_noop() {
        let bus: EventBus<i32, u32> = EventBus::new();
        assert_eq!(bus.publish(&7, 1), 0);
        assert_eq!(bus.topic_count(), 0);
    }

    #[test]
    fn test_late_subscriber_sees_only_later_events() {
        let bus: EventBus<i32, u32> = EventBus::new();
        let mut early = bus.subscribe(1);
        bus.publish(&1, 10);

        let mut late = bus.subscribe(1);
        bus.publish(&1, 20);

        assert_eq!(early.try_recv(), Some(10));
        assert_eq!(early.try_recv(), Some(20));
        assert_eq!(late.try_recv(), Some(20));
        assert_eq!(late.try_recv(), None);
    }

    #[test]
    fn test_topics_are_isolated() {
        let bus: EventBus<i32, u32> = EventBus::new();
        let mut one = bus.subscribe(1);
        let mut two = bus.subscribe(2);

        bus.publish(&2, 5);

        assert_eq!(one.try_recv(), None);
        assert_eq!(two.try_recv(), Some(5));
    }

    #[test]
    fn test_drop_removes_only_that_subscription() {
        let bus: EventBus<i32, u32> = EventBus::new();
        let first = bus.subscribe(1);
        let mut second = bus.subscribe(1);
        assert_eq!(bus.subscriber_count(&1), 2);

        drop(first);
        assert_eq!(bus.subscriber_count(&1), 1);
        assert_eq!(bus.publish(&1, 3), 1);
        assert_eq!(second.try_recv(), Some(3));

        drop(second);
        assert_eq!(bus.subscriber_count(&1), 0);
        assert_eq!(bus.topic_count(), 0);
    }

    #[test]
    fn test_publish_from_foreign_thread() {
        let bus: EventBus<i32, u32> = EventBus::new();
        let mut subscription = bus.subscribe(1);

        let publisher = bus.clone();
        std::thread::spawn(move || {
            for value in 0..100 {
                publisher.publish(&1, value);
            }
        })
        .join()
        .unwrap();

        let received: Vec<u32> = std::iter::from_fn(|| subscription.try_recv()).collect();
        assert_eq!(received, (0..100).collect::<Vec<_>>());
    }
}
