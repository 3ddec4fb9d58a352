//! Event fan-out to attached observers.
//!
//! Each observer owns a bounded queue. Publishing never waits: an observer
//! whose queue is full is disconnected (its sender is dropped, so its
//! receiver drains and then yields `None`).

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::mpsc::{self, error::TrySendError};
use tracing::{debug, warn};

use crate::events::HubEvent;

/// Identifier handed out by [`EventBroadcaster::subscribe`]
pub type ObserverId = u64;

/// An attached observer's end of the stream
pub struct Subscription {
    pub id: ObserverId,
    pub receiver: mpsc::Receiver<Arc<HubEvent>>,
}

/// Publishes hub events to every subscribed observer
pub struct EventBroadcaster {
    observers: Mutex<HashMap<ObserverId, mpsc::Sender<Arc<HubEvent>>>>,
    next_id: AtomicU64,
    queue_capacity: usize,
    /// Observers dropped because their queue overflowed
    overflowed: AtomicU64,
}

impl EventBroadcaster {
    /// Create a broadcaster whose observers buffer up to `queue_capacity` events
    pub fn new(queue_capacity: usize) -> Self {
        Self {
            observers: Mutex::new(HashMap::new()),
            next_id: AtomicU64::new(0),
            queue_capacity: queue_capacity.max(1),
            overflowed: AtomicU64::new(0),
        }
    }

    /// Attach a new observer
    pub fn subscribe(&self) -> Subscription {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst) + 1;
        let (tx, rx) = mpsc::channel(self.queue_capacity);
        self.observers.lock().insert(id, tx);
        debug!(observer = id, "observer subscribed");
        Subscription { id, receiver: rx }
    }

    /// Detach an observer. Unknown ids are ignored.
    pub fn unsubscribe(&self, id: ObserverId) {
        if self.observers.lock().remove(&id).is_some() {
            debug!(observer = id, "observer unsubscribed");
        }
    }

    /// Deliver `event` to every observer without blocking
    pub fn publish(&self, event: HubEvent) {
        let kind = event.kind();
        let event = Arc::new(event);
        let mut observers = self.observers.lock();
        observers.retain(|id, tx| match tx.try_send(event.clone()) {
            Ok(()) => true,
            Err(TrySendError::Full(_)) => {
                self.overflowed.fetch_add(1, Ordering::Relaxed);
                warn!(observer = *id, event = kind, "observer queue full, disconnecting");
                false
            }
            Err(TrySendError::Closed(_)) => {
                debug!(observer = *id, "observer gone, removing");
                false
            }
        });
        debug!(event = kind, recipients = observers.len(), "published event");
    }

    /// Number of attached observers
    pub fn observer_count(&self) -> usize {
        self.observers.lock().len()
    }

    /// Observers disconnected so far for falling behind
    pub fn overflow_count(&self) -> u64 {
        self.overflowed.load(Ordering::Relaxed)
    }
}

impl Default for EventBroadcaster {
    fn default() -> Self {
        Self::new(256)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn membership(devices: &[&str]) -> HubEvent {
        HubEvent::MembershipChanged {
            devices: devices.iter().map(|d| d.to_string()).collect(),
        }
    }

    #[tokio::test]
    async fn test_publish_reaches_every_observer() {
        let broadcaster = EventBroadcaster::new(8);
        let mut a = broadcaster.subscribe();
        let mut b = broadcaster.subscribe();
        assert_ne!(a.id, b.id);

        broadcaster.publish(membership(&["A1"]));

        assert_eq!(*a.receiver.recv().await.unwrap(), membership(&["A1"]));
        assert_eq!(*b.receiver.recv().await.unwrap(), membership(&["A1"]));
    }

    #[tokio::test]
    async fn test_unsubscribe_stops_delivery() {
        let broadcaster = EventBroadcaster::new(8);
        let mut sub = broadcaster.subscribe();
        broadcaster.unsubscribe(sub.id);
        broadcaster.unsubscribe(sub.id);
        assert_eq!(broadcaster.observer_count(), 0);

        broadcaster.publish(membership(&[]));
        assert!(sub.receiver.recv().await.is_none());
    }

    #[tokio::test]
    async fn test_slow_observer_is_disconnected_without_blocking_others() {
        let broadcaster = EventBroadcaster::new(2);
        let mut slow = broadcaster.subscribe();
        let mut fast = broadcaster.subscribe();

        for i in 0..3 {
            broadcaster.publish(membership(&[&format!("D{i}")]));
            // The fast observer keeps up
            assert!(fast.receiver.recv().await.is_some());
        }

        assert_eq!(broadcaster.observer_count(), 1);
        assert_eq!(broadcaster.overflow_count(), 1);

        // The slow observer still gets what was queued, then the stream ends
        assert!(slow.receiver.recv().await.is_some());
        assert!(slow.receiver.recv().await.is_some());
        assert!(slow.receiver.recv().await.is_none());
    }

    #[test]
    fn test_dropped_receiver_is_pruned_on_publish() {
        let broadcaster = EventBroadcaster::new(4);
        let sub = broadcaster.subscribe();
        drop(sub);
        assert_eq!(broadcaster.observer_count(), 1);

        broadcaster.publish(membership(&[]));
        assert_eq!(broadcaster.observer_count(), 0);
        assert_eq!(broadcaster.overflow_count(), 0);
    }

    #[test]
    fn test_publish_without_observers() {
        let broadcaster = EventBroadcaster::default();
        broadcaster.publish(membership(&["A1"]));
        assert_eq!(broadcaster.observer_count(), 0);
    }
}
