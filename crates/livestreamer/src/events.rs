//! In-process publish/subscribe.
//!
//! Each subscriber gets its own unbounded channel. Publishing walks the
//! subscribers in registration order and never blocks, so it is safe to
//! publish while holding a component lock: delivery cannot re-enter the
//! publisher. Subscribers whose receiver was dropped are pruned lazily.

use std::sync::Mutex;

use tokio::sync::mpsc;

/// Handle returned by [`EventHub::subscribe`], used to unsubscribe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

struct Subscribers<E> {
    next_id: u64,
    list: Vec<(SubscriptionId, mpsc::UnboundedSender<E>)>,
}

/// Ordered list of event subscribers.
pub struct EventHub<E> {
    subscribers: Mutex<Subscribers<E>>,
}

impl<E: Clone> Default for EventHub<E> {
    fn default() -> Self {
        Self::new()
    }
}

impl<E: Clone> EventHub<E> {
    pub fn new() -> Self {
        Self {
            subscribers: Mutex::new(Subscribers {
                next_id: 0,
                list: Vec::new(),
            }),
        }
    }

    /// Register a subscriber. Events published after this call are delivered in order.
    pub fn subscribe(&self) -> (SubscriptionId, mpsc::UnboundedReceiver<E>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let mut subs = self.lock();
        let id = SubscriptionId(subs.next_id);
        subs.next_id += 1;
        subs.list.push((id, tx));
        (id, rx)
    }

    /// Remove a subscriber. Unknown ids are ignored.
    pub fn unsubscribe(&self, id: SubscriptionId) {
        self.lock().list.retain(|(sid, _)| *sid != id);
    }

    /// Deliver `event` to every live subscriber. Returns how many received it.
    pub fn publish(&self, event: E) -> usize {
        let mut subs = self.lock();
        let mut delivered = 0;
        subs.list.retain(|(_, tx)| {
            if tx.send(event.clone()).is_ok() {
                delivered += 1;
                true
            } else {
                false
            }
        });
        delivered
    }

    pub fn subscriber_count(&self) -> usize {
        self.lock().list.len()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Subscribers<E>> {
        self.subscribers
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}
