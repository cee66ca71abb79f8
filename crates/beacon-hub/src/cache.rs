//! Per-entity event cache.

use parking_lot::Mutex;
use std::sync::{Arc, Weak};
use tokio::sync::mpsc::unbounded_channel;

use crate::subscription::{Detach, SubscriberId, Subscribers, Subscription};

/// Everything published for one entity since its history was loaded, plus the
/// subscribers currently following it.
///
/// Replay and registration happen under the same lock as publishing, so a
/// subscriber attaching concurrently with a publish sees the event exactly
/// once: either in the replayed buffer or live.
pub struct EntityEventCache<T> {
    inner: Mutex<CacheInner<T>>,
}

struct CacheInner<T> {
    buffer: Vec<T>,
    subscribers: Subscribers<T>,
    complete: bool,
}

impl<T: Clone + Send + 'static> EntityEventCache<T> {
    /// A live cache seeded with already-known history.
    pub fn new(history: Vec<T>) -> Arc<Self> {
        Arc::new(Self {
            inner: Mutex::new(CacheInner {
                buffer: history,
                subscribers: Subscribers::default(),
                complete: false,
            }),
        })
    }

    /// Replay the buffer to a new subscriber, then keep it attached for live
    /// events. On a completed cache the subscription ends after the replay.
    pub fn attach(self: &Arc<Self>) -> Subscription<T> {
        let id = SubscriberId::next();
        let (tx, rx) = unbounded_channel();

        let mut inner = self.inner.lock();
        for item in &inner.buffer {
            let _ = tx.send(item.clone());
        }
        if inner.complete {
            return Subscription::detached(id, rx);
        }
        inner.subscribers.insert(id, tx);
        drop(inner);

        let target: Weak<dyn Detach> = Arc::downgrade(self) as Weak<dyn Detach>;
        Subscription::attached(id, rx, target)
    }

    /// Append `item` and fan it out, unless the cache is complete or already
    /// holds an item at or past its `position`. Returns whether it was added.
    pub fn publish<P: Ord>(&self, item: T, position: impl Fn(&T) -> P) -> bool {
        let mut inner = self.inner.lock();
        if inner.complete {
            return false;
        }
        if let Some(last) = inner.buffer.last() {
            if position(&item) <= position(last) {
                return false;
            }
        }
        inner.subscribers.broadcast(&item);
        inner.buffer.push(item);
        true
    }

    /// Mark the entity finished and end every attached stream.
    pub fn complete(&self) -> bool {
        let mut inner = self.inner.lock();
        if inner.complete {
            return false;
        }
        inner.complete = true;
        inner.subscribers.close_all();
        true
    }

    pub fn is_complete(&self) -> bool {
        self.inner.lock().complete
    }

    pub fn subscriber_count(&self) -> usize {
        self.inner.lock().subscribers.len()
    }
}

impl<T: Clone + Send + 'static> Detach for EntityEventCache<T> {
    fn detach(&self, id: SubscriberId) {
        self.inner.lock().subscribers.remove(id);
    }
}
