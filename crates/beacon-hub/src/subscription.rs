//! Subscriber handles.

use derive_more::Display;
use futures::Stream;
use std::collections::HashMap;
use std::pin::Pin;
use std::sync::Weak;
use std::sync::atomic::{AtomicU64, Ordering};
use std::task::{Context, Poll};
use tokio::sync::mpsc::{UnboundedReceiver, UnboundedSender, unbounded_channel};

static NEXT_SUBSCRIBER: AtomicU64 = AtomicU64::new(1);

/// Process-unique identity of one subscriber.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display)]
#[display("sub-{_0}")]
pub struct SubscriberId(u64);

impl SubscriberId {
    pub fn next() -> Self {
        Self(NEXT_SUBSCRIBER.fetch_add(1, Ordering::Relaxed))
    }
}

/// Something a subscriber can be detached from.
pub(crate) trait Detach: Send + Sync {
    fn detach(&self, id: SubscriberId);
}

/// Live senders of every subscriber attached to one publisher.
pub(crate) struct Subscribers<T> {
    senders: HashMap<SubscriberId, UnboundedSender<T>>,
}

impl<T> Default for Subscribers<T> {
    fn default() -> Self {
        Self {
            senders: HashMap::new(),
        }
    }
}

impl<T: Clone> Subscribers<T> {
    pub fn insert(&mut self, id: SubscriberId, tx: UnboundedSender<T>) {
        self.senders.insert(id, tx);
    }

    pub fn remove(&mut self, id: SubscriberId) -> bool {
        self.senders.remove(&id).is_some()
    }

    pub fn len(&self) -> usize {
        self.senders.len()
    }

    /// Send `item` to everyone, forgetting receivers that have gone away.
    pub fn broadcast(&mut self, item: &T) {
        self.senders.retain(|_, tx| tx.send(item.clone()).is_ok());
    }

    /// Drop every sender, which ends each subscriber's stream once drained.
    pub fn close_all(&mut self) {
        self.senders.clear();
    }
}

struct Attachment {
    id: SubscriberId,
    target: Weak<dyn Detach>,
}

impl Drop for Attachment {
    fn drop(&mut self) {
        if let Some(target) = self.target.upgrade() {
            target.detach(self.id);
        }
    }
}

/// An ordered stream of events for one subscriber.
///
/// The stream ends when the entity completes. Dropping the subscription (or
/// calling [`Subscription::unsubscribe`]) detaches it from whatever it was
/// attached to; no further events are buffered for it.
pub struct Subscription<T> {
    id: SubscriberId,
    rx: Option<UnboundedReceiver<T>>,
    attachment: Option<Attachment>,
}

impl<T> Subscription<T> {
    pub(crate) fn attached(
        id: SubscriberId,
        rx: UnboundedReceiver<T>,
        target: Weak<dyn Detach>,
    ) -> Self {
        Self {
            id,
            rx: Some(rx),
            attachment: Some(Attachment { id, target }),
        }
    }

    /// A subscription fed only by `rx`, whose senders are already gone or
    /// owned elsewhere.
    pub(crate) fn detached(id: SubscriberId, rx: UnboundedReceiver<T>) -> Self {
        Self {
            id,
            rx: Some(rx),
            attachment: None,
        }
    }

    /// A subscription that completes without yielding anything.
    pub fn empty() -> Self {
        Self {
            id: SubscriberId::next(),
            rx: None,
            attachment: None,
        }
    }

    /// A subscription that yields `items` and then completes.
    pub fn finished(items: Vec<T>) -> Self {
        let (tx, rx) = unbounded_channel();
        for item in items {
            let _ = tx.send(item);
        }
        Self::detached(SubscriberId::next(), rx)
    }

    pub fn id(&self) -> SubscriberId {
        self.id
    }

    /// Whether this subscription is still registered for live events.
    pub fn is_attached(&self) -> bool {
        self.attachment.is_some()
    }

    /// Detach now. Equivalent to dropping the subscription.
    pub fn unsubscribe(mut self) {
        self.attachment.take();
        self.rx.take();
    }
}

impl<T> Stream for Subscription<T> {
    type Item = T;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<T>> {
        let this = self.get_mut();
        match this.rx.as_mut() {
            Some(rx) => rx.poll_recv(cx),
            None => Poll::Ready(None),
        }
    }
}

impl<T> std::fmt::Debug for Subscription<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("id", &self.id)
            .field("attached", &self.is_attached())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::StreamExt;
    use parking_lot::Mutex;
    use std::sync::Arc;

    #[derive(Default)]
    struct Recorder {
        detached: Mutex<Vec<SubscriberId>>,
    }

    impl Detach for Recorder {
        fn detach(&self, id: SubscriberId) {
            self.detached.lock().push(id);
        }
    }

    #[test]
    fn test_ids_are_unique() {
        assert_ne!(SubscriberId::next(), SubscriberId::next());
    }

    #[tokio::test]
    async fn test_empty_and_finished() {
        assert_eq!(Subscription::<u32>::empty().next().await, None);

        let items: Vec<u32> = Subscription::finished(vec![1, 2, 3]).collect().await;
        assert_eq!(items, vec![1, 2, 3]);
    }

    #[test]
    fn test_drop_detaches_once() {
        let recorder = Arc::new(Recorder::default());
        let (_tx, rx) = unbounded_channel::<u32>();
        let id = SubscriberId::next();
        let target: Arc<dyn Detach> = recorder.clone();

        let sub = Subscription::attached(id, rx, Arc::downgrade(&target));
        assert!(sub.is_attached());
        sub.unsubscribe();

        assert_eq!(*recorder.detached.lock(), vec![id]);
    }

    #[test]
    fn test_broadcast_forgets_closed_receivers() {
        let mut subscribers = Subscribers::default();
        let (tx_a, mut rx_a) = unbounded_channel();
        let (tx_b, rx_b) = unbounded_channel();
        subscribers.insert(SubscriberId::next(), tx_a);
        subscribers.insert(SubscriberId::next(), tx_b);
        drop(rx_b);

        subscribers.broadcast(&7u32);
        assert_eq!(subscribers.len(), 1);
        assert_eq!(rx_a.try_recv().unwrap(), 7);
    }
}
