//! Keyed registry of entity caches.
//!
//! The first subscriber for a cold entity triggers a bootstrap: a history
//! query run at most once per entity at a time. Events for the entity that
//! arrive while the bootstrap is running are parked in a pending slot and
//! merged behind the history once it lands, skipping anything the history
//! already contains. After that the entity is served from its
//! [`EntityEventCache`] until it completes.
//!
//! Live events can go missing while a notification connection is down, so a
//! cache can be caught up from the store at any time: anything past its last
//! item is appended, and an entity the store reports as finished completes.

use async_trait::async_trait;
use beacon_db::DbResult;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::fmt::Display;
use std::hash::Hash;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::cache::EntityEventCache;
use crate::single_flight::SingleFlight;
use crate::subscription::Subscription;

/// What a bootstrap query found.
#[derive(Debug, Clone, PartialEq)]
pub enum Bootstrap<T> {
    /// The entity does not exist.
    NotFound,
    /// The entity is already complete; these are all of its events.
    Terminal(Vec<T>),
    /// The entity is live; these are its events so far.
    Live(Vec<T>),
}

/// A kind of entity whose events can be cached and replayed.
#[async_trait]
pub trait StreamSource: Send + Sync + 'static {
    type Key: Copy + Eq + Hash + Display + Send + Sync + 'static;
    type Item: Clone + Send + Sync + 'static;
    /// Storage order of items; used to drop parked items the history covers.
    type Position: Ord + Send;

    /// Short name used in logs.
    const NAME: &'static str;

    fn position(item: &Self::Item) -> Self::Position;

    /// Whether `item` is the last one the entity will ever produce.
    fn is_terminal(item: &Self::Item) -> bool;

    async fn bootstrap(&self, key: Self::Key) -> DbResult<Bootstrap<Self::Item>>;

    /// Everything the store holds for an entity that is already cached.
    /// Unlike a bootstrap, a finished entity still reports its own events.
    async fn refresh(&self, key: Self::Key) -> DbResult<Bootstrap<Self::Item>> {
        self.bootstrap(key).await
    }
}

enum Slot<T> {
    /// Bootstrap in flight; live events are parked here. `stale` asks for a
    /// refresh once the cache is installed.
    Pending {
        parked: Vec<T>,
        completed: bool,
        stale: bool,
    },
    Ready(Arc<EntityEventCache<T>>),
}

/// Shared result of one bootstrap.
#[derive(Clone)]
enum Outcome<T> {
    Empty,
    Finished(Arc<Vec<T>>),
    Live(Arc<EntityEventCache<T>>),
}

struct Registry<S: StreamSource> {
    source: S,
    slots: Mutex<HashMap<S::Key, Slot<S::Item>>>,
}

/// Entity caches of one kind, keyed by entity id.
pub struct EntityChannel<S: StreamSource> {
    registry: Arc<Registry<S>>,
    flights: SingleFlight<S::Key, Outcome<S::Item>>,
}

impl<S: StreamSource> EntityChannel<S> {
    pub fn new(source: S) -> Self {
        Self {
            registry: Arc::new(Registry {
                source,
                slots: Mutex::new(HashMap::new()),
            }),
            flights: SingleFlight::new(),
        }
    }

    /// Subscribe to `key`: its history followed by live events, ending when
    /// the entity completes. Unknown entities and failed queries yield an
    /// empty subscription.
    pub async fn subscribe(&self, key: S::Key) -> Subscription<S::Item> {
        if let Some(cache) = self.registry.ready(key) {
            return cache.attach();
        }

        let registry = self.registry.clone();
        let outcome = self
            .flights
            .run(key, move || {
                // A panicking query surfaces as an empty outcome.
                let task = tokio::spawn(registry.bootstrap(key));
                async move {
                    task.await.unwrap_or_else(|e| {
                        warn!(channel = S::NAME, key = %key, error = %e, "Bootstrap task failed");
                        Outcome::Empty
                    })
                }
            })
            .await;

        match outcome {
            Outcome::Empty => Subscription::empty(),
            Outcome::Finished(items) => Subscription::finished(items.as_ref().clone()),
            Outcome::Live(cache) => cache.attach(),
        }
    }

    /// Route one live event for `key`. Events for entities nobody follows and
    /// events the cache already holds are dropped. A terminal event completes
    /// and evicts the cache.
    pub fn publish(&self, key: S::Key, item: S::Item) {
        let cache = {
            let mut slots = self.registry.slots.lock();
            match slots.get_mut(&key) {
                None => return,
                Some(Slot::Pending { parked, .. }) => {
                    parked.push(item);
                    return;
                }
                Some(Slot::Ready(cache)) => cache.clone(),
            }
        };

        let terminal = S::is_terminal(&item);
        cache.publish(item, S::position);
        if terminal {
            self.registry.finish(key, &cache);
        }
    }

    /// Complete `key` without a final event of its own. The cache is first
    /// caught up with whatever the store recorded that never arrived live.
    pub async fn complete(&self, key: S::Key) {
        let cache = {
            let mut slots = self.registry.slots.lock();
            match slots.get_mut(&key) {
                Some(Slot::Pending { completed, .. }) => {
                    *completed = true;
                    return;
                }
                Some(Slot::Ready(cache)) => cache.clone(),
                None => return,
            }
        };
        self.registry.catch_up(key, &cache).await;
        self.registry.finish(key, &cache);
    }

    /// Catch every cached entity up with the store, in the background.
    /// Bootstraps still in flight refresh once they land.
    pub fn resync(&self) -> JoinHandle<()> {
        tokio::spawn(self.registry.clone().resync_all())
    }

    /// Whether `key` has a cache or a bootstrap in flight.
    pub fn is_followed(&self, key: S::Key) -> bool {
        self.registry.slots.lock().contains_key(&key)
    }

    /// Number of entities with a live cache.
    pub fn cached(&self) -> usize {
        self.registry
            .slots
            .lock()
            .values()
            .filter(|slot| matches!(slot, Slot::Ready(_)))
            .count()
    }

    /// The live cache for `key`, if one exists.
    pub fn cache(&self, key: S::Key) -> Option<Arc<EntityEventCache<S::Item>>> {
        self.registry.ready(key)
    }
}

impl<S: StreamSource> Registry<S> {
    fn ready(&self, key: S::Key) -> Option<Arc<EntityEventCache<S::Item>>> {
        match self.slots.lock().get(&key) {
            Some(Slot::Ready(cache)) => Some(cache.clone()),
            _ => None,
        }
    }

    /// Evict `cache` (if it is still the one registered) and complete it.
    fn finish(&self, key: S::Key, cache: &Arc<EntityEventCache<S::Item>>) {
        {
            let mut slots = self.slots.lock();
            if matches!(slots.get(&key), Some(Slot::Ready(current)) if Arc::ptr_eq(current, cache))
            {
                slots.remove(&key);
            }
        }
        if cache.complete() {
            debug!(channel = S::NAME, key = %key, "Entity completed");
        }
    }

    /// Append what the store holds past the cache's last item. Returns true
    /// when the store reports the entity finished or gone.
    async fn catch_up(&self, key: S::Key, cache: &EntityEventCache<S::Item>) -> bool {
        let (items, mut done) = match self.source.refresh(key).await {
            Ok(Bootstrap::NotFound) => (Vec::new(), true),
            Ok(Bootstrap::Terminal(items)) => (items, true),
            Ok(Bootstrap::Live(items)) => (items, false),
            Err(e) => {
                warn!(channel = S::NAME, key = %key, error = %e, "Refresh query failed");
                return false;
            }
        };

        let mut added = 0;
        for item in items {
            done |= S::is_terminal(&item);
            if cache.publish(item, S::position) {
                added += 1;
            }
        }
        if added > 0 {
            debug!(channel = S::NAME, key = %key, added, "Cache caught up");
        }
        done
    }

    async fn resync_one(self: Arc<Self>, key: S::Key, cache: Arc<EntityEventCache<S::Item>>) {
        if self.catch_up(key, &cache).await {
            self.finish(key, &cache);
        }
    }

    async fn resync_all(self: Arc<Self>) {
        let ready: Vec<_> = {
            let mut slots = self.slots.lock();
            slots
                .iter_mut()
                .filter_map(|(key, slot)| match slot {
                    Slot::Pending { stale, .. } => {
                        *stale = true;
                        None
                    }
                    Slot::Ready(cache) => Some((*key, cache.clone())),
                })
                .collect()
        };
        debug!(channel = S::NAME, entities = ready.len(), "Resynchronising caches");

        for (key, cache) in ready {
            self.clone().resync_one(key, cache).await;
        }
    }

    async fn bootstrap(self: Arc<Self>, key: S::Key) -> Outcome<S::Item> {
        {
            let mut slots = self.slots.lock();
            if let Some(Slot::Ready(cache)) = slots.get(&key) {
                return Outcome::Live(cache.clone());
            }
            slots.entry(key).or_insert_with(|| Slot::Pending {
                parked: Vec::new(),
                completed: false,
                stale: false,
            });
        }

        let result = self.source.bootstrap(key).await;

        let mut slots = self.slots.lock();
        let (parked, completed, stale) = match slots.remove(&key) {
            Some(Slot::Pending {
                parked,
                completed,
                stale,
            }) => (parked, completed, stale),
            Some(Slot::Ready(cache)) => {
                slots.insert(key, Slot::Ready(cache.clone()));
                return Outcome::Live(cache);
            }
            None => (Vec::new(), false, false),
        };

        match result {
            Err(e) => {
                warn!(channel = S::NAME, key = %key, error = %e, "Bootstrap query failed");
                Outcome::Empty
            }
            Ok(Bootstrap::NotFound) => Outcome::Empty,
            Ok(Bootstrap::Terminal(items)) => {
                debug!(channel = S::NAME, key = %key, items = items.len(), "Entity already complete");
                Outcome::Finished(Arc::new(items))
            }
            Ok(Bootstrap::Live(history)) => {
                let (items, terminal) = merge_parked::<S>(history, parked);
                if terminal || completed {
                    return Outcome::Finished(Arc::new(items));
                }
                debug!(channel = S::NAME, key = %key, items = items.len(), "Entity cached");
                let cache = EntityEventCache::new(items);
                slots.insert(key, Slot::Ready(cache.clone()));
                if stale {
                    tokio::spawn(self.clone().resync_one(key, cache.clone()));
                }
                Outcome::Live(cache)
            }
        }
    }
}

/// Append parked live events behind the history, skipping ones at or before
/// the last history position. Stops at the first terminal event.
fn merge_parked<S: StreamSource>(
    history: Vec<S::Item>,
    parked: Vec<S::Item>,
) -> (Vec<S::Item>, bool) {
    let last = history.last().map(S::position);
    let mut items = history;
    for item in parked {
        if last.as_ref().is_some_and(|last| S::position(&item) <= *last) {
            continue;
        }
        let terminal = S::is_terminal(&item);
        items.push(item);
        if terminal {
            return (items, true);
        }
    }
    (items, false)
}
