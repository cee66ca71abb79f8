//! Keyed de-duplication of concurrent work.

use futures::future::{BoxFuture, FutureExt, Shared};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::future::Future;
use std::hash::Hash;
use std::sync::Arc;

type Calls<K, V> = Mutex<HashMap<K, Shared<BoxFuture<'static, V>>>>;

/// Runs at most one future per key at a time; callers arriving while one is
/// in flight wait for and share its output.
///
/// Each call is driven to completion by its own task, so it finishes and
/// leaves the map even when every caller stops waiting.
pub struct SingleFlight<K, V> {
    calls: Arc<Calls<K, V>>,
}

impl<K, V> Default for SingleFlight<K, V> {
    fn default() -> Self {
        Self {
            calls: Arc::new(Mutex::new(HashMap::new())),
        }
    }
}

impl<K, V> SingleFlight<K, V>
where
    K: Eq + Hash + Clone + Send + 'static,
    V: Clone + Send + Sync + 'static,
{
    pub fn new() -> Self {
        Self::default()
    }

    /// Join the in-flight call for `key`, or start one with `start`.
    pub async fn run<F, Fut>(&self, key: K, start: F) -> V
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = V> + Send + 'static,
    {
        let call = {
            let mut calls = self.calls.lock();
            match calls.get(&key) {
                Some(call) => call.clone(),
                None => {
                    let call = start().boxed().shared();
                    calls.insert(key.clone(), call.clone());
                    tokio::spawn(drive(self.calls.clone(), key.clone(), call.clone()));
                    call
                }
            }
        };

        let value = call.clone().await;
        forget(&self.calls, &key, &call);
        value
    }

    /// Number of keys with a call in flight.
    pub fn in_flight(&self) -> usize {
        self.calls.lock().len()
    }
}

async fn drive<K: Eq + Hash, V: Clone>(
    calls: Arc<Calls<K, V>>,
    key: K,
    call: Shared<BoxFuture<'static, V>>,
) {
    call.clone().await;
    forget(&calls, &key, &call);
}

/// Remove `key` if it still maps to `call`.
fn forget<K: Eq + Hash, V: Clone>(
    calls: &Calls<K, V>,
    key: &K,
    call: &Shared<BoxFuture<'static, V>>,
) {
    let mut calls = calls.lock();
    if calls.get(key).is_some_and(|current| current.ptr_eq(call)) {
        calls.remove(key);
    }
}
