//! Per-key cache of in-flight operations.
//!
//! Callers asking for the same key while an operation is running get a clone
//! of the same shared future instead of starting a second one. The entry is
//! removed when the operation completes, so the next call after that starts
//! fresh.

use std::collections::HashMap;
use std::future::Future;
use std::hash::Hash;
use std::sync::Arc;

use futures::future::{BoxFuture, FutureExt, Shared};
use parking_lot::Mutex;

/// Handle to a coalesced operation. Cloneable; every clone resolves to the
/// same value.
pub type SharedFetch<V> = Shared<BoxFuture<'static, V>>;

struct Entry<V: Clone> {
    generation: u64,
    future: SharedFetch<V>,
}

struct State<K, V: Clone> {
    entries: HashMap<K, Entry<V>>,
    next_generation: u64,
}

/// Coalescing cache keyed by `K` producing cloneable `V`s.
pub struct InflightCache<K, V: Clone> {
    state: Arc<Mutex<State<K, V>>>,
}

impl<K, V: Clone> Clone for InflightCache<K, V> {
    fn clone(&self) -> Self {
        Self {
            state: Arc::clone(&self.state),
        }
    }
}

impl<K, V> Default for InflightCache<K, V>
where
    K: Eq + Hash + Clone + Send + 'static,
    V: Clone + Send + Sync + 'static,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<K, V> InflightCache<K, V>
where
    K: Eq + Hash + Clone + Send + 'static,
    V: Clone + Send + Sync + 'static,
{
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(State {
                entries: HashMap::new(),
                next_generation: 0,
            })),
        }
    }

    /// Join the operation running for `key`, or start one with `start`.
    ///
    /// Returns the shared future and whether this call started it. The
    /// operation only makes progress while some clone is being polled.
    pub fn get_or_start<F, Fut>(&self, key: K, start: F) -> (SharedFetch<V>, bool)
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = V> + Send + 'static,
    {
        let mut state = self.state.lock();
        if let Some(entry) = state.entries.get(&key) {
            return (entry.future.clone(), false);
        }

        state.next_generation += 1;
        let generation = state.next_generation;
        let cache = Arc::clone(&self.state);
        let entry_key = key.clone();
        let operation = start();

        let future = async move {
            let value = operation.await;
            let mut state = cache.lock();
            // A forgotten entry may have been replaced by a newer operation.
            if state.entries.get(&entry_key).map(|e| e.generation) == Some(generation) {
                state.entries.remove(&entry_key);
            }
            value
        }
        .boxed()
        .shared();

        state.entries.insert(
            key,
            Entry {
                generation,
                future: future.clone(),
            },
        );
        (future, true)
    }

    /// Drop the entry for `key` so the next caller starts a new operation.
    /// Futures already handed out keep running if polled.
    pub fn forget(&self, key: &K) -> bool {
        self.state.lock().entries.remove(key).is_some()
    }

    pub fn contains(&self, key: &K) -> bool {
        self.state.lock().entries.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.state.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
