use std::collections::HashMap;
use std::fmt::Debug;
use std::future::Future;
use std::hash::Hash;
use std::sync::{Arc, Weak};
use std::time::Duration;

use futures::future::{BoxFuture, FutureExt, Shared};
use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, trace};

type Source<K, V, E> = Box<dyn Fn(K) -> BoxFuture<'static, Result<V, E>> + Send + Sync>;
type Pending<V, E> = Shared<BoxFuture<'static, Result<V, E>>>;

struct Stored<V> {
    value: V,
    inserted_at: Instant,
}

struct InFlight<V, E> {
    id: u64,
    pending: Pending<V, E>,
}

struct State<K, V, E> {
    values: HashMap<K, Stored<V>>,
    in_flight: HashMap<K, InFlight<V, E>>,
    next_id: u64,
}

struct Inner<K, V, E> {
    source: Source<K, V, E>,
    ttl: Option<Duration>,
    state: Mutex<State<K, V, E>>,
}

/// Key/value cache filled by an async fetch
///
/// Concurrent `get`s for a key that is not cached share one fetch. A
/// successful fetch is stored; a failed one is not. Cloning gives
/// another handle to the same cache.
pub struct RequestCache<K, V, E> {
    inner: Arc<Inner<K, V, E>>,
}

impl<K, V, E> Clone for RequestCache<K, V, E> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<K, V, E> RequestCache<K, V, E>
where
    K: Clone + Eq + Hash + Debug + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
    E: Clone + Send + Sync + 'static,
{
    /// Create a cache which never expires entries
    pub fn new<F, Fut>(source: F) -> Self
    where
        F: Fn(K) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<V, E>> + Send + 'static,
    {
        Self::build(source, None)
    }

    /// Create a cache whose entries expire `ttl` after insertion
    ///
    /// Expiry is checked on read; call [`RequestCache::spawn_sweeper`] to
    /// also drop stale entries in the background.
    pub fn with_ttl<F, Fut>(source: F, ttl: Duration) -> Self
    where
        F: Fn(K) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<V, E>> + Send + 'static,
    {
        Self::build(source, Some(ttl))
    }

    fn build<F, Fut>(source: F, ttl: Option<Duration>) -> Self
    where
        F: Fn(K) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<V, E>> + Send + 'static,
    {
        Self {
            inner: Arc::new(Inner {
                source: Box::new(move |key| source(key).boxed()),
                ttl,
                state: Mutex::new(State {
                    values: HashMap::new(),
                    in_flight: HashMap::new(),
                    next_id: 0,
                }),
            }),
        }
    }

    /// Get the value for a key, fetching it if needed
    pub async fn get(&self, key: K) -> Result<V, E> {
        let pending = {
            let mut state = self.inner.state.lock();

            if let Some(stored) = state.values.get(&key) {
                if !self.is_expired(stored) {
                    return Ok(stored.value.clone());
                }
                trace!(?key, "cached value expired");
                state.values.remove(&key);
            }

            match state.in_flight.get(&key) {
                Some(flight) => flight.pending.clone(),
                None => {
                    let id = state.next_id;
                    state.next_id += 1;

                    debug!(?key, "starting fetch");
                    let pending = self.start_fetch(key.clone(), id);
                    state.in_flight.insert(
                        key,
                        InFlight {
                            id,
                            pending: pending.clone(),
                        },
                    );
                    pending
                }
            }
        };

        pending.await
    }

    fn start_fetch(&self, key: K, id: u64) -> Pending<V, E> {
        let fetch = (self.inner.source)(key.clone());
        let inner = Arc::downgrade(&self.inner);

        async move {
            let result = fetch.await;
            if let Some(inner) = inner.upgrade() {
                let mut state = inner.state.lock();
                // A put() or remove() since we started supersedes this fetch
                let current = state.in_flight.get(&key).is_some_and(|f| f.id == id);
                if current {
                    state.in_flight.remove(&key);
                    if let Ok(value) = &result {
                        state.values.insert(
                            key,
                            Stored {
                                value: value.clone(),
                                inserted_at: Instant::now(),
                            },
                        );
                    }
                }
            }
            result
        }
        .boxed()
        .shared()
    }

    /// Install a value directly
    ///
    /// An in-flight fetch for the key still completes for its callers,
    /// but will not overwrite this value.
    pub fn put(&self, key: K, value: V) {
        let mut state = self.inner.state.lock();
        state.in_flight.remove(&key);
        state.values.insert(
            key,
            Stored {
                value,
                inserted_at: Instant::now(),
            },
        );
    }

    /// Evict a key so the next `get` fetches afresh
    pub fn remove(&self, key: &K) {
        let mut state = self.inner.state.lock();
        state.values.remove(key);
    }

    /// Evict a key only while it still holds `bad`
    ///
    /// Returns whether anything was removed.
    pub fn invalidate(&self, key: &K, bad: &V) -> bool
    where
        V: PartialEq,
    {
        let mut state = self.inner.state.lock();
        let matches = state.values.get(key).is_some_and(|s| s.value == *bad);
        if matches {
            state.values.remove(key);
        }
        matches
    }

    /// Peek at a cached, unexpired value without fetching
    pub fn cached(&self, key: &K) -> Option<V> {
        let state = self.inner.state.lock();
        state
            .values
            .get(key)
            .filter(|s| !self.is_expired(s))
            .map(|s| s.value.clone())
    }

    /// Number of stored values, expired or not
    pub fn len(&self) -> usize {
        self.inner.state.lock().values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drop every expired entry now
    pub fn purge_expired(&self) -> usize {
        let Some(ttl) = self.inner.ttl else {
            return 0;
        };
        let mut state = self.inner.state.lock();
        let before = state.values.len();
        state.values.retain(|_, s| s.inserted_at.elapsed() <= ttl);
        before - state.values.len()
    }

    /// Sweep expired entries every `interval`
    ///
    /// The task ends by itself once the cache is dropped.
    pub fn spawn_sweeper(&self, interval: Duration) -> JoinHandle<()> {
        let weak: Weak<Inner<K, V, E>> = Arc::downgrade(&self.inner);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                let Some(inner) = weak.upgrade() else {
                    break;
                };
                let swept = RequestCache { inner }.purge_expired();
                if swept > 0 {
                    debug!(swept, "swept expired cache entries");
                }
            }
        })
    }

    fn is_expired(&self, stored: &Stored<V>) -> bool {
        self.inner
            .ttl
            .is_some_and(|ttl| stored.inserted_at.elapsed() > ttl)
    }
}
