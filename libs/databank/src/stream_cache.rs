use std::collections::HashMap;
use std::fmt::Debug;
use std::hash::Hash;
use std::pin::Pin;
use std::sync::{Arc, Weak};
use std::task::{Context, Poll};
use std::time::Duration;

use futures::stream::{self, BoxStream, Stream, StreamExt};
use parking_lot::Mutex;
use tokio::runtime::Handle;
use tokio::sync::broadcast::{self, error::RecvError};
use tokio::task::JoinHandle;
use tracing::{debug, trace, warn};

/// Linger applied when no timeout is configured
pub const DEFAULT_LINGER: Duration = Duration::from_secs(5);

/// Per-subscriber buffer before a slow subscriber starts skipping items
pub const DEFAULT_CAPACITY: usize = 64;

type Factory<K, V> = Box<dyn Fn(&K) -> BoxStream<'static, V> + Send + Sync>;

struct Entry<V> {
    id: u64,
    sender: broadcast::Sender<V>,
    last: Arc<Mutex<Option<V>>>,
    subscribers: usize,
    epoch: u64,
    pump: JoinHandle<()>,
}

struct Entries<K, V> {
    map: HashMap<K, Entry<V>>,
    next_id: u64,
}

struct Inner<K, V> {
    factory: Factory<K, V>,
    replay: bool,
    linger: Duration,
    capacity: usize,
    entries: Mutex<Entries<K, V>>,
}

/// Shares one upstream stream per key between any number of subscribers
///
/// The upstream is built by the factory on first access. It keeps running
/// while at least one [`CachedStream`] is alive and for the linger period
/// after the last one is dropped. When it ends by itself the entry is
/// forgotten and the next `get` builds a fresh one.
pub struct StreamCache<K, V> {
    inner: Arc<Inner<K, V>>,
}

impl<K, V> Clone for StreamCache<K, V> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

pub struct StreamCacheBuilder<K, V> {
    factory: Factory<K, V>,
    replay: bool,
    linger: Duration,
    capacity: usize,
}

impl<K, V> StreamCacheBuilder<K, V>
where
    K: Clone + Eq + Hash + Debug + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
{
    /// Deliver the most recent item to each new subscriber
    pub fn with_replay(mut self) -> Self {
        self.replay = true;
        self
    }

    /// How long an unobserved upstream is kept alive
    pub fn with_timeout(mut self, linger: Duration) -> Self {
        self.linger = linger;
        self
    }

    pub fn with_capacity(mut self, capacity: usize) -> Self {
        self.capacity = capacity.max(1);
        self
    }

    pub fn build(self) -> StreamCache<K, V> {
        StreamCache {
            inner: Arc::new(Inner {
                factory: self.factory,
                replay: self.replay,
                linger: self.linger,
                capacity: self.capacity,
                entries: Mutex::new(Entries {
                    map: HashMap::new(),
                    next_id: 0,
                }),
            }),
        }
    }
}

impl<K, V> StreamCache<K, V>
where
    K: Clone + Eq + Hash + Debug + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
{
    pub fn builder<F, S>(factory: F) -> StreamCacheBuilder<K, V>
    where
        F: Fn(&K) -> S + Send + Sync + 'static,
        S: Stream<Item = V> + Send + 'static,
    {
        StreamCacheBuilder {
            factory: Box::new(move |key| factory(key).boxed()),
            replay: false,
            linger: DEFAULT_LINGER,
            capacity: DEFAULT_CAPACITY,
        }
    }

    /// A cache with no replay and the default linger
    pub fn new<F, S>(factory: F) -> Self
    where
        F: Fn(&K) -> S + Send + Sync + 'static,
        S: Stream<Item = V> + Send + 'static,
    {
        Self::builder(factory).build()
    }

    /// Subscribe to the shared stream for `key`
    ///
    /// Must be called from within a tokio runtime, since a missing entry
    /// spawns the task that drives the upstream.
    pub fn get(&self, key: K) -> CachedStream<V> {
        let mut entries = self.inner.entries.lock();

        let (id, replayed, receiver) = match entries.map.get_mut(&key) {
            Some(entry) => {
                entry.subscribers += 1;
                trace!(?key, subscribers = entry.subscribers, "joined cached stream");
                // Hold `last` while subscribing so an item is seen exactly once
                let last = entry.last.lock();
                let replayed = if self.inner.replay { last.clone() } else { None };
                (entry.id, replayed, entry.sender.subscribe())
            }
            None => {
                let id = entries.next_id;
                entries.next_id += 1;

                debug!(?key, "starting cached stream");
                let (sender, receiver) = broadcast::channel(self.inner.capacity);
                let last = Arc::new(Mutex::new(None));
                let upstream = (self.inner.factory)(&key);
                let pump = tokio::spawn(pump(
                    Arc::downgrade(&self.inner),
                    key.clone(),
                    id,
                    upstream,
                    sender.clone(),
                    self.inner.replay.then(|| Arc::clone(&last)),
                ));

                entries.map.insert(
                    key.clone(),
                    Entry {
                        id,
                        sender,
                        last,
                        subscribers: 1,
                        epoch: 0,
                        pump,
                    },
                );
                (id, None, receiver)
            }
        };
        drop(entries);

        let live = stream::unfold(receiver, |mut receiver| async move {
            loop {
                match receiver.recv().await {
                    Ok(item) => return Some((item, receiver)),
                    Err(RecvError::Lagged(skipped)) => {
                        warn!(skipped, "cached stream subscriber lagged");
                    }
                    Err(RecvError::Closed) => return None,
                }
            }
        });

        let inner = Arc::downgrade(&self.inner);
        CachedStream {
            stream: stream::iter(replayed).chain(live).boxed(),
            _lease: Lease(Some(Box::new(move || release(inner, key, id)))),
        }
    }

    /// Whether an upstream is currently cached for `key`
    pub fn contains(&self, key: &K) -> bool {
        self.inner.entries.lock().map.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.inner.entries.lock().map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

async fn pump<K, V>(
    cache: Weak<Inner<K, V>>,
    key: K,
    id: u64,
    mut upstream: BoxStream<'static, V>,
    sender: broadcast::Sender<V>,
    last: Option<Arc<Mutex<Option<V>>>>,
) where
    K: Eq + Hash + Debug,
    V: Clone,
{
    while let Some(item) = upstream.next().await {
        match &last {
            Some(last) => {
                let mut last = last.lock();
                *last = Some(item.clone());
                // No receivers while lingering is fine
                let _ = sender.send(item);
            }
            None => {
                let _ = sender.send(item);
            }
        }
    }

    debug!(?key, "cached stream ended");
    if let Some(cache) = cache.upgrade() {
        let mut entries = cache.entries.lock();
        if entries.map.get(&key).is_some_and(|e| e.id == id) {
            entries.map.remove(&key);
        }
    }
}

fn release<K, V>(cache: Weak<Inner<K, V>>, key: K, id: u64)
where
    K: Clone + Eq + Hash + Debug + Send + Sync + 'static,
    V: Send + Sync + 'static,
{
    let Some(inner) = cache.upgrade() else {
        return;
    };

    let epoch = {
        let mut entries = inner.entries.lock();
        let Some(entry) = entries.map.get_mut(&key).filter(|e| e.id == id) else {
            return;
        };
        entry.subscribers -= 1;
        if entry.subscribers > 0 {
            return;
        }
        entry.epoch += 1;
        entry.epoch
    };

    let handle = match Handle::try_current() {
        Ok(handle) if !inner.linger.is_zero() => handle,
        _ => {
            evict(&inner, &key, id, epoch);
            return;
        }
    };

    trace!(?key, linger = ?inner.linger, "last subscriber left");
    let linger = inner.linger;
    let cache = Arc::downgrade(&inner);
    handle.spawn(async move {
        tokio::time::sleep(linger).await;
        if let Some(inner) = cache.upgrade() {
            evict(&inner, &key, id, epoch);
        }
    });
}

fn evict<K, V>(inner: &Inner<K, V>, key: &K, id: u64, epoch: u64)
where
    K: Eq + Hash + Debug,
{
    let mut entries = inner.entries.lock();
    let idle = entries
        .map
        .get(key)
        .is_some_and(|e| e.id == id && e.epoch == epoch && e.subscribers == 0);
    if idle {
        if let Some(entry) = entries.map.remove(key) {
            debug!(?key, "tearing down idle cached stream");
            entry.pump.abort();
        }
    }
}

struct Lease(Option<Box<dyn FnOnce() + Send>>);

impl Drop for Lease {
    fn drop(&mut self) {
        if let Some(release) = self.0.take() {
            release();
        }
    }
}

/// One subscriber's view of a [`StreamCache`] entry
///
/// Dropping it detaches the subscriber.
pub struct CachedStream<V> {
    stream: BoxStream<'static, V>,
    _lease: Lease,
}

impl<V> Stream for CachedStream<V> {
    type Item = V;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<V>> {
        self.stream.poll_next_unpin(cx)
    }
}
