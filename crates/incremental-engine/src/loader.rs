//! Manual-dispatch batch loading.
//!
//! A [`BatchLoader`] accumulates keys without ever dispatching on its own.
//! Dispatch is driven entirely from outside, by the executor acting on a
//! [`BatchDispatchCoordinator`](crate::dispatch::BatchDispatchCoordinator)
//! decision, which is what makes batching windows a policy rather than a
//! timer.

use std::{
    collections::HashMap,
    fmt,
    hash::Hash,
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc, Mutex,
    },
};

use async_trait::async_trait;
use futures_channel::oneshot;
use futures_util::future::{BoxFuture, FutureExt};

use crate::error::Error;

/// Resolves a batch of keys in one round trip.
///
/// Keys absent from the returned map fail their waiters individually; the
/// rest of the batch is unaffected.
#[async_trait]
pub trait BatchLoadFn<K, V>: Send + Sync + 'static {
    async fn load(&self, keys: Vec<K>) -> Result<HashMap<K, V>, Error>;
}

#[async_trait]
impl<K, V, F> BatchLoadFn<K, V> for F
where
    K: Send + 'static,
    V: Send + 'static,
    F: Fn(Vec<K>) -> BoxFuture<'static, Result<HashMap<K, V>, Error>> + Send + Sync + 'static,
{
    async fn load(&self, keys: Vec<K>) -> Result<HashMap<K, V>, Error> {
        (self)(keys).await
    }
}

type Waiter<V> = oneshot::Sender<Result<V, Error>>;

/// A keyed loader that batches every `load` issued between two dispatches.
pub struct BatchLoader<K, V> {
    name: String,
    load_fn: Arc<dyn BatchLoadFn<K, V>>,
    pending: Mutex<Vec<(K, Waiter<V>)>>,
    dispatch_count: AtomicUsize,
}

impl<K, V> BatchLoader<K, V>
where
    K: Clone + Eq + Hash + Send + fmt::Debug + 'static,
    V: Clone + Send + 'static,
{
    pub fn new(name: impl Into<String>, load_fn: impl BatchLoadFn<K, V>) -> Self {
        Self {
            name: name.into(),
            load_fn: Arc::new(load_fn),
            pending: Mutex::new(Vec::new()),
            dispatch_count: AtomicUsize::new(0),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// How many batches have been dispatched so far.
    pub fn dispatch_count(&self) -> usize {
        self.dispatch_count.load(Ordering::Acquire)
    }

    pub fn has_pending(&self) -> bool {
        !self.pending.lock().expect("loader queue poisoned").is_empty()
    }

    /// Enqueues `key` and returns a future that resolves when a later
    /// dispatch fulfills it. The returned future owns its slot, so it can
    /// outlive the call site.
    pub fn load(&self, key: K) -> BoxFuture<'static, Result<V, Error>> {
        let (sender, receiver) = oneshot::channel();
        self.pending
            .lock()
            .expect("loader queue poisoned")
            .push((key, sender));

        async move {
            receiver
                .await
                .map_err(|_| Error::new("batch loader dropped before dispatch"))?
        }
        .boxed()
    }

    /// Dispatches everything enqueued so far as one batch. A no-op when the
    /// queue is empty.
    pub async fn dispatch(&self) {
        let waiters = std::mem::take(&mut *self.pending.lock().expect("loader queue poisoned"));
        if waiters.is_empty() {
            return;
        }
        self.dispatch_count.fetch_add(1, Ordering::AcqRel);

        let mut keys: Vec<K> = Vec::new();
        for (key, _) in &waiters {
            if !keys.contains(key) {
                keys.push(key.clone());
            }
        }
        tracing::debug!(loader = %self.name, batch_size = keys.len(), "dispatching batch");

        match self.load_fn.load(keys).await {
            Ok(values) => {
                for (key, waiter) in waiters {
                    let result = values.get(&key).cloned().ok_or_else(|| {
                        Error::new(format!("loader `{}` returned no value for key {key:?}", self.name))
                    });
                    let _ = waiter.send(result);
                }
            }
            Err(err) => {
                for (_, waiter) in waiters {
                    let _ = waiter.send(Err(err.clone()));
                }
            }
        }
    }
}

/// Type-erased dispatch handle, so loaders with different key and value
/// types can live in one registry.
pub trait Dispatchable: Send + Sync + 'static {
    fn has_pending(&self) -> bool;
    fn flush(&self) -> BoxFuture<'_, ()>;
}

impl<K, V> Dispatchable for BatchLoader<K, V>
where
    K: Clone + Eq + Hash + Send + Sync + fmt::Debug + 'static,
    V: Clone + Send + Sync + 'static,
{
    fn has_pending(&self) -> bool {
        BatchLoader::has_pending(self)
    }

    fn flush(&self) -> BoxFuture<'_, ()> {
        self.dispatch().boxed()
    }
}

/// All the loaders of one engine, flushed together when a coordinator asks.
#[derive(Default, Clone)]
pub struct DispatchRegistry {
    loaders: Vec<Arc<dyn Dispatchable>>,
}

impl DispatchRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, loader: Arc<dyn Dispatchable>) {
        self.loaders.push(loader);
    }

    /// Flushes every loader with a pending batch. Fulfilling one batch may
    /// enqueue keys on another loader, so this loops until nothing is
    /// pending.
    pub async fn flush_all(&self) {
        loop {
            let mut flushed_any = false;
            for loader in &self.loaders {
                if loader.has_pending() {
                    loader.flush().await;
                    flushed_any = true;
                }
            }
            if !flushed_any {
                break;
            }
        }
    }
}
