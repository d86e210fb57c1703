//! Memoization primitives.
//!
//! Two strengths, picked per call site by whether recomputation is
//! observable:
//!
//! - [`ComputeOnceCache`] publishes a shared future under a lock, so the
//!   underlying computation runs exactly once even when first accessed
//!   concurrently. Used for deferred field suppliers, where a duplicate
//!   fetch would be observable.
//! - [`BestEffortCache`] tolerates the occasional duplicate computation in
//!   exchange for never holding a lock across the computing closure. Used
//!   for per-execution plan classification, which is cheap and pure.

use std::{
    collections::HashMap,
    hash::Hash,
    sync::{Mutex, RwLock},
};

use futures_util::{
    future::{BoxFuture, Shared},
    FutureExt,
};

/// A shared handle onto a memoized asynchronous computation.
pub type SharedFuture<T> = Shared<BoxFuture<'static, T>>;

/// Compute-once-publish: the first caller installs the future, every caller
/// receives the same shared handle, and the computation itself runs at most
/// once system-wide.
pub struct ComputeOnceCache<K, V> {
    inner: Mutex<HashMap<K, SharedFuture<V>>>,
}

impl<K, V> Default for ComputeOnceCache<K, V> {
    fn default() -> Self {
        Self {
            inner: Mutex::new(HashMap::new()),
        }
    }
}

impl<K, V> ComputeOnceCache<K, V>
where
    K: Eq + Hash,
    V: Clone,
{
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the shared future for `key`, installing the one built by
    /// `compute` if no caller got there first. `compute` only builds the
    /// future; nothing runs until the returned handle is awaited.
    pub fn get_or_compute<F>(&self, key: K, compute: F) -> SharedFuture<V>
    where
        F: FnOnce() -> BoxFuture<'static, V>,
    {
        let mut inner = self.inner.lock().expect("compute-once cache poisoned");
        inner.entry(key).or_insert_with(|| compute().shared()).clone()
    }

    pub fn len(&self) -> usize {
        self.inner.lock().expect("compute-once cache poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Best-effort memoization: concurrent first callers may each run the
/// closure, and one of the results wins.
pub struct BestEffortCache<K, V> {
    inner: RwLock<HashMap<K, V>>,
}

impl<K, V> Default for BestEffortCache<K, V> {
    fn default() -> Self {
        Self {
            inner: RwLock::new(HashMap::new()),
        }
    }
}

impl<K, V> BestEffortCache<K, V>
where
    K: Eq + Hash,
    V: Clone,
{
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get_or_insert_with<F>(&self, key: K, compute: F) -> V
    where
        F: FnOnce() -> V,
    {
        {
            let inner = self.inner.read().expect("best-effort cache poisoned");
            if let Some(value) = inner.get(&key) {
                return value.clone();
            }
        }

        // The lock is not held while computing; a racing caller may compute
        // too, and the first insert wins.
        let value = compute();
        let mut inner = self.inner.write().expect("best-effort cache poisoned");
        inner.entry(key).or_insert(value).clone()
    }
}
