//! Cache Handle
//!
//! `MemCache` couples a [`Store`] behind a single `RwLock` with its background
//! sweeper, and layers the resolve (get-or-compute) protocol on top.
//!
//! Every read or write of the entry collection goes through the lock.
//! Expiry-aware reads take the write side since they may delete.

use std::any::Any;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::RwLock;
use tracing::{debug, info};

use crate::cache::{
    downcast_ref, downcast_shared, value_type, CacheValue, Entry, Lookup, Producer, SharedValue, Stat, Store,
};
use crate::config::CacheConfig;
use crate::error::{CacheError, ResolveError, Result};
use crate::tasks::{spawn_sweeper, sweep_once, Sweeper};

// == MemCache ==
/// Shared handle to one cache instance.
///
/// Clones share the same store and sweeper. The sweeper stops on
/// [`MemCache::close`] or once the last handle is dropped.
#[derive(Clone)]
pub struct MemCache {
    store: Arc<RwLock<Store>>,
    sweeper: Arc<Mutex<Option<Sweeper>>>,
    swept: Arc<AtomicU64>,
    config: CacheConfig,
}

impl MemCache {
    // == Constructors ==
    /// Creates a cache with the given byte budget and starts its sweeper.
    ///
    /// A `max_bytes` of 0 means unbounded. Must be called within a tokio runtime.
    pub fn new(max_bytes: usize) -> Self {
        Self::from_config(&CacheConfig::with_max_bytes(max_bytes))
    }

    pub fn from_config(config: &CacheConfig) -> Self {
        let store = Arc::new(RwLock::new(Store::new(config.max_bytes)));
        let sweeper = spawn_sweeper(store.clone(), config.sweep_interval, config.sweep_batch);
        let swept = sweeper.counter();
        info!("Cache created with max_bytes={}", config.max_bytes);

        Self {
            store,
            sweeper: Arc::new(Mutex::new(Some(sweeper))),
            swept,
            config: config.clone(),
        }
    }

    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    // == Set ==
    /// Stores `value` under `key` for `ttl` (zero = never expires).
    ///
    /// Replaces any existing entry. Returns [`CacheError::OverBudget`] if the
    /// entry does not fit, leaving the cache unchanged.
    pub async fn set<T: CacheValue>(
        &self,
        key: impl Into<String>,
        ttl: Duration,
        value: T,
    ) -> Result<()> {
        let entry = Entry::new(key, ttl, value)?;
        self.store.write().await.insert(entry)
    }

    // == Get ==
    /// Returns a clone of the value for `key` if present and unexpired.
    ///
    /// Values stored as `Box<T>` or `Arc<T>` are also returned as `T`.
    ///
    /// # Panics
    /// If the stored value has an incompatible type.
    pub async fn get<T: Any + Clone>(&self, key: &str) -> Option<T> {
        let value = self.store.write().await.get(key)?;
        Some(extract::<T>(key, &value))
    }

    /// Populates `dst` in place if `key` is present and unexpired, leaving it
    /// untouched otherwise. Returns whether `dst` was written.
    ///
    /// # Panics
    /// If the stored value has an incompatible type.
    pub async fn get_into<T: Any + Clone>(&self, key: &str, dst: &mut T) -> bool {
        match self.get::<T>(key).await {
            Some(value) => {
                *dst = value;
                true
            }
            None => false,
        }
    }

    /// Returns a snapshot of the entry for `key` if present and unexpired.
    pub async fn value(&self, key: &str) -> Option<Entry> {
        self.store.write().await.value(key)
    }

    pub async fn exists(&self, key: &str) -> bool {
        self.store.write().await.exists(key)
    }

    pub async fn delete(&self, key: &str) -> bool {
        self.store.write().await.delete(key)
    }

    pub async fn clear(&self) {
        self.store.write().await.clear();
    }

    pub async fn keys(&self) -> Vec<String> {
        self.store.read().await.keys()
    }

    pub async fn values(&self) -> Vec<Entry> {
        self.store.read().await.values()
    }

    pub async fn count(&self) -> usize {
        self.store.read().await.count()
    }

    /// Estimated size of all entries in bytes.
    pub async fn size(&self) -> Result<usize> {
        self.store.read().await.size()
    }

    pub fn max_size(&self) -> usize {
        self.config.max_bytes
    }

    pub async fn stat(&self) -> Result<Stat> {
        self.store.read().await.stat()
    }

    // == Resolve ==
    /// Returns the cached value for `key`, computing it with `producer` if
    /// absent.
    ///
    /// - Fresh entry: returned as is.
    /// - Expired but not yet swept: the producer captured when the entry was
    ///   created runs again and its result is returned. The stale entry is
    ///   not refreshed; the sweeper removes it.
    /// - Absent: `producer` runs. On success the value is cached with the
    ///   producer attached; if admission fails, the value is still returned
    ///   inside [`ResolveError::NotCached`].
    ///
    /// Producers run without the store lock held.
    ///
    /// # Panics
    /// If `key` already holds a value of a different type.
    pub async fn resolve<T, F, Fut>(
        &self,
        key: &str,
        ttl: Duration,
        producer: F,
    ) -> std::result::Result<T, ResolveError<T>>
    where
        T: CacheValue + Clone,
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<T>> + Send + 'static,
    {
        let lookup = self.store.read().await.lookup(key);
        match lookup {
            Lookup::Fresh(value) => return Ok(expect_type::<T>(key, &value)),
            Lookup::Stale(Some(original)) => {
                debug!(key = %key, "resolve hit an expired entry, re-running its producer");
                let value = original.produce().await.map_err(CacheError::Producer)?;
                return Ok(expect_type::<T>(key, &value));
            }
            Lookup::Stale(None) | Lookup::Missing => {}
        }

        let producer = Producer::new(producer);
        let shared = producer.produce().await.map_err(CacheError::Producer)?;
        let value = expect_type::<T>(key, &shared);

        let result = match Entry::from_shared(key, ttl, shared, Some(producer)) {
            Ok(entry) => self.store.write().await.insert(entry),
            Err(err) => Err(err),
        };

        match result {
            Ok(()) => Ok(value),
            Err(source) => Err(ResolveError::NotCached { value, source }),
        }
    }

    // == Sweep ==
    /// Runs one sweep pass now and returns the number of entries removed.
    pub async fn sweep_now(&self) -> usize {
        let removed = {
            let mut store = self.store.write().await;
            sweep_once(&mut store, self.config.sweep_batch)
        };
        self.swept.fetch_add(removed as u64, Ordering::Relaxed);
        removed
    }

    /// Total entries removed by sweeps on this cache.
    pub fn total_swept(&self) -> u64 {
        self.swept.load(Ordering::Relaxed)
    }

    // == Close ==
    /// Stops the sweeper and waits for it to exit. Idempotent.
    pub async fn close(&self) {
        let sweeper = self.sweeper.lock().take();
        if let Some(sweeper) = sweeper {
            sweeper.stop().await;
            info!("Cache closed");
        }
    }

    pub fn is_closed(&self) -> bool {
        self.sweeper.lock().is_none()
    }
}

impl std::fmt::Debug for MemCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemCache")
            .field("config", &self.config)
            .field("closed", &self.is_closed())
            .finish()
    }
}

/// Clones the stored value as `T`, panicking on a type mismatch.
fn expect_type<T: Any + Clone>(key: &str, value: &SharedValue) -> T {
    match downcast_ref::<T>(value) {
        Some(value) => value.clone(),
        None => panic!(
            "cache key {:?} holds {}, not {}",
            key,
            value_type(value),
            std::any::type_name::<T>()
        ),
    }
}

/// Like [`expect_type`], also accepting one level of indirection on either
/// side: a `Box<T>` or `Arc<T>` stored and read as `T`, or a `U` stored and
/// read as `Arc<U>`.
fn extract<T: Any + Clone>(key: &str, value: &SharedValue) -> T {
    if let Some(value) = downcast_ref::<T>(value) {
        return value.clone();
    }
    if let Some(boxed) = downcast_ref::<Box<T>>(value) {
        return T::clone(boxed);
    }
    if let Some(shared) = downcast_ref::<Arc<T>>(value) {
        return T::clone(shared);
    }
    if let Some(shared) = downcast_shared::<T>(value) {
        return shared;
    }
    expect_type::<T>(key, value)
}
