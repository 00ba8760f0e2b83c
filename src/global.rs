//! Package-level Cache
//!
//! A process-wide [`MemCache`] behind free functions, for callers that want
//! one shared cache without threading a handle around. [`init`] must run
//! (inside a tokio runtime) before any other call; afterwards every call
//! forwards to that instance until [`close`].

use std::any::Any;
use std::future::Future;
use std::time::Duration;

use once_cell::sync::Lazy;
use parking_lot::RwLock;

use crate::cache::{CacheValue, Entry, Stat};
use crate::config::CacheConfig;
use crate::error::{CacheError, ResolveError, Result};
use crate::memcache::MemCache;

static CACHE: Lazy<RwLock<Option<MemCache>>> = Lazy::new(|| RwLock::new(None));

/// Creates the shared cache, replacing any previous one.
///
/// The previous instance's sweeper stops once its last handle is dropped.
pub fn init(max_bytes: usize) -> MemCache {
    init_with_config(&CacheConfig::with_max_bytes(max_bytes))
}

pub fn init_with_config(config: &CacheConfig) -> MemCache {
    let cache = MemCache::from_config(config);
    *CACHE.write() = Some(cache.clone());
    cache
}

/// Returns a handle to the shared cache.
pub fn handle() -> Result<MemCache> {
    CACHE.read().clone().ok_or(CacheError::NotRunning)
}

/// Whether the shared cache has been created and not yet closed.
pub fn is_running() -> bool {
    CACHE.read().is_some()
}

/// Stops the shared cache's sweeper and detaches it.
pub async fn close() {
    let cache = CACHE.write().take();
    if let Some(cache) = cache {
        cache.close().await;
    }
}

pub async fn set<T: CacheValue>(key: impl Into<String>, ttl: Duration, value: T) -> Result<()> {
    handle()?.set(key, ttl, value).await
}

pub async fn get<T: Any + Clone>(key: &str) -> Result<Option<T>> {
    Ok(handle()?.get(key).await)
}

pub async fn get_into<T: Any + Clone>(key: &str, dst: &mut T) -> Result<bool> {
    Ok(handle()?.get_into(key, dst).await)
}

pub async fn value(key: &str) -> Result<Option<Entry>> {
    Ok(handle()?.value(key).await)
}

pub async fn exists(key: &str) -> Result<bool> {
    Ok(handle()?.exists(key).await)
}

pub async fn delete(key: &str) -> Result<bool> {
    Ok(handle()?.delete(key).await)
}

pub async fn clear() -> Result<()> {
    handle()?.clear().await;
    Ok(())
}

pub async fn keys() -> Result<Vec<String>> {
    Ok(handle()?.keys().await)
}

pub async fn values() -> Result<Vec<Entry>> {
    Ok(handle()?.values().await)
}

pub async fn count() -> Result<usize> {
    Ok(handle()?.count().await)
}

pub async fn size() -> Result<usize> {
    handle()?.size().await
}

pub fn max_size() -> Result<usize> {
    Ok(handle()?.max_size())
}

pub async fn stat() -> Result<Stat> {
    handle()?.stat().await
}

pub async fn resolve<T, F, Fut>(
    key: &str,
    ttl: Duration,
    producer: F,
) -> std::result::Result<T, ResolveError<T>>
where
    T: CacheValue + Clone,
    F: Fn() -> Fut + Send + Sync + 'static,
    Fut: Future<Output = anyhow::Result<T>> + Send + 'static,
{
    handle()?.resolve(key, ttl, producer).await
}
