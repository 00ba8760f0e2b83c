//! Cache Entry Module
//!
//! Defines the stored unit: a type-erased value with TTL metadata, its
//! estimated size and, for resolved entries, the producer that computed it.

use std::any::{type_name, Any};
use std::fmt;
use std::future::Future;
use std::mem::size_of;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Serialize, Serializer};

use crate::cache::size::{estimate, EstimateSize, Visited};
use crate::error::{CacheError, Result};

// == Cache Value ==
/// Anything that can be stored: sized, shareable across threads and
/// recoverable by downcasting.
pub trait CacheValue: Any + EstimateSize + Send + Sync {
    fn as_any(&self) -> &dyn Any;

    fn value_type(&self) -> &'static str;

    /// Re-wraps the shared allocation as a boxed `Arc<Self>`.
    fn into_any_arc(self: Arc<Self>) -> Box<dyn Any>;
}

impl<T: Any + EstimateSize + Send + Sync> CacheValue for T {
    fn as_any(&self) -> &dyn Any {
        self
    }

    fn value_type(&self) -> &'static str {
        type_name::<T>()
    }

    fn into_any_arc(self: Arc<Self>) -> Box<dyn Any> {
        Box::new(self)
    }
}

/// Type-erased stored value.
pub type SharedValue = Arc<dyn CacheValue>;

/// Borrows a shared value as `T`.
///
/// `Arc<dyn CacheValue>` is itself a `CacheValue`, so this dereferences
/// first to reach the stored type.
pub fn downcast_ref<T: Any>(value: &SharedValue) -> Option<&T> {
    (**value).as_any().downcast_ref::<T>()
}

/// Recovers the shared value as `Arc<U>` when `T` is `Arc<U>` for the stored `U`.
///
/// The allocation is shared with the cache, not copied.
pub fn downcast_shared<T: Any>(value: &SharedValue) -> Option<T> {
    CacheValue::into_any_arc(Arc::clone(value))
        .downcast::<T>()
        .ok()
        .map(|shared| *shared)
}

pub fn value_type(value: &SharedValue) -> &'static str {
    (**value).value_type()
}

// == Producer ==
pub type ProducerFuture = Pin<Box<dyn Future<Output = anyhow::Result<SharedValue>> + Send>>;

/// A memoized zero-argument producer captured by resolve.
#[derive(Clone)]
pub struct Producer(Arc<dyn Fn() -> ProducerFuture + Send + Sync>);

impl Producer {
    pub fn new<T, F, Fut>(produce: F) -> Self
    where
        T: CacheValue,
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<T>> + Send + 'static,
    {
        Producer(Arc::new(move || -> ProducerFuture {
            let fut = produce();
            Box::pin(async move {
                let value = fut.await?;
                Ok(Arc::new(value) as SharedValue)
            })
        }))
    }

    /// Runs the producer once.
    pub async fn produce(&self) -> anyhow::Result<SharedValue> {
        (self.0)().await
    }
}

impl fmt::Debug for Producer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Producer(..)")
    }
}

// Function values have a fixed width.
impl EstimateSize for Producer {
    fn estimate_size(&self, _visited: &mut Visited) -> Option<usize> {
        Some(size_of::<Self>())
    }
}

// == Cache Entry ==
/// Represents a single cache entry with value and metadata.
#[derive(Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Entry {
    /// Unique key within a store
    pub key: String,
    /// Estimated value size in bytes, fixed at insertion
    pub size: usize,
    #[serde(skip)]
    pub value: SharedValue,
    #[serde(skip)]
    pub producer: Option<Producer>,
    pub created_at: DateTime<Utc>,
    /// None = never expires
    pub expires_at: Option<DateTime<Utc>>,
    #[serde(rename = "expiresIn", serialize_with = "serialize_millis")]
    pub ttl: Duration,
}

fn serialize_millis<S: Serializer>(
    ttl: &Duration,
    serializer: S,
) -> std::result::Result<S::Ok, S::Error> {
    serializer.serialize_u64(u64::try_from(ttl.as_millis()).unwrap_or(u64::MAX))
}

crate::estimate_struct!(Entry {
    key,
    size,
    value,
    producer,
    created_at,
    expires_at,
    ttl,
});

impl Entry {
    // == Constructor ==
    /// Creates a new entry, estimating the size of `value`.
    ///
    /// A zero `ttl` means the entry never expires.
    pub fn new<T: CacheValue>(key: impl Into<String>, ttl: Duration, value: T) -> Result<Self> {
        Self::from_shared(key, ttl, Arc::new(value), None)
    }

    /// Creates an entry from an already shared value.
    pub fn from_shared(
        key: impl Into<String>,
        ttl: Duration,
        value: SharedValue,
        producer: Option<Producer>,
    ) -> Result<Self> {
        let size = estimate(&*value).ok_or_else(|| {
            CacheError::EstimationFailure(format!(
                "cannot estimate size of {}",
                value_type(&value)
            ))
        })?;
        let created_at = Utc::now();

        Ok(Self {
            key: key.into(),
            size,
            value,
            producer,
            created_at,
            expires_at: expiry(created_at, ttl),
            ttl,
        })
    }

    // == Is Expired ==
    /// Checks if the entry has expired.
    ///
    /// An entry is expired once the current time reaches its expiration time.
    /// Entries without TTL never expire.
    pub fn is_expired(&self) -> bool {
        self.is_expired_at(Utc::now())
    }

    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        match self.expires_at {
            Some(expires) => now >= expires,
            None => false,
        }
    }

    /// Returns remaining TTL in milliseconds, or None if no expiration is set.
    pub fn ttl_remaining_ms(&self) -> Option<u64> {
        self.expires_at.map(|expires| {
            let remaining = expires - Utc::now();
            remaining.num_milliseconds().max(0) as u64
        })
    }

    /// Borrows the value as `T` if that is its concrete type.
    pub fn value_as<T: Any>(&self) -> Option<&T> {
        downcast_ref::<T>(&self.value)
    }
}

impl fmt::Debug for Entry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Entry")
            .field("key", &self.key)
            .field("size", &self.size)
            .field("value_type", &value_type(&self.value))
            .field("memoized", &self.producer.is_some())
            .field("expires_at", &self.expires_at)
            .field("ttl", &self.ttl)
            .finish()
    }
}

/// Absolute expiration time. A TTL too large to represent never expires.
fn expiry(created_at: DateTime<Utc>, ttl: Duration) -> Option<DateTime<Utc>> {
    if ttl.is_zero() {
        return None;
    }
    chrono::Duration::from_std(ttl)
        .ok()
        .and_then(|ttl| created_at.checked_add_signed(ttl))
}
