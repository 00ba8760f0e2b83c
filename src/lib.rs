//! Mini Memcache - An in-process key/value cache
//!
//! Provides TTL expiration, a soft byte budget with admission control, a
//! background expiration sweep and a memoizing resolve (get-or-compute).

pub mod cache;
pub mod config;
pub mod error;
pub mod global;
pub mod memcache;
pub mod tasks;

pub use cache::{CacheValue, Entry, EstimateSize, Stat, Store};
pub use config::CacheConfig;
pub use error::{CacheError, ResolveError, Result};
pub use memcache::MemCache;
pub use tasks::spawn_sweeper;
