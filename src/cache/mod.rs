//! Cache Module
//!
//! Provides the in-process cache engine: size estimation, entries, the
//! entry store with admission control, and stat snapshots.

mod entry;
pub mod size;
mod stats;
mod store;

#[cfg(test)]
mod property_tests;

// Re-export public types
pub use entry::{downcast_ref, downcast_shared, value_type, CacheValue, Entry, Producer, SharedValue};
pub use size::{estimate, padding_of, try_estimate, EstimateSize, VisitKind, Visited};
pub use stats::{usage_percent, Stat};
pub use store::{sample_indices, Lookup, Store};

// == Public Constants ==
/// Number of entries a sweep inspects per pass; smaller stores are scanned fully.
pub const DEFAULT_SWEEP_BATCH: usize = 10;
