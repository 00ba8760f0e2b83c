//! Cache Statistics Module
//!
//! Read-only snapshot of a store, assembled on demand.

use serde::Serialize;

use crate::cache::Entry;

// == Stat ==
/// Point-in-time view of a store's contents and budget usage.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Stat {
    /// Number of entries currently held
    pub count: usize,
    /// Keys in insertion order
    pub keys: Vec<String>,
    /// Estimated size of the whole entry collection in bytes
    pub size: usize,
    /// Configured budget in bytes, 0 = unbounded
    pub max_size: usize,
    /// size / max_size * 100, None when unbounded
    pub usage: Option<f64>,
    pub values: Vec<Entry>,
}

impl Stat {
    // == Constructor ==
    pub fn new(entries: Vec<Entry>, size: usize, max_size: usize) -> Self {
        Self {
            count: entries.len(),
            keys: entries.iter().map(|entry| entry.key.clone()).collect(),
            size,
            max_size,
            usage: usage_percent(size, max_size),
            values: entries,
        }
    }

    // == JSON ==
    /// Renders the snapshot as pretty-printed JSON.
    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }
}

/// Budget usage in percent, or None for an unbounded store.
pub fn usage_percent(size: usize, max_size: usize) -> Option<f64> {
    if max_size == 0 {
        None
    } else {
        Some(size as f64 / max_size as f64 * 100.0)
    }
}
