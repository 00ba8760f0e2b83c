//! Cache Store Module
//!
//! Main cache engine: an ordered entry collection with TTL-aware lookups,
//! byte-budget admission control and expiration sweep passes.
//!
//! The store itself is not synchronized; callers hold it behind a single
//! lock (see [`crate::MemCache`]).

use std::collections::HashSet;
use std::time::Duration;

use chrono::Utc;
use rand::Rng;
use tracing::debug;

use crate::cache::size::try_estimate;
use crate::cache::{CacheValue, Entry, Producer, SharedValue, Stat};
use crate::error::{CacheError, Result};

/// Redraw limit per sampled slot before a sweep gives up filling its batch.
const MAX_DRAWS_PER_SLOT: usize = 32;

// == Lookup ==
/// Outcome of a resolve-side lookup.
pub enum Lookup {
    /// Present and unexpired
    Fresh(SharedValue),
    /// Present but expired and not yet swept; carries the original producer
    Stale(Option<Producer>),
    Missing,
}

// == Cache Store ==
/// Entry storage with admission control against a byte budget.
#[derive(Debug, Default)]
pub struct Store {
    /// Entries in insertion order
    entries: Vec<Entry>,
    /// Budget in bytes, 0 = unbounded
    max_bytes: usize,
}

impl Store {
    // == Constructor ==
    /// Creates an empty store. A `max_bytes` of 0 disables admission control.
    pub fn new(max_bytes: usize) -> Self {
        Self {
            entries: Vec::new(),
            max_bytes,
        }
    }

    // == Set ==
    /// Stores `value` under `key`, replacing any existing entry.
    ///
    /// Returns [`CacheError::OverBudget`] without touching the store when the
    /// entry does not fit in the budget.
    pub fn set<T: CacheValue>(
        &mut self,
        key: impl Into<String>,
        ttl: Duration,
        value: T,
    ) -> Result<()> {
        let entry = Entry::new(key, ttl, value)?;
        self.insert(entry)
    }

    // == Insert ==
    /// Admits a prepared entry, replacing any entry with the same key.
    ///
    /// The budget check measures the whole current collection (minus the
    /// entry being replaced) plus the new entry. On rejection the replaced
    /// entry is put back at its original position.
    pub fn insert(&mut self, entry: Entry) -> Result<()> {
        let position = self.position(&entry.key);
        let replaced = position.map(|index| (index, self.entries.remove(index)));

        if let Err(err) = self.admit(&entry) {
            if let Some((index, previous)) = replaced {
                self.entries.insert(index, previous);
            }
            debug!(key = %entry.key, error = %err, "entry rejected");
            return Err(err);
        }

        self.entries.push(entry);
        Ok(())
    }

    fn admit(&self, entry: &Entry) -> Result<()> {
        if self.max_bytes == 0 {
            return Ok(());
        }

        let entry_size = try_estimate(entry)?;
        let current = try_estimate(&self.entries)?;
        if entry_size + current >= self.max_bytes {
            return Err(CacheError::OverBudget {
                max_bytes: self.max_bytes,
                current,
                entry: entry_size,
            });
        }
        Ok(())
    }

    fn position(&self, key: &str) -> Option<usize> {
        self.entries.iter().position(|entry| entry.key == key)
    }

    /// Finds an entry, removing it if it has expired.
    fn live(&mut self, key: &str) -> Option<&Entry> {
        let index = self.position(key)?;
        if self.entries[index].is_expired() {
            self.entries.remove(index);
            return None;
        }
        self.entries.get(index)
    }

    // == Get ==
    /// Returns the value for `key` if present and unexpired.
    ///
    /// An expired entry is deleted as a side effect.
    pub fn get(&mut self, key: &str) -> Option<SharedValue> {
        self.live(key).map(|entry| entry.value.clone())
    }

    // == Value ==
    /// Like [`Store::get`], but returns a snapshot of the whole entry.
    pub fn value(&mut self, key: &str) -> Option<Entry> {
        self.live(key).cloned()
    }

    // == Exists ==
    pub fn exists(&mut self, key: &str) -> bool {
        self.live(key).is_some()
    }

    // == Lookup ==
    /// Resolve-side lookup. Expired entries stay in place for the sweeper.
    pub fn lookup(&self, key: &str) -> Lookup {
        match self.entries.iter().find(|entry| entry.key == key) {
            Some(entry) if entry.is_expired() => Lookup::Stale(entry.producer.clone()),
            Some(entry) => Lookup::Fresh(entry.value.clone()),
            None => Lookup::Missing,
        }
    }

    // == Delete ==
    /// Removes the entry for `key`. Returns false if there was none.
    pub fn delete(&mut self, key: &str) -> bool {
        match self.position(key) {
            Some(index) => {
                self.entries.remove(index);
                true
            }
            None => false,
        }
    }

    // == Clear ==
    pub fn clear(&mut self) {
        self.entries = Vec::new();
    }

    // == Enumeration ==
    pub fn keys(&self) -> Vec<String> {
        self.entries.iter().map(|entry| entry.key.clone()).collect()
    }

    pub fn values(&self) -> Vec<Entry> {
        self.entries.clone()
    }

    pub fn count(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Estimated size of the entire entry collection, recomputed per call.
    pub fn size(&self) -> Result<usize> {
        try_estimate(&self.entries)
    }

    pub fn max_size(&self) -> usize {
        self.max_bytes
    }

    // == Stat ==
    pub fn stat(&self) -> Result<Stat> {
        Ok(Stat::new(self.values(), self.size()?, self.max_bytes))
    }

    // == Sweep ==
    /// Removes expired entries and returns how many were deleted.
    ///
    /// Stores holding at most `batch` entries are scanned fully. Larger
    /// stores are sampled: up to `batch` distinct indices are drawn, the keys
    /// at those indices captured, and expired ones deleted by key. A batch of
    /// 0 is treated as 1.
    pub fn sweep<R: Rng>(&mut self, batch: usize, rng: &mut R) -> usize {
        let batch = batch.max(1);
        let now = Utc::now();

        if self.entries.len() <= batch {
            let before = self.entries.len();
            self.entries.retain(|entry| !entry.is_expired_at(now));
            return before - self.entries.len();
        }

        let expired: Vec<String> = sample_indices(self.entries.len(), batch, rng)
            .into_iter()
            .map(|index| &self.entries[index])
            .filter(|entry| entry.is_expired_at(now))
            .map(|entry| entry.key.clone())
            .collect();

        expired.iter().filter(|key| self.delete(key)).count()
    }
}

/// Draws up to `batch` distinct indices in `0..len` by rejection sampling.
///
/// Redraws on collision are bounded, so an adversarial `batch` close to
/// `len` yields a short batch instead of spinning.
pub fn sample_indices<R: Rng>(len: usize, batch: usize, rng: &mut R) -> Vec<usize> {
    let target = batch.min(len);
    let mut chosen = HashSet::with_capacity(target);
    let mut indices = Vec::with_capacity(target);
    let mut draws = 0;

    while indices.len() < target && draws < target * MAX_DRAWS_PER_SLOT {
        draws += 1;
        let index = rng.gen_range(0..len);
        if chosen.insert(index) {
            indices.push(index);
        }
    }
    indices
}
