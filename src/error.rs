//! Error types for the cache
//!
//! Provides unified error handling using thiserror.

use std::fmt;

use thiserror::Error;

// == Cache Error Enum ==
/// Unified error type for the cache.
#[derive(Error, Debug)]
pub enum CacheError {
    /// Admitting the entry would push the estimated total to or past the budget
    #[error("max size exceeded, max size: {max_bytes}, current size: {current}, entry size: {entry}")]
    OverBudget {
        max_bytes: usize,
        current: usize,
        entry: usize,
    },

    /// The size estimator met a value it cannot measure
    #[error("size estimation failed: {0}")]
    EstimationFailure(String),

    /// A resolve producer returned an error
    #[error("producer failed: {0}")]
    Producer(#[source] anyhow::Error),

    /// The package-level cache has not been initialized or was closed
    #[error("cache is not running")]
    NotRunning,
}

// == Result Type Alias ==
/// Convenience Result type for the cache.
pub type Result<T> = std::result::Result<T, CacheError>;

// == Resolve Error ==
/// Error returned by resolve.
///
/// `NotCached` means the producer succeeded but the value could not be
/// admitted; the computed value is still handed back to the caller.
pub enum ResolveError<T> {
    NotCached { value: T, source: CacheError },
    Failed(CacheError),
}

impl<T> ResolveError<T> {
    /// Returns the computed value if the producer ran successfully.
    pub fn into_value(self) -> Option<T> {
        match self {
            ResolveError::NotCached { value, .. } => Some(value),
            ResolveError::Failed(_) => None,
        }
    }

    /// Returns the underlying cache error.
    pub fn cache_error(&self) -> &CacheError {
        match self {
            ResolveError::NotCached { source, .. } => source,
            ResolveError::Failed(err) => err,
        }
    }

    pub fn is_over_budget(&self) -> bool {
        matches!(self.cache_error(), CacheError::OverBudget { .. })
    }
}

impl<T> From<CacheError> for ResolveError<T> {
    fn from(err: CacheError) -> Self {
        ResolveError::Failed(err)
    }
}

impl<T> fmt::Debug for ResolveError<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ResolveError::NotCached { source, .. } => f
                .debug_struct("NotCached")
                .field("source", source)
                .finish_non_exhaustive(),
            ResolveError::Failed(err) => f.debug_tuple("Failed").field(err).finish(),
        }
    }
}

impl<T> fmt::Display for ResolveError<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ResolveError::NotCached { source, .. } => {
                write!(f, "value computed but not cached: {}", source)
            }
            ResolveError::Failed(err) => write!(f, "{}", err),
        }
    }
}

impl<T> std::error::Error for ResolveError<T> {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        Some(self.cache_error())
    }
}
