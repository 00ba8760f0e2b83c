//! Background Tasks Module
//!
//! Contains background tasks that run periodically for the lifetime of a cache.
//!
//! # Tasks
//! - Expiration sweep: removes expired entries at a fixed interval

mod sweeper;

pub use sweeper::{spawn_sweeper, sweep_once, Sweeper};
