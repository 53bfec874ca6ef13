//! Durable key-value cache for data persistence and offline support.
//!
//! This module provides a generic caching mechanism that:
//! - Stores any JSON-serializable value under a namespaced key
//! - Expires entries by absolute time, keeping them around for stale reads
//! - Evicts by priority, then age, when the cache exceeds its limits
//! - Provides read-through fetching with offline fallback

mod entry;
mod layer;
mod traits;

pub use entry::{CacheEntry, CachePolicy, DEFAULT_PRIORITY};
pub use layer::{Cache, CacheStats};
pub use traits::{CacheResult, CacheSource, Cached};
