//! Core types returned by cache reads.

use chrono::{DateTime, Utc};

/// A value read with stale entries allowed, plus its bookkeeping.
#[derive(Debug, Clone)]
pub struct Cached<T> {
  /// The cached value
  pub value: T,
  /// When the entry was written
  pub written_at: DateTime<Utc>,
  /// When the entry stops being fresh
  pub expires_at: DateTime<Utc>,
  /// Eviction priority the entry was written with
  pub priority: i32,
  /// Whether `expires_at` has passed
  pub expired: bool,
}

/// Result from a read-through fetch, including data and metadata about the source.
#[derive(Debug, Clone)]
pub struct CacheResult<T> {
  /// The actual data
  pub data: T,
  /// Where the data came from
  pub source: CacheSource,
  /// When the data was cached (if from cache)
  pub cached_at: Option<DateTime<Utc>>,
}

impl<T> CacheResult<T> {
  /// Create a new cache result from fresh network data.
  pub fn from_network(data: T) -> Self {
    Self {
      data,
      source: CacheSource::Network,
      cached_at: None,
    }
  }

  /// Create a new cache result from a fresh cache entry.
  pub fn from_cache(data: T, cached_at: DateTime<Utc>) -> Self {
    Self {
      data,
      source: CacheSource::CacheFresh,
      cached_at: Some(cached_at),
    }
  }

  /// Create a new cache result for offline mode.
  pub fn offline(data: T, cached_at: DateTime<Utc>) -> Self {
    Self {
      data,
      source: CacheSource::Offline,
      cached_at: Some(cached_at),
    }
  }

  /// True when the data was served without reaching the network.
  pub fn is_offline(&self) -> bool {
    self.source == CacheSource::Offline
  }
}

/// Indicates where cached data came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheSource {
  /// Fresh data from network
  Network,
  /// Data from cache, still considered fresh
  CacheFresh,
  /// Offline mode - network unavailable, serving an expired entry
  Offline,
}
