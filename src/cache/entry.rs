//! Persisted cache entries and the eviction ranking over them.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;

/// Priority used when the caller has no opinion.
pub const DEFAULT_PRIORITY: i32 = 0;

/// A cache entry as stored in the backend.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheEntry {
  pub key: String,
  pub value: serde_json::Value,
  pub expires_at: DateTime<Utc>,
  #[serde(default)]
  pub priority: i32,
  pub written_at: DateTime<Utc>,
}

impl CacheEntry {
  /// Fresh means strictly before the expiry instant.
  pub fn is_fresh(&self, now: DateTime<Utc>) -> bool {
    now < self.expires_at
  }
}

/// Limits beyond which the cache is under storage pressure.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
pub struct CachePolicy {
  /// Maximum number of cache entries
  pub max_entries: Option<usize>,
  /// Maximum total size of serialized entries, in bytes
  pub max_bytes: Option<usize>,
}

impl CachePolicy {
  pub fn unbounded() -> Self {
    Self::default()
  }

  /// Whether `entries` entries totalling `bytes` bytes exceed the limits.
  pub fn is_over(&self, entries: usize, bytes: usize) -> bool {
    self.max_entries.is_some_and(|max| entries > max) || self.max_bytes.is_some_and(|max| bytes > max)
  }
}

/// An entry considered for eviction.
#[derive(Debug, Clone)]
pub(crate) struct Candidate {
  pub store_key: String,
  pub bytes: usize,
  /// `None` when the stored entry could not be decoded.
  pub rank: Option<(i32, DateTime<Utc>)>,
}

impl Candidate {
  /// Eviction order: undecodable entries first, then lowest priority,
  /// then oldest write. Priority always dominates recency.
  pub fn eviction_order(a: &Candidate, b: &Candidate) -> Ordering {
    match (&a.rank, &b.rank) {
      (None, None) => a.store_key.cmp(&b.store_key),
      (None, Some(_)) => Ordering::Less,
      (Some(_), None) => Ordering::Greater,
      (Some((pa, wa)), Some((pb, wb))) => pa
        .cmp(pb)
        .then_with(|| wa.cmp(wb))
        .then_with(|| a.store_key.cmp(&b.store_key)),
    }
  }
}
