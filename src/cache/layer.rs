//! Cache with expiry and priority-based eviction over a key-value store.

use chrono::Duration;
use color_eyre::{eyre::eyre, Result};
use serde::{de::DeserializeOwned, Serialize};
use std::future::Future;
use std::sync::Arc;
use tracing::{debug, info, warn};

use super::entry::{CacheEntry, CachePolicy, Candidate};
use super::traits::{CacheResult, Cached};
use crate::clock::{Clock, SystemClock};
use crate::store::{keys_with_prefix, KvStore};

/// Storage namespace owned by the cache.
const CACHE_PREFIX: &str = "cache:";

/// Summary of what the cache currently holds.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheStats {
  pub entries: usize,
  pub expired: usize,
  pub corrupt: usize,
  pub bytes: usize,
}

/// Durable cache with TTL and priority eviction.
///
/// Entries are serialized as JSON under `cache:<key>`. Expired entries are
/// misses for [`Cache::get_item`] but stay on disk until eviction needs the
/// space, so [`Cache::get_stale_allowed`] can still serve them when the
/// network is gone.
pub struct Cache<S: KvStore + ?Sized> {
  store: Arc<S>,
  clock: Arc<dyn Clock>,
  policy: CachePolicy,
}

impl<S: KvStore + ?Sized> Cache<S> {
  /// Create a new cache over the given storage backend.
  pub fn new(store: Arc<S>) -> Self {
    Self {
      store,
      clock: Arc::new(SystemClock),
      policy: CachePolicy::unbounded(),
    }
  }

  /// Set the time source.
  pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
    self.clock = clock;
    self
  }

  /// Set the limits that trigger eviction.
  pub fn with_policy(mut self, policy: CachePolicy) -> Self {
    self.policy = policy;
    self
  }

  fn store_key(key: &str) -> String {
    format!("{}{}", CACHE_PREFIX, key)
  }

  /// Read and decode the stored entry. Every failure is a miss.
  fn read_entry(&self, key: &str) -> Option<CacheEntry> {
    let raw = match self.store.get(&Self::store_key(key)) {
      Ok(Some(raw)) => raw,
      Ok(None) => return None,
      Err(e) => {
        warn!(key, error = %e, "Cache read failed, treating as miss");
        return None;
      }
    };

    match serde_json::from_str::<CacheEntry>(&raw) {
      Ok(entry) => Some(entry),
      Err(e) => {
        warn!(key, error = %e, "Corrupt cache entry, treating as miss");
        None
      }
    }
  }

  fn decode_value<T: DeserializeOwned>(key: &str, value: serde_json::Value) -> Option<T> {
    serde_json::from_value(value)
      .map_err(|e| warn!(key, error = %e, "Cached value has unexpected shape, treating as miss"))
      .ok()
  }

  /// Get a value if present and not expired.
  pub fn get_item<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
    let entry = self.read_entry(key)?;
    if !entry.is_fresh(self.clock.now()) {
      debug!(key, expires_at = %entry.expires_at, "Cache entry expired");
      return None;
    }
    Self::decode_value(key, entry.value)
  }

  /// Get a value even if it has expired.
  ///
  /// Meant for fallbacks after a network call has failed entirely.
  pub fn get_stale_allowed<T: DeserializeOwned>(&self, key: &str) -> Option<Cached<T>> {
    let entry = self.read_entry(key)?;
    let expired = !entry.is_fresh(self.clock.now());
    let value = Self::decode_value(key, entry.value)?;

    Some(Cached {
      value,
      written_at: entry.written_at,
      expires_at: entry.expires_at,
      priority: entry.priority,
      expired,
    })
  }

  /// Store a value for `ttl_days` days.
  pub fn set_item<T: Serialize + ?Sized>(
    &self,
    key: &str,
    value: &T,
    ttl_days: u32,
    priority: i32,
  ) -> Result<()> {
    self.set_item_for(key, value, Duration::days(i64::from(ttl_days)), priority)
  }

  /// Store a value with an arbitrary time-to-live.
  ///
  /// Overwrites any previous entry for `key`. Evicts other entries first if
  /// the write would put the cache over its limits; fails if it cannot fit.
  pub fn set_item_for<T: Serialize + ?Sized>(
    &self,
    key: &str,
    value: &T,
    ttl: Duration,
    priority: i32,
  ) -> Result<()> {
    let now = self.clock.now();
    let expires_at = now
      .checked_add_signed(ttl)
      .ok_or_else(|| eyre!("Failed to compute expiry for {}: TTL out of range", key))?;
    let entry = CacheEntry {
      key: key.to_string(),
      value: serde_json::to_value(value)
        .map_err(|e| eyre!("Failed to serialize cache value for {}: {}", key, e))?,
      expires_at,
      priority,
      written_at: now,
    };
    let raw = serde_json::to_string(&entry)
      .map_err(|e| eyre!("Failed to serialize cache entry for {}: {}", key, e))?;

    let store_key = Self::store_key(key);
    self.make_room(&store_key, raw.len())?;
    self.store.set(&store_key, &raw)
  }

  /// Remove a single entry.
  pub fn remove(&self, key: &str) -> Result<()> {
    self.store.remove(&Self::store_key(key))
  }

  /// Remove every cache entry. Other namespaces in the store are untouched.
  pub fn clear(&self) -> Result<usize> {
    let keys = keys_with_prefix(self.store.as_ref(), CACHE_PREFIX)?;
    for key in &keys {
      self.store.remove(key)?;
    }
    Ok(keys.len())
  }

  /// Count entries, expired entries and bytes.
  pub fn stats(&self) -> Result<CacheStats> {
    let now = self.clock.now();
    let mut stats = CacheStats::default();

    for key in keys_with_prefix(self.store.as_ref(), CACHE_PREFIX)? {
      let Some(raw) = self.store.get(&key)? else {
        continue;
      };
      stats.entries += 1;
      stats.bytes += raw.len();
      match serde_json::from_str::<CacheEntry>(&raw) {
        Ok(entry) if !entry.is_fresh(now) => stats.expired += 1,
        Ok(_) => {}
        Err(_) => stats.corrupt += 1,
      }
    }

    Ok(stats)
  }

  /// Run an eviction pass against the current contents.
  ///
  /// Returns the keys that were removed.
  pub fn sweep(&self) -> Result<Vec<String>> {
    if self.policy == CachePolicy::unbounded() {
      return Ok(Vec::new());
    }
    let candidates = self.candidates(None)?;
    let (evicted, _) = self.evict(candidates, 0)?;
    Ok(evicted)
  }

  /// Collect eviction candidates, skipping `exclude`.
  fn candidates(&self, exclude: Option<&str>) -> Result<Vec<Candidate>> {
    let mut candidates = Vec::new();

    for store_key in keys_with_prefix(self.store.as_ref(), CACHE_PREFIX)? {
      if Some(store_key.as_str()) == exclude {
        continue;
      }
      let Some(raw) = self.store.get(&store_key)? else {
        continue;
      };
      let rank = serde_json::from_str::<CacheEntry>(&raw)
        .ok()
        .map(|entry| (entry.priority, entry.written_at));
      candidates.push(Candidate {
        store_key,
        bytes: raw.len(),
        rank,
      });
    }

    Ok(candidates)
  }

  /// Make room for `incoming` bytes written under `store_key`.
  fn make_room(&self, store_key: &str, incoming: usize) -> Result<()> {
    if self.policy == CachePolicy::unbounded() {
      return Ok(());
    }

    let candidates = self.candidates(Some(store_key))?;
    let (_, still_over) = self.evict(candidates, incoming)?;
    if still_over {
      return Err(eyre!(
        "Cache full: {} does not fit within the cache limits",
        display_key(store_key)
      ));
    }

    Ok(())
  }

  /// Remove candidates lowest-rank first until the cache, plus `incoming`
  /// bytes of a new entry, is back within the policy.
  fn evict(&self, mut candidates: Vec<Candidate>, incoming: usize) -> Result<(Vec<String>, bool)> {
    let new_entry = usize::from(incoming > 0);
    let mut entries = candidates.len() + new_entry;
    let mut bytes = candidates.iter().map(|c| c.bytes).sum::<usize>() + incoming;

    if !self.policy.is_over(entries, bytes) {
      return Ok((Vec::new(), false));
    }

    candidates.sort_by(Candidate::eviction_order);

    let mut evicted = Vec::new();
    for candidate in candidates {
      if !self.policy.is_over(entries, bytes) {
        break;
      }
      self.store.remove(&candidate.store_key)?;
      entries -= 1;
      bytes -= candidate.bytes;
      evicted.push(display_key(&candidate.store_key).to_string());
    }

    if !evicted.is_empty() {
      info!(count = evicted.len(), "Evicted cache entries under storage pressure");
      debug!(keys = ?evicted, "Evicted keys");
    }

    Ok((evicted, self.policy.is_over(entries, bytes)))
  }

  /// Read-through fetch.
  ///
  /// 1. Fresh cache entry - return immediately
  /// 2. Otherwise fetch from network and store the result
  /// 3. On network failure, return the expired entry (offline mode)
  /// 4. With nothing cached, the network error is returned
  ///
  /// A failed cache write after a successful fetch is logged, not returned:
  /// the caller asked for data, not for durability.
  pub async fn fetch<T, F, Fut>(
    &self,
    key: &str,
    ttl: Duration,
    priority: i32,
    fetcher: F,
  ) -> Result<CacheResult<T>>
  where
    T: Serialize + DeserializeOwned,
    F: FnOnce() -> Fut,
    Fut: Future<Output = Result<T>>,
  {
    let stale = match self.get_stale_allowed::<T>(key) {
      Some(cached) if !cached.expired => {
        return Ok(CacheResult::from_cache(cached.value, cached.written_at));
      }
      other => other,
    };

    match fetcher().await {
      Ok(data) => {
        if let Err(e) = self.set_item_for(key, &data, ttl, priority) {
          warn!(key, error = %e, "Failed to cache fetched data");
        }
        Ok(CacheResult::from_network(data))
      }
      Err(e) => match stale {
        Some(cached) => {
          warn!(key, error = %e, "Fetch failed, serving expired cache entry");
          Ok(CacheResult::offline(cached.value, cached.written_at))
        }
        None => Err(e),
      },
    }
  }
}

/// Strip the cache namespace from a store key.
fn display_key(store_key: &str) -> &str {
  store_key.strip_prefix(CACHE_PREFIX).unwrap_or(store_key)
}

impl<S: KvStore + ?Sized> Clone for Cache<S> {
  fn clone(&self) -> Self {
    Self {
      store: Arc::clone(&self.store),
      clock: Arc::clone(&self.clock),
      policy: self.policy,
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::clock::ManualClock;
  use crate::store::{FlakyStore, MemoryStore};
  use chrono::{DateTime, TimeZone, Utc};

  fn start() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 3, 1, 8, 0, 0).unwrap()
  }

  fn cache_with_clock() -> (Cache<MemoryStore>, Arc<ManualClock>) {
    let clock = Arc::new(ManualClock::new(start()));
    let cache = Cache::new(Arc::new(MemoryStore::new())).with_clock(clock.clone());
    (cache, clock)
  }

  #[test]
  fn test_ttl_boundary() {
    let (cache, clock) = cache_with_clock();

    cache.set_item("recipes:top", &vec!["v60"], 1, 0).unwrap();
    clock.advance(Duration::days(1) - Duration::seconds(1));
    assert_eq!(cache.get_item::<Vec<String>>("recipes:top"), Some(vec!["v60".to_string()]));

    clock.advance(Duration::seconds(1));
    assert_eq!(cache.get_item::<Vec<String>>("recipes:top"), None);
  }

  #[test]
  fn test_zero_ttl_is_immediately_stale() {
    let (cache, _clock) = cache_with_clock();

    cache.set_item("k", "v", 0, 0).unwrap();
    assert_eq!(cache.get_item::<String>("k"), None);

    let stale = cache.get_stale_allowed::<String>("k").unwrap();
    assert!(stale.expired);
    assert_eq!(stale.value, "v");
  }

  #[test]
  fn test_out_of_range_ttl_is_an_error() {
    let (cache, _clock) = cache_with_clock();

    assert!(cache.set_item("k", "v", u32::MAX, 0).is_err());
    assert!(cache.set_item_for("k", "v", Duration::weeks(1_000_000_000), 0).is_err());
    assert_eq!(cache.get_stale_allowed::<String>("k").map(|c| c.value), None);
  }

  #[test]
  fn test_overwrite_last_writer_wins() {
    let (cache, _clock) = cache_with_clock();

    cache.set_item("k", "v1", 1, 0).unwrap();
    cache.set_item("k", "v2", 1, 9).unwrap();

    assert_eq!(cache.get_item::<String>("k").as_deref(), Some("v2"));
    assert_eq!(cache.get_stale_allowed::<String>("k").unwrap().priority, 9);
  }

  #[test]
  fn test_missing_and_corrupt_entries_are_misses() {
    let store = Arc::new(MemoryStore::new());
    let cache = Cache::new(store.clone());

    assert_eq!(cache.get_item::<String>("absent"), None);

    store.set("cache:broken", "{not json").unwrap();
    assert_eq!(cache.get_item::<String>("broken"), None);
    assert!(cache.get_stale_allowed::<String>("broken").is_none());

    // Valid entry, wrong value type for the caller
    cache.set_item("number", &42, 1, 0).unwrap();
    assert_eq!(cache.get_item::<Vec<String>>("number"), None);
  }

  #[test]
  fn test_read_failure_is_miss_write_failure_propagates() {
    let store = Arc::new(FlakyStore::default());
    let cache = Cache::new(store.clone());

    cache.set_item("k", "v", 1, 0).unwrap();

    store.fail_reads(true);
    assert_eq!(cache.get_item::<String>("k"), None);

    store.fail_reads(false);
    store.fail_writes(true);
    assert!(cache.set_item("k", "v2", 1, 0).is_err());

    store.fail_writes(false);
    assert_eq!(cache.get_item::<String>("k").as_deref(), Some("v"));
  }

  #[test]
  fn test_eviction_prefers_low_priority_regardless_of_write_order() {
    let (cache, clock) = cache_with_clock();
    let cache = cache.with_policy(CachePolicy {
      max_entries: Some(2),
      max_bytes: None,
    });

    cache.set_item("B", "b", 1, 5).unwrap();
    clock.advance(Duration::minutes(1));
    cache.set_item("A", "a", 1, 1).unwrap();
    clock.advance(Duration::minutes(1));
    cache.set_item("C", "c", 1, 3).unwrap();

    assert_eq!(cache.get_item::<String>("A"), None);
    assert_eq!(cache.get_item::<String>("B").as_deref(), Some("b"));
    assert_eq!(cache.get_item::<String>("C").as_deref(), Some("c"));
  }

  #[test]
  fn test_equal_priority_evicts_oldest_write() {
    let (cache, clock) = cache_with_clock();
    let cache = cache.with_policy(CachePolicy {
      max_entries: Some(2),
      max_bytes: None,
    });

    cache.set_item("first", &1, 1, 0).unwrap();
    clock.advance(Duration::seconds(5));
    cache.set_item("second", &2, 1, 0).unwrap();
    clock.advance(Duration::seconds(5));
    cache.set_item("third", &3, 1, 0).unwrap();

    assert_eq!(cache.get_item::<i32>("first"), None);
    assert_eq!(cache.get_item::<i32>("second"), Some(2));
  }

  #[test]
  fn test_overwrite_does_not_evict_under_entry_limit() {
    let (cache, _clock) = cache_with_clock();
    let cache = cache.with_policy(CachePolicy {
      max_entries: Some(1),
      max_bytes: None,
    });

    cache.set_item("only", &1, 1, 0).unwrap();
    cache.set_item("only", &2, 1, 0).unwrap();
    assert_eq!(cache.get_item::<i32>("only"), Some(2));
  }

  #[test]
  fn test_entry_larger_than_budget_fails() {
    let (cache, _clock) = cache_with_clock();
    let cache = cache.with_policy(CachePolicy {
      max_entries: None,
      max_bytes: Some(64),
    });

    let huge = "x".repeat(1000);
    let err = cache.set_item("huge", &huge, 1, 0).unwrap_err();
    assert!(err.to_string().contains("Cache full"));
    assert_eq!(cache.get_item::<String>("huge"), None);
  }

  #[test]
  fn test_sweep_and_clear_stay_in_namespace() {
    let store = Arc::new(MemoryStore::new());
    store.set("mutation_queue:00000000000000000001", "{}").unwrap();

    let cache = Cache::new(store.clone());
    cache.set_item("a", "1", 1, 0).unwrap();
    cache.set_item("b", "2", 1, 0).unwrap();

    let cache = cache.with_policy(CachePolicy {
      max_entries: Some(1),
      max_bytes: None,
    });
    assert_eq!(cache.sweep().unwrap(), vec!["a".to_string()]);

    assert_eq!(cache.clear().unwrap(), 1);
    assert_eq!(store.get_all_keys().unwrap(), vec!["mutation_queue:00000000000000000001"]);
  }

  #[test]
  fn test_stats() {
    let (cache, _clock) = cache_with_clock();
    cache.set_item("fresh", "x", 1, 0).unwrap();
    cache.set_item("stale", "y", 0, 0).unwrap();

    let stats = cache.stats().unwrap();
    assert_eq!(stats.entries, 2);
    assert_eq!(stats.expired, 1);
    assert_eq!(stats.corrupt, 0);
    assert!(stats.bytes > 0);
  }

  #[tokio::test]
  async fn test_fetch_fresh_network_offline() {
    let (cache, clock) = cache_with_clock();

    // Nothing cached: network
    let result = cache
      .fetch("recipes:top", Duration::hours(1), 0, || async { Ok(vec![1, 2]) })
      .await
      .unwrap();
    assert_eq!(result.source, crate::cache::CacheSource::Network);

    // Fresh: fetcher must not run
    let result = cache
      .fetch("recipes:top", Duration::hours(1), 0, || async {
        Err::<Vec<i32>, _>(eyre!("should not be called"))
      })
      .await
      .unwrap();
    assert_eq!(result.source, crate::cache::CacheSource::CacheFresh);
    assert_eq!(result.data, vec![1, 2]);

    // Expired and network down: offline
    clock.advance(Duration::hours(2));
    let result = cache
      .fetch("recipes:top", Duration::hours(1), 0, || async {
        Err::<Vec<i32>, _>(eyre!("offline"))
      })
      .await
      .unwrap();
    assert!(result.is_offline());
    assert_eq!(result.data, vec![1, 2]);
  }

  #[tokio::test]
  async fn test_fetch_without_cache_propagates_network_error() {
    let (cache, _clock) = cache_with_clock();
    let result = cache
      .fetch("k", Duration::hours(1), 0, || async { Err::<i32, _>(eyre!("offline")) })
      .await;
    assert!(result.is_err());
  }
}
