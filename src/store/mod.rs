//! Persistent key-value storage used by the cache and the mutation queue.
//!
//! Both consumers are built on four string primitives only, so any backend
//! that can get, set, remove and list keys can carry offline state.

mod memory;
mod sqlite;

use color_eyre::Result;
use std::sync::Arc;

pub use memory::MemoryStore;
pub use sqlite::SqliteStore;

#[cfg(test)]
pub(crate) use memory::FlakyStore;

/// Trait for storage backends.
///
/// Every call returns only after the backend has applied it, so a write that
/// returned `Ok` survives a crash immediately afterwards.
pub trait KvStore: Send + Sync {
  /// Read the raw value stored under `key`.
  fn get(&self, key: &str) -> Result<Option<String>>;

  /// Store `value` under `key`, replacing any previous value.
  fn set(&self, key: &str, value: &str) -> Result<()>;

  /// Remove `key`. Removing a missing key is not an error.
  fn remove(&self, key: &str) -> Result<()>;

  /// List every key currently stored.
  fn get_all_keys(&self) -> Result<Vec<String>>;
}

impl<S: KvStore + ?Sized> KvStore for Arc<S> {
  fn get(&self, key: &str) -> Result<Option<String>> {
    (**self).get(key)
  }

  fn set(&self, key: &str, value: &str) -> Result<()> {
    (**self).set(key, value)
  }

  fn remove(&self, key: &str) -> Result<()> {
    (**self).remove(key)
  }

  fn get_all_keys(&self) -> Result<Vec<String>> {
    (**self).get_all_keys()
  }
}

/// List the keys under `prefix`, sorted.
pub(crate) fn keys_with_prefix<S: KvStore + ?Sized>(store: &S, prefix: &str) -> Result<Vec<String>> {
  let mut keys: Vec<String> = store
    .get_all_keys()?
    .into_iter()
    .filter(|k| k.starts_with(prefix))
    .collect();
  keys.sort();
  Ok(keys)
}
