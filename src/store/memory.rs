//! In-memory storage implementation.

use color_eyre::{eyre::eyre, Result};
use std::collections::BTreeMap;
use std::sync::Mutex;

use super::KvStore;

/// Storage that keeps everything in process memory.
/// Used in tests and when no data directory is available.
#[derive(Default)]
pub struct MemoryStore {
  entries: Mutex<BTreeMap<String, String>>,
}

impl MemoryStore {
  pub fn new() -> Self {
    Self::default()
  }
}

impl KvStore for MemoryStore {
  fn get(&self, key: &str) -> Result<Option<String>> {
    let entries = self
      .entries
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;
    Ok(entries.get(key).cloned())
  }

  fn set(&self, key: &str, value: &str) -> Result<()> {
    let mut entries = self
      .entries
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;
    entries.insert(key.to_string(), value.to_string());
    Ok(())
  }

  fn remove(&self, key: &str) -> Result<()> {
    let mut entries = self
      .entries
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;
    entries.remove(key);
    Ok(())
  }

  fn get_all_keys(&self) -> Result<Vec<String>> {
    let entries = self
      .entries
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;
    Ok(entries.keys().cloned().collect())
  }
}

/// Memory store whose reads and writes can be switched to fail.
#[cfg(test)]
#[derive(Default)]
pub(crate) struct FlakyStore {
  inner: MemoryStore,
  fail_reads: std::sync::atomic::AtomicBool,
  fail_writes: std::sync::atomic::AtomicBool,
}

#[cfg(test)]
impl FlakyStore {
  pub fn fail_reads(&self, fail: bool) {
    self
      .fail_reads
      .store(fail, std::sync::atomic::Ordering::SeqCst);
  }

  pub fn fail_writes(&self, fail: bool) {
    self
      .fail_writes
      .store(fail, std::sync::atomic::Ordering::SeqCst);
  }

  fn reads_fail(&self) -> bool {
    self.fail_reads.load(std::sync::atomic::Ordering::SeqCst)
  }

  fn writes_fail(&self) -> bool {
    self.fail_writes.load(std::sync::atomic::Ordering::SeqCst)
  }
}

#[cfg(test)]
impl KvStore for FlakyStore {
  fn get(&self, key: &str) -> Result<Option<String>> {
    if self.reads_fail() {
      return Err(eyre!("disk read error"));
    }
    self.inner.get(key)
  }

  fn set(&self, key: &str, value: &str) -> Result<()> {
    if self.writes_fail() {
      return Err(eyre!("disk full"));
    }
    self.inner.set(key, value)
  }

  fn remove(&self, key: &str) -> Result<()> {
    if self.writes_fail() {
      return Err(eyre!("disk full"));
    }
    self.inner.remove(key)
  }

  fn get_all_keys(&self) -> Result<Vec<String>> {
    if self.reads_fail() {
      return Err(eyre!("disk read error"));
    }
    self.inner.get_all_keys()
  }
}
