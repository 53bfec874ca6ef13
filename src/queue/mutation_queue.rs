//! Durable FIFO-per-type queue of writes that could not reach the server.

use color_eyre::{eyre::eyre, Result};
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use super::item::{Mutation, QueueItem, Replay};
use super::replay::{typed_handler, HandlerRegistry, RawHandler};
use crate::clock::{Clock, SystemClock};
use crate::store::{keys_with_prefix, KvStore};

/// Storage namespace owned by the queue.
const QUEUE_PREFIX: &str = "mutation_queue:";

/// What a flush pass did.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FlushReport {
  /// Items whose handler succeeded and which were removed
  pub replayed: usize,
  /// Items whose handler failed this pass
  pub failed: usize,
  /// Items removed after reaching the attempt limit
  pub dropped: Vec<QueueItem>,
  /// Items left alone because no handler is registered for their type
  pub unhandled: usize,
}

/// Result of calling [`MutationQueue::flush`].
#[derive(Debug, Clone, PartialEq)]
pub enum FlushOutcome {
  Completed(FlushReport),
  /// Another flush was running; nothing was replayed
  AlreadyRunning,
}

/// How a single replay ended.
enum ReplayEnd {
  Replayed,
  Failed,
  Dropped(QueueItem),
}

/// Clears the in-progress flag when a flush ends, however it ends.
struct FlushGuard<'a>(&'a AtomicBool);

impl<'a> FlushGuard<'a> {
  fn acquire(flag: &'a AtomicBool) -> Option<Self> {
    flag
      .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
      .ok()
      .map(|_| Self(flag))
  }
}

impl Drop for FlushGuard<'_> {
  fn drop(&mut self) {
    self.0.store(false, Ordering::Release);
  }
}

/// Durable queue of pending mutations.
///
/// Items are stored one per key as `mutation_queue:<seq>:<id>`, with a
/// zero-padded sequence number so key order is enqueue order. The id suffix
/// keeps two writers that picked the same sequence from overwriting each
/// other. An item is only removed after its handler reports success; a
/// failure bumps `attempts` in place.
///
/// Share one instance per store (behind an `Arc`): the flush guard lives on
/// the instance.
pub struct MutationQueue<S: KvStore + ?Sized> {
  store: Arc<S>,
  clock: Arc<dyn Clock>,
  handlers: RwLock<HandlerRegistry>,
  append_lock: Mutex<()>,
  flushing: AtomicBool,
  max_attempts: Option<u32>,
}

impl<S: KvStore + ?Sized> MutationQueue<S> {
  /// Create a new queue over the given storage backend.
  pub fn new(store: Arc<S>) -> Self {
    Self {
      store,
      clock: Arc::new(SystemClock),
      handlers: RwLock::new(HandlerRegistry::default()),
      append_lock: Mutex::new(()),
      flushing: AtomicBool::new(false),
      max_attempts: None,
    }
  }

  /// Set the time source.
  pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
    self.clock = clock;
    self
  }

  /// Drop items after this many failed replays. Unbounded by default.
  pub fn with_max_attempts(mut self, max_attempts: Option<u32>) -> Self {
    self.max_attempts = max_attempts;
    self
  }

  fn item_key(seq: u64, id: &str) -> String {
    format!("{}{:020}:{}", QUEUE_PREFIX, seq, id)
  }

  /// Register the replay handler for `M`.
  ///
  /// Types are flushed in the order their handlers were first registered.
  /// The handler returns `Ok(true)` when the write landed; `Ok(false)` or an
  /// error leaves the item queued for the next flush.
  pub fn register<M, F, Fut>(&self, handler: F) -> Result<()>
  where
    M: Mutation,
    F: Fn(Replay<M>) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<bool>> + Send + 'static,
  {
    let mut handlers = self
      .handlers
      .write()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;
    handlers.insert(M::mutation_type(), typed_handler(handler));
    Ok(())
  }

  /// Types with a registered handler, in flush order.
  pub fn registered_types(&self) -> Vec<String> {
    self
      .handlers
      .read()
      .map(|h| h.types())
      .unwrap_or_default()
  }

  /// Queue a typed mutation.
  pub fn enqueue<M: Mutation>(&self, mutation: &M) -> Result<String> {
    let payload = serde_json::to_value(mutation)
      .map_err(|e| eyre!("Failed to serialize {} payload: {}", M::mutation_type(), e))?;
    self.enqueue_raw(M::mutation_type(), payload)
  }

  /// Queue a typed mutation under an id the caller already used, e.g. for a
  /// live attempt that failed, so the server sees one id for both.
  pub fn enqueue_with_id<M: Mutation>(&self, id: &str, mutation: &M) -> Result<String> {
    let payload = serde_json::to_value(mutation)
      .map_err(|e| eyre!("Failed to serialize {} payload: {}", M::mutation_type(), e))?;
    self.append(id.to_string(), M::mutation_type(), payload)
  }

  /// Queue an already-serialized payload under `mutation_type`.
  ///
  /// Returns the new item's id once it is durably stored. Appends are
  /// serialized on this instance, so concurrent callers never collide.
  pub fn enqueue_raw(&self, mutation_type: &str, payload: serde_json::Value) -> Result<String> {
    self.append(Uuid::new_v4().to_string(), mutation_type, payload)
  }

  fn append(&self, id: String, mutation_type: &str, payload: serde_json::Value) -> Result<String> {
    let _append = self
      .append_lock
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;

    // Rescanned every time: another instance may share the store.
    let seq = self.scan_next_seq()?;

    let item = QueueItem {
      id,
      mutation_type: mutation_type.to_string(),
      payload,
      enqueued_at: self.clock.now(),
      attempts: 0,
    };
    let raw = serde_json::to_string(&item)
      .map_err(|e| eyre!("Failed to serialize queue item: {}", e))?;

    self.store.set(&Self::item_key(seq, &item.id), &raw)?;

    info!(id = %item.id, mutation_type, "Queued mutation for replay");
    Ok(item.id)
  }

  /// First free sequence number, from what is already stored.
  fn scan_next_seq(&self) -> Result<u64> {
    let last = keys_with_prefix(self.store.as_ref(), QUEUE_PREFIX)?
      .iter()
      .filter_map(|k| {
        let rest = k.strip_prefix(QUEUE_PREFIX)?;
        rest.split(':').next()?.parse::<u64>().ok()
      })
      .max();
    Ok(last.map_or(0, |seq| seq + 1))
  }

  /// Stored items in enqueue order, with their keys.
  fn load_items(&self) -> Result<Vec<(String, QueueItem)>> {
    let mut items = Vec::new();

    for key in keys_with_prefix(self.store.as_ref(), QUEUE_PREFIX)? {
      let Some(raw) = self.store.get(&key)? else {
        continue;
      };
      match serde_json::from_str::<QueueItem>(&raw) {
        Ok(item) => items.push((key, item)),
        Err(e) => warn!(key, error = %e, "Skipping unreadable queue item"),
      }
    }

    Ok(items)
  }

  /// Pending items in enqueue order.
  pub fn pending(&self) -> Result<Vec<QueueItem>> {
    Ok(
      self
        .load_items()?
        .into_iter()
        .map(|(_, item)| item)
        .collect(),
    )
  }

  /// Number of pending items.
  pub fn len(&self) -> Result<usize> {
    Ok(keys_with_prefix(self.store.as_ref(), QUEUE_PREFIX)?.len())
  }

  pub fn is_empty(&self) -> Result<bool> {
    Ok(self.len()? == 0)
  }

  /// Whether a flush is running right now.
  pub fn is_flushing(&self) -> bool {
    self.flushing.load(Ordering::Acquire)
  }

  /// Replay pending items.
  ///
  /// For each registered type, in registration order, items are replayed
  /// oldest first. The first failure stops that type for this pass so a
  /// later write is never applied before an earlier one; other types carry
  /// on. A call made while another flush is running does nothing.
  pub async fn flush(&self) -> FlushOutcome {
    let Some(_guard) = FlushGuard::acquire(&self.flushing) else {
      debug!("Flush already in progress, skipping");
      return FlushOutcome::AlreadyRunning;
    };

    let handlers = match self.handlers.read() {
      Ok(handlers) => handlers.clone(),
      Err(e) => {
        error!(error = %e, "Handler registry lock poisoned");
        return FlushOutcome::Completed(FlushReport::default());
      }
    };

    let items = match self.load_items() {
      Ok(items) => items,
      Err(e) => {
        warn!(error = %e, "Failed to read mutation queue, nothing to flush");
        return FlushOutcome::Completed(FlushReport::default());
      }
    };

    let mut report = FlushReport::default();

    for (mutation_type, handler) in handlers.iter() {
      let of_type = items.iter().filter(|(_, item)| &item.mutation_type == mutation_type);

      for (key, item) in of_type {
        match self.replay_one(handler, key, item).await {
          ReplayEnd::Replayed => report.replayed += 1,
          ReplayEnd::Failed => {
            report.failed += 1;
            break;
          }
          ReplayEnd::Dropped(item) => {
            report.dropped.push(item);
            break;
          }
        }
      }
    }

    report.unhandled = items
      .iter()
      .filter(|(_, item)| !handlers.contains(&item.mutation_type))
      .count();
    if report.unhandled > 0 {
      warn!(count = report.unhandled, "Queued mutations have no registered handler");
    }

    if report.replayed > 0 || report.failed > 0 || !report.dropped.is_empty() {
      info!(
        replayed = report.replayed,
        failed = report.failed,
        dropped = report.dropped.len(),
        "Mutation queue flushed"
      );
    }

    FlushOutcome::Completed(report)
  }

  async fn replay_one(&self, handler: &RawHandler, key: &str, item: &QueueItem) -> ReplayEnd {
    let succeeded = match handler(item.clone()).await {
      Ok(true) => true,
      Ok(false) => {
        warn!(id = %item.id, mutation_type = %item.mutation_type, "Replay rejected");
        false
      }
      Err(e) => {
        warn!(id = %item.id, mutation_type = %item.mutation_type, error = %e, "Replay failed");
        false
      }
    };

    if succeeded {
      return match self.store.remove(key) {
        Ok(()) => {
          debug!(id = %item.id, "Replayed mutation removed from queue");
          ReplayEnd::Replayed
        }
        Err(e) => {
          // Left in place: it will be sent again, which handlers tolerate.
          error!(id = %item.id, error = %e, "Failed to remove replayed mutation");
          ReplayEnd::Failed
        }
      };
    }

    let mut updated = item.clone();
    updated.attempts += 1;

    if self.max_attempts.is_some_and(|max| updated.attempts >= max) {
      match self.store.remove(key) {
        Ok(()) => {
          error!(
            id = %updated.id,
            mutation_type = %updated.mutation_type,
            attempts = updated.attempts,
            "Dropping mutation after too many failed replays"
          );
          return ReplayEnd::Dropped(updated);
        }
        Err(e) => error!(id = %updated.id, error = %e, "Failed to drop mutation"),
      }
    }

    let write = serde_json::to_string(&updated)
      .map_err(|e| eyre!("Failed to serialize queue item: {}", e))
      .and_then(|raw| self.store.set(key, &raw));
    if let Err(e) = write {
      error!(id = %updated.id, error = %e, "Failed to record replay attempt");
    }

    ReplayEnd::Failed
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::store::{FlakyStore, MemoryStore};
  use serde::{Deserialize, Serialize};
  use std::sync::atomic::AtomicUsize;
  use tokio::sync::Notify;

  #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
  struct Rate {
    coffee: String,
    stars: u8,
  }

  impl Mutation for Rate {
    fn mutation_type() -> &'static str {
      "coffee:rate"
    }
  }

  #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
  struct Note {
    text: String,
  }

  impl Mutation for Note {
    fn mutation_type() -> &'static str {
      "notes:create"
    }
  }

  fn rate(coffee: &str) -> Rate {
    Rate {
      coffee: coffee.to_string(),
      stars: 4,
    }
  }

  fn completed(outcome: FlushOutcome) -> FlushReport {
    match outcome {
      FlushOutcome::Completed(report) => report,
      FlushOutcome::AlreadyRunning => panic!("flush unexpectedly skipped"),
    }
  }

  /// Registers a `Rate` handler that logs every call and succeeds unless the
  /// coffee name is in `failing`.
  fn record_rates(
    queue: &MutationQueue<MemoryStore>,
    failing: &'static [&'static str],
  ) -> Arc<Mutex<Vec<String>>> {
    let calls = Arc::new(Mutex::new(Vec::new()));
    let log = calls.clone();
    queue
      .register(move |replay: Replay<Rate>| {
        let log = log.clone();
        async move {
          log.lock().unwrap().push(replay.mutation.coffee.clone());
          Ok(!failing.contains(&replay.mutation.coffee.as_str()))
        }
      })
      .unwrap();
    calls
  }

  #[tokio::test]
  async fn test_fifo_per_type() {
    let queue = MutationQueue::new(Arc::new(MemoryStore::new()));
    let calls = record_rates(&queue, &[]);

    queue.enqueue(&rate("p1")).unwrap();
    queue.enqueue(&rate("p2")).unwrap();

    let report = completed(queue.flush().await);
    assert_eq!(report.replayed, 2);
    assert_eq!(*calls.lock().unwrap(), vec!["p1", "p2"]);
    assert!(queue.is_empty().unwrap());
  }

  #[tokio::test]
  async fn test_halt_on_failure_keeps_order_and_counts_attempts() {
    let queue = MutationQueue::new(Arc::new(MemoryStore::new()));
    let calls = record_rates(&queue, &["p1"]);

    queue.enqueue(&rate("p1")).unwrap();
    queue.enqueue(&rate("p2")).unwrap();

    let report = completed(queue.flush().await);
    assert_eq!(report.failed, 1);
    assert_eq!(report.replayed, 0);
    assert_eq!(*calls.lock().unwrap(), vec!["p1"]);

    let pending = queue.pending().unwrap();
    assert_eq!(pending.len(), 2);
    assert_eq!(pending[0].payload["coffee"], "p1");
    assert_eq!(pending[0].attempts, 1);
    assert_eq!(pending[1].payload["coffee"], "p2");
    assert_eq!(pending[1].attempts, 0);
  }

  #[tokio::test]
  async fn test_failure_in_one_type_does_not_block_others() {
    let queue = MutationQueue::new(Arc::new(MemoryStore::new()));
    let _calls = record_rates(&queue, &["bad"]);
    let notes = Arc::new(AtomicUsize::new(0));
    let counter = notes.clone();
    queue
      .register(move |_: Replay<Note>| {
        let counter = counter.clone();
        async move {
          counter.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
          Ok(true)
        }
      })
      .unwrap();

    queue.enqueue(&rate("bad")).unwrap();
    queue
      .enqueue(&Note {
        text: "bloom longer".to_string(),
      })
      .unwrap();

    let report = completed(queue.flush().await);
    assert_eq!(report.failed, 1);
    assert_eq!(report.replayed, 1);
    assert_eq!(notes.load(std::sync::atomic::Ordering::SeqCst), 1);
    assert_eq!(queue.len().unwrap(), 1);
  }

  #[tokio::test]
  async fn test_second_flush_does_not_replay_removed_items() {
    let queue = MutationQueue::new(Arc::new(MemoryStore::new()));
    let calls = record_rates(&queue, &[]);

    queue.enqueue(&rate("p1")).unwrap();
    completed(queue.flush().await);
    let report = completed(queue.flush().await);

    assert_eq!(report.replayed, 0);
    assert_eq!(calls.lock().unwrap().len(), 1);
  }

  #[tokio::test]
  async fn test_handler_error_counts_as_failure() {
    let queue = MutationQueue::new(Arc::new(MemoryStore::new()));
    queue
      .register(|_: Replay<Rate>| async { Err(eyre!("timeout")) })
      .unwrap();

    queue.enqueue(&rate("p1")).unwrap();
    completed(queue.flush().await);
    completed(queue.flush().await);

    assert_eq!(queue.pending().unwrap()[0].attempts, 2);
  }

  #[tokio::test]
  async fn test_undecodable_payload_is_a_failed_replay() {
    let queue = MutationQueue::new(Arc::new(MemoryStore::new()));
    let calls = record_rates(&queue, &[]);

    queue
      .enqueue_raw("coffee:rate", serde_json::json!({ "unexpected": true }))
      .unwrap();
    let report = completed(queue.flush().await);

    assert_eq!(report.failed, 1);
    assert!(calls.lock().unwrap().is_empty());
    assert_eq!(queue.pending().unwrap()[0].attempts, 1);
  }

  #[tokio::test]
  async fn test_max_attempts_drops_item() {
    let queue = MutationQueue::new(Arc::new(MemoryStore::new())).with_max_attempts(Some(2));
    let _calls = record_rates(&queue, &["p1"]);

    queue.enqueue(&rate("p1")).unwrap();
    assert!(completed(queue.flush().await).dropped.is_empty());

    let report = completed(queue.flush().await);
    assert_eq!(report.dropped.len(), 1);
    assert_eq!(report.dropped[0].attempts, 2);
    assert!(queue.is_empty().unwrap());
  }

  #[tokio::test]
  async fn test_unhandled_types_stay_queued() {
    let queue = MutationQueue::new(Arc::new(MemoryStore::new()));
    queue
      .enqueue(&Note {
        text: "later".to_string(),
      })
      .unwrap();

    let report = completed(queue.flush().await);
    assert_eq!(report.unhandled, 1);
    assert_eq!(queue.len().unwrap(), 1);
  }

  #[tokio::test]
  async fn test_concurrent_flush_is_a_noop() {
    let queue = Arc::new(MutationQueue::new(Arc::new(MemoryStore::new())));
    let started = Arc::new(Notify::new());
    let release = Arc::new(Notify::new());
    let calls = Arc::new(AtomicUsize::new(0));

    {
      let started = started.clone();
      let release = release.clone();
      let calls = calls.clone();
      queue
        .register(move |_: Replay<Rate>| {
          let started = started.clone();
          let release = release.clone();
          let calls = calls.clone();
          async move {
            calls.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
            started.notify_one();
            release.notified().await;
            Ok(true)
          }
        })
        .unwrap();
    }

    queue.enqueue(&rate("p1")).unwrap();

    let first = tokio::spawn({
      let queue = queue.clone();
      async move { queue.flush().await }
    });
    started.notified().await;
    assert!(queue.is_flushing());

    assert_eq!(queue.flush().await, FlushOutcome::AlreadyRunning);

    release.notify_one();
    let report = completed(first.await.unwrap());
    assert_eq!(report.replayed, 1);
    assert_eq!(calls.load(std::sync::atomic::Ordering::SeqCst), 1);
    assert!(!queue.is_flushing());
  }

  #[tokio::test]
  async fn test_sequence_continues_after_reopen() {
    let store = Arc::new(MemoryStore::new());

    let first = MutationQueue::new(store.clone());
    first.enqueue(&rate("p1")).unwrap();
    first.enqueue(&rate("p2")).unwrap();
    drop(first);

    let reopened = MutationQueue::new(store.clone());
    let calls = record_rates(&reopened, &[]);
    reopened.enqueue(&rate("p3")).unwrap();

    completed(reopened.flush().await);
    assert_eq!(*calls.lock().unwrap(), vec!["p1", "p2", "p3"]);
  }

  #[tokio::test]
  async fn test_two_instances_on_one_store_keep_every_item() {
    let store = Arc::new(MemoryStore::new());
    let a = MutationQueue::new(store.clone());
    let b = MutationQueue::new(store.clone());

    a.enqueue(&rate("n1")).unwrap();
    b.enqueue(&rate("n2")).unwrap();
    a.enqueue(&rate("n3")).unwrap();
    b.enqueue(&rate("n4")).unwrap();

    let calls = record_rates(&a, &[]);
    assert_eq!(a.len().unwrap(), 4);
    completed(a.flush().await);
    assert_eq!(*calls.lock().unwrap(), vec!["n1", "n2", "n3", "n4"]);
  }

  #[test]
  fn test_concurrent_enqueues_lose_nothing() {
    let queue = Arc::new(MutationQueue::new(Arc::new(MemoryStore::new())));

    let threads: Vec<_> = (0..8)
      .map(|t| {
        let queue = queue.clone();
        std::thread::spawn(move || {
          for i in 0..25 {
            queue.enqueue(&rate(&format!("{}-{}", t, i))).unwrap();
          }
        })
      })
      .collect();
    for thread in threads {
      thread.join().unwrap();
    }

    let pending = queue.pending().unwrap();
    assert_eq!(pending.len(), 200);
    let mut ids: Vec<_> = pending.iter().map(|i| i.id.clone()).collect();
    ids.sort();
    ids.dedup();
    assert_eq!(ids.len(), 200);
  }

  #[test]
  fn test_enqueue_with_id_keeps_caller_id() {
    let queue = MutationQueue::new(Arc::new(MemoryStore::new()));
    let id = queue.enqueue_with_id("attempt-1", &rate("p1")).unwrap();

    assert_eq!(id, "attempt-1");
    let pending = queue.pending().unwrap();
    assert_eq!(pending[0].id, "attempt-1");
    assert_eq!(pending[0].mutation_type, "coffee:rate");
  }

  #[test]
  fn test_enqueue_storage_failure_is_an_error() {
    let store = Arc::new(FlakyStore::default());
    let queue = MutationQueue::new(store.clone());

    store.fail_writes(true);
    assert!(queue.enqueue(&rate("p1")).is_err());

    store.fail_writes(false);
    queue.enqueue(&rate("p1")).unwrap();
    assert_eq!(queue.len().unwrap(), 1);
  }
}
