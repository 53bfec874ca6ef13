//! Flushes the mutation queue whenever connectivity comes back.

use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{debug, info};

use super::mutation_queue::{FlushOutcome, MutationQueue};
use crate::network::Connectivity;
use crate::store::KvStore;

/// Spawn a task that flushes `queue` whenever connectivity changes and the
/// device ends up online, and once at start if already online.
///
/// A flip to offline and back during a running flush reaches the task as a
/// single change to online, so every such change flushes.
///
/// The task ends when the connectivity source is dropped.
pub fn spawn_reconnect_flusher<S, C>(queue: Arc<MutationQueue<S>>, connectivity: &C) -> JoinHandle<()>
where
  S: KvStore + ?Sized + 'static,
  C: Connectivity + ?Sized,
{
  let mut rx = connectivity.subscribe();

  tokio::spawn(async move {
    if *rx.borrow_and_update() {
      log_outcome(queue.flush().await);
    }

    while rx.changed().await.is_ok() {
      if *rx.borrow_and_update() {
        info!("Connectivity restored, replaying queued mutations");
        log_outcome(queue.flush().await);
      }
    }

    debug!("Connectivity source closed, reconnect flusher stopping");
  })
}

fn log_outcome(outcome: FlushOutcome) {
  match outcome {
    FlushOutcome::Completed(report) => debug!(?report, "Reconnect flush finished"),
    FlushOutcome::AlreadyRunning => debug!("Reconnect flush skipped, another flush is running"),
  }
}
