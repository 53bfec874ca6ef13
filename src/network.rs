//! Connectivity signal shared by the queue flusher and answer resolution.

use tokio::sync::watch;

/// Observer of device connectivity.
pub trait Connectivity: Send + Sync {
  /// Whether the device currently reports a network connection.
  fn is_online(&self) -> bool;

  /// Subscribe to connectivity changes.
  fn subscribe(&self) -> watch::Receiver<bool>;
}

/// Connectivity state that the embedding app updates from platform events.
#[derive(Debug)]
pub struct ConnectivityMonitor {
  tx: watch::Sender<bool>,
}

impl ConnectivityMonitor {
  pub fn new(online: bool) -> Self {
    let (tx, _rx) = watch::channel(online);
    Self { tx }
  }

  /// Publish a connectivity change. Repeating the current state does not
  /// wake subscribers.
  pub fn set_online(&self, online: bool) {
    self.tx.send_if_modified(|current| {
      if *current == online {
        return false;
      }
      *current = online;
      true
    });
  }
}

impl Default for ConnectivityMonitor {
  fn default() -> Self {
    Self::new(true)
  }
}

impl Connectivity for ConnectivityMonitor {
  fn is_online(&self) -> bool {
    *self.tx.borrow()
  }

  fn subscribe(&self) -> watch::Receiver<bool> {
    self.tx.subscribe()
  }
}
