//! Brief user-facing notices about degraded data sources.

use std::sync::Mutex;
use tracing::info;

/// A short message the app shows without blocking the user.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Notice {
  /// The answer came from offline data
  OfflineAnswer,
  /// No answer could be found offline
  NotFound,
  /// A write was saved and will be sent once back online
  QueuedWrite { mutation_type: String },
}

impl Notice {
  pub fn message(&self) -> &'static str {
    match self {
      Notice::OfflineAnswer => "You're offline - showing a saved answer.",
      Notice::NotFound => "No offline answer found. Try again when you're online.",
      Notice::QueuedWrite { .. } => "Saved. We'll sync it when you're back online.",
    }
  }
}

/// Fire-and-forget sink for notices.
pub trait NoticeSink: Send + Sync {
  fn show(&self, notice: Notice);
}

/// Sink that writes notices to the log.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingNotices;

impl NoticeSink for TracingNotices {
  fn show(&self, notice: Notice) {
    info!(notice = ?notice, "{}", notice.message());
  }
}

/// Sink that keeps every notice for later inspection.
#[derive(Debug, Default)]
pub struct RecordingNotices {
  notices: Mutex<Vec<Notice>>,
}

impl RecordingNotices {
  /// Notices shown so far, oldest first.
  pub fn notices(&self) -> Vec<Notice> {
    self
      .notices
      .lock()
      .map(|n| n.clone())
      .unwrap_or_default()
  }
}

impl NoticeSink for RecordingNotices {
  fn show(&self, notice: Notice) {
    if let Ok(mut notices) = self.notices.lock() {
      notices.push(notice);
    }
  }
}
