//! Tracing subscriber setup for the binary.

use color_eyre::{eyre::eyre, Result};
use std::path::Path;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::EnvFilter;

/// Log file name inside the log directory.
pub const LOG_FILE: &str = "brew-offline.log";

/// Filter for a `-v` count. `RUST_LOG` wins when nothing was requested.
pub fn filter_for(verbosity: u8) -> EnvFilter {
  match verbosity {
    0 => EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
    1 => EnvFilter::new("brew_offline=info,warn"),
    2 => EnvFilter::new("brew_offline=debug,info"),
    _ => EnvFilter::new("trace"),
  }
}

/// Install the global subscriber.
///
/// With a log directory, events go to `brew-offline.log` in it through a
/// non-blocking writer; keep the returned guard alive until exit so the last
/// lines are flushed. Without one, events go to stderr.
pub fn init(verbosity: u8, log_dir: Option<&Path>) -> Result<Option<WorkerGuard>> {
  let builder = tracing_subscriber::fmt()
    .with_env_filter(filter_for(verbosity))
    .with_target(true);

  match log_dir {
    Some(dir) => {
      std::fs::create_dir_all(dir)
        .map_err(|e| eyre!("Failed to create log directory {}: {}", dir.display(), e))?;
      let appender = tracing_appender::rolling::never(dir, LOG_FILE);
      let (writer, guard) = tracing_appender::non_blocking(appender);

      builder
        .with_ansi(false)
        .with_writer(writer)
        .try_init()
        .map_err(|e| eyre!("Failed to init logging: {}", e))?;

      Ok(Some(guard))
    }
    None => {
      builder
        .with_writer(std::io::stderr)
        .try_init()
        .map_err(|e| eyre!("Failed to init logging: {}", e))?;

      Ok(None)
    }
  }
}
