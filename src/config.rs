use chrono::Duration;
use color_eyre::{eyre::eyre, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

use crate::cache::CachePolicy;

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Config {
  pub backend: BackendConfig,
  /// Chat completion endpoint for live answers. Offline answers only when unset.
  pub assistant: Option<AssistantConfig>,
  pub cache: CacheConfig,
  pub queue: QueueConfig,
  /// Where the database and logs live (defaults to the platform data dir)
  pub data_dir: Option<PathBuf>,
  /// Q&A corpus file to use instead of the bundled one
  pub corpus: Option<PathBuf>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct BackendConfig {
  pub url: String,
  pub timeout_secs: u64,
}

impl Default for BackendConfig {
  fn default() -> Self {
    Self {
      url: "http://localhost:3000/api/".to_string(),
      timeout_secs: 10,
    }
  }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AssistantConfig {
  pub url: String,
  pub model: String,
  pub timeout_secs: u64,
}

impl Default for AssistantConfig {
  fn default() -> Self {
    Self {
      url: "https://api.openai.com/v1/chat/completions".to_string(),
      model: "gpt-4o-mini".to_string(),
      timeout_secs: 20,
    }
  }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
  /// Entry count above which eviction kicks in
  pub max_entries: Option<usize>,
  /// Total serialized size above which eviction kicks in
  pub max_bytes: Option<usize>,
  /// How long live answers stay cached
  pub answer_ttl_hours: u32,
}

impl Default for CacheConfig {
  fn default() -> Self {
    Self {
      max_entries: Some(500),
      max_bytes: Some(5 * 1024 * 1024),
      answer_ttl_hours: 24,
    }
  }
}

impl CacheConfig {
  pub fn policy(&self) -> CachePolicy {
    CachePolicy {
      max_entries: self.max_entries,
      max_bytes: self.max_bytes,
    }
  }

  pub fn answer_ttl(&self) -> Duration {
    Duration::hours(i64::from(self.answer_ttl_hours))
  }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct QueueConfig {
  /// Drop a queued write after this many failed replays (unbounded when unset)
  pub max_attempts: Option<u32>,
}

impl Config {
  /// Load configuration from file.
  ///
  /// Search order:
  /// 1. Explicit path if provided
  /// 2. ./brew-offline.yaml (current directory)
  /// 3. $XDG_CONFIG_HOME/brew-offline/config.yaml
  ///
  /// Without a config file the defaults are used.
  pub fn load(explicit_path: Option<&Path>) -> Result<Self> {
    let path = if let Some(p) = explicit_path {
      if p.exists() {
        Some(p.to_path_buf())
      } else {
        return Err(eyre!("Config file not found: {}", p.display()));
      }
    } else {
      Self::find_config_file()
    };

    match path {
      Some(p) => Self::load_from_path(&p),
      None => Ok(Self::default()),
    }
  }

  fn find_config_file() -> Option<PathBuf> {
    // Check current directory
    let local = PathBuf::from("brew-offline.yaml");
    if local.exists() {
      return Some(local);
    }

    // Check XDG config directory
    if let Some(config_dir) = dirs::config_dir() {
      let xdg_path = config_dir.join("brew-offline").join("config.yaml");
      if xdg_path.exists() {
        return Some(xdg_path);
      }
    }

    None
  }

  fn load_from_path(path: &Path) -> Result<Self> {
    let contents = std::fs::read_to_string(path)
      .map_err(|e| eyre!("Failed to read config file {}: {}", path.display(), e))?;

    Self::from_yaml(&contents)
      .map_err(|e| eyre!("Failed to parse config file {}: {}", path.display(), e))
  }

  pub fn from_yaml(contents: &str) -> Result<Self> {
    let config: Config = serde_yaml::from_str(contents).map_err(|e| eyre!("{}", e))?;
    Ok(config)
  }

  /// Directory holding the database and logs.
  pub fn data_dir(&self) -> Result<PathBuf> {
    if let Some(dir) = &self.data_dir {
      return Ok(dir.clone());
    }

    let data_dir = dirs::data_dir()
      .or_else(|| dirs::home_dir().map(|p| p.join(".local/share")))
      .ok_or_else(|| eyre!("Could not determine data directory"))?;

    Ok(data_dir.join("brew-offline"))
  }

  /// Path of the offline database.
  pub fn database_path(&self) -> Result<PathBuf> {
    Ok(self.data_dir()?.join("offline.db"))
  }

  /// Get the assistant API key from environment variables.
  ///
  /// Checks BREW_OFFLINE_API_KEY first, then OPENAI_API_KEY as fallback.
  pub fn get_api_key() -> Result<String> {
    std::env::var("BREW_OFFLINE_API_KEY")
      .or_else(|_| std::env::var("OPENAI_API_KEY"))
      .map_err(|_| {
        eyre!("Assistant API key not found. Set BREW_OFFLINE_API_KEY or OPENAI_API_KEY environment variable.")
      })
  }

  /// Get the backend bearer token, if one is set in BREW_OFFLINE_TOKEN.
  pub fn get_backend_token() -> Option<String> {
    std::env::var("BREW_OFFLINE_TOKEN").ok()
  }
}
