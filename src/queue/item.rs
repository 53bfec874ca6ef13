//! Queued mutations and the trait that gives each payload its type tag.

use chrono::{DateTime, Utc};
use serde::{de::DeserializeOwned, Deserialize, Serialize};

/// Trait for writes that can be queued and replayed later.
///
/// Each implementor is one concrete payload schema; the type tag routes a
/// stored item back to the handler that knows how to decode and send it.
pub trait Mutation: Serialize + DeserializeOwned + Send + Sync + 'static {
  /// Type tag for routing (e.g., "recipes:create", "coffee:rate")
  fn mutation_type() -> &'static str;
}

/// A write waiting to reach the server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueueItem {
  /// Unique id, forwarded to the server so it can drop duplicate replays
  pub id: String,
  /// Selects the replay handler
  #[serde(rename = "type")]
  pub mutation_type: String,
  /// Arguments needed to replay the write
  pub payload: serde_json::Value,
  pub enqueued_at: DateTime<Utc>,
  /// Failed replay attempts so far
  #[serde(default)]
  pub attempts: u32,
}

/// A decoded mutation handed to a replay handler.
#[derive(Debug, Clone)]
pub struct Replay<M> {
  /// Queue item id; send it along so the server can de-duplicate
  pub id: String,
  /// Failed attempts before this one
  pub attempts: u32,
  pub mutation: M,
}
