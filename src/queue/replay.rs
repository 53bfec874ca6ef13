//! Replay handler registry.

use color_eyre::{eyre::eyre, Result};
use futures::future::BoxFuture;
use std::future::Future;
use std::sync::Arc;

use super::item::{Mutation, QueueItem, Replay};

/// Type-erased handler: takes a stored item, reports whether the write landed.
pub(crate) type RawHandler = Arc<dyn Fn(QueueItem) -> BoxFuture<'static, Result<bool>> + Send + Sync>;

/// Wrap a typed handler so it can be called with a stored item.
///
/// The payload is decoded here; a payload that does not match the schema
/// for its type tag fails the replay like any other handler failure.
pub(crate) fn typed_handler<M, F, Fut>(handler: F) -> RawHandler
where
  M: Mutation,
  F: Fn(Replay<M>) -> Fut + Send + Sync + 'static,
  Fut: Future<Output = Result<bool>> + Send + 'static,
{
  Arc::new(move |item: QueueItem| -> BoxFuture<'static, Result<bool>> {
    match serde_json::from_value::<M>(item.payload) {
      Ok(mutation) => Box::pin(handler(Replay {
        id: item.id,
        attempts: item.attempts,
        mutation,
      })),
      Err(e) => {
        let err = eyre!(
          "Payload of {} item {} does not decode: {}",
          M::mutation_type(),
          item.id,
          e
        );
        Box::pin(async move { Err(err) })
      }
    }
  })
}

/// Handlers in registration order.
#[derive(Default, Clone)]
pub(crate) struct HandlerRegistry {
  handlers: Vec<(String, RawHandler)>,
}

impl HandlerRegistry {
  /// Register or replace the handler for a type, keeping its original slot.
  pub fn insert(&mut self, mutation_type: &str, handler: RawHandler) {
    match self.handlers.iter_mut().find(|(t, _)| t == mutation_type) {
      Some((_, existing)) => *existing = handler,
      None => self.handlers.push((mutation_type.to_string(), handler)),
    }
  }

  pub fn contains(&self, mutation_type: &str) -> bool {
    self.handlers.iter().any(|(t, _)| t == mutation_type)
  }

  pub fn iter(&self) -> impl Iterator<Item = &(String, RawHandler)> {
    self.handlers.iter()
  }

  pub fn types(&self) -> Vec<String> {
    self.handlers.iter().map(|(t, _)| t.clone()).collect()
  }
}
