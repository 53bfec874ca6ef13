//! Brew client with transparent caching and offline write queueing.

use chrono::Duration;
use color_eyre::{eyre::eyre, Result};
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::answer::{Answer, AnswerResolver, Corpus, OnlineFetcher};
use crate::cache::{Cache, CacheResult};
use crate::config::Config;
use crate::network::{Connectivity, ConnectivityMonitor};
use crate::notice::{Notice, NoticeSink};
use crate::queue::{spawn_reconnect_flusher, FlushOutcome, Mutation, MutationQueue, Replay};
use crate::store::KvStore;

use super::assistant::AssistantClient;
use super::client::{BackendClient, Rejected};
use super::types::{CreateRecipe, RateCoffee, Recipe};

/// Cache key for the top recipes list.
pub const TOP_RECIPES_KEY: &str = "recipes:top";

/// Top recipes change slowly and are worth keeping through eviction.
const TOP_RECIPES_TTL_DAYS: i64 = 7;
const TOP_RECIPES_PRIORITY: i32 = 5;

/// What happened to a user write.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WriteOutcome {
  /// The server accepted it
  Sent,
  /// Stored for replay once back online
  Queued { id: String },
}

/// Brew backend access that keeps working offline.
///
/// Reads go through the cache, writes fall back to the mutation queue, and
/// questions go through the answer pipeline.
pub struct BrewService<S: KvStore + ?Sized + 'static> {
  backend: BackendClient,
  assistant: Option<AssistantClient>,
  cache: Cache<S>,
  queue: Arc<MutationQueue<S>>,
  answers: AnswerResolver<S>,
  connectivity: Arc<ConnectivityMonitor>,
  notices: Arc<dyn NoticeSink>,
}

impl<S: KvStore + ?Sized + 'static> BrewService<S> {
  /// Build the service and register replay handlers for every brew write.
  pub fn new(
    config: &Config,
    store: Arc<S>,
    connectivity: Arc<ConnectivityMonitor>,
    notices: Arc<dyn NoticeSink>,
  ) -> Result<Self> {
    let backend = BackendClient::new(&config.backend)?;

    let assistant = match &config.assistant {
      Some(assistant_config) => match AssistantClient::new(assistant_config) {
        Ok(client) => Some(client),
        Err(e) => {
          warn!(error = %e, "Assistant unavailable, answers will be offline only");
          None
        }
      },
      None => None,
    };

    let corpus = match &config.corpus {
      Some(path) => Corpus::load(path)?,
      None => Corpus::bundled()?,
    };

    let cache = Cache::new(store.clone()).with_policy(config.cache.policy());
    let queue = Arc::new(MutationQueue::new(store).with_max_attempts(config.queue.max_attempts));
    Self::register_handlers(&queue, &backend)?;

    let answers = AnswerResolver::new(
      cache.clone(),
      Arc::new(corpus),
      connectivity.clone(),
      notices.clone(),
    )
    .with_ttl(config.cache.answer_ttl());

    Ok(Self {
      backend,
      assistant,
      cache,
      queue,
      answers,
      connectivity,
      notices,
    })
  }

  fn register_handlers(queue: &MutationQueue<S>, backend: &BackendClient) -> Result<()> {
    let client = backend.clone();
    queue.register(move |replay: Replay<CreateRecipe>| {
      let client = client.clone();
      async move {
        let result = client.create_recipe(&replay.mutation, &replay.id).await;
        note_rejection(&replay.id, result)
      }
    })?;

    let client = backend.clone();
    queue.register(move |replay: Replay<RateCoffee>| {
      let client = client.clone();
      async move {
        let result = client.rate_coffee(&replay.mutation, &replay.id).await;
        note_rejection(&replay.id, result)
      }
    })?;

    Ok(())
  }

  pub fn cache(&self) -> &Cache<S> {
    &self.cache
  }

  pub fn queue(&self) -> &Arc<MutationQueue<S>> {
    &self.queue
  }

  pub fn is_online(&self) -> bool {
    self.connectivity.is_online()
  }

  /// Get the top recipes, from cache when fresh or when the network is down.
  pub async fn top_recipes(&self) -> Result<CacheResult<Vec<Recipe>>> {
    if !self.is_online() {
      return self
        .cache
        .get_stale_allowed::<Vec<Recipe>>(TOP_RECIPES_KEY)
        .map(|cached| match cached.expired {
          true => CacheResult::offline(cached.value, cached.written_at),
          false => CacheResult::from_cache(cached.value, cached.written_at),
        })
        .ok_or_else(|| eyre!("Offline and no recipes cached yet"));
    }

    let backend = self.backend.clone();
    self
      .cache
      .fetch(
        TOP_RECIPES_KEY,
        Duration::days(TOP_RECIPES_TTL_DAYS),
        TOP_RECIPES_PRIORITY,
        || async move { backend.top_recipes().await },
      )
      .await
  }

  /// Create a recipe now, or queue it if the backend cannot be reached.
  ///
  /// A recipe the server rejects outright is returned as an error, not queued.
  pub async fn create_recipe(&self, recipe: CreateRecipe) -> Result<WriteOutcome> {
    let id = Uuid::new_v4().to_string();

    if self.is_online() {
      match self.backend.create_recipe(&recipe, &id).await {
        Ok(()) => {
          // The top list may now be out of date
          if let Err(e) = self.cache.remove(TOP_RECIPES_KEY) {
            warn!(error = %e, "Failed to invalidate cached top recipes");
          }
          return Ok(WriteOutcome::Sent);
        }
        Err(e) if Rejected::is_rejection(&e) => return Err(e),
        Err(e) => warn!(error = %e, "Recipe not sent, queueing for replay"),
      }
    }

    self.enqueue(&id, &recipe)
  }

  /// Rate a coffee now, or queue the rating if the backend cannot be reached.
  ///
  /// A rating the server rejects outright is returned as an error, not queued.
  pub async fn rate_coffee(&self, rating: RateCoffee) -> Result<WriteOutcome> {
    if !(1..=5).contains(&rating.stars) {
      return Err(eyre!("Rating must be between 1 and 5 stars, got {}", rating.stars));
    }

    let id = Uuid::new_v4().to_string();

    if self.is_online() {
      match self.backend.rate_coffee(&rating, &id).await {
        Ok(()) => return Ok(WriteOutcome::Sent),
        Err(e) if Rejected::is_rejection(&e) => return Err(e),
        Err(e) => warn!(error = %e, "Rating not sent, queueing for replay"),
      }
    }

    self.enqueue(&id, &rating)
  }

  /// Durably queue a write. Failing here is the one hard error a user write can hit.
  fn enqueue<M: Mutation>(&self, id: &str, mutation: &M) -> Result<WriteOutcome> {
    let id = self.queue.enqueue_with_id(id, mutation)?;
    self.notices.show(Notice::QueuedWrite {
      mutation_type: M::mutation_type().to_string(),
    });
    Ok(WriteOutcome::Queued { id })
  }

  /// Answer a brewing question, online if possible.
  pub async fn ask(&self, question: &str) -> Answer {
    let fetcher = self.assistant.as_ref().map(|a| a as &dyn OnlineFetcher);
    self.answers.get_answer(question, fetcher).await
  }

  /// Replay queued writes now.
  pub async fn flush(&self) -> FlushOutcome {
    info!("Flushing queued writes");
    self.queue.flush().await
  }

  /// Replay queued writes whenever connectivity comes back.
  pub fn spawn_reconnect_flusher(&self) -> JoinHandle<()> {
    spawn_reconnect_flusher(self.queue.clone(), self.connectivity.as_ref())
  }
}

/// Replay result for the queue. A rejection still counts as a failure, but is
/// logged loudly since retrying it cannot help.
fn note_rejection(id: &str, result: Result<()>) -> Result<bool> {
  if let Err(e) = &result {
    if Rejected::is_rejection(e) {
      error!(id, error = %e, "Queued write rejected by the server and will keep failing");
    }
  }
  result.map(|()| true)
}
