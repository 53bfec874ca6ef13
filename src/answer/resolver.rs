//! Answer resolution with graceful degradation.

use chrono::Duration;
use color_eyre::Result;
use futures::future::BoxFuture;
use sha2::{Digest, Sha256};
use std::sync::Arc;
use tracing::{debug, info, warn};

use super::corpus::{keyword_answer, Corpus};
use crate::cache::{Cache, DEFAULT_PRIORITY};
use crate::network::Connectivity;
use crate::notice::{Notice, NoticeSink};
use crate::store::KvStore;

/// Cache key prefix for live answers.
pub const ANSWER_CACHE_PREFIX: &str = "ai_answer:";

/// Returned when nothing else matched.
pub const NO_ANSWER: &str =
  "Sorry, I don't have an answer for that offline. Please try again when you're back online.";

/// Source of live answers, usually a chat completion endpoint.
pub trait OnlineFetcher: Send + Sync {
  fn fetch<'a>(&'a self, question: &'a str) -> BoxFuture<'a, Result<String>>;
}

/// Which step of the chain produced an answer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AnswerSource {
  Cache,
  Live,
  Corpus,
  Keyword,
  Fallback,
}

/// A resolved answer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Answer {
  pub answer: String,
  /// True when the answer came from offline data rather than a live or
  /// cached live response
  pub offline: bool,
  pub source: AnswerSource,
}

impl Answer {
  fn new(answer: impl Into<String>, source: AnswerSource) -> Self {
    let offline = !matches!(source, AnswerSource::Cache | AnswerSource::Live);
    Self {
      answer: answer.into(),
      offline,
      source,
    }
  }
}

/// Resolves free-text questions through cache, live fetch, fuzzy corpus
/// match, keyword table and finally a fixed apology.
///
/// No step ever fails the call: errors are logged and the next step runs.
pub struct AnswerResolver<S: KvStore + ?Sized> {
  cache: Cache<S>,
  corpus: Arc<Corpus>,
  connectivity: Arc<dyn Connectivity>,
  notices: Arc<dyn NoticeSink>,
  ttl: Duration,
}

impl<S: KvStore + ?Sized> AnswerResolver<S> {
  pub fn new(
    cache: Cache<S>,
    corpus: Arc<Corpus>,
    connectivity: Arc<dyn Connectivity>,
    notices: Arc<dyn NoticeSink>,
  ) -> Self {
    Self {
      cache,
      corpus,
      connectivity,
      notices,
      ttl: Duration::hours(24),
    }
  }

  /// Set how long live answers stay cached.
  pub fn with_ttl(mut self, ttl: Duration) -> Self {
    self.ttl = ttl;
    self
  }

  /// Cache key for a question. Case and whitespace are significant.
  pub fn cache_key(question: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(question.as_bytes());
    format!("{}{}", ANSWER_CACHE_PREFIX, hex::encode(hasher.finalize()))
  }

  /// Answer `question`, using `fetcher` only when the device is online.
  pub async fn get_answer(&self, question: &str, fetcher: Option<&dyn OnlineFetcher>) -> Answer {
    let key = Self::cache_key(question);

    if let Some(cached) = self.cache.get_item::<String>(&key) {
      debug!("Answer served from cache");
      return Answer::new(cached, AnswerSource::Cache);
    }

    if let Some(fetcher) = fetcher.filter(|_| self.connectivity.is_online()) {
      if let Some(answer) = self.fetch_live(&key, question, fetcher).await {
        return Answer::new(answer, AnswerSource::Live);
      }
    }

    if let Some(entry) = self.corpus.fuzzy_answer(question) {
      info!(matched = %entry.question, "Serving offline corpus answer");
      self.notices.show(Notice::OfflineAnswer);
      return Answer::new(entry.answer.clone(), AnswerSource::Corpus);
    }

    if let Some(answer) = keyword_answer(question) {
      info!("Serving offline keyword answer");
      self.notices.show(Notice::OfflineAnswer);
      return Answer::new(answer, AnswerSource::Keyword);
    }

    info!("No offline answer found");
    self.notices.show(Notice::NotFound);
    Answer::new(NO_ANSWER, AnswerSource::Fallback)
  }

  async fn fetch_live(&self, key: &str, question: &str, fetcher: &dyn OnlineFetcher) -> Option<String> {
    let answer = match fetcher.fetch(question).await {
      Ok(answer) if !answer.trim().is_empty() => answer,
      Ok(_) => {
        warn!("Live answer was empty, falling back");
        return None;
      }
      Err(e) => {
        warn!(error = %e, "Live answer failed, falling back");
        return None;
      }
    };

    if let Err(e) = self.cache.set_item_for(key, &answer, self.ttl, DEFAULT_PRIORITY) {
      warn!(error = %e, "Failed to cache live answer");
    }

    Some(answer)
  }
}
