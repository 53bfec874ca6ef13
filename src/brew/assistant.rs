//! Live answers from an OpenAI-compatible chat completion endpoint.

use color_eyre::{eyre::eyre, Result};
use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use url::Url;

use crate::answer::OnlineFetcher;
use crate::config::{AssistantConfig, Config};

// ============================================================================
// Wire types
// ============================================================================

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
  model: &'a str,
  messages: Vec<ChatMessage<'a>>,
}

#[derive(Debug, Serialize)]
struct ChatMessage<'a> {
  role: &'a str,
  content: &'a str,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
  #[serde(default)]
  choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
  message: ChatReply,
}

#[derive(Debug, Deserialize)]
struct ChatReply {
  content: Option<String>,
}

impl ChatResponse {
  /// Text of the first choice.
  fn into_answer(self) -> Result<String> {
    self
      .choices
      .into_iter()
      .next()
      .and_then(|c| c.message.content)
      .ok_or_else(|| eyre!("Chat completion returned no content"))
  }
}

// ============================================================================
// Client
// ============================================================================

/// Chat completion client used as the online fetcher for answers
#[derive(Clone)]
pub struct AssistantClient {
  http: reqwest::Client,
  url: Url,
  model: String,
  api_key: String,
}

impl AssistantClient {
  pub fn new(config: &AssistantConfig) -> Result<Self> {
    let api_key = Config::get_api_key()?;

    let http = reqwest::Client::builder()
      .timeout(Duration::from_secs(config.timeout_secs))
      .build()
      .map_err(|e| eyre!("Failed to create HTTP client: {}", e))?;

    let url = Url::parse(&config.url)
      .map_err(|e| eyre!("Invalid assistant URL {}: {}", config.url, e))?;

    Ok(Self {
      http,
      url,
      model: config.model.clone(),
      api_key,
    })
  }

  /// Send one question and return the reply text
  pub async fn ask(&self, question: &str) -> Result<String> {
    let request = ChatRequest {
      model: &self.model,
      messages: vec![ChatMessage {
        role: "user",
        content: question,
      }],
    };

    let response: ChatResponse = self
      .http
      .post(self.url.clone())
      .bearer_auth(&self.api_key)
      .json(&request)
      .send()
      .await
      .and_then(|r| r.error_for_status())
      .map_err(|e| eyre!("Assistant request failed: {}", e))?
      .json()
      .await
      .map_err(|e| eyre!("Failed to parse assistant response: {}", e))?;

    response.into_answer()
  }
}

impl OnlineFetcher for AssistantClient {
  fn fetch<'a>(&'a self, question: &'a str) -> BoxFuture<'a, Result<String>> {
    Box::pin(self.ask(question))
  }
}
