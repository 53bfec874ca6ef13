use color_eyre::{eyre::eyre, Report, Result};
use reqwest::header::AUTHORIZATION;
use reqwest::StatusCode;
use std::time::Duration;
use url::Url;

use crate::config::{BackendConfig, Config};

use super::types::{CreateRecipe, RateCoffee, Recipe};

/// Header the backend uses to drop duplicate writes.
pub const IDEMPOTENCY_HEADER: &str = "Idempotency-Key";

/// The server refused a write for good; sending it again cannot succeed.
#[derive(Debug, thiserror::Error)]
#[error("Server rejected {action}: {status}")]
pub struct Rejected {
  pub action: String,
  pub status: StatusCode,
}

impl Rejected {
  /// Whether `err` is a permanent rejection rather than a transient failure.
  pub fn is_rejection(err: &Report) -> bool {
    err.downcast_ref::<Rejected>().is_some()
  }
}

/// Client errors other than timeouts and rate limits are final.
fn is_permanent(status: StatusCode) -> bool {
  status.is_client_error()
    && !matches!(status, StatusCode::REQUEST_TIMEOUT | StatusCode::TOO_MANY_REQUESTS)
}

/// REST backend client
#[derive(Clone)]
pub struct BackendClient {
  http: reqwest::Client,
  base: Url,
  token: Option<String>,
}

impl BackendClient {
  pub fn new(config: &BackendConfig) -> Result<Self> {
    let http = reqwest::Client::builder()
      .timeout(Duration::from_secs(config.timeout_secs))
      .build()
      .map_err(|e| eyre!("Failed to create HTTP client: {}", e))?;

    Ok(Self {
      http,
      base: Self::base_url(&config.url)?,
      token: Config::get_backend_token(),
    })
  }

  /// Parse the base URL, making sure relative joins keep its path.
  fn base_url(url: &str) -> Result<Url> {
    let mut base = Url::parse(url).map_err(|e| eyre!("Invalid backend URL {}: {}", url, e))?;
    if !base.path().ends_with('/') {
      let path = format!("{}/", base.path());
      base.set_path(&path);
    }
    Ok(base)
  }

  fn endpoint(&self, path: &str) -> Result<Url> {
    self
      .base
      .join(path)
      .map_err(|e| eyre!("Invalid endpoint {}: {}", path, e))
  }

  /// Endpoint from path segments. Each segment is percent-encoded, so ids
  /// cannot change the path or add a query.
  fn endpoint_segments(&self, segments: &[&str]) -> Result<Url> {
    let mut url = self.base.clone();
    url
      .path_segments_mut()
      .map_err(|_| eyre!("Backend URL cannot take a path: {}", self.base))?
      .pop_if_empty()
      .extend(segments);
    Ok(url)
  }

  fn request(&self, method: reqwest::Method, url: Url) -> reqwest::RequestBuilder {
    let request = self.http.request(method, url);
    match &self.token {
      Some(token) => request.header(AUTHORIZATION, format!("Bearer {}", token)),
      None => request,
    }
  }

  async fn send_write(&self, request: reqwest::RequestBuilder, action: String) -> Result<()> {
    let response = request
      .send()
      .await
      .map_err(|e| eyre!("Failed to {}: {}", action, e))?;

    let status = response.status();
    if is_permanent(status) {
      return Err(Rejected { action, status }.into());
    }

    response
      .error_for_status()
      .map_err(|e| eyre!("Failed to {}: {}", action, e))?;
    Ok(())
  }

  /// Get the most popular recipes
  pub async fn top_recipes(&self) -> Result<Vec<Recipe>> {
    let url = self.endpoint("recipes/top")?;

    self
      .request(reqwest::Method::GET, url)
      .send()
      .await
      .and_then(|r| r.error_for_status())
      .map_err(|e| eyre!("Failed to get top recipes: {}", e))?
      .json()
      .await
      .map_err(|e| eyre!("Failed to parse recipes: {}", e))
  }

  /// Create a recipe. `idempotency_key` lets the server ignore replays.
  pub async fn create_recipe(&self, recipe: &CreateRecipe, idempotency_key: &str) -> Result<()> {
    let url = self.endpoint("recipes")?;

    let request = self
      .request(reqwest::Method::POST, url)
      .header(IDEMPOTENCY_HEADER, idempotency_key)
      .json(recipe);

    self
      .send_write(request, format!("create recipe {}", recipe.name))
      .await
  }

  /// Rate a coffee. `idempotency_key` lets the server ignore replays.
  pub async fn rate_coffee(&self, rating: &RateCoffee, idempotency_key: &str) -> Result<()> {
    let url = self.endpoint_segments(&["coffees", &rating.coffee_id, "ratings"])?;

    let request = self
      .request(reqwest::Method::POST, url)
      .header(IDEMPOTENCY_HEADER, idempotency_key)
      .json(rating);

    self
      .send_write(request, format!("rate coffee {}", rating.coffee_id))
      .await
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_endpoints_keep_base_path() {
    let client = BackendClient::new(&BackendConfig {
      url: "https://brew.example.com/api".to_string(),
      timeout_secs: 5,
    })
    .unwrap();

    assert_eq!(
      client.endpoint("recipes/top").unwrap().as_str(),
      "https://brew.example.com/api/recipes/top"
    );
    assert_eq!(
      client
        .endpoint_segments(&["coffees", "42", "ratings"])
        .unwrap()
        .as_str(),
      "https://brew.example.com/api/coffees/42/ratings"
    );
  }

  #[test]
  fn test_coffee_id_stays_one_segment() {
    let client = BackendClient::new(&BackendConfig {
      url: "https://brew.example.com/api/".to_string(),
      timeout_secs: 5,
    })
    .unwrap();

    let url = client
      .endpoint_segments(&["coffees", "../../admin/users?x=", "ratings"])
      .unwrap();
    assert_eq!(url.path(), "/api/coffees/..%2F..%2Fadmin%2Fusers%3Fx=/ratings");
    assert_eq!(url.query(), None);
  }

  #[test]
  fn test_permanent_statuses() {
    assert!(is_permanent(StatusCode::BAD_REQUEST));
    assert!(is_permanent(StatusCode::NOT_FOUND));
    assert!(is_permanent(StatusCode::UNPROCESSABLE_ENTITY));
    assert!(!is_permanent(StatusCode::REQUEST_TIMEOUT));
    assert!(!is_permanent(StatusCode::TOO_MANY_REQUESTS));
    assert!(!is_permanent(StatusCode::SERVICE_UNAVAILABLE));
    assert!(!is_permanent(StatusCode::OK));
  }

  #[test]
  fn test_rejection_survives_as_report() {
    let err: Report = Rejected {
      action: "rate coffee 42".to_string(),
      status: StatusCode::UNPROCESSABLE_ENTITY,
    }
    .into();
    assert!(Rejected::is_rejection(&err));
    assert!(err.to_string().contains("rate coffee 42"));
    assert!(!Rejected::is_rejection(&eyre!("connection refused")));
  }

  #[test]
  fn test_invalid_base_url() {
    let result = BackendClient::new(&BackendConfig {
      url: "not a url".to_string(),
      timeout_secs: 5,
    });
    assert!(result.is_err());
  }
}
