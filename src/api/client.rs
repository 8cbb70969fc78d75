use color_eyre::{eyre::eyre, Result};
use reqwest::{Method, RequestBuilder, StatusCode};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::time::Duration;
use tracing::debug;
use url::Url;

use super::types::{Client, ClientUpdate, NewReservation, Reservation};
use crate::config::Config;
use crate::store::Principal;
use crate::sync::MutationError;

/// Longest server error body carried into an error message.
const MAX_ERROR_BODY: usize = 200;

/// Padel REST API client.
///
/// Non-2xx responses and transport failures come back as [`MutationError`]
/// so they can be fed straight into the data-sync retry logic.
#[derive(Clone)]
pub struct ApiClient {
  http: reqwest::Client,
  base: Url,
  token: String,
}

impl ApiClient {
  pub fn new(config: &Config) -> Result<Self> {
    let token = Config::get_api_token()?;
    Self::with_token(&config.api.url, token, Duration::from_secs(config.api.timeout_secs))
  }

  pub fn with_token(base_url: &str, token: String, timeout: Duration) -> Result<Self> {
    let base = parse_base_url(base_url)?;
    let http = reqwest::Client::builder()
      .timeout(timeout)
      .user_agent(concat!("padel-sync/", env!("CARGO_PKG_VERSION")))
      .build()
      .map_err(|e| eyre!("Failed to create HTTP client: {}", e))?;

    Ok(Self { http, base, token })
  }

  fn request(&self, method: Method, path: &str) -> Result<RequestBuilder, MutationError> {
    let url = self
      .base
      .join(path.trim_start_matches('/'))
      .map_err(|e| MutationError::InvalidConfig(format!("bad endpoint {}: {}", path, e)))?;
    Ok(self.http.request(method, url).bearer_auth(&self.token))
  }

  async fn send<T: DeserializeOwned>(&self, request: RequestBuilder) -> Result<T, MutationError> {
    let response = request.send().await.map_err(transport_error)?;
    let status = response.status();
    debug!(%status, url = %response.url(), "API response");

    let body = response.bytes().await.map_err(transport_error)?;
    if !status.is_success() {
      return Err(status_error(status, &body));
    }

    // 204 and empty bodies decode as JSON null, which fits `()`
    let body: &[u8] = if body.is_empty() { b"null" } else { &body[..] };
    serde_json::from_slice(body).map_err(|e| MutationError::Decode(e.to_string()))
  }

  async fn get<T: DeserializeOwned>(&self, path: &str) -> Result<T, MutationError> {
    self.send(self.request(Method::GET, path)?).await
  }

  async fn write<B: Serialize, T: DeserializeOwned>(
    &self,
    method: Method,
    path: &str,
    body: &B,
  ) -> Result<T, MutationError> {
    self.send(self.request(method, path)?.json(body)).await
  }

  /// The authenticated user.
  pub async fn me(&self) -> Result<Principal, MutationError> {
    self.get("api/auth/me").await
  }

  pub async fn create_reservation(
    &self,
    reservation: &NewReservation,
  ) -> Result<Reservation, MutationError> {
    self
      .write(Method::POST, "api/reservations", reservation)
      .await
  }

  pub async fn cancel_reservation(&self, id: u64) -> Result<(), MutationError> {
    let path = format!("api/reservations/{}", id);
    self.send(self.request(Method::DELETE, &path)?).await
  }

  pub async fn list_reservations(&self, court_id: u64) -> Result<Vec<Reservation>, MutationError> {
    self
      .get(&format!("api/reservations?court_id={}", court_id))
      .await
  }

  pub async fn get_client(&self, id: u64) -> Result<Client, MutationError> {
    self.get(&format!("api/clients/{}", id)).await
  }

  pub async fn update_client(&self, id: u64, update: &ClientUpdate) -> Result<Client, MutationError> {
    self
      .write(Method::PATCH, &format!("api/clients/{}", id), update)
      .await
  }
}

/// Parse the configured base URL so relative endpoint paths append to it.
fn parse_base_url(raw: &str) -> Result<Url> {
  let mut url = Url::parse(raw).map_err(|e| eyre!("Invalid API url '{}': {}", raw, e))?;
  if url.cannot_be_a_base() {
    return Err(eyre!("Invalid API url '{}': not a base url", raw));
  }
  if !url.path().ends_with('/') {
    let path = format!("{}/", url.path());
    url.set_path(&path);
  }
  Ok(url)
}

fn transport_error(e: reqwest::Error) -> MutationError {
  if e.is_decode() {
    MutationError::Decode(e.to_string())
  } else {
    MutationError::Network(e.to_string())
  }
}

/// Build a status error, preferring the server's own message.
fn status_error(status: StatusCode, body: &[u8]) -> MutationError {
  MutationError::Status {
    status: status.as_u16(),
    message: error_message(status, body),
  }
}

fn error_message(status: StatusCode, body: &[u8]) -> String {
  if let Ok(value) = serde_json::from_slice::<serde_json::Value>(body) {
    for field in ["message", "error", "detail"] {
      if let Some(message) = value.get(field).and_then(|m| m.as_str()) {
        return message.to_string();
      }
    }
  }

  let text = String::from_utf8_lossy(body);
  let text = text.trim();
  if text.is_empty() {
    return status
      .canonical_reason()
      .unwrap_or("request failed")
      .to_string();
  }
  text.chars().take(MAX_ERROR_BODY).collect()
}
