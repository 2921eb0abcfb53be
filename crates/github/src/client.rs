//! Authenticated GitHub API client.
//!
//! Thin wrapper over a blocking HTTP client: bearer auth from the
//! environment, REST and GraphQL entry points, and a small fixed retry
//! budget with linear backoff for timeouts. Semantic failures (4xx,
//! GraphQL errors) are never retried.

use std::time::Duration;

use reqwest::blocking::Client;
use reqwest::{Method, StatusCode};
use serde_json::{Value, json};
use thiserror::Error;
use tracing::{debug, warn};

const API_ROOT: &str = "https://api.github.com";
const RETRY_BUDGET: u32 = 3;
const BACKOFF_STEP: Duration = Duration::from_secs(2);
const REQUEST_TIMEOUT: Duration = Duration::from_secs(60);

/// Errors from talking to the API.
#[derive(Debug, Error)]
pub enum ClientError {
  #[error("transport error: {0}")]
  Transport(#[from] reqwest::Error),

  #[error("API returned {status}: {body}")]
  Status { status: StatusCode, body: String },

  #[error("GraphQL request failed: {0}")]
  Graph(String),
}

/// One authenticated client, constructed at process start and shared
/// by everything that needs the API. Cloning shares the underlying
/// connection pool.
#[derive(Clone)]
pub struct GitHubClient {
  http: Client,
  token: String,
  api_root: String,
}

impl GitHubClient {
  pub fn new(token: impl Into<String>) -> Result<Self, ClientError> {
    let http = Client::builder()
      .user_agent("wingup")
      .timeout(REQUEST_TIMEOUT)
      .build()?;
    Ok(Self {
      http,
      token: token.into(),
      api_root: API_ROOT.to_string(),
    })
  }

  /// Point the client at a different API root, for tests against a
  /// local server.
  pub fn with_api_root(mut self, root: impl Into<String>) -> Self {
    self.api_root = root.into();
    self
  }

  pub fn get(&self, path: &str) -> Result<Value, ClientError> {
    self.rest(Method::GET, path, None)
  }

  pub fn post(&self, path: &str, body: &Value) -> Result<Value, ClientError> {
    self.rest(Method::POST, path, Some(body))
  }

  pub fn patch(&self, path: &str, body: &Value) -> Result<Value, ClientError> {
    self.rest(Method::PATCH, path, Some(body))
  }

  pub fn put(&self, path: &str, body: &Value) -> Result<Value, ClientError> {
    self.rest(Method::PUT, path, Some(body))
  }

  pub fn delete(&self, path: &str) -> Result<Value, ClientError> {
    self.rest(Method::DELETE, path, None)
  }

  /// One REST call. Paths starting with `/` are joined to the API
  /// root; a 204 comes back as `Value::Null`.
  pub fn rest(&self, method: Method, path: &str, body: Option<&Value>) -> Result<Value, ClientError> {
    let url = if path.starts_with('/') {
      format!("{}{}", self.api_root, path)
    } else {
      path.to_string()
    };
    debug!(%method, %url, "REST request");

    let response = self.send_with_retry(|| {
      let mut request = self
        .http
        .request(method.clone(), &url)
        .bearer_auth(&self.token)
        .header("Accept", "application/vnd.github+json");
      if let Some(body) = body {
        request = request.json(body);
      }
      request.send()
    })?;

    let status = response.status();
    if status == StatusCode::NO_CONTENT {
      return Ok(Value::Null);
    }
    let payload: Value = response.json()?;
    if !status.is_success() {
      return Err(ClientError::Status {
        status,
        body: payload.to_string(),
      });
    }
    Ok(payload)
  }

  /// One GraphQL call. `accept_error` may whitelist specific errors
  /// (e.g. NOT_FOUND for an optional object); anything else is fatal.
  pub fn graphql(
    &self,
    query: &str,
    variables: Value,
    accept_error: Option<&dyn Fn(&[Value]) -> bool>,
  ) -> Result<Value, ClientError> {
    let url = format!("{}/graphql", self.api_root);
    debug!(%url, "GraphQL request");
    let body = json!({ "query": query, "variables": variables });

    let response = self.send_with_retry(|| {
      self
        .http
        .post(&url)
        .bearer_auth(&self.token)
        .json(&body)
        .send()
    })?;

    let status = response.status();
    let payload: Value = response.json()?;
    if !status.is_success() {
      return Err(ClientError::Status {
        status,
        body: payload.to_string(),
      });
    }
    if let Some(errors) = payload.get("errors").and_then(Value::as_array) {
      if !errors.is_empty() && !accept_error.is_some_and(|accept| accept(errors)) {
        return Err(ClientError::Graph(Value::Array(errors.clone()).to_string()));
      }
    }
    payload
      .get("data")
      .cloned()
      .ok_or_else(|| ClientError::Graph("response carried no data".to_string()))
  }

  /// Retry timeouts with linear backoff; everything else propagates
  /// on the first attempt.
  fn send_with_retry(
    &self,
    send: impl Fn() -> reqwest::Result<reqwest::blocking::Response>,
  ) -> Result<reqwest::blocking::Response, ClientError> {
    let mut attempt = 1;
    loop {
      match send() {
        Ok(response) => return Ok(response),
        Err(err) if err.is_timeout() && attempt < RETRY_BUDGET => {
          let pause = BACKOFF_STEP * attempt;
          warn!(attempt, pause_secs = pause.as_secs(), "request timed out, retrying");
          std::thread::sleep(pause);
          attempt += 1;
        }
        Err(err) => return Err(err.into()),
      }
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  fn client(server: &mockito::ServerGuard) -> GitHubClient {
    GitHubClient::new("test-token")
      .unwrap()
      .with_api_root(server.url())
  }

  #[test]
  fn get_returns_payload() {
    let mut server = mockito::Server::new();
    let mock = server
      .mock("GET", "/repos/a/b")
      .match_header("authorization", "Bearer test-token")
      .with_body(r#"{"full_name":"a/b"}"#)
      .create();

    let payload = client(&server).get("/repos/a/b").unwrap();
    assert_eq!(payload["full_name"], "a/b");
    mock.assert();
  }

  #[test]
  fn no_content_is_null() {
    let mut server = mockito::Server::new();
    server.mock("DELETE", "/repos/a/b").with_status(204).create();

    let payload = client(&server).delete("/repos/a/b").unwrap();
    assert!(payload.is_null());
  }

  #[test]
  fn error_status_carries_body() {
    let mut server = mockito::Server::new();
    server
      .mock("GET", "/missing")
      .with_status(404)
      .with_body(r#"{"message":"Not Found"}"#)
      .create();

    let err = client(&server).get("/missing").unwrap_err();
    match err {
      ClientError::Status { status, body } => {
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert!(body.contains("Not Found"));
      }
      other => panic!("unexpected error: {other}"),
    }
  }

  #[test]
  fn server_errors_are_not_retried() {
    let mut server = mockito::Server::new();
    let mock = server
      .mock("GET", "/flaky")
      .with_status(500)
      .with_body(r#"{"message":"boom"}"#)
      .expect(1)
      .create();

    let err = client(&server).get("/flaky").unwrap_err();
    assert!(matches!(err, ClientError::Status { .. }));
    mock.assert();
  }

  #[test]
  fn graphql_unwraps_data() {
    let mut server = mockito::Server::new();
    server
      .mock("POST", "/graphql")
      .with_body(r#"{"data":{"viewer":{"login":"bot"}}}"#)
      .create();

    let data = client(&server).graphql("query { viewer { login } }", serde_json::json!({}), None).unwrap();
    assert_eq!(data["viewer"]["login"], "bot");
  }

  #[test]
  fn graphql_errors_are_fatal() {
    let mut server = mockito::Server::new();
    server
      .mock("POST", "/graphql")
      .with_body(r#"{"data":null,"errors":[{"type":"FORBIDDEN"}]}"#)
      .create();

    let err = client(&server)
      .graphql("query { x }", serde_json::json!({}), None)
      .unwrap_err();
    assert!(matches!(err, ClientError::Graph(_)));
  }

  #[test]
  fn graphql_accepted_errors_pass_through() {
    let mut server = mockito::Server::new();
    server
      .mock("POST", "/graphql")
      .with_body(r#"{"data":{"repository":null},"errors":[{"type":"NOT_FOUND"}]}"#)
      .create();

    let accept = |errors: &[Value]| errors.len() == 1 && errors[0]["type"] == "NOT_FOUND";
    let data = client(&server)
      .graphql("query { repository { id } }", serde_json::json!({}), Some(&accept))
      .unwrap();
    assert!(data["repository"].is_null());
  }
}
