//! The HTTP seam.
//!
//! Everything above this module talks to the platform through [`Transport`],
//! so tests can swap the network for an in-memory fake.

use std::{future::Future, time::Duration};

pub use reqwest::Method;
use reqwest::{
  Client, StatusCode,
  header::{ACCEPT, AUTHORIZATION},
};
use serde::Serialize;

use crate::{ClientConfig, Error, Result};

/// Query parameters and JSON body of a request.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RequestOptions {
  pub query: Vec<(String, String)>,
  pub body:  Option<serde_json::Value>,
}

impl RequestOptions {
  pub fn new() -> Self { Self::default() }

  pub fn query(mut self, key: impl Into<String>, value: impl ToString) -> Self {
    self.query.push((key.into(), value.to_string()));
    self
  }

  pub fn json<B: Serialize>(mut self, body: &B) -> Result<Self> {
    self.body = Some(serde_json::to_value(body)?);
    Ok(self)
  }
}

/// Requests against the platform API.
///
/// `path` is relative to the API root, e.g. `/v2/assets/` or
/// `/v1/submissions.json`.
pub trait Transport: Send + Sync + 'static {
  /// Send one JSON request and return the decoded JSON response (`null` for
  /// an empty body).
  fn send(
    &self,
    method: Method,
    path: &str,
    options: RequestOptions,
  ) -> impl Future<Output = Result<serde_json::Value>> + Send;

  /// `GET` a binary resource, such as an attachment.
  fn download(&self, path: &str) -> impl Future<Output = Result<Vec<u8>>> + Send;
}

/// [`Transport`] over `reqwest`, authenticated with an API token.
///
/// Cheap to clone; the inner [`reqwest::Client`] is `Arc`-based.
#[derive(Clone)]
pub struct HttpTransport {
  client:      Client,
  base_url:    String,
  v1_base_url: String,
  token:       String,
}

impl HttpTransport {
  pub fn new(config: &ClientConfig) -> Result<Self> {
    let client = Client::builder()
      .timeout(Duration::from_secs(config.timeout_secs))
      .build()?;
    Ok(Self {
      client,
      base_url: api_root(&config.url),
      v1_base_url: api_root(config.v1_url()),
      token: config.token.clone(),
    })
  }

  /// `/v1/` paths go to the v1 server, everything else to the main one.
  fn url(&self, path: &str) -> String {
    let base = if path.starts_with("/v1/") {
      &self.v1_base_url
    } else {
      &self.base_url
    };
    format!("{base}{path}")
  }

  fn request(&self, method: Method, path: &str) -> reqwest::RequestBuilder {
    self
      .client
      .request(method, self.url(path))
      .header(AUTHORIZATION, format!("Token {}", self.token))
  }
}

fn api_root(url: &str) -> String { format!("{}/api", url.trim_end_matches('/')) }

fn api_error(method: &Method, path: &str, status: StatusCode, body: &str) -> Error {
  Error::Api {
    status:  status.as_u16(),
    method:  method.to_string(),
    path:    path.to_string(),
    message: error_message(body),
  }
}

impl Transport for HttpTransport {
  async fn send(
    &self,
    method: Method,
    path: &str,
    options: RequestOptions,
  ) -> Result<serde_json::Value> {
    let mut request = self
      .request(method.clone(), path)
      .header(ACCEPT, "application/json");
    if !options.query.is_empty() {
      request = request.query(&options.query);
    }
    if let Some(body) = &options.body {
      request = request.json(body);
    }

    tracing::debug!(%method, path, "sending request");
    let response = request.send().await?;
    let status = response.status();
    let text = response.text().await?;

    if !status.is_success() {
      return Err(api_error(&method, path, status, &text));
    }
    if text.trim().is_empty() {
      return Ok(serde_json::Value::Null);
    }
    Ok(serde_json::from_str(&text)?)
  }

  async fn download(&self, path: &str) -> Result<Vec<u8>> {
    tracing::debug!(path, "downloading");
    let response = self.request(Method::GET, path).send().await?;
    let status = response.status();
    if !status.is_success() {
      let text = response.text().await?;
      return Err(api_error(&Method::GET, path, status, &text));
    }
    Ok(response.bytes().await?.to_vec())
  }
}

/// The platform reports errors as `{"detail": ..}` (sometimes `details`).
fn error_message(body: &str) -> String {
  let detail = serde_json::from_str::<serde_json::Value>(body)
    .ok()
    .and_then(|json| json.get("detail").or_else(|| json.get("details")).cloned());
  match detail {
    Some(serde_json::Value::String(s)) => s,
    Some(other) => other.to_string(),
    None => body.trim().to_string(),
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn error_message_prefers_detail() {
    assert_eq!(error_message(r#"{"detail": "Not found."}"#), "Not found.");
    assert_eq!(error_message(r#"{"details": {"x": 1}}"#), r#"{"x":1}"#);
    assert_eq!(error_message(" <html>bad gateway</html>\n"), "<html>bad gateway</html>");
  }

  #[test]
  fn api_root_is_appended_once() {
    let transport =
      HttpTransport::new(&ClientConfig::new("https://kf.example.org/", "t")).unwrap();
    assert_eq!(transport.url("/v2/assets/"), "https://kf.example.org/api/v2/assets/");
  }

  #[test]
  fn v1_paths_use_the_v1_server() {
    let mut config = ClientConfig::new("https://kf.example.org", "t");
    let transport = HttpTransport::new(&config).unwrap();
    assert_eq!(transport.url("/v1/forms"), "https://kf.example.org/api/v1/forms");

    config.v1_url = Some("https://kc.example.org/".into());
    let transport = HttpTransport::new(&config).unwrap();
    assert_eq!(
      transport.url("/v1/submissions.json"),
      "https://kc.example.org/api/v1/submissions.json"
    );
    assert_eq!(transport.url("/v2/assets/"), "https://kf.example.org/api/v2/assets/");
  }

  #[test]
  fn options_builder() {
    let options = RequestOptions::new()
      .query("limit", 20)
      .json(&serde_json::json!({ "a": 1 }))
      .unwrap();
    assert_eq!(options.query, [("limit".to_string(), "20".to_string())]);
    assert_eq!(options.body, Some(serde_json::json!({ "a": 1 })));
  }
}
