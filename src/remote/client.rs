//! Remote gateway: one typed request against the upstream statistics API.

use color_eyre::{eyre::eyre, Result};
use reqwest::header::{HeaderMap, HeaderValue};
use serde_json::Value;
use std::future::Future;
use std::time::Duration;
use thiserror::Error;
use tracing::debug;
use url::Url;

use crate::config::ApiConfig;

/// A request for one upstream resource: path plus ordered filters.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApiRequest {
  pub path: String,
  pub params: Vec<(String, String)>,
}

impl ApiRequest {
  pub fn new(path: impl Into<String>) -> Self {
    Self {
      path: path.into(),
      params: Vec::new(),
    }
  }

  pub fn param(mut self, name: &str, value: impl ToString) -> Self {
    self.params.push((name.to_string(), value.to_string()));
    self
  }

  pub fn param_opt(self, name: &str, value: Option<impl ToString>) -> Self {
    match value {
      Some(v) => self.param(name, v),
      None => self,
    }
  }

  /// Look up a filter value by name.
  pub fn get(&self, name: &str) -> Option<&str> {
    self
      .params
      .iter()
      .find(|(k, _)| k == name)
      .map(|(_, v)| v.as_str())
  }
}

impl std::fmt::Display for ApiRequest {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    write!(f, "/{}", self.path)?;
    for (i, (k, v)) in self.params.iter().enumerate() {
      write!(f, "{}{}={}", if i == 0 { '?' } else { '&' }, k, v)?;
    }
    Ok(())
  }
}

/// Failure of a single gateway call, before any retry policy is applied.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum GatewayError {
  /// Non-2xx HTTP status
  #[error("HTTP {status}: {message}")]
  Status { status: u16, message: String },
  /// Connection, TLS or timeout failure
  #[error("transport error: {0}")]
  Transport(String),
  /// Body could not be decoded
  #[error("malformed payload: {0}")]
  Malformed(String),
  /// 200 response carrying an error list we can't classify
  #[error("upstream rejected request: {0}")]
  Rejected(String),
}

/// Capability to request a resource from the upstream API.
pub trait Gateway: Send + Sync {
  /// Perform one request and return the unwrapped `response` payload.
  fn request(
    &self,
    request: &ApiRequest,
  ) -> impl Future<Output = std::result::Result<Value, GatewayError>> + Send;
}

/// HTTP gateway for the API-Football v3 API.
#[derive(Clone)]
pub struct HttpGateway {
  client: reqwest::Client,
  base: Url,
}

impl HttpGateway {
  pub fn new(config: &ApiConfig, api_key: Option<String>) -> Result<Self> {
    let mut headers = HeaderMap::new();
    if let Some(key) = api_key {
      let value =
        HeaderValue::from_str(&key).map_err(|e| eyre!("Invalid API key header value: {}", e))?;
      headers.insert("x-apisports-key", value);
    }

    let client = reqwest::Client::builder()
      .user_agent(concat!("kickoff/", env!("CARGO_PKG_VERSION")))
      .default_headers(headers)
      .timeout(Duration::from_secs(config.timeout_secs))
      .build()
      .map_err(|e| eyre!("Failed to create HTTP client: {}", e))?;

    // A trailing slash makes Url::join append instead of replacing the last segment
    let mut base = config.url.clone();
    if !base.ends_with('/') {
      base.push('/');
    }
    let base = Url::parse(&base).map_err(|e| eyre!("Invalid API url {}: {}", config.url, e))?;

    Ok(Self { client, base })
  }

  fn url_for(&self, request: &ApiRequest) -> std::result::Result<Url, GatewayError> {
    let mut url = self
      .base
      .join(request.path.trim_start_matches('/'))
      .map_err(|e| GatewayError::Malformed(format!("bad path {}: {}", request.path, e)))?;
    if !request.params.is_empty() {
      url
        .query_pairs_mut()
        .extend_pairs(request.params.iter().map(|(k, v)| (k.as_str(), v.as_str())));
    }
    Ok(url)
  }
}

impl Gateway for HttpGateway {
  async fn request(&self, request: &ApiRequest) -> std::result::Result<Value, GatewayError> {
    let url = self.url_for(request)?;
    debug!("GET {}", url);

    let response = self.client.get(url).send().await.map_err(|e| {
      if e.is_timeout() {
        GatewayError::Transport(format!("request timed out: {}", e))
      } else {
        GatewayError::Transport(e.to_string())
      }
    })?;

    let status = response.status();
    if !status.is_success() {
      let body = response.text().await.unwrap_or_default();
      return Err(GatewayError::Status {
        status: status.as_u16(),
        message: truncate(&body, 200),
      });
    }

    let body: Value = response
      .json()
      .await
      .map_err(|e| GatewayError::Malformed(e.to_string()))?;

    unwrap_envelope(body)
  }
}

/// Extract `response` from the `{"errors": ..., "response": ...}` envelope.
///
/// The API reports quota and key problems inside 200 responses; those are
/// mapped onto the HTTP status they stand for.
pub fn unwrap_envelope(mut body: Value) -> std::result::Result<Value, GatewayError> {
  let errors: Vec<(String, String)> = match body.get("errors") {
    Some(Value::Object(map)) => map
      .iter()
      .map(|(k, v)| (k.to_lowercase(), value_text(v)))
      .collect(),
    Some(Value::Array(list)) => list.iter().map(|v| (String::new(), value_text(v))).collect(),
    _ => Vec::new(),
  };

  if !errors.is_empty() {
    let message = errors
      .iter()
      .map(|(k, v)| if k.is_empty() { v.clone() } else { format!("{}: {}", k, v) })
      .collect::<Vec<_>>()
      .join("; ");

    let has_key = |names: &[&str]| errors.iter().any(|(k, _)| names.contains(&k.as_str()));
    if has_key(&["ratelimit", "requests"]) {
      return Err(GatewayError::Status {
        status: 429,
        message,
      });
    }
    if has_key(&["token", "access", "subscription"]) {
      return Err(GatewayError::Status {
        status: 403,
        message,
      });
    }
    return Err(GatewayError::Rejected(message));
  }

  match body.get_mut("response") {
    Some(response) => Ok(response.take()),
    None => Err(GatewayError::Malformed(
      "missing `response` field".to_string(),
    )),
  }
}

fn value_text(value: &Value) -> String {
  match value {
    Value::String(s) => s.clone(),
    other => other.to_string(),
  }
}

fn truncate(s: &str, max: usize) -> String {
  match s.char_indices().nth(max) {
    Some((idx, _)) => format!("{}...", &s[..idx]),
    None => s.to_string(),
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use mockito::Matcher;
  use serde_json::json;

  fn gateway(url: String) -> HttpGateway {
    gateway_with_timeout(url, 5)
  }

  fn gateway_with_timeout(url: String, timeout_secs: u64) -> HttpGateway {
    let config = ApiConfig { url, timeout_secs };
    HttpGateway::new(&config, Some("secret".into())).unwrap()
  }

  #[test]
  fn test_request_display() {
    let request = ApiRequest::new("fixtures")
      .param("league", 39)
      .param_opt("round", None::<String>)
      .param("season", 2024);
    assert_eq!(request.to_string(), "/fixtures?league=39&season=2024");
    assert_eq!(request.get("season"), Some("2024"));
  }

  #[test]
  fn test_envelope_success() {
    let body = json!({"errors": [], "response": [{"id": 1}]});
    assert_eq!(unwrap_envelope(body).unwrap(), json!([{"id": 1}]));
  }

  #[test]
  fn test_envelope_in_body_errors() {
    let limited = json!({"errors": {"rateLimit": "Too many requests"}, "response": []});
    assert!(matches!(
      unwrap_envelope(limited),
      Err(GatewayError::Status { status: 429, .. })
    ));

    let forbidden = json!({"errors": {"token": "Error/Missing application key"}, "response": []});
    assert!(matches!(
      unwrap_envelope(forbidden),
      Err(GatewayError::Status { status: 403, .. })
    ));

    let other = json!({"errors": {"date": "bad date format"}, "response": []});
    assert_eq!(
      unwrap_envelope(other),
      Err(GatewayError::Rejected("date: bad date format".into()))
    );
  }

  #[test]
  fn test_envelope_missing_response() {
    assert!(matches!(
      unwrap_envelope(json!({"errors": []})),
      Err(GatewayError::Malformed(_))
    ));
  }

  #[tokio::test]
  async fn test_http_gateway_success() {
    let mut server = mockito::Server::new_async().await;
    let mock = server
      .mock("GET", "/fixtures")
      .match_query(Matcher::AllOf(vec![
        Matcher::UrlEncoded("league".into(), "39".into()),
        Matcher::UrlEncoded("season".into(), "2024".into()),
      ]))
      .match_header("x-apisports-key", "secret")
      .with_status(200)
      .with_header("content-type", "application/json")
      .with_body(r#"{"errors": [], "response": [1, 2]}"#)
      .create_async()
      .await;

    let request = ApiRequest::new("fixtures")
      .param("league", 39)
      .param("season", 2024);
    let value = gateway(server.url()).request(&request).await.unwrap();

    assert_eq!(value, json!([1, 2]));
    mock.assert_async().await;
  }

  #[tokio::test]
  async fn test_http_gateway_status_codes() {
    let mut server = mockito::Server::new_async().await;
    let _limited = server
      .mock("GET", "/standings")
      .match_query(Matcher::Any)
      .with_status(429)
      .with_body("slow down")
      .create_async()
      .await;
    let _forbidden = server
      .mock("GET", "/teams")
      .match_query(Matcher::Any)
      .with_status(403)
      .create_async()
      .await;

    let gw = gateway(server.url());
    assert_eq!(
      gw.request(&ApiRequest::new("standings").param("league", 1))
        .await,
      Err(GatewayError::Status {
        status: 429,
        message: "slow down".into()
      })
    );
    assert!(matches!(
      gw.request(&ApiRequest::new("teams").param("id", 33)).await,
      Err(GatewayError::Status { status: 403, .. })
    ));
  }

  #[tokio::test]
  async fn test_http_gateway_malformed_body() {
    let mut server = mockito::Server::new_async().await;
    let _mock = server
      .mock("GET", "/leagues")
      .with_status(200)
      .with_body("<html>maintenance</html>")
      .create_async()
      .await;

    let result = gateway(server.url())
      .request(&ApiRequest::new("leagues"))
      .await;
    assert!(matches!(result, Err(GatewayError::Malformed(_))));
  }

  #[tokio::test]
  async fn test_http_gateway_timeout_is_transport_error() {
    // Accepts connections but never answers
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let url = format!("http://{}", listener.local_addr().unwrap());
    let hold = tokio::spawn(async move {
      let mut open = Vec::new();
      while let Ok((socket, _)) = listener.accept().await {
        open.push(socket);
      }
    });

    let result = gateway_with_timeout(url, 1)
      .request(&ApiRequest::new("fixtures").param("live", "all"))
      .await;
    hold.abort();

    match result {
      Err(GatewayError::Transport(message)) => assert!(message.contains("timed out")),
      other => panic!("expected transport error, got {:?}", other),
    }
  }

  #[tokio::test]
  async fn test_http_gateway_connection_refused_is_transport_error() {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let url = format!("http://{}", listener.local_addr().unwrap());
    drop(listener);

    let result = gateway_with_timeout(url, 1)
      .request(&ApiRequest::new("leagues"))
      .await;

    assert!(matches!(result, Err(GatewayError::Transport(_))));
    assert!(matches!(
      crate::remote::retry::FetchOutcome::classify(result),
      crate::remote::retry::FetchOutcome::TransientError(_)
    ));
  }
}
