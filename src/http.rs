//! Request layer: one bounded, normalized call per invocation.
//!
//! Wraps reqwest with a timeout race and decodes the service's
//! `{ success, message, data }` envelope into a typed outcome. No retries
//! happen here; retry policy belongs to the caller (the query reader retries
//! reads once, the mutation coordinator never retries writes).

use reqwest::{Method, StatusCode};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use std::future::Future;
use std::time::Duration;
use tracing::debug;
use url::Url;

use crate::error::ApiError;

/// HTTP client for the remote service.
#[derive(Clone)]
pub struct HttpClient {
  client: reqwest::Client,
  base_url: Url,
  timeout: Duration,
}

impl HttpClient {
  /// Create a client rooted at `base_url` with a per-request timeout.
  pub fn new(mut base_url: Url, timeout: Duration) -> Self {
    // A trailing slash makes Url::join treat the last path segment as a
    // directory instead of replacing it.
    if !base_url.path().ends_with('/') {
      let path = format!("{}/", base_url.path());
      base_url.set_path(&path);
    }
    Self {
      client: reqwest::Client::new(),
      base_url,
      timeout,
    }
  }

  /// Issue one call and decode the envelope's `data` into `T`.
  pub async fn request<T, B>(&self, method: Method, path: &str, body: Option<&B>) -> Result<T, ApiError>
  where
    T: DeserializeOwned,
    B: Serialize + ?Sized,
  {
    let data = self.request_value(method, path, body).await?;
    serde_json::from_value(data).map_err(|_| ApiError::protocol(0, None))
  }

  /// Issue one call and return the envelope's `data` undecoded.
  ///
  /// The cache stores type-erased values, so this is what the query reader
  /// and mutation coordinator dispatch through.
  pub async fn request_value<B>(
    &self,
    method: Method,
    path: &str,
    body: Option<&B>,
  ) -> Result<Value, ApiError>
  where
    B: Serialize + ?Sized,
  {
    let url = self
      .base_url
      .join(path.trim_start_matches('/'))
      .map_err(|e| ApiError::unknown(format!("invalid request path {}: {}", path, e)))?;

    debug!(method = %method, url = %url, "dispatching request");

    let mut builder = self.client.request(method, url);
    if let Some(body) = body {
      builder = builder.json(body);
    }

    let call = async move {
      let response = builder.send().await?;
      let status = response.status();
      let body: Value = response.json().await?;
      Ok((status, body))
    };

    let (status, body) = bounded(self.timeout, call).await?;
    decode_envelope(status, body)
  }
}

/// Race a transport call against the timeout.
///
/// Dropping the losing side cancels it: an elapsed timeout aborts the
/// in-flight request, and a completed request drops the timer. Nothing fires
/// late on either exit path.
async fn bounded<F>(limit: Duration, call: F) -> Result<(StatusCode, Value), ApiError>
where
  F: Future<Output = Result<(StatusCode, Value), reqwest::Error>>,
{
  match tokio::time::timeout(limit, call).await {
    Ok(Ok(ok)) => Ok(ok),
    Ok(Err(err)) => Err(classify_transport(err)),
    Err(_) => Err(ApiError::timeout()),
  }
}

/// Map a reqwest error onto the outcome taxonomy.
fn classify_transport(err: reqwest::Error) -> ApiError {
  if err.is_timeout() {
    ApiError::timeout()
  } else if err.is_decode() {
    // Body was not the JSON envelope at all
    ApiError::protocol(err.status().map(|s| s.as_u16()).unwrap_or(0), None)
  } else if err.is_connect() || err.is_request() || err.is_body() || err.is_redirect() {
    ApiError::network(err.to_string())
  } else {
    ApiError::unknown(err.to_string())
  }
}

/// Normalize the `{ success, message, data }` envelope.
///
/// `success` missing or non-boolean is a protocol error. A declared failure
/// is an API error. A non-2xx transport status with `success: true` is an
/// inconsistent response; transport failure takes precedence over the claimed
/// success, so that is an API error too.
fn decode_envelope(status: StatusCode, body: Value) -> Result<Value, ApiError> {
  let success = match body.get("success") {
    Some(Value::Bool(b)) => *b,
    _ => return Err(ApiError::protocol(status.as_u16(), Some(body))),
  };

  let message = body
    .get("message")
    .and_then(Value::as_str)
    .filter(|m| !m.is_empty())
    .map(String::from);
  let data = body.get("data").cloned().unwrap_or(Value::Null);

  if !success {
    let message = message.unwrap_or_else(|| "An error occurred".to_string());
    return Err(ApiError::api(status.as_u16(), message, Some(data)));
  }

  if !status.is_success() {
    let message = message.unwrap_or_else(|| format!("HTTP error {}", status.as_u16()));
    return Err(ApiError::api(status.as_u16(), message, Some(data)));
  }

  Ok(data)
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::error::ErrorKind;
  use serde_json::json;

  #[test]
  fn envelope_success_yields_data() {
    let data = decode_envelope(
      StatusCode::OK,
      json!({"success": true, "message": "ok", "data": [{"id": 1}]}),
    )
    .expect("data");
    assert_eq!(data, json!([{"id": 1}]));
  }

  #[test]
  fn missing_success_flag_is_protocol_error() {
    let err = decode_envelope(StatusCode::OK, json!({"data": []})).unwrap_err();
    assert_eq!(err.kind, ErrorKind::Protocol);
    assert_eq!(err.status, 200);
    assert_eq!(err.payload, Some(json!({"data": []})));
  }

  #[test]
  fn non_boolean_success_flag_is_protocol_error() {
    let err = decode_envelope(
      StatusCode::OK,
      json!({"success": "yes", "message": "", "data": null}),
    )
    .unwrap_err();
    assert_eq!(err.kind, ErrorKind::Protocol);
  }

  #[test]
  fn declared_failure_is_api_error_with_envelope_message() {
    let err = decode_envelope(
      StatusCode::OK,
      json!({"success": false, "message": "teacher not found", "data": null}),
    )
    .unwrap_err();
    assert_eq!(err.kind, ErrorKind::Api);
    assert_eq!(err.status, 200);
    assert_eq!(err.message, "teacher not found");
  }

  #[test]
  fn transport_failure_beats_claimed_success() {
    let err = decode_envelope(
      StatusCode::INTERNAL_SERVER_ERROR,
      json!({"success": true, "message": "", "data": {"id": 1}}),
    )
    .unwrap_err();
    assert_eq!(err.kind, ErrorKind::Api);
    assert_eq!(err.status, 500);
    assert_eq!(err.message, "HTTP error 500");
    assert_eq!(err.payload, Some(json!({"id": 1})));
  }

  #[tokio::test]
  async fn timeout_yields_408_and_no_late_completion() {
    let outcome = bounded(Duration::from_millis(10), futures::future::pending()).await;
    let err = outcome.unwrap_err();
    assert!(err.is_timeout());
    assert_eq!(err.status, 408);

    // The raced future was dropped with the timer; give the runtime a beat
    // to prove nothing fires afterwards.
    tokio::time::sleep(Duration::from_millis(20)).await;
  }

  #[tokio::test]
  async fn completed_call_is_passed_through() {
    let outcome = bounded(Duration::from_millis(50), async {
      Ok((StatusCode::OK, json!({"success": true, "data": 1})))
    })
    .await
    .expect("ok");
    assert_eq!(outcome.0, StatusCode::OK);
  }
}
