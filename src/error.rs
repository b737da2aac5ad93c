//! Normalized error type for remote calls.
//!
//! Every failure of the request layer surfaces as an [`ApiError`] carrying a
//! category, the HTTP transport status, a human-readable message and, when the
//! server sent one, the envelope payload. Callers never see a raw transport
//! error.

use serde_json::Value;
use thiserror::Error;

/// Category of a failed remote call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
  /// Transport unreachable: connection refused, DNS failure, aborted request
  Network,
  /// The bounded wait elapsed before the call completed
  Timeout,
  /// The response envelope was malformed
  Protocol,
  /// The server reported a failure in the envelope
  Api,
  /// Anything uncategorized
  Unknown,
}

/// Error value for a failed remote call.
///
/// `status` carries the HTTP transport status, or 0 when the transport never
/// produced one (network failures, unclassified errors). Timeouts use 408.
#[derive(Debug, Clone, Error)]
#[error("{kind:?} error ({status}): {message}")]
pub struct ApiError {
  pub kind: ErrorKind,
  pub status: u16,
  pub message: String,
  /// Envelope payload accompanying the error, when the server sent one
  pub payload: Option<Value>,
}

impl ApiError {
  pub fn network(message: impl Into<String>) -> Self {
    Self {
      kind: ErrorKind::Network,
      status: 0,
      message: message.into(),
      payload: None,
    }
  }

  pub fn timeout() -> Self {
    Self {
      kind: ErrorKind::Timeout,
      status: 408,
      message: "Request timeout".to_string(),
      payload: None,
    }
  }

  /// Envelope malformed: missing or non-boolean `success` flag, or an
  /// undecodable body. The offending payload rides along when available.
  pub fn protocol(status: u16, payload: Option<Value>) -> Self {
    Self {
      kind: ErrorKind::Protocol,
      status,
      message: "Invalid API response format".to_string(),
      payload,
    }
  }

  /// Server-declared failure, or a transport status that contradicts a
  /// claimed success.
  pub fn api(status: u16, message: impl Into<String>, payload: Option<Value>) -> Self {
    Self {
      kind: ErrorKind::Api,
      status,
      message: message.into(),
      payload,
    }
  }

  pub fn unknown(message: impl Into<String>) -> Self {
    Self {
      kind: ErrorKind::Unknown,
      status: 0,
      message: message.into(),
      payload: None,
    }
  }

  pub fn is_timeout(&self) -> bool {
    self.kind == ErrorKind::Timeout
  }
}
