//! Errors returned by the GitLab client.

use reqwest::StatusCode;
use serde_json::Value;
use thiserror::Error;

/// Failures of a remote call.
///
/// `Clone` so one in-flight result can be handed to every caller waiting on
/// it; underlying transport errors are kept as their message.
#[derive(Debug, Clone, Error)]
pub enum ApiError {
  #[error("Unauthorized")]
  Unauthorized,

  #[error("Forbidden")]
  Forbidden,

  #[error("Insufficient API token scope")]
  InsufficientScope,

  #[error("Not found")]
  NotFound,

  /// Any other 4xx, with the server's message
  #[error("{message}")]
  ClientError { status: u16, message: String },

  #[error("http status {0}")]
  UnknownStatus(u16),

  #[error("download failed: {0}")]
  Download(String),

  #[error("request failed: {0}")]
  Transport(String),

  #[error("unexpected response: {0}")]
  Decode(String),

  #[error("invalid client configuration: {0}")]
  Config(String),
}

impl From<reqwest::Error> for ApiError {
  fn from(e: reqwest::Error) -> Self {
    ApiError::Transport(e.to_string())
  }
}

impl From<serde_json::Error> for ApiError {
  fn from(e: serde_json::Error) -> Self {
    ApiError::Decode(e.to_string())
  }
}

impl From<url::ParseError> for ApiError {
  fn from(e: url::ParseError) -> Self {
    ApiError::Config(format!("bad URL: {}", e))
  }
}

/// Map a non-success status and its body to an error.
///
/// Returns `None` for 2xx.
pub fn error_for_status(status: StatusCode, body: &[u8]) -> Option<ApiError> {
  if status.is_success() {
    return None;
  }

  let json: Option<Value> = serde_json::from_slice(body).ok();
  let error = match status.as_u16() {
    401 => ApiError::Unauthorized,
    403 => {
      let scope = json
        .as_ref()
        .and_then(|j| j.get("error"))
        .and_then(Value::as_str)
        == Some("insufficient_scope");
      if scope {
        ApiError::InsufficientScope
      } else {
        ApiError::Forbidden
      }
    }
    404 => ApiError::NotFound,
    code @ 400..=499 => {
      let message = match json.as_ref().and_then(|j| j.get("message")) {
        Some(Value::String(s)) => s.clone(),
        Some(Value::Null) | None => format!("http status {}", code),
        // Validation errors come back as an object of field -> messages
        Some(other) => other.to_string(),
      };
      ApiError::ClientError {
        status: code,
        message,
      }
    }
    code => ApiError::UnknownStatus(code),
  };
  Some(error)
}
