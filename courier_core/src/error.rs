use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum CoreError {
  #[error("database error: {0}")]
  Database(#[from] sqlx::Error),

  #[error("validation error: {0}")]
  Validation(String),

  #[error("not found: {0}")]
  NotFound(String),

  #[error("conflict: {0}")]
  Conflict(String),

  #[error("authentication error: {0}")]
  Authentication(String),

  #[error("unauthorized: {0}")]
  Unauthorized(String),

  #[error("serialization error: {0}")]
  Serialization(#[from] serde_json::Error),

  #[error("decryption error: {0}")]
  Decryption(String),

  #[error("internal error: {0}")]
  Internal(String),
}

/// Failure classification for a delivery attempt.
///
/// Senders classify every failed send into one of these buckets; the worker
/// pool uses the classification to decide between RETRYING and FAILED.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "text", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum FailureReason {
  /// Credentials rejected by a provider
  AuthError,
  /// Malformed recipient, oversized payload, invalid template output
  ContentError,
  /// Connect/DNS/TLS failure, socket timeout
  NetworkError,
  /// Provider-specific error; retriable by default with explicit per-channel
  /// non-retriable codes
  ProviderError,
  /// Unclassified failure inside the worker
  InternalError,
}

impl FailureReason {
  /// Default retriability for the class. Provider errors carry an explicit
  /// per-channel override on the send outcome.
  pub fn is_retriable(&self) -> bool {
    match self {
      FailureReason::AuthError | FailureReason::ContentError => false,
      FailureReason::NetworkError | FailureReason::ProviderError | FailureReason::InternalError => {
        true
      }
    }
  }

  pub fn as_str(&self) -> &'static str {
    match self {
      FailureReason::AuthError => "auth_error",
      FailureReason::ContentError => "content_error",
      FailureReason::NetworkError => "network_error",
      FailureReason::ProviderError => "provider_error",
      FailureReason::InternalError => "internal_error",
    }
  }
}

impl std::fmt::Display for FailureReason {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    write!(f, "{}", self.as_str())
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_default_retriability() {
    assert!(!FailureReason::AuthError.is_retriable());
    assert!(!FailureReason::ContentError.is_retriable());
    assert!(FailureReason::NetworkError.is_retriable());
    assert!(FailureReason::ProviderError.is_retriable());
    assert!(FailureReason::InternalError.is_retriable());
  }
}
