use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;

use super::ids::TenantId;

/// Immutable event envelope consumed from the event log.
///
/// `event_type` is a dotted-path string such as `user.login.failed`;
/// `payload` is the producer's nested key/value map, carried as-is.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventEnvelope {
  pub event_type: String,
  pub tenant_id: TenantId,
  pub timestamp: DateTime<Utc>,
  #[serde(default)]
  pub payload: Map<String, Value>,
  #[serde(default)]
  pub metadata: EventMetadata,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EventMetadata {
  /// Producer-assigned id used for idempotent delivery-record creation
  #[serde(skip_serializing_if = "Option::is_none")]
  pub event_id: Option<String>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub source: Option<String>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub correlation_id: Option<String>,
}

#[derive(Error, Debug)]
pub enum EnvelopeError {
  #[error("invalid envelope JSON: {0}")]
  Malformed(#[from] serde_json::Error),

  #[error("missing or empty field: {0}")]
  MissingField(&'static str),
}

impl EventEnvelope {
  /// Decode an envelope from raw bytes and validate the required fields.
  pub fn decode(bytes: &[u8]) -> Result<Self, EnvelopeError> {
    let envelope: EventEnvelope = serde_json::from_slice(bytes)?;
    envelope.validate()?;
    Ok(envelope)
  }

  fn validate(&self) -> Result<(), EnvelopeError> {
    if self.event_type.trim().is_empty() {
      return Err(EnvelopeError::MissingField("event_type"));
    }
    if self.tenant_id.as_str().trim().is_empty() {
      return Err(EnvelopeError::MissingField("tenant_id"));
    }
    Ok(())
  }

  /// String-typed payload field lookup
  pub fn payload_str(&self, key: &str) -> Option<&str> {
    self.payload.get(key).and_then(Value::as_str)
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_decode_valid_envelope() {
    let raw = serde_json::json!({
      "event_type": "user.login.failed",
      "tenant_id": "t1",
      "timestamp": "2026-01-15T10:00:00Z",
      "payload": {"email": "a@b.test"},
      "metadata": {"event_id": "evt-1"}
    });

    let envelope = EventEnvelope::decode(raw.to_string().as_bytes()).unwrap();
    assert_eq!(envelope.event_type, "user.login.failed");
    assert_eq!(envelope.tenant_id.as_str(), "t1");
    assert_eq!(envelope.payload_str("email"), Some("a@b.test"));
    assert_eq!(envelope.metadata.event_id.as_deref(), Some("evt-1"));
  }

  #[test]
  fn test_missing_tenant_rejected() {
    let raw = serde_json::json!({
      "event_type": "user.login.failed",
      "tenant_id": "",
      "timestamp": "2026-01-15T10:00:00Z",
    });

    let err = EventEnvelope::decode(raw.to_string().as_bytes()).unwrap_err();
    assert!(matches!(err, EnvelopeError::MissingField("tenant_id")));
  }

  #[test]
  fn test_malformed_timestamp_rejected() {
    let raw = serde_json::json!({
      "event_type": "user.login.failed",
      "tenant_id": "t1",
      "timestamp": "not-a-time",
    });

    assert!(matches!(
      EventEnvelope::decode(raw.to_string().as_bytes()).unwrap_err(),
      EnvelopeError::Malformed(_)
    ));
  }
}
