use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::channel::Channel;
use super::ids::{DeliveryId, TenantId};
use crate::error::FailureReason;

/// Lifecycle state of a delivery record.
///
/// A record is in-flight while PENDING or RETRYING; SUCCESS and FAILED are
/// terminal and immutable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "text", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum DeliveryState {
  Pending,
  Retrying,
  Success,
  Failed,
}

impl DeliveryState {
  pub fn is_terminal(&self) -> bool {
    matches!(self, DeliveryState::Success | DeliveryState::Failed)
  }

  pub fn is_in_flight(&self) -> bool {
    matches!(self, DeliveryState::Pending | DeliveryState::Retrying)
  }

  pub fn as_str(&self) -> &'static str {
    match self {
      DeliveryState::Pending => "pending",
      DeliveryState::Retrying => "retrying",
      DeliveryState::Success => "success",
      DeliveryState::Failed => "failed",
    }
  }
}

/// Rendered content snapshot carried by a delivery record
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RenderedContent {
  #[serde(skip_serializing_if = "Option::is_none")]
  pub subject: Option<String>,
  pub body: String,
  /// Channel-specific structured payload (push data, in-app frame body)
  #[serde(skip_serializing_if = "Option::is_none")]
  pub data: Option<Value>,
}

/// Durable row tracking a single attempt-chain for one
/// (channel, recipient, event) decision
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeliveryRecord {
  pub id: DeliveryId,
  pub tenant_id: TenantId,
  pub channel: Channel,
  pub recipient: String,
  pub content: RenderedContent,
  /// Original handler context, persisted for audit
  pub context: Value,
  /// Idempotency key `(tenant, event_id, channel, recipient)` when the
  /// source event carried `metadata.event_id`
  pub event_id: Option<String>,
  pub state: DeliveryState,
  pub retry_count: u32,
  pub max_retries: u32,
  pub failure_reason: Option<FailureReason>,
  pub provider_response: Option<String>,
  pub created_at: DateTime<Utc>,
  pub sent_at: Option<DateTime<Utc>>,
  pub next_attempt_at: DateTime<Utc>,
  /// Set while a worker holds the record; reclaimed after the lease timeout
  pub claimed_at: Option<DateTime<Utc>>,
  pub deleted_at: Option<DateTime<Utc>>,
}

pub const DEFAULT_MAX_RETRIES: u32 = 3;

impl DeliveryRecord {
  pub fn new(
    tenant_id: TenantId,
    channel: Channel,
    recipient: impl Into<String>,
    content: RenderedContent,
    context: Value,
  ) -> Self {
    let now = Utc::now();
    Self {
      id: DeliveryId::generate(),
      tenant_id,
      channel,
      recipient: recipient.into(),
      content,
      context,
      event_id: None,
      state: DeliveryState::Pending,
      retry_count: 0,
      max_retries: DEFAULT_MAX_RETRIES,
      failure_reason: None,
      provider_response: None,
      created_at: now,
      sent_at: None,
      next_attempt_at: now,
      claimed_at: None,
      deleted_at: None,
    }
  }

  pub fn with_event_id(mut self, event_id: Option<String>) -> Self {
    self.event_id = event_id;
    self
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_state_predicates() {
    assert!(DeliveryState::Pending.is_in_flight());
    assert!(DeliveryState::Retrying.is_in_flight());
    assert!(DeliveryState::Success.is_terminal());
    assert!(DeliveryState::Failed.is_terminal());
    assert!(!DeliveryState::Success.is_in_flight());
  }

  #[test]
  fn test_new_record_is_immediately_due() {
    let record = DeliveryRecord::new(
      TenantId::new("t1"),
      Channel::Email,
      "a@b.test",
      RenderedContent {
        subject: Some("hi".into()),
        body: "hello".into(),
        data: None,
      },
      serde_json::json!({}),
    );

    assert_eq!(record.state, DeliveryState::Pending);
    assert_eq!(record.retry_count, 0);
    assert!(record.next_attempt_at <= Utc::now());
    assert!(record.claimed_at.is_none());
  }
}
