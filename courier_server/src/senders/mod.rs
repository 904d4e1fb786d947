//! Channel senders: one per transport, each classifying its own failures.
//!
//! Senders never raise across the component boundary; every attempt comes
//! back as a `SendOutcome` the worker pool can act on.

pub mod email;
pub mod inapp;
pub mod push;
pub mod sms;

pub use email::EmailSender;
pub use inapp::InAppSender;
pub use push::PushSender;
pub use sms::SmsSender;

use async_trait::async_trait;
use courier_core::{Channel, Credential, DeliveryRecord, FailureReason};

const PROVIDER_RESPONSE_MAX: usize = 1024;

/// Structured outcome of one delivery attempt
#[derive(Debug, Clone, PartialEq)]
pub enum SendOutcome {
  Success {
    provider_response: Option<String>,
  },
  Failure {
    reason: FailureReason,
    retriable: bool,
    provider_response: Option<String>,
  },
}

impl SendOutcome {
  pub fn success(provider_response: impl Into<Option<String>>) -> Self {
    SendOutcome::Success {
      provider_response: truncate_response(provider_response.into()),
    }
  }

  /// Failure with the taxonomy's default retriability for the class
  pub fn failure(reason: FailureReason, provider_response: impl Into<Option<String>>) -> Self {
    Self::failure_with(reason, reason.is_retriable(), provider_response)
  }

  /// Failure with an explicit per-channel retriability override
  pub fn failure_with(
    reason: FailureReason,
    retriable: bool,
    provider_response: impl Into<Option<String>>,
  ) -> Self {
    SendOutcome::Failure {
      reason,
      retriable,
      provider_response: truncate_response(provider_response.into()),
    }
  }

  pub fn is_success(&self) -> bool {
    matches!(self, SendOutcome::Success { .. })
  }
}

/// Provider responses are kept for observability only; cap them so a
/// verbose provider cannot bloat the record
fn truncate_response(response: Option<String>) -> Option<String> {
  response.map(|mut r| {
    if r.len() > PROVIDER_RESPONSE_MAX {
      r.truncate(PROVIDER_RESPONSE_MAX);
    }
    r
  })
}

#[async_trait]
pub trait ChannelSender: Send + Sync {
  fn channel(&self) -> Channel;

  async fn send(&self, credential: Option<&Credential>, record: &DeliveryRecord) -> SendOutcome;
}
