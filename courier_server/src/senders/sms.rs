use async_trait::async_trait;
use courier_core::{credential::secret_keys, Channel, Credential, DeliveryRecord, FailureReason};
use reqwest::StatusCode;
use serde::Deserialize;
use std::time::Duration;
use tracing::debug;

use super::{ChannelSender, SendOutcome};

/// Provider error codes that retrying cannot fix (invalid destination
/// number, blocked sender and the like)
const NON_RETRIABLE_CODES: &[i64] = &[21211, 21212, 21214, 21408, 21610];

#[derive(Debug, Deserialize)]
struct ProviderErrorBody {
  code: Option<i64>,
  message: Option<String>,
}

/// SMS sender delegating to the provider's REST API with per-tenant
/// `account_sid` / `auth_token` / `from_number` credentials.
pub struct SmsSender {
  http: reqwest::Client,
}

impl SmsSender {
  pub fn new() -> Self {
    Self {
      http: reqwest::Client::builder()
        .timeout(Duration::from_secs(30))
        .build()
        .unwrap_or_default(),
    }
  }

  fn classify_status(status: StatusCode, body: &str) -> SendOutcome {
    if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
      return SendOutcome::failure(FailureReason::AuthError, Some(body.to_string()));
    }

    let parsed: Option<ProviderErrorBody> = serde_json::from_str(body).ok();
    let code = parsed.as_ref().and_then(|b| b.code);
    let message = parsed
      .and_then(|b| b.message)
      .unwrap_or_else(|| body.to_string());
    let response = Some(format!("{}: {}", code.unwrap_or(status.as_u16() as i64), message));

    if let Some(code) = code {
      if NON_RETRIABLE_CODES.contains(&code) {
        return SendOutcome::failure_with(FailureReason::ProviderError, false, response);
      }
    }

    // Rate limits, quota and provider 5xx all stay retriable
    SendOutcome::failure(FailureReason::ProviderError, response)
  }
}

impl Default for SmsSender {
  fn default() -> Self {
    Self::new()
  }
}

#[async_trait]
impl ChannelSender for SmsSender {
  fn channel(&self) -> Channel {
    Channel::Sms
  }

  async fn send(&self, credential: Option<&Credential>, record: &DeliveryRecord) -> SendOutcome {
    let Some(credential) = credential else {
      return SendOutcome::failure(FailureReason::AuthError, Some("missing sms credential".into()));
    };

    if !is_e164(&record.recipient) {
      return SendOutcome::failure(
        FailureReason::ContentError,
        Some(format!("recipient is not E.164: {}", record.recipient)),
      );
    }

    let account_sid = match credential.secret(secret_keys::SMS_ACCOUNT_SID) {
      Some(sid) => sid,
      None => {
        return SendOutcome::failure(FailureReason::AuthError, Some("missing account_sid".into()))
      }
    };
    let auth_token = credential.secret(secret_keys::SMS_AUTH_TOKEN).unwrap_or_default();
    let from_number = credential.secret(secret_keys::SMS_FROM_NUMBER).unwrap_or_default();
    let api_base = credential
      .secret("api_base")
      .unwrap_or("https://api.twilio.com");

    let url = format!(
      "{}/2010-04-01/Accounts/{}/Messages.json",
      api_base.trim_end_matches('/'),
      account_sid
    );

    let result = self
      .http
      .post(&url)
      .basic_auth(account_sid, Some(auth_token))
      .form(&[
        ("To", record.recipient.as_str()),
        ("From", from_number),
        ("Body", record.content.body.as_str()),
      ])
      .send()
      .await;

    match result {
      Ok(response) => {
        let status = response.status();
        let body = response.text().await.unwrap_or_default();

        if status.is_success() {
          debug!(record = %record.id, "SMS provider accepted message");
          SendOutcome::success(Some(body))
        } else {
          Self::classify_status(status, &body)
        }
      }
      Err(e) if e.is_timeout() || e.is_connect() => {
        SendOutcome::failure(FailureReason::NetworkError, Some(e.to_string()))
      }
      Err(e) => SendOutcome::failure(FailureReason::ProviderError, Some(e.to_string())),
    }
  }
}

/// E.164: leading `+`, then 8 to 15 digits, first digit nonzero
pub fn is_e164(number: &str) -> bool {
  let Some(rest) = number.strip_prefix('+') else {
    return false;
  };
  (8..=15).contains(&rest.len())
    && rest.chars().all(|c| c.is_ascii_digit())
    && !rest.starts_with('0')
}
