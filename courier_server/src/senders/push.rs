use async_trait::async_trait;
use chrono::Utc;
use courier_core::{credential::secret_keys, Channel, Credential, DeliveryRecord, FailureReason};
use dashmap::DashMap;
use jsonwebtoken::{encode, Algorithm, EncodingKey, Header};
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, warn};

use super::{ChannelSender, SendOutcome};
use crate::store::DeviceStore;

const FCM_SCOPE: &str = "https://www.googleapis.com/auth/firebase.messaging";
const FCM_ENDPOINT: &str = "https://fcm.googleapis.com";

#[derive(Debug, Deserialize)]
struct ServiceAccount {
  client_email: String,
  private_key: String,
  #[serde(default = "ServiceAccount::default_token_uri")]
  token_uri: String,
}

impl ServiceAccount {
  fn default_token_uri() -> String {
    "https://oauth2.googleapis.com/token".to_string()
  }
}

#[derive(Debug, Serialize)]
struct GrantClaims<'a> {
  iss: &'a str,
  scope: &'a str,
  aud: &'a str,
  exp: i64,
  iat: i64,
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
  access_token: String,
  #[serde(default)]
  expires_in: u64,
}

struct CachedToken {
  token: String,
  expires_at: Instant,
}

/// FCM push sender.
///
/// One messaging identity per tenant credential (the service-account JSON);
/// access tokens are cached per credential until shortly before expiry.
pub struct PushSender {
  http: reqwest::Client,
  devices: Arc<dyn DeviceStore>,
  tokens: DashMap<i64, CachedToken>,
  endpoint: String,
}

impl PushSender {
  pub fn new(devices: Arc<dyn DeviceStore>) -> Self {
    Self {
      http: reqwest::Client::builder()
        .timeout(Duration::from_secs(30))
        .build()
        .unwrap_or_default(),
      devices,
      tokens: DashMap::new(),
      endpoint: FCM_ENDPOINT.to_string(),
    }
  }

  async fn access_token(&self, credential: &Credential) -> Result<String, SendOutcome> {
    if let Some(cached) = self.tokens.get(&credential.id) {
      if cached.expires_at > Instant::now() {
        return Ok(cached.token.clone());
      }
    }

    let raw = credential
      .secret(secret_keys::FCM_SERVICE_ACCOUNT)
      .ok_or_else(|| {
        SendOutcome::failure(FailureReason::AuthError, Some("missing service account".into()))
      })?;
    let account: ServiceAccount = serde_json::from_str(raw).map_err(|e| {
      SendOutcome::failure(
        FailureReason::AuthError,
        Some(format!("invalid service account JSON: {}", e)),
      )
    })?;

    let key = EncodingKey::from_rsa_pem(account.private_key.as_bytes()).map_err(|e| {
      SendOutcome::failure(
        FailureReason::AuthError,
        Some(format!("invalid service account key: {}", e)),
      )
    })?;

    let now = Utc::now().timestamp();
    let assertion = encode(
      &Header::new(Algorithm::RS256),
      &GrantClaims {
        iss: &account.client_email,
        scope: FCM_SCOPE,
        aud: &account.token_uri,
        exp: now + 3600,
        iat: now,
      },
      &key,
    )
    .map_err(|e| SendOutcome::failure(FailureReason::AuthError, Some(e.to_string())))?;

    let response = self
      .http
      .post(&account.token_uri)
      .form(&[
        ("grant_type", "urn:ietf:params:oauth:grant-type:jwt-bearer"),
        ("assertion", assertion.as_str()),
      ])
      .send()
      .await
      .map_err(|e| SendOutcome::failure(FailureReason::NetworkError, Some(e.to_string())))?;

    if !response.status().is_success() {
      let body = response.text().await.unwrap_or_default();
      return Err(SendOutcome::failure(FailureReason::AuthError, Some(body)));
    }

    let token: TokenResponse = response
      .json()
      .await
      .map_err(|e| SendOutcome::failure(FailureReason::AuthError, Some(e.to_string())))?;

    let ttl = token.expires_in.max(120) - 60;
    self.tokens.insert(
      credential.id,
      CachedToken {
        token: token.access_token.clone(),
        expires_at: Instant::now() + Duration::from_secs(ttl),
      },
    );

    Ok(token.access_token)
  }

  fn build_message(record: &DeliveryRecord) -> Value {
    json!({
      "message": {
        "token": record.recipient,
        "notification": {
          "title": record.content.subject.clone().unwrap_or_default(),
          "body": record.content.body,
        },
        "data": data_map(record.content.data.as_ref()),
        "android": {
          "priority": "high",
          "notification": {"sound": "default"}
        },
        "apns": {
          "payload": {"aps": {"sound": "default"}}
        },
        "webpush": {
          "headers": {"Urgency": "high"}
        }
      }
    })
  }

  async fn classify_error(
    &self,
    record: &DeliveryRecord,
    status: StatusCode,
    body: &str,
  ) -> SendOutcome {
    if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
      return SendOutcome::failure(FailureReason::AuthError, Some(body.to_string()));
    }

    let error_code = fcm_error_code(body);
    match error_code.as_deref() {
      Some("UNREGISTERED") | Some("NOT_FOUND") => {
        // Dead token: stop targeting this device
        if let Err(e) = self
          .devices
          .mark_inactive(&record.tenant_id, &record.recipient)
          .await
        {
          warn!(record = %record.id, "failed to deactivate device token: {}", e);
        }
        SendOutcome::failure_with(FailureReason::ProviderError, false, Some(body.to_string()))
      }
      Some("QUOTA_EXCEEDED") | Some("UNAVAILABLE") | Some("INTERNAL") => {
        SendOutcome::failure(FailureReason::ProviderError, Some(body.to_string()))
      }
      Some("INVALID_ARGUMENT") => {
        SendOutcome::failure(FailureReason::ContentError, Some(body.to_string()))
      }
      _ if status.is_server_error() => {
        SendOutcome::failure(FailureReason::ProviderError, Some(body.to_string()))
      }
      _ => SendOutcome::failure_with(FailureReason::ProviderError, false, Some(body.to_string())),
    }
  }
}

#[async_trait]
impl ChannelSender for PushSender {
  fn channel(&self) -> Channel {
    Channel::Push
  }

  async fn send(&self, credential: Option<&Credential>, record: &DeliveryRecord) -> SendOutcome {
    let Some(credential) = credential else {
      return SendOutcome::failure(FailureReason::AuthError, Some("missing push credential".into()));
    };

    let project_id = match credential.secret(secret_keys::FCM_PROJECT_ID) {
      Some(project) => project,
      None => {
        return SendOutcome::failure(FailureReason::AuthError, Some("missing project_id".into()))
      }
    };

    let token = match self.access_token(credential).await {
      Ok(token) => token,
      Err(outcome) => return outcome,
    };

    let url = format!(
      "{}/v1/projects/{}/messages:send",
      self.endpoint.trim_end_matches('/'),
      project_id
    );

    let result = self
      .http
      .post(&url)
      .bearer_auth(token)
      .json(&Self::build_message(record))
      .send()
      .await;

    match result {
      Ok(response) => {
        let status = response.status();
        let body = response.text().await.unwrap_or_default();

        if status.is_success() {
          debug!(record = %record.id, "FCM accepted message");
          SendOutcome::success(Some(body))
        } else {
          self.classify_error(record, status, &body).await
        }
      }
      Err(e) if e.is_timeout() || e.is_connect() => {
        SendOutcome::failure(FailureReason::NetworkError, Some(e.to_string()))
      }
      Err(e) => SendOutcome::failure(FailureReason::ProviderError, Some(e.to_string())),
    }
  }
}

/// FCM requires string values in the data map; drop the email-only html blob
fn data_map(data: Option<&Value>) -> Map<String, Value> {
  let mut out = Map::new();
  if let Some(Value::Object(map)) = data {
    for (k, v) in map {
      if k == "html" {
        continue;
      }
      let value = match v {
        Value::String(s) => s.clone(),
        other => other.to_string(),
      };
      out.insert(k.clone(), Value::String(value));
    }
  }
  out
}

/// Pull `error.details[].errorCode` (v1) or `error.status` from an FCM
/// error body
fn fcm_error_code(body: &str) -> Option<String> {
  let parsed: Value = serde_json::from_str(body).ok()?;
  let error = parsed.get("error")?;

  if let Some(details) = error.get("details").and_then(Value::as_array) {
    for detail in details {
      if let Some(code) = detail.get("errorCode").and_then(Value::as_str) {
        return Some(code.to_string());
      }
    }
  }

  error.get("status").and_then(Value::as_str).map(str::to_string)
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::store::MemoryDeviceStore;
  use courier_core::{RenderedContent, TenantId, UserId};

  fn record() -> DeliveryRecord {
    DeliveryRecord::new(
      TenantId::new("t1"),
      Channel::Push,
      "device-token-1",
      RenderedContent {
        subject: Some("Task".into()),
        body: "Assigned".into(),
        data: Some(json!({"task_id": "T-9", "badge": 1})),
      },
      json!({}),
    )
  }

  #[test]
  fn test_fcm_error_code_extraction() {
    let body = r#"{"error": {"status": "NOT_FOUND", "details": [{"@type": "type.googleapis.com/google.firebase.fcm.v1.FcmError", "errorCode": "UNREGISTERED"}]}}"#;
    assert_eq!(fcm_error_code(body).as_deref(), Some("UNREGISTERED"));

    let body = r#"{"error": {"status": "UNAVAILABLE"}}"#;
    assert_eq!(fcm_error_code(body).as_deref(), Some("UNAVAILABLE"));
  }

  #[test]
  fn test_data_map_stringifies_values() {
    let map = data_map(Some(&json!({"task_id": "T-9", "badge": 1, "html": "<p>x</p>"})));
    assert_eq!(map.get("task_id").unwrap(), "T-9");
    assert_eq!(map.get("badge").unwrap(), "1");
    assert!(!map.contains_key("html"));
  }

  #[tokio::test]
  async fn test_unregistered_deactivates_device_token() {
    let devices = Arc::new(MemoryDeviceStore::new());
    let tenant = TenantId::new("t1");
    devices
      .register(&tenant, UserId(1), "device-token-1", "android")
      .await
      .unwrap();

    let sender = PushSender::new(devices.clone());
    let body = r#"{"error": {"details": [{"errorCode": "UNREGISTERED"}]}}"#;
    let outcome = sender
      .classify_error(&record(), StatusCode::NOT_FOUND, body)
      .await;

    assert!(matches!(
      outcome,
      SendOutcome::Failure {
        reason: FailureReason::ProviderError,
        retriable: false,
        ..
      }
    ));
    assert!(devices.active_tokens(&tenant, UserId(1)).await.unwrap().is_empty());
  }

  #[tokio::test]
  async fn test_quota_exceeded_is_retriable() {
    let sender = PushSender::new(Arc::new(MemoryDeviceStore::new()));
    let body = r#"{"error": {"details": [{"errorCode": "QUOTA_EXCEEDED"}]}}"#;
    let outcome = sender
      .classify_error(&record(), StatusCode::TOO_MANY_REQUESTS, body)
      .await;

    assert!(matches!(outcome, SendOutcome::Failure { retriable: true, .. }));
  }
}
