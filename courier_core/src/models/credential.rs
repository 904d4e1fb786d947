use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use super::channel::Channel;
use super::ids::TenantId;

/// Channel secrets for a `(tenant, channel)` pair.
///
/// At most one credential row is active per pair; creating a new one
/// supersedes the previous. `custom` marks operator-provisioned credentials,
/// which never fall back to system defaults on failure.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Credential {
  pub id: i64,
  pub tenant_id: TenantId,
  pub channel: Channel,
  /// Decrypted secret map; only ever materialized in memory
  pub secrets: BTreeMap<String, String>,
  pub custom: bool,
  pub active: bool,
  pub created_at: DateTime<Utc>,
}

impl Credential {
  pub fn secret(&self, key: &str) -> Option<&str> {
    self.secrets.get(key).map(String::as_str)
  }

  /// Required-field accessor used by senders when building transports
  pub fn require(&self, key: &str) -> Result<&str, crate::error::CoreError> {
    self.secret(key).ok_or_else(|| {
      crate::error::CoreError::Validation(format!(
        "credential for {}/{} is missing `{}`",
        self.tenant_id, self.channel, key
      ))
    })
  }
}

/// Keys every channel's secret map is expected to carry. The defaults
/// section of the configuration mirrors this layout.
pub mod secret_keys {
  pub const SMTP_HOST: &str = "smtp_host";
  pub const SMTP_PORT: &str = "smtp_port";
  pub const SMTP_USERNAME: &str = "smtp_username";
  pub const SMTP_PASSWORD: &str = "smtp_password";
  pub const SMTP_FROM: &str = "smtp_from";
  pub const SMTP_USE_TLS: &str = "smtp_use_tls";

  pub const SMS_ACCOUNT_SID: &str = "account_sid";
  pub const SMS_AUTH_TOKEN: &str = "auth_token";
  pub const SMS_FROM_NUMBER: &str = "from_number";

  pub const FCM_SERVICE_ACCOUNT: &str = "service_account_json";
  pub const FCM_PROJECT_ID: &str = "project_id";
}

/// Secret map fields that are stored encrypted at rest
pub fn is_sensitive(key: &str) -> bool {
  matches!(
    key,
    secret_keys::SMTP_PASSWORD | secret_keys::SMS_AUTH_TOKEN | secret_keys::FCM_SERVICE_ACCOUNT
  )
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_require_missing_key() {
    let credential = Credential {
      id: 1,
      tenant_id: TenantId::new("t1"),
      channel: Channel::Sms,
      secrets: BTreeMap::new(),
      custom: false,
      active: true,
      created_at: Utc::now(),
    };

    assert!(credential.require(secret_keys::SMS_ACCOUNT_SID).is_err());
  }

  #[test]
  fn test_sensitive_classification() {
    assert!(is_sensitive(secret_keys::SMTP_PASSWORD));
    assert!(is_sensitive(secret_keys::SMS_AUTH_TOKEN));
    assert!(!is_sensitive(secret_keys::SMTP_HOST));
  }
}
