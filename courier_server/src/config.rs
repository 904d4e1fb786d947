use anyhow::{bail, Result};
use serde::{Deserialize, Serialize};
use std::env;
use std::fs::File;

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct AppConfig {
  pub server: ServerConfig,
  pub auth: AuthConfig,
  pub database: DatabaseConfig,
  pub messaging: MessagingConfig,
  pub identity: IdentityConfig,
  pub delivery: DeliveryConfig,
  #[serde(default)]
  pub defaults: ChannelDefaults,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct ServerConfig {
  pub port: u16,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct AuthConfig {
  /// Shared secret for verifying identity-service access tokens
  pub jwt_secret: String,
  /// 32-byte key handed to the secret-cipher capability; absent means the
  /// pass-through cipher is used
  #[serde(default)]
  pub encryption_key: Option<String>,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct DatabaseConfig {
  pub url: String,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct MessagingConfig {
  #[serde(default = "default_true")]
  pub enabled: bool,
  pub nats: NatsConfig,
  /// Event-log topics to consume; a configurable list on top of the
  /// standard three
  #[serde(default = "MessagingConfig::default_topics")]
  pub topics: Vec<String>,
  #[serde(default = "MessagingConfig::default_group")]
  pub consumer_group: String,
  /// Per-event handler deadline
  #[serde(default = "MessagingConfig::default_handler_timeout")]
  pub handler_timeout_secs: u64,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct NatsConfig {
  pub url: String,
}

impl MessagingConfig {
  fn default_topics() -> Vec<String> {
    vec![
      "auth-events".to_string(),
      "app-events".to_string(),
      "security-events".to_string(),
    ]
  }

  fn default_group() -> String {
    "courier".to_string()
  }

  fn default_handler_timeout() -> u64 {
    15
  }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct IdentityConfig {
  /// Base URL of the identity service serving `/api/tenants/{id}/`
  pub base_url: String,
  #[serde(default = "IdentityConfig::default_positive_ttl")]
  pub positive_ttl_secs: u64,
  #[serde(default = "IdentityConfig::default_negative_ttl")]
  pub negative_ttl_secs: u64,
}

impl IdentityConfig {
  fn default_positive_ttl() -> u64 {
    300
  }

  fn default_negative_ttl() -> u64 {
    30
  }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct DeliveryConfig {
  #[serde(default = "DeliveryConfig::default_workers")]
  pub workers: usize,
  #[serde(default = "DeliveryConfig::default_max_retries")]
  pub max_retries: u32,
  #[serde(default = "DeliveryConfig::default_backoff_base")]
  pub backoff_base_secs: u64,
  #[serde(default = "DeliveryConfig::default_backoff_cap")]
  pub backoff_cap_secs: u64,
  /// Stale claims older than this revert to RETRYING; must exceed the
  /// channel send timeout
  #[serde(default = "DeliveryConfig::default_lease_timeout")]
  pub lease_timeout_secs: u64,
  #[serde(default = "DeliveryConfig::default_send_timeout")]
  pub send_timeout_secs: u64,
  #[serde(default = "DeliveryConfig::default_inapp_timeout")]
  pub inapp_timeout_secs: u64,
  /// Consecutive AUTH_ERROR count that poisons a cached custom credential;
  /// 0 disables the breaker
  #[serde(default)]
  pub auth_failure_threshold: u32,
}

impl DeliveryConfig {
  fn default_workers() -> usize {
    16
  }

  fn default_max_retries() -> u32 {
    3
  }

  fn default_backoff_base() -> u64 {
    60
  }

  fn default_backoff_cap() -> u64 {
    3600
  }

  fn default_lease_timeout() -> u64 {
    120
  }

  fn default_send_timeout() -> u64 {
    30
  }

  fn default_inapp_timeout() -> u64 {
    5
  }
}

impl Default for DeliveryConfig {
  fn default() -> Self {
    Self {
      workers: Self::default_workers(),
      max_retries: Self::default_max_retries(),
      backoff_base_secs: Self::default_backoff_base(),
      backoff_cap_secs: Self::default_backoff_cap(),
      lease_timeout_secs: Self::default_lease_timeout(),
      send_timeout_secs: Self::default_send_timeout(),
      inapp_timeout_secs: Self::default_inapp_timeout(),
      auth_failure_threshold: 0,
    }
  }
}

/// System-default channel credentials, used to synthesize auto-generated
/// credentials for tenants that have none
#[derive(Debug, Default, Serialize, Deserialize, Clone)]
pub struct ChannelDefaults {
  #[serde(default)]
  pub smtp: Option<SmtpDefaults>,
  #[serde(default)]
  pub sms: Option<SmsDefaults>,
  #[serde(default)]
  pub fcm: Option<FcmDefaults>,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct SmtpDefaults {
  pub host: String,
  pub port: u16,
  pub username: String,
  pub password: String,
  pub from: String,
  #[serde(default = "default_true")]
  pub use_tls: bool,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct SmsDefaults {
  pub account_sid: String,
  pub auth_token: String,
  pub from_number: String,
  #[serde(default = "SmsDefaults::default_api_base")]
  pub api_base: String,
}

impl SmsDefaults {
  fn default_api_base() -> String {
    "https://api.twilio.com".to_string()
  }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct FcmDefaults {
  pub project_id: String,
  pub service_account_json: String,
}

fn default_true() -> bool {
  true
}

impl AppConfig {
  /// Attempt to read from ./courier.yml, /etc/config/courier.yml, or the
  /// file named by the COURIER_CONFIG environment variable
  pub fn load() -> Result<Self> {
    let ret: std::result::Result<AppConfig, serde_yaml::Error> = match (
      File::open("courier.yml"),
      File::open("/etc/config/courier.yml"),
      env::var("COURIER_CONFIG"),
    ) {
      (Ok(reader), _, _) => serde_yaml::from_reader(reader),
      (_, Ok(reader), _) => serde_yaml::from_reader(reader),
      (_, _, Ok(path)) => serde_yaml::from_reader(File::open(path)?),
      _ => bail!("config file not found"),
    };

    Ok(ret?)
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_minimal_config_parses_with_defaults() {
    let yaml = r#"
server:
  port: 6690
auth:
  jwt_secret: test-secret
database:
  url: postgres://localhost/courier
messaging:
  nats:
    url: nats://localhost:4222
identity:
  base_url: http://localhost:8000
delivery: {}
"#;

    let config: AppConfig = serde_yaml::from_str(yaml).unwrap();
    assert_eq!(config.delivery.workers, 16);
    assert_eq!(config.delivery.max_retries, 3);
    assert_eq!(config.delivery.backoff_base_secs, 60);
    assert_eq!(config.delivery.lease_timeout_secs, 120);
    assert_eq!(config.identity.positive_ttl_secs, 300);
    assert_eq!(config.identity.negative_ttl_secs, 30);
    assert_eq!(config.messaging.topics.len(), 3);
    assert!(config.messaging.enabled);
    assert_eq!(config.delivery.auth_failure_threshold, 0);
  }
}
