use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::channel::Channel;
use super::ids::TenantId;

/// Version-keyed, per-(tenant, name, channel) message template with named
/// placeholders.
///
/// Placeholders referenced in `subject`/`body`/`data` must be a subset of the
/// declared `placeholders` set; unknown placeholders substitute to the
/// literal marker at render time.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Template {
  pub id: i64,
  pub tenant_id: TenantId,
  pub name: String,
  pub channel: Channel,
  pub subject: Option<String>,
  pub body: String,
  /// Channel-specific structured payload with placeholder markers in its
  /// string values
  pub data: Option<Value>,
  pub version: i32,
  pub placeholders: Vec<String>,
  pub active: bool,
  pub created_at: DateTime<Utc>,
}

impl Template {
  /// Builder used by the seeding path and tests; the store assigns id,
  /// version and created_at on insert.
  pub fn draft(
    tenant_id: TenantId,
    name: impl Into<String>,
    channel: Channel,
    subject: Option<&str>,
    body: impl Into<String>,
    placeholders: &[&str],
  ) -> Self {
    Self {
      id: 0,
      tenant_id,
      name: name.into(),
      channel,
      subject: subject.map(str::to_string),
      body: body.into(),
      data: None,
      version: 1,
      placeholders: placeholders.iter().map(|p| p.to_string()).collect(),
      active: true,
      created_at: Utc::now(),
    }
  }

  pub fn with_data(mut self, data: Value) -> Self {
    self.data = Some(data);
    self
  }
}
