use serde::{Deserialize, Serialize};

use super::ids::TenantId;

/// Per-tenant visual identity, fetched from the identity service and cached.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TenantBranding {
  pub name: String,
  pub logo_url: Option<String>,
  pub primary_color: String,
  pub secondary_color: String,
  pub email_from: Option<String>,
  pub about: Option<String>,
}

impl TenantBranding {
  /// Tenant-id-prefixed defaults used when branding cannot be resolved
  pub fn fallback(tenant_id: &TenantId) -> Self {
    Self {
      name: format!("Tenant {}", tenant_id.short()),
      logo_url: None,
      primary_color: "#2563eb".to_string(),
      secondary_color: "#64748b".to_string(),
      email_from: None,
      about: None,
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_fallback_uses_short_tenant_id() {
    let branding = TenantBranding::fallback(&TenantId::new("a1b2c3d4e5f6"));
    assert_eq!(branding.name, "Tenant a1b2c3d4");
    assert!(branding.logo_url.is_none());
  }
}
