use courier_core::{CoreError, TenantBranding, TenantId};
use reqwest::StatusCode;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

use super::TtlCache;

/// Client for the external identity service's tenant endpoint.
#[derive(Clone)]
pub struct IdentityClient {
  http: reqwest::Client,
  base_url: String,
}

impl IdentityClient {
  pub fn new(base_url: impl Into<String>) -> Self {
    Self {
      http: reqwest::Client::builder()
        .timeout(Duration::from_secs(10))
        .build()
        .unwrap_or_default(),
      base_url: base_url.into(),
    }
  }

  /// `GET /api/tenants/{id}/`; Ok(None) on 404 so the cache can hold a
  /// negative entry.
  pub async fn fetch_branding(
    &self,
    tenant_id: &TenantId,
  ) -> Result<Option<TenantBranding>, CoreError> {
    let url = format!(
      "{}/api/tenants/{}/",
      self.base_url.trim_end_matches('/'),
      tenant_id
    );

    let response = self
      .http
      .get(&url)
      .send()
      .await
      .map_err(|e| CoreError::Internal(format!("identity service request failed: {}", e)))?;

    match response.status() {
      StatusCode::NOT_FOUND => {
        debug!(tenant = %tenant_id, "identity service has no branding for tenant");
        Ok(None)
      }
      status if status.is_success() => {
        let branding = response
          .json::<TenantBranding>()
          .await
          .map_err(|e| CoreError::Internal(format!("invalid branding payload: {}", e)))?;
        Ok(Some(branding))
      }
      status => Err(CoreError::Internal(format!(
        "identity service returned {} for tenant {}",
        status, tenant_id
      ))),
    }
  }
}

/// Read-through branding cache keyed on tenant; positive TTL 300 s and
/// negative TTL 30 s by default.
pub struct BrandingCache {
  cache: TtlCache<TenantId, TenantBranding>,
  client: IdentityClient,
}

impl BrandingCache {
  pub fn new(client: IdentityClient, positive_ttl: Duration, negative_ttl: Duration) -> Self {
    Self {
      cache: TtlCache::new(positive_ttl, negative_ttl),
      client,
    }
  }

  /// Branding for the tenant, or None when the identity service has none.
  /// A fetch error is logged and treated as a (non-cached) miss so render
  /// paths can fall back without delaying delivery.
  pub async fn get(&self, tenant_id: &TenantId) -> Option<Arc<TenantBranding>> {
    let client = self.client.clone();
    let tenant = tenant_id.clone();

    match self
      .cache
      .get_or_fetch(tenant_id.clone(), move || async move {
        client.fetch_branding(&tenant).await
      })
      .await
    {
      Ok(branding) => branding,
      Err(e) => {
        warn!(tenant = %tenant_id, "branding fetch failed: {}", e);
        None
      }
    }
  }

  /// Branding with the tenant-id-prefixed fallback applied
  pub async fn get_or_fallback(&self, tenant_id: &TenantId) -> TenantBranding {
    match self.get(tenant_id).await {
      Some(branding) => (*branding).clone(),
      None => TenantBranding::fallback(tenant_id),
    }
  }
}
