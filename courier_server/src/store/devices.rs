use async_trait::async_trait;
use chrono::Utc;
use courier_core::{CoreError, TenantId, UserId};
use sqlx::{PgPool, Row};

/// Registered push device tokens, per tenant and user.
#[async_trait]
pub trait DeviceStore: Send + Sync {
  async fn register(
    &self,
    tenant_id: &TenantId,
    user_id: UserId,
    token: &str,
    platform: &str,
  ) -> Result<(), CoreError>;

  async fn active_tokens(
    &self,
    tenant_id: &TenantId,
    user_id: UserId,
  ) -> Result<Vec<String>, CoreError>;

  /// Invoked when FCM reports a token as UNREGISTERED
  async fn mark_inactive(&self, tenant_id: &TenantId, token: &str) -> Result<(), CoreError>;
}

pub struct PgDeviceStore {
  pool: PgPool,
}

impl PgDeviceStore {
  pub fn new(pool: PgPool) -> Self {
    Self { pool }
  }
}

#[async_trait]
impl DeviceStore for PgDeviceStore {
  async fn register(
    &self,
    tenant_id: &TenantId,
    user_id: UserId,
    token: &str,
    platform: &str,
  ) -> Result<(), CoreError> {
    sqlx::query(
      "INSERT INTO device_tokens (tenant_id, user_id, token, platform, active, created_at) \
       VALUES ($1, $2, $3, $4, TRUE, $5) \
       ON CONFLICT (tenant_id, token) \
       DO UPDATE SET user_id = $2, platform = $4, active = TRUE",
    )
    .bind(tenant_id)
    .bind(user_id)
    .bind(token)
    .bind(platform)
    .bind(Utc::now())
    .execute(&self.pool)
    .await?;

    Ok(())
  }

  async fn active_tokens(
    &self,
    tenant_id: &TenantId,
    user_id: UserId,
  ) -> Result<Vec<String>, CoreError> {
    let rows = sqlx::query(
      "SELECT token FROM device_tokens \
       WHERE tenant_id = $1 AND user_id = $2 AND active = TRUE",
    )
    .bind(tenant_id)
    .bind(user_id)
    .fetch_all(&self.pool)
    .await?;

    Ok(rows.iter().map(|row| row.get("token")).collect())
  }

  async fn mark_inactive(&self, tenant_id: &TenantId, token: &str) -> Result<(), CoreError> {
    sqlx::query(
      "UPDATE device_tokens SET active = FALSE \
       WHERE tenant_id = $1 AND token = $2",
    )
    .bind(tenant_id)
    .bind(token)
    .execute(&self.pool)
    .await?;

    Ok(())
  }
}
