use async_trait::async_trait;
use chrono::Utc;
use courier_core::{
  credential::is_sensitive, Channel, CoreError, Credential, SecretCipher, TenantId,
};
use sqlx::{PgPool, Row};
use std::collections::BTreeMap;
use std::sync::Arc;

/// Store for per-(tenant, channel) channel secrets.
///
/// Sensitive fields are encrypted through the injected cipher before they
/// touch the database; reads hand back decrypted in-memory snapshots only.
#[async_trait]
pub trait CredentialStore: Send + Sync {
  /// The single active credential for the pair, if any
  async fn active(
    &self,
    tenant_id: &TenantId,
    channel: Channel,
  ) -> Result<Option<Credential>, CoreError>;

  /// Insert a new credential and deactivate any previous active row for the
  /// same `(tenant, channel)` (create supersedes).
  async fn create(
    &self,
    tenant_id: &TenantId,
    channel: Channel,
    secrets: BTreeMap<String, String>,
    custom: bool,
  ) -> Result<Credential, CoreError>;
}

pub struct PgCredentialStore {
  pool: PgPool,
  cipher: Arc<dyn SecretCipher>,
}

impl PgCredentialStore {
  pub fn new(pool: PgPool, cipher: Arc<dyn SecretCipher>) -> Self {
    Self { pool, cipher }
  }

  fn seal(&self, secrets: &BTreeMap<String, String>) -> Result<serde_json::Value, CoreError> {
    let sealed: BTreeMap<&str, String> = secrets
      .iter()
      .map(|(k, v)| {
        let stored = if is_sensitive(k) {
          hex::encode(self.cipher.encrypt(v.as_bytes()))
        } else {
          v.clone()
        };
        (k.as_str(), stored)
      })
      .collect();

    Ok(serde_json::to_value(sealed)?)
  }

  fn unseal(&self, stored: serde_json::Value) -> Result<BTreeMap<String, String>, CoreError> {
    let raw: BTreeMap<String, String> = serde_json::from_value(stored)?;
    raw
      .into_iter()
      .map(|(k, v)| {
        let value = if is_sensitive(&k) {
          let bytes = hex::decode(&v)
            .map_err(|_| CoreError::Decryption(format!("invalid ciphertext for `{}`", k)))?;
          String::from_utf8(self.cipher.decrypt(&bytes)?)
            .map_err(|e| CoreError::Decryption(e.to_string()))?
        } else {
          v
        };
        Ok((k, value))
      })
      .collect()
  }
}

#[async_trait]
impl CredentialStore for PgCredentialStore {
  async fn active(
    &self,
    tenant_id: &TenantId,
    channel: Channel,
  ) -> Result<Option<Credential>, CoreError> {
    let row = sqlx::query(
      "SELECT id, tenant_id, channel, secrets, custom, active, created_at \
       FROM credentials \
       WHERE tenant_id = $1 AND channel = $2 AND active = TRUE AND deleted_at IS NULL",
    )
    .bind(tenant_id)
    .bind(channel)
    .fetch_optional(&self.pool)
    .await?;

    match row {
      Some(row) => Ok(Some(Credential {
        id: row.get("id"),
        tenant_id: row.get("tenant_id"),
        channel: row.get("channel"),
        secrets: self.unseal(row.get("secrets"))?,
        custom: row.get("custom"),
        active: row.get("active"),
        created_at: row.get("created_at"),
      })),
      None => Ok(None),
    }
  }

  async fn create(
    &self,
    tenant_id: &TenantId,
    channel: Channel,
    secrets: BTreeMap<String, String>,
    custom: bool,
  ) -> Result<Credential, CoreError> {
    let sealed = self.seal(&secrets)?;
    let mut tx = self.pool.begin().await?;

    sqlx::query(
      "UPDATE credentials SET active = FALSE \
       WHERE tenant_id = $1 AND channel = $2 AND active = TRUE",
    )
    .bind(tenant_id)
    .bind(channel)
    .execute(&mut *tx)
    .await?;

    let now = Utc::now();
    let row = sqlx::query(
      "INSERT INTO credentials (tenant_id, channel, secrets, custom, active, created_at) \
       VALUES ($1, $2, $3, $4, TRUE, $5) \
       RETURNING id",
    )
    .bind(tenant_id)
    .bind(channel)
    .bind(sealed)
    .bind(custom)
    .bind(now)
    .fetch_one(&mut *tx)
    .await?;

    tx.commit().await?;

    Ok(Credential {
      id: row.get("id"),
      tenant_id: tenant_id.clone(),
      channel,
      secrets,
      custom,
      active: true,
      created_at: now,
    })
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use courier_core::credential::secret_keys;
  use courier_core::PlainCipher;

  #[tokio::test]
  async fn test_seal_encrypts_only_sensitive_fields() {
    let store = PgCredentialStore {
      pool: PgPool::connect_lazy("postgres://unused").unwrap(),
      cipher: Arc::new(PlainCipher),
    };

    let mut secrets = BTreeMap::new();
    secrets.insert(secret_keys::SMTP_HOST.to_string(), "smtp.test".to_string());
    secrets.insert(secret_keys::SMTP_PASSWORD.to_string(), "hunter2".to_string());

    let sealed = store.seal(&secrets).unwrap();
    assert_eq!(sealed[secret_keys::SMTP_HOST], "smtp.test");
    // Sensitive fields are hex-wrapped ciphertext, not the raw value
    assert_eq!(
      sealed[secret_keys::SMTP_PASSWORD],
      hex::encode(b"hunter2")
    );

    let unsealed = store.unseal(sealed).unwrap();
    assert_eq!(unsealed, secrets);
  }
}
