use anyhow::Result;
use courier_core::{AccessClaims, SecretCipher, TokenManager, TokenVerifier};
use sqlx::PgPool;
use std::ops::Deref;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

use crate::cache::{BrandingCache, CredentialCache, IdentityClient};
use crate::config::AppConfig;
use crate::error::ServerError;
use crate::hub::Hub;
use crate::queue::DeliveryQueue;
use crate::store::{
  ChatStore, DeliveryStore, DeviceStore, PgChatStore, PgCredentialStore, PgDeliveryStore,
  PgDeviceStore, PgTemplateStore, TemplateStore,
};

#[derive(Clone)]
pub struct AppState {
  inner: Arc<AppStateInner>,
}

pub struct AppStateInner {
  pub config: AppConfig,
  pub hub: Arc<Hub>,
  pub deliveries: Arc<dyn DeliveryStore>,
  pub templates: Arc<dyn TemplateStore>,
  pub chat: Arc<dyn ChatStore>,
  pub devices: Arc<dyn DeviceStore>,
  pub credentials: Arc<CredentialCache>,
  pub branding: Arc<BrandingCache>,
  pub queue: Arc<DeliveryQueue>,
  token_manager: TokenManager,
}

impl Deref for AppState {
  type Target = AppStateInner;

  fn deref(&self) -> &Self::Target {
    &self.inner
  }
}

impl TokenVerifier for AppState {
  type Error = ServerError;

  fn verify_token(&self, token: &str) -> Result<AccessClaims, Self::Error> {
    self
      .inner
      .token_manager
      .verify_token(token)
      .map_err(|e| {
        debug!("token verification failed: {}", e);
        ServerError::AuthenticationFailed(e.to_string())
      })
  }
}

impl AppState {
  /// Production constructor: Postgres-backed stores, migrations applied.
  pub async fn try_new_async(config: AppConfig, cipher: Arc<dyn SecretCipher>) -> Result<Self> {
    let pool = PgPool::connect(&config.database.url).await?;
    sqlx::migrate!("../migrations").run(&pool).await?;

    let deliveries: Arc<dyn DeliveryStore> = Arc::new(PgDeliveryStore::new(pool.clone()));
    let templates: Arc<dyn TemplateStore> = Arc::new(PgTemplateStore::new(pool.clone()));
    let chat: Arc<dyn ChatStore> = Arc::new(PgChatStore::new(pool.clone()));
    let devices: Arc<dyn DeviceStore> = Arc::new(PgDeviceStore::new(pool.clone()));
    let credential_store = Arc::new(PgCredentialStore::new(pool, cipher));

    Self::assemble(config, deliveries, templates, chat, devices, credential_store)
  }

  /// Assemble the state from explicit store implementations; tests use this
  /// with the in-memory stores.
  pub fn assemble(
    config: AppConfig,
    deliveries: Arc<dyn DeliveryStore>,
    templates: Arc<dyn TemplateStore>,
    chat: Arc<dyn ChatStore>,
    devices: Arc<dyn DeviceStore>,
    credential_store: Arc<dyn crate::store::CredentialStore>,
  ) -> Result<Self> {
    let token_manager = TokenManager::new(&config.auth.jwt_secret)?;
    let hub = Arc::new(Hub::new());
    let queue = Arc::new(DeliveryQueue::new(deliveries.clone()));

    let positive_ttl = Duration::from_secs(config.identity.positive_ttl_secs);
    let negative_ttl = Duration::from_secs(config.identity.negative_ttl_secs);

    let credentials = Arc::new(CredentialCache::new(
      credential_store,
      config.defaults.clone(),
      positive_ttl,
      negative_ttl,
      config.delivery.auth_failure_threshold,
    ));
    let branding = Arc::new(BrandingCache::new(
      IdentityClient::new(config.identity.base_url.clone()),
      positive_ttl,
      negative_ttl,
    ));

    Ok(Self {
      inner: Arc::new(AppStateInner {
        config,
        hub,
        deliveries,
        templates,
        chat,
        devices,
        credentials,
        branding,
        queue,
        token_manager,
      }),
    })
  }

  pub fn config(&self) -> &AppConfig {
    &self.config
  }

  /// Issue a token; used by tooling and the test suite (the identity
  /// service owns issuance in production)
  pub fn issue_token(
    &self,
    user_id: courier_core::UserId,
    tenant_id: courier_core::TenantId,
  ) -> Result<String, ServerError> {
    Ok(self.inner.token_manager.generate_token(user_id, tenant_id)?)
  }

  /// Direct send, bypassing event intake: render with the tenant's
  /// template and branding, then enqueue. This is the path behind the
  /// admin surface's record-creation contract.
  pub async fn send_direct(
    &self,
    tenant_id: courier_core::TenantId,
    channel: courier_core::Channel,
    template_name: &str,
    context: serde_json::Map<String, serde_json::Value>,
    recipient: String,
  ) -> Result<courier_core::DeliveryId, ServerError> {
    let template =
      crate::store::resolve_or_seed(self.templates.as_ref(), &tenant_id, template_name, channel)
        .await?
        .ok_or_else(|| {
          ServerError::TemplateMissing(format!("{}/{}", template_name, channel))
        })?;

    let branding = self.branding.get_or_fallback(&tenant_id).await;
    let content =
      crate::events::dispatcher::render_for_channel(&template, &context, channel, &branding);

    let record = courier_core::DeliveryRecord {
      max_retries: self.config.delivery.max_retries,
      ..courier_core::DeliveryRecord::new(
        tenant_id,
        channel,
        recipient,
        content,
        serde_json::Value::Object(context),
      )
    };
    let id = record.id;
    self.queue.enqueue(record).await?;
    Ok(id)
  }
}
