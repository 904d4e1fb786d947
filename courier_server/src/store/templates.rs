use async_trait::async_trait;
use chrono::Utc;
use courier_core::{Channel, CoreError, Template, TenantId};
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Row};
use tracing::info;

/// Version-keyed template store, `(tenant, name, channel)` resolving to the
/// highest active version.
#[async_trait]
pub trait TemplateStore: Send + Sync {
  async fn resolve(
    &self,
    tenant_id: &TenantId,
    name: &str,
    channel: Channel,
  ) -> Result<Option<Template>, CoreError>;

  /// Store a new version and deactivate older versions of the same
  /// `(tenant, name, channel)`.
  async fn upsert(&self, template: Template) -> Result<Template, CoreError>;
}

/// Resolve a template, seeding the built-in default for known event types on
/// first touch (tenant auto-provisioning).
pub async fn resolve_or_seed(
  store: &dyn TemplateStore,
  tenant_id: &TenantId,
  name: &str,
  channel: Channel,
) -> Result<Option<Template>, CoreError> {
  if let Some(template) = store.resolve(tenant_id, name, channel).await? {
    return Ok(Some(template));
  }

  match defaults::builtin(tenant_id.clone(), name, channel) {
    Some(template) => {
      info!(
        tenant = %tenant_id,
        template = name,
        channel = %channel,
        "seeding default template for tenant"
      );
      Ok(Some(store.upsert(template).await?))
    }
    None => Ok(None),
  }
}

pub struct PgTemplateStore {
  pool: PgPool,
}

impl PgTemplateStore {
  pub fn new(pool: PgPool) -> Self {
    Self { pool }
  }

  fn row_to_template(row: &PgRow) -> Result<Template, CoreError> {
    let placeholders: Vec<String> = row
      .get::<serde_json::Value, _>("placeholders")
      .as_array()
      .map(|items| {
        items
          .iter()
          .filter_map(|v| v.as_str().map(str::to_string))
          .collect()
      })
      .unwrap_or_default();

    Ok(Template {
      id: row.get("id"),
      tenant_id: row.get("tenant_id"),
      name: row.get("name"),
      channel: row.get("channel"),
      subject: row.get("subject"),
      body: row.get("body"),
      data: row.get("data"),
      version: row.get("version"),
      placeholders,
      active: row.get("active"),
      created_at: row.get("created_at"),
    })
  }
}

#[async_trait]
impl TemplateStore for PgTemplateStore {
  async fn resolve(
    &self,
    tenant_id: &TenantId,
    name: &str,
    channel: Channel,
  ) -> Result<Option<Template>, CoreError> {
    let row = sqlx::query(
      "SELECT id, tenant_id, name, channel, subject, body, data, version, placeholders, \
              active, created_at \
       FROM templates \
       WHERE tenant_id = $1 AND name = $2 AND channel = $3 AND active = TRUE \
       ORDER BY version DESC \
       LIMIT 1",
    )
    .bind(tenant_id)
    .bind(name)
    .bind(channel)
    .fetch_optional(&self.pool)
    .await?;

    row.as_ref().map(Self::row_to_template).transpose()
  }

  async fn upsert(&self, template: Template) -> Result<Template, CoreError> {
    let mut tx = self.pool.begin().await?;

    let next_version: i32 = sqlx::query(
      "SELECT COALESCE(MAX(version), 0) + 1 AS next FROM templates \
       WHERE tenant_id = $1 AND name = $2 AND channel = $3",
    )
    .bind(&template.tenant_id)
    .bind(&template.name)
    .bind(template.channel)
    .fetch_one(&mut *tx)
    .await?
    .get("next");

    sqlx::query(
      "UPDATE templates SET active = FALSE \
       WHERE tenant_id = $1 AND name = $2 AND channel = $3",
    )
    .bind(&template.tenant_id)
    .bind(&template.name)
    .bind(template.channel)
    .execute(&mut *tx)
    .await?;

    let placeholders = serde_json::to_value(&template.placeholders)?;
    let row = sqlx::query(
      "INSERT INTO templates \
         (tenant_id, name, channel, subject, body, data, version, placeholders, active, created_at) \
       VALUES ($1, $2, $3, $4, $5, $6, $7, $8, TRUE, $9) \
       RETURNING id, created_at",
    )
    .bind(&template.tenant_id)
    .bind(&template.name)
    .bind(template.channel)
    .bind(&template.subject)
    .bind(&template.body)
    .bind(&template.data)
    .bind(next_version)
    .bind(placeholders)
    .bind(Utc::now())
    .fetch_one(&mut *tx)
    .await?;

    tx.commit().await?;

    Ok(Template {
      id: row.get("id"),
      version: next_version,
      created_at: row.get("created_at"),
      active: true,
      ..template
    })
  }
}

/// Built-in default templates seeded for new tenants
pub mod defaults {
  use super::*;
  use serde_json::json;

  /// Default template for a `(event type, channel)` pair, or None when the
  /// pair has no built-in.
  pub fn builtin(tenant_id: TenantId, name: &str, channel: Channel) -> Option<Template> {
    let template = match (name, channel) {
      ("user.registration.completed", Channel::Email) => Template::draft(
        tenant_id,
        name,
        channel,
        Some("Welcome, {first_name}!"),
        "<p>Hi {first_name},</p><p>Your account is ready. We're glad to have you.</p>",
        &["first_name"],
      ),
      ("user.registration.completed", Channel::InApp) => Template::draft(
        tenant_id,
        name,
        channel,
        Some("Welcome aboard"),
        "Welcome, {first_name}! Your account is ready.",
        &["first_name"],
      ),
      ("user.password.reset.requested", Channel::Email) => Template::draft(
        tenant_id,
        name,
        channel,
        Some("Password reset requested"),
        "<p>Hi {first_name},</p><p>Use this link to reset your password: {reset_url}</p>\
         <p>The link expires at {expires_at}.</p>",
        &["first_name", "reset_url", "expires_at"],
      ),
      ("user.login.succeeded", Channel::InApp) => Template::draft(
        tenant_id,
        name,
        channel,
        None,
        "New sign-in to your account from {ip_address} at {occurred_at}.",
        &["ip_address", "occurred_at"],
      ),
      ("user.login.failed", Channel::Email) => Template::draft(
        tenant_id,
        name,
        channel,
        Some("Failed sign-in attempt"),
        "<p>A sign-in to your account failed from {ip_address} at {occurred_at}. \
         If this wasn't you, consider resetting your password.</p>",
        &["ip_address", "occurred_at"],
      ),
      ("user.login.failed", Channel::Sms) => Template::draft(
        tenant_id,
        name,
        channel,
        None,
        "Failed sign-in to your account from {ip_address}. Not you? Reset your password.",
        &["ip_address"],
      ),
      ("auth.2fa.code.requested", Channel::Sms) => Template::draft(
        tenant_id,
        name,
        channel,
        None,
        "Your verification code is {code}. It expires in {ttl_minutes} minutes.",
        &["code", "ttl_minutes"],
      ),
      ("auth.2fa.code.requested", Channel::Email) => Template::draft(
        tenant_id,
        name,
        channel,
        Some("Your verification code"),
        "<p>Your verification code is <strong>{code}</strong>. \
         It expires in {ttl_minutes} minutes.</p>",
        &["code", "ttl_minutes"],
      ),
      ("auth.2fa.attempt.failed", Channel::Email) => Template::draft(
        tenant_id,
        name,
        channel,
        Some("Failed two-factor attempt"),
        "<p>A two-factor verification for your account failed at {occurred_at}.</p>",
        &["occurred_at"],
      ),
      ("auth.2fa.method.changed", Channel::Email) => Template::draft(
        tenant_id,
        name,
        channel,
        Some("Two-factor method changed"),
        "<p>Your two-factor method was changed to {method} at {occurred_at}. \
         If this wasn't you, contact support immediately.</p>",
        &["method", "occurred_at"],
      ),
      ("auth.2fa.method.changed", Channel::InApp) => Template::draft(
        tenant_id,
        name,
        channel,
        Some("Two-factor method changed"),
        "Your two-factor method is now {method}.",
        &["method"],
      ),
      ("invoice.payment.failed", Channel::Email) => Template::draft(
        tenant_id,
        name,
        channel,
        Some("Payment failed for invoice {invoice_number}"),
        "<p>Hi {first_name},</p><p>The payment of {amount} for invoice {invoice_number} \
         failed. Please update your payment method.</p>",
        &["first_name", "amount", "invoice_number"],
      ),
      ("invoice.payment.failed", Channel::InApp) => Template::draft(
        tenant_id,
        name,
        channel,
        Some("Payment failed"),
        "Payment of {amount} for invoice {invoice_number} failed.",
        &["amount", "invoice_number"],
      ),
      ("task.assigned", Channel::Push) => Template::draft(
        tenant_id,
        name,
        channel,
        Some("Task assigned: {task_title}"),
        "{assigner_name} assigned you \"{task_title}\".",
        &["assigner_name", "task_title", "task_id"],
      )
      .with_data(json!({"task_id": "{task_id}", "kind": "task_assigned"})),
      ("task.assigned", Channel::InApp) => Template::draft(
        tenant_id,
        name,
        channel,
        Some("Task assigned"),
        "{assigner_name} assigned you \"{task_title}\".",
        &["assigner_name", "task_title"],
      ),
      ("comment.mentioned", Channel::Push) => Template::draft(
        tenant_id,
        name,
        channel,
        Some("{author_name} mentioned you"),
        "{author_name} mentioned you: {comment_preview}",
        &["author_name", "comment_preview", "comment_id"],
      )
      .with_data(json!({"comment_id": "{comment_id}", "kind": "mention"})),
      ("comment.mentioned", Channel::InApp) => Template::draft(
        tenant_id,
        name,
        channel,
        Some("You were mentioned"),
        "{author_name} mentioned you: {comment_preview}",
        &["author_name", "comment_preview"],
      ),
      ("content.liked", Channel::InApp) => Template::draft(
        tenant_id,
        name,
        channel,
        None,
        "{liker_name} liked your {content_kind}.",
        &["liker_name", "content_kind"],
      ),
      ("user.document.expiry.warning", Channel::Email) => Template::draft(
        tenant_id,
        name,
        channel,
        Some("{document_name} expires soon"),
        "<p>Hi {first_name},</p><p>Your document \"{document_name}\" expires at \
         {expires_at}. Renew it to avoid interruption.</p>",
        &["first_name", "document_name", "expires_at"],
      ),
      ("user.document.expiry.warning", Channel::InApp) => Template::draft(
        tenant_id,
        name,
        channel,
        Some("Document expiring"),
        "\"{document_name}\" expires at {expires_at}.",
        &["document_name", "expires_at"],
      ),
      ("user.document.expired", Channel::Email) => Template::draft(
        tenant_id,
        name,
        channel,
        Some("{document_name} has expired"),
        "<p>Hi {first_name},</p><p>Your document \"{document_name}\" expired at \
         {expired_at}.</p>",
        &["first_name", "document_name", "expired_at"],
      ),
      ("user.document.expired", Channel::InApp) => Template::draft(
        tenant_id,
        name,
        channel,
        Some("Document expired"),
        "\"{document_name}\" expired at {expired_at}.",
        &["document_name", "expired_at"],
      ),
      _ => return None,
    };

    Some(template)
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_builtin_known_pair() {
    let template = defaults::builtin(
      TenantId::new("t1"),
      "user.registration.completed",
      Channel::Email,
    )
    .unwrap();

    assert_eq!(template.channel, Channel::Email);
    assert!(template.subject.unwrap().contains("{first_name}"));
    assert!(template.placeholders.contains(&"first_name".to_string()));
  }

  #[test]
  fn test_builtin_unknown_pair() {
    assert!(defaults::builtin(TenantId::new("t1"), "user.login.succeeded", Channel::Sms).is_none());
    assert!(defaults::builtin(TenantId::new("t1"), "no.such.event", Channel::Email).is_none());
  }
}
